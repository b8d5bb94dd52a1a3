// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Print job orchestration.
//
// A job is first turned into a plan: a flat list of submissions, waits for
// the printer to go idle, and checkpoints to hand back to the caller. The
// orchestrator then walks the plan one checkpoint at a time, so the caller
// decides when the next stretch runs (for instance after the operator has
// flipped the paper stack for the second side).
//
// Duplex printing on a simplex printer, per copy:
//   [blank page, if the page count is odd]   wait idle
//   even pages, reverse order                wait idle   -> SecondSidePending
//   odd pages, rotated 180 degrees           wait idle   -> CopyDone

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, instrument, warn};

use kiosk_core::error::{KioskError, Result};
use kiosk_core::types::{Checkpoint, PrintConfiguration, PrinterKind, PrinterState};

use crate::adapter::{PrinterAdapter, SubmitRequest};
use crate::monitor::{DeviceStatusMonitor, DeviceStatusRegistry};
use crate::profile::PrinterProfile;

/// A document ready to be printed.
#[derive(Debug, Clone)]
pub struct PrintJob {
    pub document: PathBuf,
    pub page_count: u32,
    pub config: PrintConfiguration,
}

impl PrintJob {
    pub fn new(document: impl Into<PathBuf>, page_count: u32, config: PrintConfiguration) -> Self {
        Self {
            document: document.into(),
            page_count,
            config,
        }
    }

    /// Whether the job is printed in two passes per copy.
    pub fn is_duplex(&self) -> bool {
        self.config.double_sided() && self.page_count > 1
    }
}

/// One step of a job plan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    Submit(SubmitRequest),
    WaitIdle,
    Emit(Checkpoint),
}

/// Comma-separated page numbers in `1..=page_count` with the given parity.
fn page_range(page_count: u32, even: bool) -> String {
    let first = if even { 2 } else { 1 };
    (first..=page_count)
        .step_by(2)
        .map(|p| p.to_string())
        .collect::<Vec<_>>()
        .join(",")
}

fn with_grayscale(request: SubmitRequest, profile: PrinterProfile, colored: bool) -> SubmitRequest {
    if colored {
        request
    } else {
        let (key, value) = profile.grayscale_option();
        request.option(key, value)
    }
}

/// Turn a job into the steps that print it on a printer of `profile`.
pub fn plan_job(job: &PrintJob, profile: PrinterProfile, blank_page: &Path) -> Result<Vec<Step>> {
    if job.page_count == 0 {
        return Err(KioskError::InvalidJob("document has no pages".into()));
    }
    let colored = job.config.colored();
    let copies = job.config.copies();

    if !job.is_duplex() {
        let mut request = SubmitRequest::new(&job.document, copies);
        if profile.reverses_single_sided() {
            request = request.option("outputorder", "reverse");
        }
        return Ok(vec![
            Step::Emit(Checkpoint::Start),
            Step::Submit(with_grayscale(request, profile, colored)),
            Step::WaitIdle,
            Step::Emit(Checkpoint::AllDone),
        ]);
    }

    let evens = page_range(job.page_count, true);
    let odds = page_range(job.page_count, false);
    let mut steps = vec![Step::Emit(Checkpoint::Start)];

    for copy in 0..copies {
        if job.page_count % 2 == 1 {
            let blank = SubmitRequest::new(blank_page, 1);
            steps.push(Step::Submit(with_grayscale(blank, profile, colored)));
            steps.push(Step::WaitIdle);
        }

        let side_a = SubmitRequest::new(&job.document, 1)
            .option("page-ranges", &evens)
            .option("outputorder", "reverse")
            .option("scale-to-fit", true);
        steps.push(Step::Submit(with_grayscale(side_a, profile, colored)));
        steps.push(Step::WaitIdle);
        steps.push(Step::Emit(Checkpoint::SecondSidePending(copy)));

        let mut side_b = SubmitRequest::new(&job.document, 1)
            .option("page-ranges", &odds)
            .option("orientation-requested", 6);
        if profile.reverses_second_side() {
            side_b = side_b.option("outputorder", "reverse");
        }
        side_b = side_b.option("scale-to-fit", true);
        steps.push(Step::Submit(with_grayscale(side_b, profile, colored)));
        steps.push(Step::WaitIdle);
        steps.push(Step::Emit(Checkpoint::CopyDone(copy)));
    }
    Ok(steps)
}

/// Drives one print run. Each [`resume`] call performs the submissions and
/// waits up to the next checkpoint and returns it. Once the plan is used up,
/// or a step failed, every further call returns `Ok(None)` without touching
/// the printer.
///
/// [`resume`]: Self::resume
pub struct PrintJobOrchestrator {
    monitor: Arc<DeviceStatusMonitor>,
    adapter: Arc<dyn PrinterAdapter>,
    steps: VecDeque<Step>,
    job_timeout: Duration,
    exhausted: bool,
}

impl PrintJobOrchestrator {
    /// Plan `job` on the printer its colour setting selects.
    pub fn new(
        job: &PrintJob,
        registry: &DeviceStatusRegistry,
        adapter: Arc<dyn PrinterAdapter>,
        blank_page: &Path,
        job_timeout: Duration,
    ) -> Result<Self> {
        let monitor = Arc::clone(registry.monitor(PrinterKind::for_config(&job.config)));
        let steps = plan_job(job, monitor.binding().profile, blank_page)?;
        debug!(
            printer = %monitor.binding().name,
            steps = steps.len(),
            duplex = job.is_duplex(),
            "print job planned"
        );
        Ok(Self {
            monitor,
            adapter,
            steps: steps.into(),
            job_timeout,
            exhausted: false,
        })
    }

    pub fn is_exhausted(&self) -> bool {
        self.exhausted
    }

    /// Run up to and including the next checkpoint.
    #[instrument(skip(self), fields(printer = %self.monitor.binding().name))]
    pub async fn resume(&mut self) -> Result<Option<Checkpoint>> {
        if self.exhausted {
            return Ok(None);
        }
        while let Some(step) = self.steps.pop_front() {
            match step {
                Step::Emit(checkpoint) => {
                    info!(?checkpoint, "print checkpoint reached");
                    return Ok(Some(checkpoint));
                }
                Step::Submit(request) => {
                    if let Err(e) = self.adapter.submit(self.monitor.binding(), &request).await {
                        return Err(self.abort(e));
                    }
                }
                Step::WaitIdle => {
                    if let Err(e) = self
                        .monitor
                        .wait_for(PrinterState::Idle, self.job_timeout)
                        .await
                    {
                        return Err(self.abort(e));
                    }
                }
            }
        }
        self.exhausted = true;
        Ok(None)
    }

    fn abort(&mut self, error: KioskError) -> KioskError {
        warn!(error = %error, remaining = self.steps.len(), "print run aborted");
        self.steps.clear();
        self.exhausted = true;
        error
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::monitor::MonitorTiming;
    use crate::profile::{PrinterBinding, PrinterBindings};
    use crate::testing::FakeAdapter;
    use kiosk_core::types::DeviceStatus;

    const BLANK: &str = "/srv/files/empty";

    fn config(copies: u32, colored: bool, duplex: bool) -> PrintConfiguration {
        PrintConfiguration::new(copies, colored, duplex).expect("config")
    }

    fn job(page_count: u32, config: PrintConfiguration) -> PrintJob {
        PrintJob::new("/srv/files/doc.pdf", page_count, config)
    }

    fn submissions(steps: &[Step]) -> Vec<&SubmitRequest> {
        steps
            .iter()
            .filter_map(|s| match s {
                Step::Submit(r) => Some(r),
                _ => None,
            })
            .collect()
    }

    struct Rig {
        fake: Arc<FakeAdapter>,
        registry: DeviceStatusRegistry,
    }

    impl Rig {
        fn new(color_profile: PrinterProfile) -> Self {
            let fake = Arc::new(FakeAdapter::new(2));
            let bindings = PrinterBindings::new(
                PrinterBinding::new(PrinterKind::Monochrome, "bw", PrinterProfile::CommonIpp),
                PrinterBinding::new(PrinterKind::Color, "colored", color_profile),
            );
            let registry = DeviceStatusRegistry::new(
                &bindings,
                fake.clone(),
                MonitorTiming {
                    interval: Duration::from_millis(5),
                    query_timeout: Duration::from_millis(200),
                },
            );
            registry.start();
            Self { fake, registry }
        }

        fn orchestrator(&self, job: &PrintJob) -> PrintJobOrchestrator {
            PrintJobOrchestrator::new(
                job,
                &self.registry,
                self.fake.clone(),
                Path::new(BLANK),
                Duration::from_secs(5),
            )
            .expect("orchestrator")
        }

        async fn drain(&self, orchestrator: &mut PrintJobOrchestrator) -> Vec<Checkpoint> {
            let mut seen = Vec::new();
            while let Some(checkpoint) = orchestrator.resume().await.expect("resume") {
                seen.push(checkpoint);
            }
            seen
        }
    }

    #[test]
    fn page_ranges_split_by_parity() {
        assert_eq!(page_range(5, true), "2,4");
        assert_eq!(page_range(5, false), "1,3,5");
        assert_eq!(page_range(2, true), "2");
        assert_eq!(page_range(1, true), "");
    }

    #[test]
    fn odd_duplex_job_gets_one_blank_pass_first() {
        let steps = plan_job(&job(5, config(1, false, true)), PrinterProfile::CommonIpp, Path::new(BLANK))
            .expect("plan");
        let subs = submissions(&steps);
        assert_eq!(subs.len(), 3);

        assert_eq!(subs[0].document, PathBuf::from(BLANK));
        assert_eq!(subs[0].copies, 1);
        assert_eq!(subs[0].get("ColorModel"), Some("Gray"));
        assert_eq!(subs[0].get("page-ranges"), None);

        assert_eq!(subs[1].get("page-ranges"), Some("2,4"));
        assert_eq!(subs[1].get("outputorder"), Some("reverse"));
        assert_eq!(subs[1].get("scale-to-fit"), Some("true"));

        assert_eq!(subs[2].get("page-ranges"), Some("1,3,5"));
        assert_eq!(subs[2].get("orientation-requested"), Some("6"));
        assert_eq!(subs[2].get("outputorder"), None);

        let blanks = subs.iter().filter(|r| r.document == Path::new(BLANK)).count();
        assert_eq!(blanks, 1);
    }

    #[test]
    fn blank_pass_repeats_per_copy() {
        let steps = plan_job(&job(3, config(2, true, true)), PrinterProfile::CommonIpp, Path::new(BLANK))
            .expect("plan");
        let subs = submissions(&steps);
        assert_eq!(subs.len(), 6);
        assert_eq!(subs[0].document, PathBuf::from(BLANK));
        assert_eq!(subs[3].document, PathBuf::from(BLANK));
        assert!(subs.iter().all(|r| r.get("ColorModel").is_none()));
    }

    #[test]
    fn canon_reverses_second_side_and_simplex() {
        let duplex = plan_job(&job(4, config(1, false, true)), PrinterProfile::CanonMg2500, Path::new(BLANK))
            .expect("plan");
        let subs = submissions(&duplex);
        assert_eq!(subs[1].get("outputorder"), Some("reverse"));
        assert_eq!(subs[1].get("CNGrayscale"), Some("True"));

        let simplex = plan_job(&job(4, config(3, false, false)), PrinterProfile::CanonMg2500, Path::new(BLANK))
            .expect("plan");
        let subs = submissions(&simplex);
        assert_eq!(subs.len(), 1);
        assert_eq!(subs[0].copies, 3);
        assert_eq!(subs[0].get("outputorder"), Some("reverse"));

        let common = plan_job(&job(4, config(3, false, false)), PrinterProfile::CommonIpp, Path::new(BLANK))
            .expect("plan");
        assert_eq!(submissions(&common)[0].get("outputorder"), None);
    }

    #[test]
    fn single_page_duplex_prints_single_sided() {
        let steps = plan_job(&job(1, config(2, false, true)), PrinterProfile::CommonIpp, Path::new(BLANK))
            .expect("plan");
        assert_eq!(
            steps.iter().filter(|s| matches!(s, Step::Emit(_))).count(),
            2
        );
        let subs = submissions(&steps);
        assert_eq!(subs.len(), 1);
        assert_eq!(subs[0].copies, 2);
        assert_eq!(subs[0].get("page-ranges"), None);
    }

    #[test]
    fn empty_document_is_invalid() {
        let err = plan_job(&job(0, config(1, false, true)), PrinterProfile::CommonIpp, Path::new(BLANK))
            .expect_err("no pages");
        assert!(matches!(err, KioskError::InvalidJob(_)));
    }

    #[tokio::test]
    async fn simplex_copies_run_as_one_submission() {
        let rig = Rig::new(PrinterProfile::CommonIpp);
        let mut run = rig.orchestrator(&job(3, config(2, false, false)));

        assert_eq!(rig.drain(&mut run).await, vec![Checkpoint::Start, Checkpoint::AllDone]);

        let subs = rig.fake.submissions();
        assert_eq!(subs.len(), 1);
        assert_eq!(subs[0].copies, 2);
        assert_eq!(
            rig.registry.monitor(PrinterKind::Monochrome).wait_requests(),
            1
        );
        rig.registry.stop().await.expect("stop");
    }

    #[tokio::test]
    async fn four_page_duplex_yields_second_side_then_done() {
        let rig = Rig::new(PrinterProfile::CommonIpp);
        let mut run = rig.orchestrator(&job(4, config(1, false, true)));

        assert_eq!(
            rig.drain(&mut run).await,
            vec![
                Checkpoint::Start,
                Checkpoint::SecondSidePending(0),
                Checkpoint::CopyDone(0)
            ]
        );

        let subs = rig.fake.submissions();
        assert_eq!(subs.len(), 2);
        assert_eq!(subs[0].get("page-ranges"), Some("2,4"));
        assert_eq!(subs[1].get("page-ranges"), Some("1,3"));
        assert_eq!(
            rig.registry.monitor(PrinterKind::Monochrome).wait_requests(),
            2
        );
        rig.registry.stop().await.expect("stop");
    }

    #[tokio::test]
    async fn colored_job_goes_to_the_color_printer() {
        let rig = Rig::new(PrinterProfile::CanonMg2500);
        let mut run = rig.orchestrator(&job(5, config(1, true, true)));

        rig.drain(&mut run).await;

        let subs = rig.fake.submissions();
        assert_eq!(subs.len(), 3);
        assert_eq!(subs[0].document, PathBuf::from(BLANK));
        assert!(subs.iter().all(|r| r.get("CNGrayscale").is_none()));
        assert_eq!(rig.registry.monitor(PrinterKind::Color).wait_requests(), 3);
        assert_eq!(rig.registry.monitor(PrinterKind::Monochrome).wait_requests(), 0);
        rig.registry.stop().await.expect("stop");
    }

    #[tokio::test]
    async fn jam_between_duplex_passes_aborts_the_run() {
        let rig = Rig::new(PrinterProfile::CommonIpp);
        let mut run = rig.orchestrator(&job(4, config(1, false, true)));

        assert_eq!(run.resume().await.expect("start"), Some(Checkpoint::Start));
        assert_eq!(
            run.resume().await.expect("side one"),
            Some(Checkpoint::SecondSidePending(0))
        );

        // Side two is submitted, printing starts, then the paper jams.
        rig.fake
            .fault_on_submission(2, DeviceStatus::new(PrinterState::PaperJam, None));

        let err = run.resume().await.expect_err("jam must abort");
        assert!(matches!(
            err,
            KioskError::PrinterError {
                state: PrinterState::PaperJam,
                ..
            }
        ));
        assert!(run.is_exhausted());

        let submitted = rig.fake.submissions().len();
        assert_eq!(run.resume().await.expect("fused"), None);
        assert_eq!(rig.fake.submissions().len(), submitted);
        rig.registry.stop().await.expect("stop");
    }

    #[tokio::test]
    async fn rejected_submission_aborts_without_waiting() {
        let rig = Rig::new(PrinterProfile::CommonIpp);
        rig.fake.reject_submission(1);
        let mut run = rig.orchestrator(&job(2, config(1, false, false)));

        assert_eq!(run.resume().await.expect("start"), Some(Checkpoint::Start));
        let err = run.resume().await.expect_err("lp refused");
        assert!(matches!(err, KioskError::SubmissionFailed(_)));
        assert_eq!(
            rig.registry.monitor(PrinterKind::Monochrome).wait_requests(),
            0
        );
        assert_eq!(run.resume().await.expect("fused"), None);
        rig.registry.stop().await.expect("stop");
    }

    #[tokio::test]
    async fn finished_run_stays_finished() {
        let rig = Rig::new(PrinterProfile::CommonIpp);
        let mut run = rig.orchestrator(&job(1, config(1, false, false)));
        rig.drain(&mut run).await;

        assert_eq!(run.resume().await.expect("fused"), None);
        assert_eq!(rig.fake.submissions().len(), 1);
        rig.registry.stop().await.expect("stop");
    }
}
