// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// The boundary between the kiosk and the print system.
//
// Everything that touches CUPS goes through `PrinterAdapter`, so the monitor
// and the orchestrator can be driven by a fake in tests.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, info, instrument, warn};

use kiosk_core::error::{KioskError, Result};
use kiosk_core::types::DeviceStatus;

use crate::ipp_client::IppClient;
use crate::profile::PrinterBinding;

/// One `lp` invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmitRequest {
    pub document: PathBuf,
    pub copies: u32,
    /// CUPS `-o key=value` options, in order.
    pub options: Vec<(String, String)>,
}

impl SubmitRequest {
    pub fn new(document: impl Into<PathBuf>, copies: u32) -> Self {
        Self {
            document: document.into(),
            copies,
            options: Vec::new(),
        }
    }

    pub fn option(mut self, key: &str, value: impl ToString) -> Self {
        self.options.push((key.to_owned(), value.to_string()));
        self
    }

    /// Value of option `key`, if set.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.options
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Arguments for `lp` targeting queue `printer`.
    pub fn lp_args(&self, printer: &str) -> Vec<String> {
        let mut args = vec![
            "-d".to_owned(),
            printer.to_owned(),
            "-n".to_owned(),
            self.copies.to_string(),
        ];
        for (key, value) in &self.options {
            args.push("-o".to_owned());
            args.push(format!("{key}={value}"));
        }
        args.push(self.document.display().to_string());
        args
    }
}

/// Status query and job submission for one kind of print system.
#[async_trait]
pub trait PrinterAdapter: Send + Sync {
    /// Read the printer's current status, interpreted by its profile.
    async fn query_status(&self, binding: &PrinterBinding) -> Result<DeviceStatus>;

    /// Hand a document to the spooler. Returns once the spooler accepted it.
    async fn submit(&self, binding: &PrinterBinding, request: &SubmitRequest) -> Result<()>;
}

/// Local CUPS: status over IPP, submission through `lp`.
#[derive(Debug, Clone)]
pub struct CupsAdapter {
    lp_program: PathBuf,
    submit_timeout: Duration,
}

impl CupsAdapter {
    pub fn new(submit_timeout: Duration) -> Self {
        Self {
            lp_program: PathBuf::from("lp"),
            submit_timeout,
        }
    }

    /// Use a different `lp` binary.
    pub fn with_lp_program(mut self, program: impl Into<PathBuf>) -> Self {
        self.lp_program = program.into();
        self
    }
}

#[async_trait]
impl PrinterAdapter for CupsAdapter {
    #[instrument(skip(self), fields(printer = %binding.name))]
    async fn query_status(&self, binding: &PrinterBinding) -> Result<DeviceStatus> {
        let raw = IppClient::for_queue(&binding.name)?.query().await?;
        Ok(binding.profile.map_status(&raw))
    }

    #[instrument(skip(self, request), fields(printer = %binding.name, copies = request.copies))]
    async fn submit(&self, binding: &PrinterBinding, request: &SubmitRequest) -> Result<()> {
        let args = request.lp_args(&binding.name);
        debug!(?args, "running lp");

        let child = Command::new(&self.lp_program)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                KioskError::SubmissionFailed(format!("spawn {}: {e}", self.lp_program.display()))
            })?;

        let output = tokio::time::timeout(self.submit_timeout, child.wait_with_output())
            .await
            .map_err(|_| {
                warn!(timeout = ?self.submit_timeout, "lp did not finish in time");
                KioskError::SubmissionFailed(format!(
                    "lp did not finish within {:?}",
                    self.submit_timeout
                ))
            })?
            .map_err(|e| KioskError::SubmissionFailed(format!("lp: {e}")))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            warn!(status = %output.status, stderr = %stderr.trim(), "lp rejected the job");
            return Err(KioskError::SubmissionFailed(format!(
                "lp exited with {}: {}",
                output.status,
                stderr.trim()
            )));
        }

        info!(
            response = %String::from_utf8_lossy(&output.stdout).trim(),
            "job accepted by spooler"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::profile::PrinterProfile;
    use kiosk_core::types::PrinterKind;

    fn binding() -> PrinterBinding {
        PrinterBinding::new(PrinterKind::Monochrome, "bw", PrinterProfile::CommonIpp)
    }

    #[test]
    fn lp_arguments() {
        let request = SubmitRequest::new("/srv/files/abc.pdf", 2)
            .option("page-ranges", "2,4")
            .option("orientation-requested", 6);
        assert_eq!(
            request.lp_args("HP_M1136"),
            vec![
                "-d",
                "HP_M1136",
                "-n",
                "2",
                "-o",
                "page-ranges=2,4",
                "-o",
                "orientation-requested=6",
                "/srv/files/abc.pdf",
            ]
        );
        assert_eq!(request.get("page-ranges"), Some("2,4"));
        assert_eq!(request.get("outputorder"), None);
    }

    #[tokio::test]
    async fn successful_lp_is_accepted() {
        let adapter = CupsAdapter::new(Duration::from_secs(5)).with_lp_program("true");
        adapter
            .submit(&binding(), &SubmitRequest::new("/dev/null", 1))
            .await
            .expect("true exits 0");
    }

    #[tokio::test]
    async fn failing_lp_is_submission_failure() {
        let adapter = CupsAdapter::new(Duration::from_secs(5)).with_lp_program("false");
        let err = adapter
            .submit(&binding(), &SubmitRequest::new("/dev/null", 1))
            .await
            .expect_err("false exits 1");
        assert!(matches!(err, KioskError::SubmissionFailed(_)));
    }

    #[tokio::test]
    async fn missing_lp_is_submission_failure() {
        let adapter =
            CupsAdapter::new(Duration::from_secs(5)).with_lp_program("/nonexistent/lp-binary");
        let err = adapter
            .submit(&binding(), &SubmitRequest::new("/dev/null", 1))
            .await
            .expect_err("spawn fails");
        assert!(matches!(err, KioskError::SubmissionFailed(_)));
    }
}
