// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Walk-up print sessions.
//
// A session starts when someone enters a pickup code and presses Enter:
// look the job up, charge for it, print it while narrating progress on the
// screen, and flag it printed. Duplex jobs stop halfway until the operator
// has put the printed stack back and pressed Enter again.

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::{Instrument, debug, info, info_span, instrument, warn};

use kiosk_core::error::{KioskError, Result};
use kiosk_core::human_errors::humanize_error;
use kiosk_core::types::{
    Checkpoint, DeviceStatus, FileEntry, JobCode, PrintConfiguration, SessionId,
};
use kiosk_print::remote::STATUS_IN_DEBT;
use kiosk_print::{
    DeviceStatusRegistry, PrintJob, PrintJobOrchestrator, PrinterAdapter, RemoteClient,
};
use kiosk_security::{JobToken, JobTokenValidator, KeypadInput};

use crate::store::JobStore;

// -- Display --

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeKind {
    /// Stays up while work is in progress.
    Progress,
    /// Waits for the user to press Enter.
    Prompt,
    Error,
    /// File name shown while a code is being typed.
    Preview,
    /// Reply on the staff console.
    Admin,
}

/// One screenful: a title line and a detail line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    pub kind: NoticeKind,
    pub title: String,
    pub detail: String,
}

impl Notice {
    pub fn new(kind: NoticeKind, title: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            kind,
            title: title.into(),
            detail: detail.into(),
        }
    }
}

/// Where notices go.
pub trait Screen: Send + Sync {
    fn show(&self, notice: Notice);
}

fn printing(page_count: u32) -> Notice {
    Notice::new(NoticeKind::Progress, "正在打印中，请稍候", format!("共 {page_count} 页"))
}

// -- Remote server --

/// The remote server calls a session makes.
#[async_trait]
pub trait Billing: Send + Sync {
    async fn pay(&self, code: &JobCode, config: &PrintConfiguration, page_count: u32) -> Result<()>;
    async fn report_error(&self, status: &DeviceStatus) -> Result<()>;
    async fn delete_job_token(&self, code: &JobCode) -> Result<()>;
}

#[async_trait]
impl Billing for RemoteClient {
    async fn pay(&self, code: &JobCode, config: &PrintConfiguration, page_count: u32) -> Result<()> {
        RemoteClient::pay(self, code, config, page_count).await
    }

    async fn report_error(&self, status: &DeviceStatus) -> Result<()> {
        RemoteClient::report_error(self, status).await
    }

    async fn delete_job_token(&self, code: &JobCode) -> Result<()> {
        RemoteClient::delete_job_token(self, code).await
    }
}

// -- Sessions --

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionOutcome {
    Printed,
    NotFound,
    AlreadyPrinted,
    /// The kiosk is paused by staff.
    Paused,
}

/// Fixed settings of a print desk.
#[derive(Debug, Clone)]
pub struct DeskSettings {
    /// Directory holding uploaded documents.
    pub file_dir: PathBuf,
    pub blank_page: PathBuf,
    pub job_timeout: Duration,
}

/// Runs print sessions against the kiosk's printers. One session at a time.
pub struct PrintDesk {
    store: Arc<dyn JobStore>,
    billing: Arc<dyn Billing>,
    registry: Arc<DeviceStatusRegistry>,
    adapter: Arc<dyn PrinterAdapter>,
    validator: Arc<JobTokenValidator>,
    screen: Arc<dyn Screen>,
    settings: DeskSettings,
    paused: AtomicBool,
}

impl PrintDesk {
    pub fn new(
        store: Arc<dyn JobStore>,
        billing: Arc<dyn Billing>,
        registry: Arc<DeviceStatusRegistry>,
        adapter: Arc<dyn PrinterAdapter>,
        validator: Arc<JobTokenValidator>,
        screen: Arc<dyn Screen>,
        settings: DeskSettings,
    ) -> Self {
        Self {
            store,
            billing,
            registry,
            adapter,
            validator,
            screen,
            settings,
            paused: AtomicBool::new(false),
        }
    }

    pub fn registry(&self) -> &DeviceStatusRegistry {
        &self.registry
    }

    pub fn set_paused(&self, paused: bool) {
        self.paused.store(paused, Ordering::Relaxed);
        info!(paused, "kiosk pause state changed");
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::Relaxed)
    }

    /// Show which file a complete code refers to.
    #[instrument(skip(self))]
    pub fn preview(&self, code: &str) -> Result<Option<FileEntry>> {
        let code = JobCode::parse(code)?;
        let entry = self.store.find_by_code(&code)?;
        match &entry {
            Some(entry) => self.screen.show(Notice::new(
                NoticeKind::Preview,
                entry.file_name.clone(),
                "请按回车键以继续",
            )),
            None => self.screen.show(not_found()),
        }
        Ok(entry)
    }

    /// A user's print request: pay, then print.
    ///
    /// `keys` delivers keypad input while the session runs; Enter confirms
    /// the second side of a duplex job.
    #[instrument(skip(self, keys))]
    pub async fn print(
        &self,
        code: &str,
        keys: &mut mpsc::Receiver<KeypadInput>,
    ) -> Result<SessionOutcome> {
        let code = JobCode::parse(code)?;
        if self.is_paused() {
            self.screen
                .show(Notice::new(NoticeKind::Error, "暂停服务", "请稍后再试"));
            return Ok(SessionOutcome::Paused);
        }
        let Some(entry) = self.store.find_by_code(&code)? else {
            self.screen.show(not_found());
            return Ok(SessionOutcome::NotFound);
        };
        if entry.printed {
            self.screen
                .show(Notice::new(NoticeKind::Error, "此文件已打印", "如需重新打印，请联系管理员"));
            return Ok(SessionOutcome::AlreadyPrinted);
        }

        self.screen
            .show(Notice::new(NoticeKind::Progress, "正在支付", "请稍等……"));
        if let Err(e) = self
            .billing
            .pay(&code, &entry.config, entry.page_count)
            .await
        {
            self.screen.show(payment_failure(&e));
            return Err(e);
        }

        self.print_entry(&entry, keys).await?;
        Ok(SessionOutcome::Printed)
    }

    /// Staff reprint: no payment, printed jobs allowed.
    #[instrument(skip(self, keys))]
    pub async fn reprint(
        &self,
        code: &str,
        keys: &mut mpsc::Receiver<KeypadInput>,
    ) -> Result<SessionOutcome> {
        let code = JobCode::parse(code)?;
        let Some(entry) = self.store.find_by_code(&code)? else {
            self.screen.show(not_found());
            return Ok(SessionOutcome::NotFound);
        };
        self.print_entry(&entry, keys).await?;
        Ok(SessionOutcome::Printed)
    }

    /// Withdraw a job on the authority of a job token: the remote server
    /// forgets the token, then the job is removed here.
    #[instrument(skip_all)]
    pub async fn delete_job(&self, token_json: &str) -> Result<JobCode> {
        let token = JobToken::from_json(token_json)?;
        let code = self.validator.authorize(&token)?;
        self.billing.delete_job_token(&code).await?;
        let existed = self.store.remove(&code)?;
        info!(code = %code, existed, "job deleted on token request");
        Ok(code)
    }

    async fn print_entry(
        &self,
        entry: &FileEntry,
        keys: &mut mpsc::Receiver<KeypadInput>,
    ) -> Result<()> {
        let session = SessionId::new();
        info!(%session, code = %entry.code, pages = entry.page_count, "print session started");
        let outcome = self
            .run(entry, keys)
            .instrument(info_span!("session", id = %session))
            .await;
        match outcome {
            Ok(()) => {
                self.store.mark_printed(&entry.code)?;
                Ok(())
            }
            Err(e) => {
                self.forward_fault(&e).await;
                let human = humanize_error(&e);
                self.screen
                    .show(Notice::new(NoticeKind::Error, "出现错误", human.message));
                Err(e)
            }
        }
    }

    async fn run(&self, entry: &FileEntry, keys: &mut mpsc::Receiver<KeypadInput>) -> Result<()> {
        let job = PrintJob::new(
            self.settings.file_dir.join(&entry.id),
            entry.page_count,
            entry.config,
        );
        let mut run = PrintJobOrchestrator::new(
            &job,
            &self.registry,
            Arc::clone(&self.adapter),
            &self.settings.blank_page,
            self.settings.job_timeout,
        )?;
        let last_copy = entry.config.copies().saturating_sub(1);

        while let Some(checkpoint) = run.resume().await? {
            match checkpoint {
                Checkpoint::Start => self.screen.show(printing(entry.page_count)),
                Checkpoint::SecondSidePending(copy) => {
                    self.screen.show(Notice::new(
                        NoticeKind::Prompt,
                        "正面打印完成！",
                        "请插入纸张，按回车键以继续打印反面",
                    ));
                    wait_for_enter(keys).await?;
                    debug!(copy, "second side confirmed");
                    self.screen.show(printing(entry.page_count));
                }
                Checkpoint::CopyDone(copy) if copy < last_copy => {
                    info!(copy, "copy finished");
                }
                Checkpoint::CopyDone(_) | Checkpoint::AllDone => {
                    self.screen
                        .show(Notice::new(NoticeKind::Prompt, "打印完成！", "请按回车键以继续"));
                }
            }
        }
        info!(code = %entry.code, "job printed");
        Ok(())
    }

    /// Hardware faults go to the remote server so staff hear about them.
    async fn forward_fault(&self, error: &KioskError) {
        let KioskError::PrinterError { state, message } = error else {
            return;
        };
        if !state.is_hardware_fault() {
            return;
        }
        let status = DeviceStatus::new(*state, message.clone());
        if let Err(e) = self.billing.report_error(&status).await {
            warn!(error = %e, "could not report printer fault");
        }
    }
}

fn not_found() -> Notice {
    Notice::new(NoticeKind::Error, "取件码不存在", "请检查后重新输入。")
}

fn payment_failure(error: &KioskError) -> Notice {
    match error {
        KioskError::RemoteRejected(STATUS_IN_DEBT) => {
            Notice::new(NoticeKind::Error, "您有未结清帐务", "请充值后再打印。")
        }
        KioskError::RemoteTimeout(_) | KioskError::Remote(_) => {
            Notice::new(NoticeKind::Error, "无法连接至服务器", error.to_string())
        }
        other => Notice::new(NoticeKind::Error, "支付失败", humanize_error(other).message),
    }
}

async fn wait_for_enter(keys: &mut mpsc::Receiver<KeypadInput>) -> Result<()> {
    loop {
        match keys.recv().await {
            Some(KeypadInput::Enter) => return Ok(()),
            Some(_) => continue,
            None => return Err(KioskError::Cancelled),
        }
    }
}
