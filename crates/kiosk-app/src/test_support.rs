// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Shared fixtures: a print desk wired to a scripted print system, an
// in-memory job store, a recording screen and a scripted remote server.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;

use kiosk_core::error::{KioskError, Result};
use kiosk_core::types::{
    DeviceStatus, FileEntry, JobCode, PrintConfiguration, PrinterKind,
};
use kiosk_print::testing::FakeAdapter;
use kiosk_print::{
    DeviceStatusRegistry, MonitorTiming, PrinterBinding, PrinterBindings, PrinterProfile,
};
use kiosk_security::{Freshness, JobTokenValidator, Verifier};

use crate::session::{Billing, DeskSettings, Notice, PrintDesk, Screen};
use crate::store::{JobStore, SqliteJobStore};

pub const PRIVATE_PEM: &str = include_str!("../../kiosk-security/testdata/rsa_private.pem");
pub const PUBLIC_PEM: &str = include_str!("../../kiosk-security/testdata/rsa_public.pem");

#[derive(Default)]
pub struct RecordingScreen {
    pub shown: Mutex<Vec<Notice>>,
}

impl RecordingScreen {
    pub fn notices(&self) -> Vec<Notice> {
        self.shown.lock().expect("lock").clone()
    }

    pub fn titles(&self) -> Vec<String> {
        self.notices().into_iter().map(|n| n.title).collect()
    }
}

impl Screen for RecordingScreen {
    fn show(&self, notice: Notice) {
        self.shown.lock().expect("lock").push(notice);
    }
}

#[derive(Default)]
pub struct FakeBilling {
    pub pay_status: Mutex<Option<i64>>,
    pub unreachable: AtomicBool,
    pub paid: Mutex<Vec<(String, u32)>>,
    pub reported: Mutex<Vec<DeviceStatus>>,
    pub deleted: Mutex<Vec<String>>,
}

#[async_trait]
impl Billing for FakeBilling {
    async fn pay(&self, code: &JobCode, _config: &PrintConfiguration, page_count: u32) -> Result<()> {
        if self.unreachable.load(Ordering::Relaxed) {
            return Err(KioskError::Remote("connection refused".into()));
        }
        if let Some(status) = *self.pay_status.lock().expect("lock") {
            return Err(KioskError::RemoteRejected(status));
        }
        self.paid
            .lock()
            .expect("lock")
            .push((code.to_string(), page_count));
        Ok(())
    }

    async fn report_error(&self, status: &DeviceStatus) -> Result<()> {
        self.reported.lock().expect("lock").push(status.clone());
        Ok(())
    }

    async fn delete_job_token(&self, code: &JobCode) -> Result<()> {
        self.deleted.lock().expect("lock").push(code.to_string());
        Ok(())
    }
}

pub struct Rig {
    pub desk: Arc<PrintDesk>,
    pub store: Arc<SqliteJobStore>,
    pub billing: Arc<FakeBilling>,
    pub fake: Arc<FakeAdapter>,
    pub screen: Arc<RecordingScreen>,
    pub registry: Arc<DeviceStatusRegistry>,
}

impl Rig {
    /// A desk with running status monitors over a printer that stays busy
    /// for two polls after every submission.
    pub fn new() -> Self {
        let fake = Arc::new(FakeAdapter::new(2));
        let bindings = PrinterBindings::new(
            PrinterBinding::new(PrinterKind::Monochrome, "bw", PrinterProfile::CommonIpp),
            PrinterBinding::new(PrinterKind::Color, "colored", PrinterProfile::CanonMg2500),
        );
        let registry = Arc::new(DeviceStatusRegistry::new(
            &bindings,
            fake.clone(),
            MonitorTiming {
                interval: Duration::from_millis(5),
                query_timeout: Duration::from_millis(200),
            },
        ));
        registry.start();

        let store =
            Arc::new(SqliteJobStore::open_in_memory(PrintConfiguration::default()).expect("store"));
        let billing = Arc::new(FakeBilling::default());
        let screen = Arc::new(RecordingScreen::default());
        let verifier = Arc::new(Verifier::from_pem(PUBLIC_PEM).expect("public key"));
        let validator = Arc::new(JobTokenValidator::new(
            verifier,
            Freshness::Timestamp {
                max_age: Duration::from_secs(60),
            },
        ));

        let desk = Arc::new(PrintDesk::new(
            store.clone(),
            billing.clone(),
            Arc::clone(&registry),
            fake.clone(),
            validator,
            screen.clone(),
            DeskSettings {
                file_dir: PathBuf::from("/srv/files"),
                blank_page: PathBuf::from("/srv/files/empty"),
                job_timeout: Duration::from_secs(5),
            },
        ));
        Self {
            desk,
            store,
            billing,
            fake,
            screen,
            registry,
        }
    }

    pub fn add_job(&self, code: &str, page_count: u32, config: PrintConfiguration) {
        self.store
            .insert(&FileEntry {
                code: JobCode::parse(code).expect("code"),
                id: format!("{code}.pdf"),
                file_name: "report.pdf".into(),
                page_count,
                config,
                printed: false,
                created_at: Utc::now(),
            })
            .expect("insert");
    }

    pub fn printed(&self, code: &str) -> bool {
        self.store
            .find_by_code(&JobCode::parse(code).expect("code"))
            .expect("find")
            .expect("present")
            .printed
    }

    pub async fn shutdown(&self) {
        self.registry.stop().await.expect("stop monitors");
    }
}
