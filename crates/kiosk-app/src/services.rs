// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Service wiring: turns a `KioskConfig` into running kiosk subsystems.
//
// Keys, databases and printer bindings are all resolved up front so a bad
// configuration fails at startup rather than in the middle of a session.
// Background tasks (status monitors, network watcher, control-code rotator)
// are started and stopped together.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tracing::{info, warn};

use kiosk_core::KioskConfig;
use kiosk_core::error::Result;
use kiosk_core::types::TokenProtocol;
use kiosk_print::{
    CupsAdapter, DeviceStatusRegistry, MonitorTiming, NetworkWatcher, PrinterAdapter,
    PrinterBindings, RemoteClient, UdpProbe,
};
use kiosk_security::{
    ControlCodeRotator, Freshness, JobTokenValidator, Signer, UsedNonceStore, Verifier,
};

use crate::session::{DeskSettings, PrintDesk, Screen};
use crate::store::SqliteJobStore;

/// Upper bound for `lp` to hand a document to the spooler.
const LP_TIMEOUT: Duration = Duration::from_secs(30);

/// Every long-lived kiosk subsystem.
pub struct KioskServices {
    config: KioskConfig,
    desk: Arc<PrintDesk>,
    registry: Arc<DeviceStatusRegistry>,
    watcher: Arc<NetworkWatcher>,
    rotator: Arc<ControlCodeRotator>,
}

impl KioskServices {
    /// Open keys and databases and build the subsystems. Nothing is started.
    pub fn init(config: KioskConfig, screen: Arc<dyn Screen>) -> Result<Self> {
        info!(printer_id = config.printer_id, "initialising kiosk services");

        let signer = Arc::new(Signer::from_pem_file(&config.endpoint_key_file)?);
        let verifier = Arc::new(Verifier::from_pem_file(&config.remote_key_file)?);

        let freshness = match config.token_protocol {
            TokenProtocol::Timestamp => Freshness::Timestamp {
                max_age: config.token_max_age(),
            },
            TokenProtocol::Nonce => {
                Freshness::Nonce(Arc::new(Mutex::new(UsedNonceStore::open(&config.nonce_db)?)))
            }
        };
        let validator = Arc::new(JobTokenValidator::new(verifier, freshness));

        let remote = Arc::new(RemoteClient::from_config(&config, signer)?);
        let bindings = PrinterBindings::from_config(&config)?;
        let adapter: Arc<dyn PrinterAdapter> = Arc::new(CupsAdapter::new(LP_TIMEOUT));
        let registry = Arc::new(DeviceStatusRegistry::new(
            &bindings,
            Arc::clone(&adapter),
            MonitorTiming {
                interval: config.status_interval(),
                query_timeout: config.status_query_timeout(),
            },
        ));

        let store = Arc::new(SqliteJobStore::open(&config.job_db, config.default_print)?);
        let desk = Arc::new(PrintDesk::new(
            store,
            remote.clone(),
            Arc::clone(&registry),
            adapter,
            validator,
            screen,
            DeskSettings {
                file_dir: config.file_dir.clone(),
                blank_page: config.blank_page_file.clone(),
                job_timeout: config.job_timeout(),
            },
        ));

        let watcher = Arc::new(NetworkWatcher::new(
            Arc::new(UdpProbe::default()),
            Some(remote),
            config.ip_update_interval(),
        ));
        let rotator = Arc::new(ControlCodeRotator::new(config.control_code_interval())?);

        info!("kiosk services initialised");
        Ok(Self {
            config,
            desk,
            registry,
            watcher,
            rotator,
        })
    }

    pub fn config(&self) -> &KioskConfig {
        &self.config
    }

    pub fn desk(&self) -> &Arc<PrintDesk> {
        &self.desk
    }

    pub fn registry(&self) -> &DeviceStatusRegistry {
        &self.registry
    }

    pub fn watcher(&self) -> &Arc<NetworkWatcher> {
        &self.watcher
    }

    pub fn rotator(&self) -> &Arc<ControlCodeRotator> {
        &self.rotator
    }

    /// Start every background task.
    pub fn start(&self) {
        self.registry.start();
        self.watcher.start();
        self.rotator.start();
        info!("kiosk services started");
    }

    /// Stop every background task and wait for them. The first failure is
    /// returned after all tasks have been asked to stop.
    pub async fn stop(&self) -> Result<()> {
        let mut first_error = None;
        for outcome in [
            self.registry.stop().await,
            self.watcher.stop().await,
            self.rotator.stop().await,
        ] {
            if let Err(e) = outcome {
                warn!(error = %e, "service did not stop cleanly");
                first_error.get_or_insert(e);
            }
        }
        info!("kiosk services stopped");
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}
