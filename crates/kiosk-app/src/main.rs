// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// kioskd: walk-up print kiosk daemon.
//
// Entry point. Initialises logging, loads the configuration, starts the
// background services and serves the terminal console until it closes,
// staff shut the kiosk down, or Ctrl-C.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use kiosk_app::KioskServices;
use kiosk_app::console::{Console, TerminalScreen, spawn_stdin_reader};
use kiosk_app::data_dir;
use kiosk_core::KioskConfig;
use kiosk_core::error::Result;

#[derive(Debug, Parser)]
#[command(name = "kioskd", version, about = "Walk-up print kiosk daemon")]
struct Args {
    /// JSON configuration file (defaults to config.json in the data directory)
    #[arg(long, env = "KIOSK_CONFIG")]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    info!("kioskd starting");

    if let Err(e) = run(Args::parse()).await {
        error!(error = %e, "kioskd failed");
        std::process::exit(1);
    }
}

async fn run(args: Args) -> Result<()> {
    let path = args
        .config
        .or_else(|| data_dir::default_config(&data_dir::data_dir()));
    info!(config = ?path, "loading configuration");
    let config = KioskConfig::load(path.as_deref())?;
    let admin_password = config.admin_password.clone();

    let screen = Arc::new(TerminalScreen);
    let services = KioskServices::init(config, screen.clone())?;
    services.start();

    let (tx, mut rx) = mpsc::channel(64);
    let reader = spawn_stdin_reader(tx);
    let mut console = Console::new(Arc::clone(services.desk()), screen, admin_password)
        .with_watcher(Arc::clone(services.watcher()))
        .with_rotator(Arc::clone(services.rotator()));

    let served = tokio::select! {
        outcome = console.run(&mut rx) => outcome,
        _ = tokio::signal::ctrl_c() => {
            info!("interrupt received");
            Ok(())
        }
    };
    reader.abort();

    if let Err(e) = services.stop().await {
        warn!(error = %e, "services did not stop cleanly");
    }
    info!("kioskd stopped");
    served
}
