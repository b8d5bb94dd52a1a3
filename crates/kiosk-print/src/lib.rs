// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// kiosk-print: everything that talks to printers or leaves the machine.
//
// Status comes from the local CUPS scheduler over IPP and is normalized by
// the printer's profile; jobs go out through `lp`. On top of that sit the
// per-printer status monitors, the job orchestrator that drives duplex
// printing on simplex hardware, the network watcher, and the signed client
// for the cloud print server.

pub mod adapter;
pub mod ipp_client;
pub mod monitor;
pub mod network;
pub mod orchestrator;
pub mod profile;
pub mod remote;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use adapter::{CupsAdapter, PrinterAdapter, SubmitRequest};
pub use ipp_client::IppClient;
pub use monitor::{DeviceStatusMonitor, DeviceStatusRegistry, MonitorTiming, StatusEvent};
pub use network::{AddressSource, NetworkEvent, NetworkWatcher, UdpProbe};
pub use orchestrator::{PrintJob, PrintJobOrchestrator};
pub use profile::{PrinterBinding, PrinterBindings, PrinterProfile};
pub use remote::RemoteClient;
