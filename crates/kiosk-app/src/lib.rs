// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// kiosk-app: the kiosk daemon's sessions, job store and front-end.

pub mod console;
pub mod data_dir;
pub mod services;
pub mod session;
pub mod store;

#[cfg(test)]
mod test_support;

pub use services::KioskServices;
pub use session::{PrintDesk, SessionOutcome};
