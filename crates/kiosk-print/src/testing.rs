// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Scripted print system for tests.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;

use kiosk_core::error::{KioskError, Result};
use kiosk_core::types::{DeviceStatus, PrinterState};

use crate::adapter::{PrinterAdapter, SubmitRequest};
use crate::profile::PrinterBinding;

struct FakeState {
    status: DeviceStatus,
    busy_polls: u32,
    remaining_busy: HashMap<String, u32>,
    submissions: Vec<SubmitRequest>,
    polls: usize,
    fail_queries: bool,
    fault_on_submission: Option<(usize, DeviceStatus)>,
    reject_submission: Option<usize>,
}

/// A print system that reports `Printing` on a queue for a few polls after
/// every submission to it and then settles back to its base status.
pub struct FakeAdapter {
    state: Mutex<FakeState>,
}

impl FakeAdapter {
    pub fn new(busy_polls: u32) -> Self {
        Self {
            state: Mutex::new(FakeState {
                status: DeviceStatus::idle(),
                busy_polls,
                remaining_busy: HashMap::new(),
                submissions: Vec::new(),
                polls: 0,
                fail_queries: false,
                fault_on_submission: None,
                reject_submission: None,
            }),
        }
    }

    pub fn set_status(&self, status: DeviceStatus) {
        self.state.lock().expect("fake lock").status = status;
    }

    pub fn set_failing(&self, failing: bool) {
        self.state.lock().expect("fake lock").fail_queries = failing;
    }

    /// After the `n`th submission (1-based) the printer settles into `status`
    /// instead of its base status.
    pub fn fault_on_submission(&self, n: usize, status: DeviceStatus) {
        self.state.lock().expect("fake lock").fault_on_submission = Some((n, status));
    }

    /// The `n`th submission (1-based) is refused by the spooler.
    pub fn reject_submission(&self, n: usize) {
        self.state.lock().expect("fake lock").reject_submission = Some(n);
    }

    pub fn submissions(&self) -> Vec<SubmitRequest> {
        self.state.lock().expect("fake lock").submissions.clone()
    }

    pub fn polls(&self) -> usize {
        self.state.lock().expect("fake lock").polls
    }
}

#[async_trait]
impl PrinterAdapter for FakeAdapter {
    async fn query_status(&self, binding: &PrinterBinding) -> Result<DeviceStatus> {
        let mut state = self.state.lock().expect("fake lock");
        state.polls += 1;
        if state.fail_queries {
            return Err(KioskError::StatusQuery("printer unreachable".into()));
        }
        if let Some(busy) = state.remaining_busy.get_mut(&binding.name) {
            if *busy > 0 {
                *busy -= 1;
                return Ok(DeviceStatus::new(PrinterState::Printing, None));
            }
        }
        Ok(state.status.clone())
    }

    async fn submit(&self, binding: &PrinterBinding, request: &SubmitRequest) -> Result<()> {
        let mut state = self.state.lock().expect("fake lock");
        let n = state.submissions.len() + 1;
        if state.reject_submission == Some(n) {
            return Err(KioskError::SubmissionFailed("lp exited with 1".into()));
        }
        state.submissions.push(request.clone());
        let busy = state.busy_polls;
        state.remaining_busy.insert(binding.name.clone(), busy);
        match state.fault_on_submission.clone() {
            Some((at, status)) if at == n => state.status = status,
            _ => {}
        }
        Ok(())
    }
}
