// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Unified error types for the kiosk.

use std::time::Duration;

use thiserror::Error;

use crate::types::{DeviceStatus, PrinterState};

/// Top-level error type for all kiosk operations.
#[derive(Debug, Error)]
pub enum KioskError {
    // -- Job token errors --
    #[error("invalid job code")]
    InvalidCode,

    #[error("job token expired")]
    TokenExpired,

    #[error("job token nonce already used")]
    TokenNonceReused,

    #[error("job token signature does not verify")]
    BadSignature,

    // -- Remote server --
    #[error("remote server did not answer within {0:?}")]
    RemoteTimeout(Duration),

    #[error("remote server rejected the request with status {0}")]
    RemoteRejected(i64),

    #[error("remote request failed: {0}")]
    Remote(String),

    // -- Printer --
    #[error("printer reported {state}: {}", .message.as_deref().unwrap_or("no message"))]
    PrinterError {
        state: PrinterState,
        message: Option<String>,
    },

    #[error("print submission failed: {0}")]
    SubmissionFailed(String),

    #[error("printer did not become {target} within {timeout:?}")]
    WaitTimeout {
        target: PrinterState,
        timeout: Duration,
    },

    #[error("printer status query failed: {0}")]
    StatusQuery(String),

    #[error("invalid print job: {0}")]
    InvalidJob(String),

    #[error("print session cancelled")]
    Cancelled,

    // -- Startup --
    #[error("key material unusable: {0}")]
    KeyMaterial(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    // -- Storage / persistence --
    #[error("database error: {0}")]
    Database(String),

    #[error("file I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl KioskError {
    /// The error a waiter or a run receives when its printer enters an
    /// error state.
    pub fn printer(status: &DeviceStatus) -> Self {
        Self::PrinterError {
            state: status.state,
            message: status.message.clone(),
        }
    }
}

/// Alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, KioskError>;
