// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Human-readable messages for the kiosk display.
//
// Every technical error is mapped to a short message and a suggestion for
// the person standing at the kiosk. Printer states have fixed display labels
// that match the signage on the kiosk enclosure.

use crate::error::KioskError;
use crate::types::{DeviceStatus, PrinterState};

/// Severity of an error from the user's perspective.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// Network blip, timeout. Trying again may work.
    Transient,
    /// Someone must do something (re-enter the code, clear a jam, add paper).
    ActionRequired,
    /// Retrying will not help. Staff must fix the kiosk.
    Permanent,
}

/// A human-readable error with a plain message and actionable suggestion.
#[derive(Debug, Clone)]
pub struct HumanError {
    /// Short summary (shown on the first display line).
    pub message: String,
    /// What the user should try (shown below it).
    pub suggestion: String,
    /// Whether trying again might succeed.
    pub retriable: bool,
    pub severity: Severity,
}

impl HumanError {
    fn new(message: &str, suggestion: &str, retriable: bool, severity: Severity) -> Self {
        Self {
            message: message.into(),
            suggestion: suggestion.into(),
            retriable,
            severity,
        }
    }
}

/// Convert a `KioskError` into something a walk-up user can act on.
pub fn humanize_error(err: &KioskError) -> HumanError {
    match err {
        // -- Job tokens and codes --
        KioskError::InvalidCode => HumanError::new(
            "That pickup code doesn't look right.",
            "Pickup codes are 4 digits. Check the code and type it again.",
            false,
            Severity::ActionRequired,
        ),

        KioskError::TokenExpired => HumanError::new(
            "This print link has expired.",
            "Scan the QR code again or request a new link from the website.",
            false,
            Severity::ActionRequired,
        ),

        KioskError::TokenNonceReused => HumanError::new(
            "This print link has already been used.",
            "Each link prints once. Request a new link from the website.",
            false,
            Severity::ActionRequired,
        ),

        KioskError::BadSignature => HumanError::new(
            "This print link isn't valid.",
            "Request a new link from the website.",
            false,
            Severity::Permanent,
        ),

        // -- Remote server --
        KioskError::RemoteTimeout(_) => HumanError::new(
            "The payment server didn't answer in time.",
            "Wait a moment and enter your code again.",
            true,
            Severity::Transient,
        ),

        KioskError::RemoteRejected(1) => HumanError::new(
            "Your account is in debt.",
            "Top up your account on the website, then enter your code again.",
            false,
            Severity::ActionRequired,
        ),

        KioskError::RemoteRejected(_) => HumanError::new(
            "Payment was declined.",
            "Check your account on the website, then enter your code again.",
            false,
            Severity::ActionRequired,
        ),

        KioskError::Remote(_) => HumanError::new(
            "The kiosk can't reach the payment server.",
            "The network may be down. Try again in a minute.",
            true,
            Severity::Transient,
        ),

        // -- Printer --
        KioskError::PrinterError { state, message } => humanize_printer_state(*state, message),

        KioskError::SubmissionFailed(_) => HumanError::new(
            "The document couldn't be sent to the printer.",
            "Try again. If it keeps failing, ask staff to restart the print service.",
            true,
            Severity::Transient,
        ),

        KioskError::WaitTimeout { .. } => HumanError::new(
            "The printer is taking too long.",
            "Check the printer's screen. Ask staff for help if nothing is printing.",
            false,
            Severity::ActionRequired,
        ),

        KioskError::StatusQuery(_) => HumanError::new(
            "The kiosk can't see the printer.",
            "Ask staff to check that the printer is switched on and connected.",
            true,
            Severity::Transient,
        ),

        KioskError::InvalidJob(_) => HumanError::new(
            "This document can't be printed.",
            "The file may be empty or damaged. Try uploading it again.",
            false,
            Severity::Permanent,
        ),

        KioskError::Cancelled => HumanError::new(
            "Printing was stopped.",
            "Ask staff to reprint the rest of your job.",
            false,
            Severity::ActionRequired,
        ),

        // -- Startup and storage --
        KioskError::KeyMaterial(_) | KioskError::Config(_) => HumanError::new(
            "The kiosk isn't set up correctly.",
            "Ask staff for help.",
            false,
            Severity::Permanent,
        ),

        KioskError::Database(_) | KioskError::Serialization(_) => HumanError::new(
            "The kiosk had an internal data problem.",
            "Try again. If this keeps happening, ask staff for help.",
            true,
            Severity::Transient,
        ),

        KioskError::Io(io_err) => {
            if io_err.kind() == std::io::ErrorKind::NotFound {
                HumanError::new(
                    "Your document couldn't be found.",
                    "Uploads are kept for 24 hours. Upload the file again.",
                    false,
                    Severity::ActionRequired,
                )
            } else {
                HumanError::new(
                    "There was a problem reading your document.",
                    "Try again. If this keeps happening, ask staff for help.",
                    true,
                    Severity::Transient,
                )
            }
        }
    }
}

fn humanize_printer_state(state: PrinterState, detail: &Option<String>) -> HumanError {
    match state {
        PrinterState::OutOfPaper => HumanError::new(
            "The printer is out of paper.",
            "Ask staff to add paper. Your job will not be charged again.",
            false,
            Severity::ActionRequired,
        ),
        PrinterState::PaperJam => HumanError::new(
            "Paper is stuck in the printer.",
            "Ask staff to clear the jam before printing again.",
            false,
            Severity::ActionRequired,
        ),
        PrinterState::CannotPrint => HumanError::new(
            "This document can't be printed.",
            "The printer rejected the file. Try saving it as a plain PDF and uploading again.",
            false,
            Severity::Permanent,
        ),
        PrinterState::MechanicalFault | PrinterState::PrinterError => HumanError {
            message: "The printer has a fault.".into(),
            suggestion: match detail {
                Some(detail) => format!("Ask staff for help. (Printer says: {detail})"),
                None => "Ask staff for help.".into(),
            },
            retriable: false,
            severity: Severity::Permanent,
        },
        PrinterState::Unknown | PrinterState::Idle | PrinterState::Printing => HumanError {
            message: "The printer is in an unexpected state.".into(),
            suggestion: match detail {
                Some(detail) => format!("Wait a moment and try again. (Printer says: {detail})"),
                None => "Wait a moment and try again.".into(),
            },
            retriable: true,
            severity: Severity::Transient,
        },
    }
}

/// Display label of a printer state.
pub fn status_label(state: PrinterState) -> &'static str {
    match state {
        PrinterState::CannotPrint => "此文件无法打印",
        PrinterState::Idle => "待命",
        PrinterState::MechanicalFault => "机械故障",
        PrinterState::OutOfPaper => "缺纸",
        PrinterState::PaperJam => "卡纸",
        PrinterState::PrinterError => "打印机异常",
        PrinterState::Printing => "正在打印",
        PrinterState::Unknown => "未知",
    }
}

/// One printer's status as a display fragment: label, then `:message` if
/// the printer gave one.
pub fn describe_status(status: &DeviceStatus) -> String {
    match status.message.as_deref() {
        Some(message) if !message.is_empty() => {
            format!("{}:{message}", status_label(status.state))
        }
        _ => status_label(status.state).to_owned(),
    }
}

/// Both printers' status joined into the single line shown on the idle
/// screen.
pub fn join_status(mono: &DeviceStatus, color: &DeviceStatus) -> String {
    format!(
        "黑白打印机{}，彩色打印机{}",
        describe_status(mono),
        describe_status(color)
    )
}
