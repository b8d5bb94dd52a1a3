// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Core domain types for the print kiosk.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{KioskError, Result};

/// How many digits a pickup code has.
pub const CODE_DIGITS: usize = 4;

/// Whether `code` is a well-formed pickup code: exactly [`CODE_DIGITS`]
/// ASCII digits.
pub fn is_valid_code(code: &str) -> bool {
    code.len() == CODE_DIGITS && code.bytes().all(|b| b.is_ascii_digit())
}

/// Same check for a code that arrived as arbitrary JSON.  Anything that is
/// not a string is invalid.
pub fn is_valid_code_value(value: &serde_json::Value) -> bool {
    value.as_str().is_some_and(is_valid_code)
}

/// A validated pickup code.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct JobCode(String);

impl JobCode {
    pub fn parse(code: &str) -> Result<Self> {
        if is_valid_code(code) {
            Ok(Self(code.to_owned()))
        } else {
            Err(KioskError::InvalidCode)
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for JobCode {
    type Error = KioskError;

    fn try_from(value: String) -> Result<Self> {
        if is_valid_code(&value) {
            Ok(Self(value))
        } else {
            Err(KioskError::InvalidCode)
        }
    }
}

impl From<JobCode> for String {
    fn from(code: JobCode) -> Self {
        code.0
    }
}

impl std::fmt::Display for JobCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identifier attached to one walk-up print session, for log correlation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(pub Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Print settings attached to an uploaded file.
///
/// On the wire the duplex flag is spelled `double-sided`; `doubleSided` is
/// accepted on input too.  Missing fields fall back to the built-in
/// defaults, use [`PrintConfiguration::from_value_with_defaults`] to fall
/// back to configured ones instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawConfiguration")]
pub struct PrintConfiguration {
    copies: u32,
    colored: bool,
    #[serde(rename = "double-sided")]
    double_sided: bool,
}

#[derive(Debug, Default, Deserialize)]
struct RawConfiguration {
    copies: Option<u32>,
    colored: Option<bool>,
    #[serde(rename = "double-sided", alias = "doubleSided")]
    double_sided: Option<bool>,
}

impl RawConfiguration {
    fn resolve(self, defaults: &PrintConfiguration) -> Result<PrintConfiguration> {
        PrintConfiguration::new(
            self.copies.unwrap_or(defaults.copies),
            self.colored.unwrap_or(defaults.colored),
            self.double_sided.unwrap_or(defaults.double_sided),
        )
    }
}

impl TryFrom<RawConfiguration> for PrintConfiguration {
    type Error = KioskError;

    fn try_from(raw: RawConfiguration) -> Result<Self> {
        raw.resolve(&PrintConfiguration::default())
    }
}

impl PrintConfiguration {
    /// Build a configuration.  `copies` must be at least 1.
    pub fn new(copies: u32, colored: bool, double_sided: bool) -> Result<Self> {
        if copies == 0 {
            return Err(KioskError::InvalidJob("copies must be at least 1".into()));
        }
        Ok(Self {
            copies,
            colored,
            double_sided,
        })
    }

    /// Parse a stored configuration, taking any missing field from `defaults`.
    pub fn from_value_with_defaults(
        value: serde_json::Value,
        defaults: &PrintConfiguration,
    ) -> Result<Self> {
        let raw: RawConfiguration = serde_json::from_value(value)?;
        raw.resolve(defaults)
    }

    pub fn copies(&self) -> u32 {
        self.copies
    }

    pub fn colored(&self) -> bool {
        self.colored
    }

    pub fn double_sided(&self) -> bool {
        self.double_sided
    }
}

impl Default for PrintConfiguration {
    fn default() -> Self {
        Self {
            copies: 1,
            colored: false,
            double_sided: false,
        }
    }
}

/// An uploaded file waiting to be picked up, as read from the job store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileEntry {
    pub code: JobCode,
    /// Opaque handle of the stored document (its file name in the upload
    /// directory).
    pub id: String,
    /// Name the user uploaded the file under, shown on the preview line.
    pub file_name: String,
    pub page_count: u32,
    pub config: PrintConfiguration,
    pub printed: bool,
    pub created_at: DateTime<Utc>,
}

/// Normalized printer state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PrinterState {
    Unknown,
    Idle,
    Printing,
    OutOfPaper,
    PaperJam,
    #[serde(rename = "mechanical")]
    MechanicalFault,
    PrinterError,
    CannotPrint,
}

impl PrinterState {
    /// Every state other than `Idle` and `Printing` is an error state.
    pub fn is_error(&self) -> bool {
        !matches!(self, Self::Idle | Self::Printing)
    }

    /// Physical faults that are forwarded to the remote server.
    pub fn is_hardware_fault(&self) -> bool {
        matches!(
            self,
            Self::OutOfPaper | Self::PaperJam | Self::MechanicalFault | Self::PrinterError
        )
    }

    /// Wire keyword, as reported to the remote server.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unknown => "unknown",
            Self::Idle => "idle",
            Self::Printing => "printing",
            Self::OutOfPaper => "out-of-paper",
            Self::PaperJam => "paper-jam",
            Self::MechanicalFault => "mechanical",
            Self::PrinterError => "printer-error",
            Self::CannotPrint => "cannot-print",
        }
    }
}

impl std::fmt::Display for PrinterState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Normalized status of one physical printer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceStatus {
    pub state: PrinterState,
    pub message: Option<String>,
}

impl DeviceStatus {
    pub fn new(state: PrinterState, message: Option<String>) -> Self {
        Self { state, message }
    }

    pub fn unknown() -> Self {
        Self::new(PrinterState::Unknown, None)
    }

    pub fn idle() -> Self {
        Self::new(PrinterState::Idle, None)
    }

    pub fn is_error(&self) -> bool {
        self.state.is_error()
    }
}

impl Default for DeviceStatus {
    fn default() -> Self {
        Self::unknown()
    }
}

/// Which of the two kiosk printers a job goes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PrinterKind {
    Monochrome,
    Color,
}

impl PrinterKind {
    pub fn for_config(config: &PrintConfiguration) -> Self {
        if config.colored() {
            Self::Color
        } else {
            Self::Monochrome
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Monochrome => "bw",
            Self::Color => "colored",
        }
    }
}

impl std::fmt::Display for PrinterKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Progress marker yielded by a print run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Checkpoint {
    /// The first submission is about to go out.
    Start,
    /// Side one of copy `n` is out; the operator must flip the stack and
    /// confirm before side two is submitted.
    SecondSidePending(u32),
    /// Copy `n` is fully printed.
    CopyDone(u32),
    /// The whole job is printed.
    AllDone,
}

/// Which job-token freshness rule this deployment uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenProtocol {
    /// The challenge is a unix timestamp that must be recent.
    Timestamp,
    /// The challenge is a nonce that may be used only once.
    Nonce,
}
