// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Printer profiles and the printer binding table.
//
// A profile knows how one printer family reports faults and which CUPS
// options it needs. The kiosk supports two families; the profile of each
// physical printer is chosen once, from configuration, at startup.

use std::str::FromStr;

use kiosk_core::config::{KioskConfig, PrinterConfig};
use kiosk_core::error::{KioskError, Result};
use kiosk_core::types::{DeviceStatus, PrintConfiguration, PrinterKind, PrinterState};

use crate::ipp_client::RawPrinterStatus;

/// Printer family.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrinterProfile {
    /// Any CUPS printer that reports faults through standard
    /// `printer-state-reasons`.
    CommonIpp,
    /// Canon PIXMA MG2500 series, which reports faults as support codes in
    /// `printer-state-message`.
    CanonMg2500,
}

impl FromStr for PrinterProfile {
    type Err = KioskError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "common" => Ok(Self::CommonIpp),
            "canon-mg2500" => Ok(Self::CanonMg2500),
            other => Err(KioskError::Config(format!(
                "unknown printer profile '{other}' (expected 'common' or 'canon-mg2500')"
            ))),
        }
    }
}

impl PrinterProfile {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CommonIpp => "common",
            Self::CanonMg2500 => "canon-mg2500",
        }
    }

    /// Interpret one raw status query.
    pub fn map_status(&self, raw: &RawPrinterStatus) -> DeviceStatus {
        let base = if raw.pending_jobs > 0 {
            PrinterState::Printing
        } else {
            PrinterState::Idle
        };
        match self {
            Self::CommonIpp => {
                let reasons = raw
                    .state_reasons
                    .iter()
                    .map(|r| r.trim())
                    .filter(|r| !r.is_empty() && *r != "none");
                let mut advisory = false;
                let mut fault = None;
                for reason in reasons {
                    if is_advisory_reason(reason) {
                        advisory = true;
                    } else {
                        fault = Some(reason);
                        break;
                    }
                }
                match fault {
                    None if advisory => DeviceStatus::new(base, raw.state_message.clone()),
                    None => DeviceStatus::new(base, None),
                    Some(reason) => {
                        let state = match reason {
                            "media-empty-error" => PrinterState::OutOfPaper,
                            "media-jam-error" => PrinterState::PaperJam,
                            _ => PrinterState::Unknown,
                        };
                        DeviceStatus::new(state, raw.state_message.clone())
                    }
                }
            }
            Self::CanonMg2500 => {
                let message = raw.state_message.clone();
                let state = message
                    .as_deref()
                    .and_then(canon_support_code)
                    .map_or(base, canon_code_state);
                DeviceStatus::new(state, message)
            }
        }
    }

    /// CUPS option that forces grayscale output.
    pub fn grayscale_option(&self) -> (&'static str, &'static str) {
        match self {
            Self::CommonIpp => ("ColorModel", "Gray"),
            Self::CanonMg2500 => ("CNGrayscale", "True"),
        }
    }

    /// Whether the second duplex side is printed in reverse order.
    pub fn reverses_second_side(&self) -> bool {
        matches!(self, Self::CanonMg2500)
    }

    /// Whether single-sided jobs are printed in reverse order.
    pub fn reverses_single_sided(&self) -> bool {
        matches!(self, Self::CanonMg2500)
    }
}

/// `printer-state-reasons` keywords that do not stop the printer: the
/// `-report` and `-warning` severities, and CUPS's own bookkeeping reasons.
fn is_advisory_reason(reason: &str) -> bool {
    if reason.ends_with("-report") || reason.ends_with("-warning") {
        return true;
    }
    reason.starts_with("cups-") && !reason.ends_with("-error")
}

/// First run of four support-code characters (`0`-`9`, `B`) in `message`.
fn canon_support_code(message: &str) -> Option<&str> {
    let bytes = message.as_bytes();
    bytes
        .windows(4)
        .position(|w| w.iter().all(|&b| b.is_ascii_digit() || b == b'B'))
        .map(|start| &message[start..start + 4])
}

fn canon_code_state(code: &str) -> PrinterState {
    match code {
        "1000" => PrinterState::OutOfPaper,
        "1300" => PrinterState::PaperJam,
        "4100" | "4102" => PrinterState::CannotPrint,
        "1200" | "1203" | "1401" | "1403" | "1485" | "1682" | "1684" | "1686" | "1687"
        | "1688" | "1700" | "1701" | "1890" => PrinterState::MechanicalFault,
        // 5011 5012 5100 5200 5400 5B00 5B01 6000 6800 6801 6930-6946 B200 B201
        // and anything not listed above.
        _ => PrinterState::PrinterError,
    }
}

/// One physical printer as the kiosk drives it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrinterBinding {
    pub kind: PrinterKind,
    /// CUPS queue name.
    pub name: String,
    pub profile: PrinterProfile,
}

impl PrinterBinding {
    pub fn new(kind: PrinterKind, name: impl Into<String>, profile: PrinterProfile) -> Self {
        Self {
            kind,
            name: name.into(),
            profile,
        }
    }

    pub fn from_config(kind: PrinterKind, config: &PrinterConfig) -> Result<Self> {
        let profile = config
            .profile
            .parse()
            .map_err(|e| KioskError::Config(format!("{kind} printer: {e}")))?;
        Ok(Self::new(kind, config.name.clone(), profile))
    }
}

/// The two kiosk printers, resolved once at startup.
#[derive(Debug, Clone)]
pub struct PrinterBindings {
    mono: PrinterBinding,
    color: PrinterBinding,
}

impl PrinterBindings {
    pub fn new(mono: PrinterBinding, color: PrinterBinding) -> Self {
        Self { mono, color }
    }

    pub fn from_config(config: &KioskConfig) -> Result<Self> {
        Ok(Self {
            mono: PrinterBinding::from_config(PrinterKind::Monochrome, &config.mono_printer)?,
            color: PrinterBinding::from_config(PrinterKind::Color, &config.color_printer)?,
        })
    }

    pub fn get(&self, kind: PrinterKind) -> &PrinterBinding {
        match kind {
            PrinterKind::Monochrome => &self.mono,
            PrinterKind::Color => &self.color,
        }
    }

    /// The printer a job with these settings goes to.
    pub fn for_config(&self, config: &PrintConfiguration) -> &PrinterBinding {
        self.get(PrinterKind::for_config(config))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(pending: usize, reasons: &[&str], message: Option<&str>) -> RawPrinterStatus {
        RawPrinterStatus {
            pending_jobs: pending,
            state_reasons: reasons.iter().map(|r| r.to_string()).collect(),
            state_message: message.map(str::to_owned),
        }
    }

    #[test]
    fn common_idle_and_printing() {
        let p = PrinterProfile::CommonIpp;
        assert_eq!(p.map_status(&raw(0, &["none"], None)), DeviceStatus::idle());
        assert_eq!(
            p.map_status(&raw(2, &["none"], Some("Printing page 1"))).state,
            PrinterState::Printing
        );
        assert_eq!(p.map_status(&raw(0, &[], None)), DeviceStatus::idle());
    }

    #[test]
    fn common_reason_mapping() {
        let p = PrinterProfile::CommonIpp;
        let empty = p.map_status(&raw(1, &["media-empty-error"], Some("Out of paper")));
        assert_eq!(empty.state, PrinterState::OutOfPaper);
        assert_eq!(empty.message.as_deref(), Some("Out of paper"));
        assert_eq!(
            p.map_status(&raw(0, &["media-jam-error"], None)).state,
            PrinterState::PaperJam
        );
        let other = p.map_status(&raw(0, &["door-open-error"], Some("Close the door")));
        assert_eq!(other.state, PrinterState::Unknown);
        assert_eq!(other.message.as_deref(), Some("Close the door"));
    }

    #[test]
    fn common_advisory_reasons_keep_the_job_state() {
        let p = PrinterProfile::CommonIpp;
        let low = p.map_status(&raw(1, &["toner-low-warning"], Some("Toner low")));
        assert_eq!(low.state, PrinterState::Printing);
        assert_eq!(low.message.as_deref(), Some("Toner low"));
        assert_eq!(
            p.map_status(&raw(0, &["media-low-report"], None)).state,
            PrinterState::Idle
        );
        assert_eq!(
            p.map_status(&raw(1, &["cups-waiting-for-job-completed"], None)).state,
            PrinterState::Printing
        );
    }

    #[test]
    fn common_fault_wins_over_advisories() {
        let p = PrinterProfile::CommonIpp;
        let status = p.map_status(&raw(
            1,
            &["toner-low-warning", "media-jam-error"],
            Some("Paper jam"),
        ));
        assert_eq!(status.state, PrinterState::PaperJam);
        assert_eq!(
            p.map_status(&raw(0, &["cups-missing-filter-error"], None)).state,
            PrinterState::Unknown
        );
        assert_eq!(
            p.map_status(&raw(0, &["cover-open"], None)).state,
            PrinterState::Unknown
        );
    }

    #[test]
    fn canon_support_codes() {
        let p = PrinterProfile::CanonMg2500;
        let cases = [
            ("Support Code 1000", PrinterState::OutOfPaper),
            ("1300", PrinterState::PaperJam),
            ("code 4102 detected", PrinterState::CannotPrint),
            ("1401", PrinterState::MechanicalFault),
            ("1890", PrinterState::MechanicalFault),
            ("5B00", PrinterState::PrinterError),
            ("B201", PrinterState::PrinterError),
            ("6933", PrinterState::PrinterError),
            ("9999", PrinterState::PrinterError),
        ];
        for (message, expected) in cases {
            let status = p.map_status(&raw(0, &["none"], Some(message)));
            assert_eq!(status.state, expected, "{message}");
            assert_eq!(status.message.as_deref(), Some(message));
        }
    }

    #[test]
    fn canon_without_code_follows_jobs() {
        let p = PrinterProfile::CanonMg2500;
        assert_eq!(p.map_status(&raw(0, &[], None)).state, PrinterState::Idle);
        assert_eq!(p.map_status(&raw(1, &[], Some("Ready"))).state, PrinterState::Printing);
    }

    #[test]
    fn support_code_is_first_four_char_run() {
        assert_eq!(canon_support_code("err 5B01 then 1000"), Some("5B01"));
        assert_eq!(canon_support_code("abc"), None);
        assert_eq!(canon_support_code("12a4"), None);
    }

    #[test]
    fn profiles_parse_from_config_names() {
        assert_eq!("common".parse::<PrinterProfile>().expect("common"), PrinterProfile::CommonIpp);
        assert_eq!(
            "canon-mg2500".parse::<PrinterProfile>().expect("canon"),
            PrinterProfile::CanonMg2500
        );
        assert!("hp".parse::<PrinterProfile>().is_err());
    }

    #[test]
    fn bindings_follow_color_flag() {
        let mut config = KioskConfig::default();
        config.color_printer.profile = "canon-mg2500".into();
        let bindings = PrinterBindings::from_config(&config).expect("bindings");

        let color = PrintConfiguration::new(1, true, false).expect("config");
        let binding = bindings.for_config(&color);
        assert_eq!(binding.kind, PrinterKind::Color);
        assert_eq!(binding.profile, PrinterProfile::CanonMg2500);
        assert_eq!(
            bindings.for_config(&PrintConfiguration::default()).kind,
            PrinterKind::Monochrome
        );
    }

    #[test]
    fn unknown_profile_in_config_is_rejected() {
        let mut config = KioskConfig::default();
        config.mono_printer.profile = "epson".into();
        assert!(matches!(
            PrinterBindings::from_config(&config),
            Err(KioskError::Config(_))
        ));
    }
}
