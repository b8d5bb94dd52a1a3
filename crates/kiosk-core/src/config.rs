// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Kiosk configuration.
//
// Settings come from an optional JSON file and are then overridden by the
// environment variables the kiosk has always been deployed with.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{KioskError, Result};
use crate::types::{PrintConfiguration, PrinterKind, TokenProtocol};

/// One physical printer: its CUPS queue name and the profile that knows how
/// to talk to it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrinterConfig {
    /// CUPS queue name.
    pub name: String,
    /// Profile identifier (`common`, `canon-mg2500`).
    pub profile: String,
}

/// Kiosk settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct KioskConfig {
    /// Host root of the cloud print server; endpoints live under `/_api/`.
    pub remote_base: String,
    /// This kiosk's printer ID at the remote server.
    pub printer_id: i64,
    /// PEM public key of the remote server (verifies job tokens).
    pub remote_key_file: PathBuf,
    /// PEM private key of this kiosk (signs outgoing requests).
    pub endpoint_key_file: PathBuf,
    pub mono_printer: PrinterConfig,
    pub color_printer: PrinterConfig,
    /// Print settings for files uploaded without any.
    pub default_print: PrintConfiguration,
    pub token_protocol: TokenProtocol,
    /// Maximum token age for the timestamp protocol.
    pub token_max_age_secs: u64,
    /// Directory holding uploaded documents.
    pub file_dir: PathBuf,
    /// Document printed to pad odd page counts in duplex runs.
    pub blank_page_file: PathBuf,
    /// SQLite file of the upload server's job records.
    pub job_db: PathBuf,
    /// SQLite file of consumed token nonces.
    pub nonce_db: PathBuf,
    pub admin_password: Option<String>,
    pub status_interval_ms: u64,
    pub status_query_timeout_ms: u64,
    pub job_timeout_secs: u64,
    pub remote_timeout_ms: u64,
    pub ip_update_interval_secs: u64,
    pub control_code_interval_secs: u64,
}

impl Default for KioskConfig {
    fn default() -> Self {
        Self {
            remote_base: "http://localhost:8000".into(),
            printer_id: 0,
            remote_key_file: PathBuf::from("keys/remote.pub.pem"),
            endpoint_key_file: PathBuf::from("keys/endpoint.pem"),
            mono_printer: PrinterConfig {
                name: "bw".into(),
                profile: "common".into(),
            },
            color_printer: PrinterConfig {
                name: "colored".into(),
                profile: "common".into(),
            },
            default_print: PrintConfiguration::default(),
            token_protocol: TokenProtocol::Timestamp,
            token_max_age_secs: 60,
            file_dir: PathBuf::from("files"),
            blank_page_file: PathBuf::from("files/empty"),
            job_db: PathBuf::from("jobs.db"),
            nonce_db: PathBuf::from("nonces.db"),
            admin_password: None,
            status_interval_ms: 500,
            status_query_timeout_ms: 2_000,
            job_timeout_secs: 600,
            remote_timeout_ms: 5_000,
            ip_update_interval_secs: 10,
            control_code_interval_secs: 60,
        }
    }
}

impl KioskConfig {
    /// Load settings: the JSON file at `path` if given, otherwise defaults,
    /// then environment overrides, then validation.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => {
                let data = std::fs::read_to_string(path)?;
                serde_json::from_str(&data)?
            }
            None => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Apply overrides from an environment-like lookup.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(v) = lookup("REMOTE_BASE") {
            self.remote_base = v;
        }
        if let Some(v) = lookup("PRINTER_ID") {
            self.printer_id = parse_env("PRINTER_ID", &v)?;
        }
        if let Some(v) = lookup("REMOTE_KEYFILE") {
            self.remote_key_file = v.into();
        }
        if let Some(v) = lookup("ENDPOINT_KEYFILE") {
            self.endpoint_key_file = v.into();
        }
        if let Some(v) = lookup("BW_PRINTER_NAME") {
            self.mono_printer.name = v;
        }
        if let Some(v) = lookup("BW_PRINTER_PROFILE") {
            self.mono_printer.profile = v;
        }
        if let Some(v) = lookup("COLORED_PRINTER_NAME") {
            self.color_printer.name = v;
        }
        if let Some(v) = lookup("COLORED_PRINTER_PROFILE") {
            self.color_printer.profile = v;
        }

        let copies = match lookup("DEFAULT_COPIES") {
            Some(v) => parse_env("DEFAULT_COPIES", &v)?,
            None => self.default_print.copies(),
        };
        let colored = match lookup("DEFAULT_COLORED") {
            Some(v) => v == "true",
            None => self.default_print.colored(),
        };
        let double_sided = match lookup("DEFAULT_DOUBLE_SIDED") {
            Some(v) => v == "true",
            None => self.default_print.double_sided(),
        };
        self.default_print = PrintConfiguration::new(copies, colored, double_sided)
            .map_err(|e| KioskError::Config(format!("default print settings: {e}")))?;

        if let Some(v) = lookup("TOKEN_PROTOCOL") {
            self.token_protocol = match v.as_str() {
                "timestamp" => TokenProtocol::Timestamp,
                "nonce" => TokenProtocol::Nonce,
                other => {
                    return Err(KioskError::Config(format!(
                        "TOKEN_PROTOCOL must be 'timestamp' or 'nonce', got '{other}'"
                    )));
                }
            };
        }
        if let Some(v) = lookup("FILEDIR") {
            self.blank_page_file = PathBuf::from(&v).join("empty");
            self.file_dir = v.into();
        }
        if let Some(v) = lookup("DBFILE") {
            self.job_db = v.into();
        }
        if let Some(v) = lookup("NONCE_DBFILE") {
            self.nonce_db = v.into();
        }
        if let Some(v) = lookup("ADMIN_PASSWORD") {
            self.admin_password = Some(v);
        }
        Ok(())
    }

    /// Reject settings the kiosk cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.remote_base.trim().is_empty() {
            return Err(KioskError::Config("remote_base is empty".into()));
        }
        for (kind, printer) in [
            (PrinterKind::Monochrome, &self.mono_printer),
            (PrinterKind::Color, &self.color_printer),
        ] {
            if printer.name.trim().is_empty() {
                return Err(KioskError::Config(format!("{kind} printer name is empty")));
            }
        }
        let intervals = [
            ("status_interval_ms", self.status_interval_ms),
            ("status_query_timeout_ms", self.status_query_timeout_ms),
            ("job_timeout_secs", self.job_timeout_secs),
            ("remote_timeout_ms", self.remote_timeout_ms),
            ("ip_update_interval_secs", self.ip_update_interval_secs),
            ("control_code_interval_secs", self.control_code_interval_secs),
        ];
        for (name, value) in intervals {
            if value == 0 {
                return Err(KioskError::Config(format!("{name} must be positive")));
            }
        }
        Ok(())
    }

    pub fn printer(&self, kind: PrinterKind) -> &PrinterConfig {
        match kind {
            PrinterKind::Monochrome => &self.mono_printer,
            PrinterKind::Color => &self.color_printer,
        }
    }

    pub fn status_interval(&self) -> Duration {
        Duration::from_millis(self.status_interval_ms)
    }

    pub fn status_query_timeout(&self) -> Duration {
        Duration::from_millis(self.status_query_timeout_ms)
    }

    pub fn job_timeout(&self) -> Duration {
        Duration::from_secs(self.job_timeout_secs)
    }

    pub fn remote_timeout(&self) -> Duration {
        Duration::from_millis(self.remote_timeout_ms)
    }

    pub fn ip_update_interval(&self) -> Duration {
        Duration::from_secs(self.ip_update_interval_secs)
    }

    pub fn token_max_age(&self) -> Duration {
        Duration::from_secs(self.token_max_age_secs)
    }

    pub fn control_code_interval(&self) -> Duration {
        Duration::from_secs(self.control_code_interval_secs)
    }

    /// Path of a stored document in the upload directory.
    pub fn document_path(&self, file_id: &str) -> PathBuf {
        self.file_dir.join(file_id)
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, value: &str) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e| KioskError::Config(format!("{key}='{value}': {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_are_valid() {
        KioskConfig::default().validate().expect("defaults validate");
    }

    #[test]
    fn env_overrides_printers_and_defaults() {
        let mut config = KioskConfig::default();
        config
            .apply_env(env(&[
                ("BW_PRINTER_NAME", "HP_M1136"),
                ("COLORED_PRINTER_PROFILE", "canon-mg2500"),
                ("DEFAULT_COPIES", "2"),
                ("DEFAULT_DOUBLE_SIDED", "true"),
                ("PRINTER_ID", "17"),
                ("TOKEN_PROTOCOL", "nonce"),
            ]))
            .expect("apply env");

        assert_eq!(config.mono_printer.name, "HP_M1136");
        assert_eq!(config.color_printer.profile, "canon-mg2500");
        assert_eq!(config.default_print.copies(), 2);
        assert!(config.default_print.double_sided());
        assert!(!config.default_print.colored());
        assert_eq!(config.printer_id, 17);
        assert_eq!(config.token_protocol, TokenProtocol::Nonce);
    }

    #[test]
    fn bad_numbers_are_config_errors() {
        let mut config = KioskConfig::default();
        let err = config
            .apply_env(env(&[("PRINTER_ID", "seventeen")]))
            .expect_err("must fail");
        assert!(matches!(err, KioskError::Config(_)));

        let err = config
            .apply_env(env(&[("DEFAULT_COPIES", "0")]))
            .expect_err("zero copies");
        assert!(matches!(err, KioskError::Config(_)));
    }

    #[test]
    fn filedir_moves_blank_page() {
        let mut config = KioskConfig::default();
        config
            .apply_env(env(&[("FILEDIR", "/srv/kiosk/files")]))
            .expect("apply env");
        assert_eq!(config.blank_page_file, PathBuf::from("/srv/kiosk/files/empty"));
        assert_eq!(
            config.document_path("abc.pdf"),
            PathBuf::from("/srv/kiosk/files/abc.pdf")
        );
    }

    #[test]
    fn zero_interval_is_rejected() {
        let config = KioskConfig {
            status_interval_ms: 0,
            ..KioskConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn partial_json_file_keeps_defaults() {
        let config: KioskConfig =
            serde_json::from_str(r#"{"printer_id": 3, "token_protocol": "nonce"}"#)
                .expect("parse");
        assert_eq!(config.printer_id, 3);
        assert_eq!(config.status_interval_ms, 500);
        assert_eq!(config.token_protocol, TokenProtocol::Nonce);
    }
}
