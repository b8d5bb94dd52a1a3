// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Async IPP client for the local CUPS scheduler.
//
// The kiosk only ever reads status over IPP; documents are submitted through
// `lp`. Two operations are used:
//   - Get-Jobs                (RFC 8011 §4.2.6)  which-jobs=all, job-state
//   - Get-Printer-Attributes  (RFC 8011 §4.2.5)  state reasons and message

use std::collections::HashMap;

use ipp::attribute::IppAttribute;
use ipp::operation::IppOperation;
use ipp::prelude::*;
use ipp::request::IppRequestResponse;
use tracing::{debug, error, instrument};

use kiosk_core::error::{KioskError, Result};

/// Base URI of CUPS queues on this host.
pub const CUPS_PRINTERS_BASE: &str = "ipp://localhost:631/printers/";

/// IPP `job-state` values (RFC 8011 §5.3.7).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueuedJobState {
    Pending,
    PendingHeld,
    Processing,
    ProcessingStopped,
    Canceled,
    Aborted,
    Completed,
}

impl QueuedJobState {
    pub fn from_enum(value: i32) -> Option<Self> {
        match value {
            3 => Some(Self::Pending),
            4 => Some(Self::PendingHeld),
            5 => Some(Self::Processing),
            6 => Some(Self::ProcessingStopped),
            7 => Some(Self::Canceled),
            8 => Some(Self::Aborted),
            9 => Some(Self::Completed),
            _ => None,
        }
    }

    pub fn from_keyword(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(Self::Pending),
            "pending-held" => Some(Self::PendingHeld),
            "processing" => Some(Self::Processing),
            "processing-stopped" => Some(Self::ProcessingStopped),
            "canceled" => Some(Self::Canceled),
            "aborted" => Some(Self::Aborted),
            "completed" => Some(Self::Completed),
            _ => None,
        }
    }

    /// Jobs in these states still occupy the printer.
    pub fn is_pending(&self) -> bool {
        matches!(self, Self::Pending | Self::PendingHeld | Self::Processing)
    }
}

/// What one status query saw, before any profile-specific interpretation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawPrinterStatus {
    /// Jobs on the queue that have not reached a terminal state.
    pub pending_jobs: usize,
    /// `printer-state-reasons` keywords.
    pub state_reasons: Vec<String>,
    /// `printer-state-message`, if the printer set one.
    pub state_message: Option<String>,
}

/// Get-Jobs with operation attributes the builder does not expose.
struct JobStateQuery {
    request: IppRequestResponse,
}

impl IppOperation for JobStateQuery {
    fn into_ipp_request(self) -> IppRequestResponse {
        self.request
    }
}

/// Async IPP client bound to one CUPS queue.
pub struct IppClient {
    uri: Uri,
}

impl IppClient {
    /// Create a client for an arbitrary IPP URI.
    pub fn new(uri: &str) -> Result<Self> {
        let parsed: Uri = uri
            .parse()
            .map_err(|e| KioskError::StatusQuery(format!("invalid URI '{uri}': {e}")))?;
        Ok(Self { uri: parsed })
    }

    /// Create a client for the local CUPS queue `name`.
    pub fn for_queue(name: &str) -> Result<Self> {
        Self::new(&queue_uri(name))
    }

    pub fn uri(&self) -> &Uri {
        &self.uri
    }

    /// Read job and printer state and return them uninterpreted.
    #[instrument(skip(self), fields(uri = %self.uri))]
    pub async fn query(&self) -> Result<RawPrinterStatus> {
        let jobs = self.get_job_states().await?;
        let attrs = self.get_printer_attributes().await?;

        let state_reasons = attrs.get("printer-state-reasons").cloned().unwrap_or_default();
        let state_message = attrs
            .get("printer-state-message")
            .and_then(|values| values.first())
            .filter(|m| !m.is_empty())
            .cloned();

        let raw = RawPrinterStatus {
            pending_jobs: jobs.iter().filter(|s| s.is_pending()).count(),
            state_reasons,
            state_message,
        };
        debug!(?raw, "printer status read");
        Ok(raw)
    }

    /// Get-Printer-Attributes as a map of attribute name to its values.
    pub async fn get_printer_attributes(&self) -> Result<HashMap<String, Vec<String>>> {
        let operation = IppOperationBuilder::get_printer_attributes(self.uri.clone()).build();
        let client = AsyncIppClient::new(self.uri.clone());

        debug!("sending Get-Printer-Attributes");
        let response = client
            .send(operation)
            .await
            .map_err(|e| KioskError::StatusQuery(format!("Get-Printer-Attributes: {e}")))?;

        if !response.header().status_code().is_success() {
            let code = response.header().status_code();
            error!(status = ?code, "Get-Printer-Attributes failed");
            return Err(KioskError::StatusQuery(format!(
                "Get-Printer-Attributes returned status {code:?}"
            )));
        }

        let mut map = HashMap::new();
        for group in response.attributes().groups_of(DelimiterTag::PrinterAttributes) {
            for (name, attr) in group.attributes() {
                map.insert(name.clone(), value_strings(attr.value()));
            }
        }
        Ok(map)
    }

    /// Get-Jobs for every job on the queue, returning their states.
    pub async fn get_job_states(&self) -> Result<Vec<QueuedJobState>> {
        let mut request = IppOperationBuilder::get_jobs(self.uri.clone())
            .build()
            .into_ipp_request();
        request.attributes_mut().add(
            DelimiterTag::OperationAttributes,
            IppAttribute::new("which-jobs", IppValue::Keyword("all".into())),
        );
        request.attributes_mut().add(
            DelimiterTag::OperationAttributes,
            IppAttribute::new("requested-attributes", IppValue::Keyword("job-state".into())),
        );

        let client = AsyncIppClient::new(self.uri.clone());
        debug!("sending Get-Jobs");
        let response = client
            .send(JobStateQuery { request })
            .await
            .map_err(|e| KioskError::StatusQuery(format!("Get-Jobs: {e}")))?;

        if !response.header().status_code().is_success() {
            let code = response.header().status_code();
            error!(status = ?code, "Get-Jobs failed");
            return Err(KioskError::StatusQuery(format!(
                "Get-Jobs returned status {code:?}"
            )));
        }

        let states = response
            .attributes()
            .groups_of(DelimiterTag::JobAttributes)
            .filter_map(|group| group.attributes().get("job-state"))
            .filter_map(|attr| job_state(attr.value()))
            .collect::<Vec<_>>();
        debug!(count = states.len(), "received job states");
        Ok(states)
    }
}

/// `ipp://localhost:631/printers/<name>` with the name percent-encoded.
pub fn queue_uri(name: &str) -> String {
    let mut uri = String::from(CUPS_PRINTERS_BASE);
    for b in name.bytes() {
        if b.is_ascii_alphanumeric() || matches!(b, b'-' | b'_' | b'.' | b'~') {
            uri.push(char::from(b));
        } else {
            uri.push_str(&format!("%{b:02X}"));
        }
    }
    uri
}

fn value_strings(value: &IppValue) -> Vec<String> {
    match value {
        IppValue::Array(values) => values.iter().map(ToString::to_string).collect(),
        other => vec![other.to_string()],
    }
}

fn job_state(value: &IppValue) -> Option<QueuedJobState> {
    match value {
        IppValue::Enum(n) => QueuedJobState::from_enum(*n),
        other => {
            let text = other.to_string();
            text.parse::<i32>()
                .ok()
                .and_then(QueuedJobState::from_enum)
                .or_else(|| QueuedJobState::from_keyword(&text))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn queue_names_are_percent_encoded() {
        assert_eq!(
            queue_uri("HP_LaserJet_M1136"),
            "ipp://localhost:631/printers/HP_LaserJet_M1136"
        );
        assert_eq!(queue_uri("Canon MG2500"), "ipp://localhost:631/printers/Canon%20MG2500");
        assert_eq!(queue_uri("a/b"), "ipp://localhost:631/printers/a%2Fb");
    }

    #[test]
    fn for_queue_builds_a_valid_uri() {
        assert!(IppClient::for_queue("Canon MG2500 series").is_ok());
    }

    #[test]
    fn new_rejects_invalid_uri() {
        assert!(IppClient::new("not a valid uri %%%").is_err());
    }

    #[test]
    fn job_states_from_enum_and_keyword() {
        assert_eq!(job_state(&IppValue::Enum(5)), Some(QueuedJobState::Processing));
        assert_eq!(job_state(&IppValue::Enum(9)), Some(QueuedJobState::Completed));
        assert_eq!(job_state(&IppValue::Enum(42)), None);
        assert_eq!(
            job_state(&IppValue::Keyword("pending-held".into())),
            Some(QueuedJobState::PendingHeld)
        );
    }

    #[test]
    fn terminal_states_are_not_pending() {
        for state in [
            QueuedJobState::ProcessingStopped,
            QueuedJobState::Canceled,
            QueuedJobState::Aborted,
            QueuedJobState::Completed,
        ] {
            assert!(!state.is_pending(), "{state:?}");
        }
        assert!(QueuedJobState::Pending.is_pending());
        assert!(QueuedJobState::Processing.is_pending());
    }

    #[test]
    fn multi_valued_attributes_are_split() {
        let value = IppValue::Array(vec![
            IppValue::Keyword("media-empty-error".into()),
            IppValue::Keyword("toner-low-warning".into()),
        ]);
        assert_eq!(
            value_strings(&value),
            vec!["media-empty-error".to_string(), "toner-low-warning".to_string()]
        );
    }
}
