// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Client for the cloud print server.
//
// Every call carries a signature made with this kiosk's private key and is
// bounded by the remote timeout. The server answers with `{"status": n, ..}`
// where 0 means success.

use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use tracing::{debug, info, instrument, warn};

use kiosk_core::config::KioskConfig;
use kiosk_core::error::{KioskError, Result};
use kiosk_core::types::{DeviceStatus, JobCode, PrintConfiguration};
use kiosk_security::Signer;

/// Remote status for an account with unpaid prints.
pub const STATUS_IN_DEBT: i64 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
}

/// A signed request, ready to send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteRequest {
    pub method: Method,
    /// Endpoint name under the server's `/_api/` root.
    pub path: &'static str,
    /// Form body for POST, query string for GET.
    pub params: Vec<(&'static str, String)>,
}

impl RemoteRequest {
    pub fn param(&self, key: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(k, _)| *k == key)
            .map(|(_, v)| v.as_str())
    }
}

#[derive(Debug, Deserialize)]
struct RemoteResponse {
    status: i64,
}

/// The `config` field of a payment: the job settings plus the number of
/// sheets billed.
pub fn billing_config(config: &PrintConfiguration, page_count: u32) -> Result<String> {
    let mut value = serde_json::to_value(config)?;
    if let Some(object) = value.as_object_mut() {
        let billed = u64::from(page_count) * u64::from(config.copies());
        object.insert("page-count".into(), billed.into());
    }
    Ok(serde_json::to_string(&value)?)
}

/// Root of the server's API, relative to its host.
const API_ROOT: &str = "/_api/";

/// Signed calls to the cloud print server.
pub struct RemoteClient {
    http: reqwest::Client,
    /// `<host>/_api/`, whatever path the configured base carried.
    api: reqwest::Url,
    printer_id: i64,
    signer: Arc<Signer>,
    timeout: Duration,
}

impl RemoteClient {
    /// `base` is the server's host root, e.g. `https://print.example.com`.
    pub fn new(base: &str, printer_id: i64, signer: Arc<Signer>, timeout: Duration) -> Result<Self> {
        let api = reqwest::Url::parse(base)
            .and_then(|url| url.join(API_ROOT))
            .map_err(|e| KioskError::Config(format!("remote base URL '{base}': {e}")))?;
        Ok(Self {
            http: reqwest::Client::new(),
            api,
            printer_id,
            signer,
            timeout,
        })
    }

    pub fn from_config(config: &KioskConfig, signer: Arc<Signer>) -> Result<Self> {
        Self::new(
            &config.remote_base,
            config.printer_id,
            signer,
            config.remote_timeout(),
        )
    }

    pub fn printer_id(&self) -> i64 {
        self.printer_id
    }

    /// Full URL of an endpoint.
    pub fn endpoint(&self, path: &str) -> Result<reqwest::Url> {
        self.api
            .join(path)
            .map_err(|e| KioskError::Remote(format!("bad endpoint '{path}': {e}")))
    }

    // -- Request builders --

    pub fn pay_request(
        &self,
        code: &JobCode,
        config: &PrintConfiguration,
        page_count: u32,
    ) -> Result<RemoteRequest> {
        let config_json = billing_config(config, page_count)?;
        let sign = self
            .signer
            .sign(&[&code.as_str(), &config_json.as_str(), &self.printer_id])?;
        Ok(RemoteRequest {
            method: Method::Post,
            path: "print",
            params: vec![
                ("code", code.to_string()),
                ("config", config_json),
                ("id", self.printer_id.to_string()),
                ("sign", sign),
            ],
        })
    }

    pub fn report_ip_request(&self, ip: &str) -> Result<RemoteRequest> {
        let sign = self.signer.sign(&[&self.printer_id, &ip])?;
        Ok(RemoteRequest {
            method: Method::Post,
            path: "printer-ip",
            params: vec![
                ("id", self.printer_id.to_string()),
                ("ip", ip.to_owned()),
                ("sign", sign),
            ],
        })
    }

    pub fn report_error_request(&self, status: &DeviceStatus) -> Result<RemoteRequest> {
        let state = status.state.as_str();
        let message = status.message.as_deref().unwrap_or_default();
        let sign = self.signer.sign(&[&self.printer_id, &state, &message])?;
        Ok(RemoteRequest {
            method: Method::Post,
            path: "error-report",
            params: vec![
                ("id", self.printer_id.to_string()),
                ("state", state.to_owned()),
                ("message", message.to_owned()),
                ("sign", sign),
            ],
        })
    }

    pub fn delete_job_token_request(&self, code: &JobCode) -> Result<RemoteRequest> {
        let sign = self.signer.sign(&[&code.as_str()])?;
        Ok(RemoteRequest {
            method: Method::Get,
            path: "delete-job-token",
            params: vec![("code", code.to_string()), ("sign", sign)],
        })
    }

    // -- Calls --

    /// Charge the job's owner. `RemoteRejected(STATUS_IN_DEBT)` means the
    /// account must be topped up first.
    #[instrument(skip(self, config), fields(code = %code))]
    pub async fn pay(&self, code: &JobCode, config: &PrintConfiguration, page_count: u32) -> Result<()> {
        let request = self.pay_request(code, config, page_count)?;
        self.send(&request).await?;
        info!("payment accepted");
        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn report_ip(&self, ip: &str) -> Result<()> {
        self.send(&self.report_ip_request(ip)?).await
    }

    #[instrument(skip(self), fields(state = %status.state))]
    pub async fn report_error(&self, status: &DeviceStatus) -> Result<()> {
        self.send(&self.report_error_request(status)?).await
    }

    #[instrument(skip(self), fields(code = %code))]
    pub async fn delete_job_token(&self, code: &JobCode) -> Result<()> {
        self.send(&self.delete_job_token_request(code)?).await
    }

    /// Send a request and check the reply's status.
    pub async fn send(&self, request: &RemoteRequest) -> Result<()> {
        let url = self.endpoint(request.path)?;
        debug!(%url, method = ?request.method, "calling remote server");

        let call = async {
            let builder = match request.method {
                Method::Get => self.http.get(url).query(&request.params),
                Method::Post => self.http.post(url).form(&request.params),
            };
            let response = builder
                .send()
                .await
                .map_err(|e| KioskError::Remote(e.to_string()))?;
            response
                .json::<RemoteResponse>()
                .await
                .map_err(|e| KioskError::Remote(format!("unreadable reply: {e}")))
        };

        let reply = tokio::time::timeout(self.timeout, call)
            .await
            .map_err(|_| {
                warn!(path = request.path, timeout = ?self.timeout, "remote server timed out");
                KioskError::RemoteTimeout(self.timeout)
            })??;

        if reply.status != 0 {
            warn!(path = request.path, status = reply.status, "remote server rejected request");
            return Err(KioskError::RemoteRejected(reply.status));
        }
        Ok(())
    }
}
