// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Job tokens: signed, replay-resistant authorization for one action on one
// pickup code.
//
// The remote server signs `code ++ challenge`. Depending on the deployment
// the challenge is either a unix timestamp that must be recent, or a nonce
// that may be spent only once.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use kiosk_core::error::KioskError;
use kiosk_core::types::{JobCode, TokenProtocol, is_valid_code, is_valid_code_value};
use serde_json::{Value, json};
use thiserror::Error;
use tracing::{debug, instrument, warn};

use crate::nonce_store::UsedNonceStore;
use crate::signer::{Signer, Verifier};

/// Why a token was not accepted.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TokenRejection {
    #[error("token code is not a valid pickup code")]
    BadCode,

    #[error("token has expired")]
    Expired,

    #[error("token nonce was already used")]
    NonceReused,

    #[error("token signature does not verify")]
    BadSignature,

    #[error("token is malformed: {0}")]
    Malformed(String),

    #[error("used-nonce store failed: {0}")]
    Store(String),
}

impl From<TokenRejection> for KioskError {
    fn from(rejection: TokenRejection) -> Self {
        match rejection {
            TokenRejection::BadCode | TokenRejection::Malformed(_) => KioskError::InvalidCode,
            TokenRejection::Expired => KioskError::TokenExpired,
            TokenRejection::NonceReused => KioskError::TokenNonceReused,
            TokenRejection::BadSignature => KioskError::BadSignature,
            TokenRejection::Store(detail) => KioskError::Database(detail),
        }
    }
}

/// A job token as received from a phone or the upload page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobToken {
    pub code: String,
    /// Timestamp (decimal seconds) or nonce, as signed.
    pub challenge: String,
    /// Hex signature over `code ++ challenge`.
    pub sign: String,
}

impl JobToken {
    pub fn from_json(text: &str) -> Result<Self, TokenRejection> {
        let value: Value = serde_json::from_str(text)
            .map_err(|e| TokenRejection::Malformed(format!("not JSON: {e}")))?;
        Self::from_value(value)
    }

    /// Accepts `{code, timestamp|nonce, sign}`, or a JSON string containing
    /// that object.
    pub fn from_value(value: Value) -> Result<Self, TokenRejection> {
        if let Value::String(text) = &value {
            return Self::from_json(text);
        }
        let Value::Object(fields) = value else {
            return Err(TokenRejection::Malformed("token is not an object".into()));
        };

        let code = fields.get("code").unwrap_or(&Value::Null);
        if !is_valid_code_value(code) {
            return Err(TokenRejection::BadCode);
        }
        let code = code.as_str().unwrap_or_default().to_owned();

        let challenge = match fields.get("timestamp").or_else(|| fields.get("nonce")) {
            Some(Value::String(s)) => s.clone(),
            Some(Value::Number(n)) => n.to_string(),
            _ => return Err(TokenRejection::Malformed("missing timestamp or nonce".into())),
        };

        let sign = fields
            .get("sign")
            .and_then(Value::as_str)
            .ok_or_else(|| TokenRejection::Malformed("missing signature".into()))?
            .to_owned();

        Ok(Self {
            code,
            challenge,
            sign,
        })
    }

    /// Sign a token for `code`. Used by operator tooling and tests.
    pub fn issue(signer: &Signer, code: &JobCode, challenge: String) -> Result<Self, KioskError> {
        let sign = signer.sign(&[&code.as_str(), &challenge])?;
        Ok(Self {
            code: code.as_str().to_owned(),
            challenge,
            sign,
        })
    }

    /// Wire form for the given protocol.
    pub fn to_value(&self, protocol: TokenProtocol) -> Value {
        match protocol {
            TokenProtocol::Timestamp => match self.challenge.parse::<i64>() {
                Ok(ts) => json!({"code": self.code, "timestamp": ts, "sign": self.sign}),
                Err(_) => json!({"code": self.code, "timestamp": self.challenge, "sign": self.sign}),
            },
            TokenProtocol::Nonce => {
                json!({"code": self.code, "nonce": self.challenge, "sign": self.sign})
            }
        }
    }
}

/// Freshness rule of a deployment.
#[derive(Clone)]
pub enum Freshness {
    /// Challenge is a unix timestamp no older than `max_age`.
    Timestamp { max_age: Duration },
    /// Challenge is a nonce that must not be in the store.
    Nonce(Arc<Mutex<UsedNonceStore>>),
}

/// Validates and spends job tokens.
pub struct JobTokenValidator {
    verifier: Arc<Verifier>,
    freshness: Freshness,
}

impl JobTokenValidator {
    pub fn new(verifier: Arc<Verifier>, freshness: Freshness) -> Self {
        Self {
            verifier,
            freshness,
        }
    }

    pub fn protocol(&self) -> TokenProtocol {
        match self.freshness {
            Freshness::Timestamp { .. } => TokenProtocol::Timestamp,
            Freshness::Nonce(_) => TokenProtocol::Nonce,
        }
    }

    pub fn validate(&self, token: &JobToken) -> Result<(), TokenRejection> {
        self.validate_at(token, Utc::now())
    }

    /// Check code, then freshness, then signature. The first failure wins.
    #[instrument(skip(self, token), fields(code = %token.code))]
    pub fn validate_at(&self, token: &JobToken, now: DateTime<Utc>) -> Result<(), TokenRejection> {
        if !is_valid_code(&token.code) {
            return Err(TokenRejection::BadCode);
        }

        match &self.freshness {
            Freshness::Timestamp { max_age } => {
                let issued: i64 = token.challenge.trim().parse().map_err(|_| {
                    warn!(challenge = %token.challenge, "timestamp is not an integer");
                    TokenRejection::Expired
                })?;
                let max_age = i64::try_from(max_age.as_secs()).unwrap_or(i64::MAX);
                let fresh = issued
                    .checked_add(max_age)
                    .is_some_and(|deadline| deadline > now.timestamp());
                if !fresh {
                    return Err(TokenRejection::Expired);
                }
            }
            Freshness::Nonce(store) => {
                if token.challenge.is_empty() {
                    return Err(TokenRejection::NonceReused);
                }
                let store = store
                    .lock()
                    .map_err(|_| TokenRejection::Store("store lock poisoned".into()))?;
                let used = store
                    .contains(&token.challenge)
                    .map_err(|e| TokenRejection::Store(e.to_string()))?;
                if used {
                    return Err(TokenRejection::NonceReused);
                }
            }
        }

        if !self
            .verifier
            .verify(&token.sign, &[&token.code.as_str(), &token.challenge.as_str()])
        {
            return Err(TokenRejection::BadSignature);
        }
        debug!("token valid");
        Ok(())
    }

    /// Spend the token's nonce. No-op under the timestamp protocol.
    #[instrument(skip(self, token), fields(code = %token.code))]
    pub fn consume(&self, token: &JobToken) -> Result<(), TokenRejection> {
        let Freshness::Nonce(store) = &self.freshness else {
            return Ok(());
        };
        let store = store
            .lock()
            .map_err(|_| TokenRejection::Store("store lock poisoned".into()))?;
        store
            .insert(&token.challenge, &token.code)
            .map_err(|e| match e {
                KioskError::TokenNonceReused => TokenRejection::NonceReused,
                other => TokenRejection::Store(other.to_string()),
            })
    }

    /// Validate and consume as one step. Of several callers presenting the
    /// same nonce, exactly one succeeds.
    pub fn authorize(&self, token: &JobToken) -> Result<JobCode, TokenRejection> {
        self.validate(token)?;
        self.consume(token)?;
        JobCode::parse(&token.code).map_err(|_| TokenRejection::BadCode)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::generate_p256_keypair;

    struct Fixture {
        signer: Signer,
        verifier: Arc<Verifier>,
    }

    fn fixture() -> Fixture {
        let pair = generate_p256_keypair().expect("generate");
        Fixture {
            signer: Signer::from_pem(&pair.private_pem).expect("signer"),
            verifier: Arc::new(Verifier::from_pem(&pair.public_pem).expect("verifier")),
        }
    }

    fn timestamp_validator(f: &Fixture) -> JobTokenValidator {
        JobTokenValidator::new(
            f.verifier.clone(),
            Freshness::Timestamp {
                max_age: Duration::from_secs(60),
            },
        )
    }

    fn nonce_validator(f: &Fixture) -> JobTokenValidator {
        let store = UsedNonceStore::open_in_memory().expect("store");
        JobTokenValidator::new(f.verifier.clone(), Freshness::Nonce(Arc::new(Mutex::new(store))))
    }

    fn issue(f: &Fixture, code: &str, challenge: &str) -> JobToken {
        let code = JobCode::parse(code).expect("code");
        JobToken::issue(&f.signer, &code, challenge.to_owned()).expect("issue")
    }

    #[test]
    fn fresh_timestamp_token_is_valid() {
        let f = fixture();
        let now = Utc::now();
        let token = issue(&f, "0420", &now.timestamp().to_string());
        timestamp_validator(&f)
            .validate_at(&token, now)
            .expect("valid");
    }

    #[test]
    fn stale_timestamp_is_expired() {
        let f = fixture();
        let now = Utc::now();
        let token = issue(&f, "0420", &(now.timestamp() - 60).to_string());
        assert_eq!(
            timestamp_validator(&f).validate_at(&token, now),
            Err(TokenRejection::Expired)
        );
    }

    #[test]
    fn non_numeric_timestamp_is_expired() {
        let f = fixture();
        let token = issue(&f, "0420", "yesterday");
        assert_eq!(
            timestamp_validator(&f).validate(&token),
            Err(TokenRejection::Expired)
        );
    }

    #[test]
    fn wrong_code_fails_signature() {
        let f = fixture();
        let now = Utc::now();
        let mut token = issue(&f, "0420", &now.timestamp().to_string());
        token.code = "0421".into();
        assert_eq!(
            timestamp_validator(&f).validate_at(&token, now),
            Err(TokenRejection::BadSignature)
        );
    }

    #[test]
    fn tampered_signature_fails() {
        let f = fixture();
        let now = Utc::now();
        let mut token = issue(&f, "0420", &now.timestamp().to_string());
        token.sign.replace_range(0..2, if token.sign.starts_with("ff") { "00" } else { "ff" });
        assert_eq!(
            timestamp_validator(&f).validate_at(&token, now),
            Err(TokenRejection::BadSignature)
        );
    }

    #[test]
    fn bad_code_is_checked_first() {
        let f = fixture();
        let token = JobToken {
            code: "42".into(),
            challenge: "0".into(),
            sign: "zz".into(),
        };
        assert_eq!(
            timestamp_validator(&f).validate(&token),
            Err(TokenRejection::BadCode)
        );
    }

    #[test]
    fn nonce_is_spent_once() {
        let f = fixture();
        let validator = nonce_validator(&f);
        let token = issue(&f, "0420", "c3f1a9");

        validator.validate(&token).expect("valid");
        validator.consume(&token).expect("consume");
        assert_eq!(validator.validate(&token), Err(TokenRejection::NonceReused));
        assert_eq!(validator.consume(&token), Err(TokenRejection::NonceReused));
    }

    #[test]
    fn spent_nonce_stays_spent_across_restarts() {
        let f = fixture();
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("nonces.db");
        let open = |path: &std::path::Path| {
            let store = UsedNonceStore::open(path).expect("store");
            JobTokenValidator::new(f.verifier.clone(), Freshness::Nonce(Arc::new(Mutex::new(store))))
        };
        let token = issue(&f, "0420", "kept-forever");

        assert_eq!(open(&path).authorize(&token), Ok(JobCode::parse("0420").expect("code")));
        let restarted = open(&path);
        assert_eq!(restarted.authorize(&token), Err(TokenRejection::NonceReused));
        assert_eq!(restarted.authorize(&token), Err(TokenRejection::NonceReused));
    }

    #[test]
    fn concurrent_authorize_has_one_winner() {
        let f = fixture();
        let validator = nonce_validator(&f);
        let token = issue(&f, "0420", "one-shot");

        let results: Vec<_> = std::thread::scope(|s| {
            let handles: Vec<_> = (0..8)
                .map(|_| s.spawn(|| validator.authorize(&token)))
                .collect();
            handles
                .into_iter()
                .map(|h| h.join().expect("thread"))
                .collect()
        });

        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
        assert!(
            results
                .iter()
                .filter_map(|r| r.as_ref().err())
                .all(|e| *e == TokenRejection::NonceReused)
        );
    }

    #[test]
    fn parses_both_wire_forms() {
        let ts = JobToken::from_json(r#"{"code":"0420","timestamp":1700000000,"sign":"ab"}"#)
            .expect("timestamp");
        assert_eq!(ts.challenge, "1700000000");
        let nonce = JobToken::from_value(json!({"code": "0420", "nonce": "n1", "sign": "ab"}))
            .expect("nonce");
        assert_eq!(nonce.challenge, "n1");
        let wrapped = JobToken::from_value(json!(r#"{"code":"0420","nonce":"n1","sign":"ab"}"#))
            .expect("string-wrapped");
        assert_eq!(wrapped, nonce);
    }

    #[test]
    fn non_string_code_is_bad_code() {
        let err = JobToken::from_value(json!({"code": 420, "timestamp": 1, "sign": "ab"}))
            .expect_err("numeric code");
        assert_eq!(err, TokenRejection::BadCode);
    }

    #[test]
    fn wire_form_round_trips() {
        let f = fixture();
        let token = issue(&f, "0420", "1700000000");
        let value = token.to_value(TokenProtocol::Timestamp);
        assert_eq!(value["timestamp"], json!(1_700_000_000));
        assert_eq!(JobToken::from_value(value).expect("parse"), token);
    }

    #[test]
    fn rejections_map_to_kiosk_errors() {
        assert!(matches!(
            KioskError::from(TokenRejection::Expired),
            KioskError::TokenExpired
        ));
        assert!(matches!(
            KioskError::from(TokenRejection::NonceReused),
            KioskError::TokenNonceReused
        ));
    }
}
