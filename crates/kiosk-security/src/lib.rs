// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// kiosk-security: signatures, job tokens and remote-control codes.
//
// Everything the kiosk trusts or proves about a request goes through this
// crate: PEM key loading, signing toward the remote server, verifying job
// tokens from it, spending token nonces, and rotating the codes that gate
// the phone remote control.

pub mod control_code;
pub mod job_token;
pub mod keys;
pub mod nonce_store;
pub mod signer;

pub use control_code::{ControlCodeRotator, KeypadInput};
pub use job_token::{Freshness, JobToken, JobTokenValidator, TokenRejection};
pub use keys::{GeneratedKeyPair, generate_p256_keypair};
pub use nonce_store::UsedNonceStore;
pub use signer::{SignField, Signer, Verifier};
