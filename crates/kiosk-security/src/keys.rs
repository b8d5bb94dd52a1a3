// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// PEM key files: decoding, SubjectPublicKeyInfo unwrapping, and P-256 key
// pair generation.
//
// Supported labels:
//   RSA PRIVATE KEY  PKCS#1 RSAPrivateKey
//   PRIVATE KEY      PKCS#8 (RSA or ECDSA P-256)
//   RSA PUBLIC KEY   PKCS#1 RSAPublicKey
//   PUBLIC KEY       SubjectPublicKeyInfo (RSA or ECDSA P-256)

use std::path::Path;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use kiosk_core::error::{KioskError, Result};
use ring::rand::SystemRandom;
use ring::signature::{ECDSA_P256_SHA256_ASN1_SIGNING, EcdsaKeyPair, KeyPair};
use tracing::{debug, instrument};

// DER object identifiers (contents only, without tag and length).
const OID_RSA_ENCRYPTION: &[u8] = &[0x2a, 0x86, 0x48, 0x86, 0xf7, 0x0d, 0x01, 0x01, 0x01];
const OID_EC_PUBLIC_KEY: &[u8] = &[0x2a, 0x86, 0x48, 0xce, 0x3d, 0x02, 0x01];
const OID_PRIME256V1: &[u8] = &[0x2a, 0x86, 0x48, 0xce, 0x3d, 0x03, 0x01, 0x07];

// SubjectPublicKeyInfo header for an uncompressed P-256 point.
const P256_SPKI_PREFIX: &[u8] = &[
    0x30, 0x59, 0x30, 0x13, 0x06, 0x07, 0x2a, 0x86, 0x48, 0xce, 0x3d, 0x02, 0x01, 0x06, 0x08,
    0x2a, 0x86, 0x48, 0xce, 0x3d, 0x03, 0x01, 0x07, 0x03, 0x42, 0x00,
];

const TAG_SEQUENCE: u8 = 0x30;
const TAG_OID: u8 = 0x06;
const TAG_BIT_STRING: u8 = 0x03;

/// One decoded PEM block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PemBlock {
    pub label: String,
    pub der: Vec<u8>,
}

/// Public key material, ready for `ring::signature::UnparsedPublicKey`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PublicKeyDer {
    /// PKCS#1 RSAPublicKey.
    Rsa(Vec<u8>),
    /// Uncompressed SEC1 point.
    EcdsaP256(Vec<u8>),
}

/// Decode the first PEM block in `text`.
pub fn parse_pem(text: &str) -> Result<PemBlock> {
    let mut lines = text.lines().map(str::trim);
    let label = lines
        .by_ref()
        .find_map(|line| {
            line.strip_prefix("-----BEGIN ")
                .and_then(|rest| rest.strip_suffix("-----"))
        })
        .ok_or_else(|| KioskError::KeyMaterial("no PEM BEGIN line".into()))?
        .to_owned();

    let end = format!("-----END {label}-----");
    let mut body = String::new();
    let mut terminated = false;
    for line in lines {
        if line == end {
            terminated = true;
            break;
        }
        // Encrypted-key headers are not supported.
        if line.contains(':') {
            return Err(KioskError::KeyMaterial(format!(
                "PEM header in {label} block is not supported"
            )));
        }
        body.push_str(line);
    }
    if !terminated {
        return Err(KioskError::KeyMaterial(format!("unterminated {label} block")));
    }

    let der = STANDARD
        .decode(body.as_bytes())
        .map_err(|e| KioskError::KeyMaterial(format!("{label} base64: {e}")))?;
    Ok(PemBlock { label, der })
}

/// Read and decode a PEM file.
#[instrument(skip_all, fields(path = %path.as_ref().display()))]
pub fn read_pem(path: impl AsRef<Path>) -> Result<PemBlock> {
    let path = path.as_ref();
    let text = std::fs::read_to_string(path)
        .map_err(|e| KioskError::KeyMaterial(format!("{}: {e}", path.display())))?;
    let block = parse_pem(&text)?;
    debug!(label = %block.label, der_len = block.der.len(), "key file loaded");
    Ok(block)
}

/// Turn a public-key PEM block into verifier input.
pub fn public_key_from_pem(block: &PemBlock) -> Result<PublicKeyDer> {
    match block.label.as_str() {
        "RSA PUBLIC KEY" => Ok(PublicKeyDer::Rsa(block.der.clone())),
        "PUBLIC KEY" => unwrap_spki(&block.der),
        other => Err(KioskError::KeyMaterial(format!(
            "expected a public key, found {other}"
        ))),
    }
}

/// Split a SubjectPublicKeyInfo into its algorithm and raw key bytes.
pub fn unwrap_spki(der: &[u8]) -> Result<PublicKeyDer> {
    let (spki, _) = read_tlv(der, TAG_SEQUENCE)?;
    let (algorithm, rest) = read_tlv(spki, TAG_SEQUENCE)?;
    let (bit_string, _) = read_tlv(rest, TAG_BIT_STRING)?;
    let (oid, params) = read_tlv(algorithm, TAG_OID)?;

    // The first BIT STRING byte counts unused bits and must be zero for keys.
    let key = match bit_string.split_first() {
        Some((0, key)) => key.to_vec(),
        _ => return Err(KioskError::KeyMaterial("malformed key BIT STRING".into())),
    };

    if oid == OID_RSA_ENCRYPTION {
        Ok(PublicKeyDer::Rsa(key))
    } else if oid == OID_EC_PUBLIC_KEY {
        let (curve, _) = read_tlv(params, TAG_OID)?;
        if curve != OID_PRIME256V1 {
            return Err(KioskError::KeyMaterial("only the P-256 curve is supported".into()));
        }
        Ok(PublicKeyDer::EcdsaP256(key))
    } else {
        Err(KioskError::KeyMaterial(format!(
            "unsupported public key algorithm {}",
            hex::encode(oid)
        )))
    }
}

/// Read one DER element with the expected tag. Returns its contents and the
/// bytes after it.
fn read_tlv(input: &[u8], expected_tag: u8) -> Result<(&[u8], &[u8])> {
    let malformed = || KioskError::KeyMaterial("malformed DER".into());

    let (&tag, rest) = input.split_first().ok_or_else(malformed)?;
    if tag != expected_tag {
        return Err(KioskError::KeyMaterial(format!(
            "DER tag {tag:#04x}, expected {expected_tag:#04x}"
        )));
    }
    let (&first, mut rest) = rest.split_first().ok_or_else(malformed)?;
    let len = if first < 0x80 {
        usize::from(first)
    } else {
        let count = usize::from(first & 0x7f);
        if count == 0 || count > 4 || rest.len() < count {
            return Err(malformed());
        }
        let (bytes, after) = rest.split_at(count);
        rest = after;
        bytes.iter().fold(0usize, |acc, &b| (acc << 8) | usize::from(b))
    };
    if rest.len() < len {
        return Err(malformed());
    }
    Ok(rest.split_at(len))
}

/// Encode DER bytes as a PEM block.
pub fn encode_pem(label: &str, der: &[u8]) -> String {
    let body = STANDARD.encode(der);
    let mut out = format!("-----BEGIN {label}-----\n");
    // Fixed 64-column lines; base64 output is ASCII so byte chunks are whole characters.
    for chunk in body.as_bytes().chunks(64) {
        out.push_str(&String::from_utf8_lossy(chunk));
        out.push('\n');
    }
    out.push_str(&format!("-----END {label}-----\n"));
    out
}

/// A freshly generated ECDSA P-256 key pair in PEM form.
#[derive(Debug, Clone)]
pub struct GeneratedKeyPair {
    /// `PRIVATE KEY` (PKCS#8).
    pub private_pem: String,
    /// `PUBLIC KEY` (SubjectPublicKeyInfo).
    pub public_pem: String,
}

/// Generate a P-256 key pair with the OS CSPRNG.
#[instrument]
pub fn generate_p256_keypair() -> Result<GeneratedKeyPair> {
    let rng = SystemRandom::new();
    let pkcs8 = EcdsaKeyPair::generate_pkcs8(&ECDSA_P256_SHA256_ASN1_SIGNING, &rng)
        .map_err(|e| KioskError::KeyMaterial(format!("key generation failed: {e}")))?;
    let key_pair = EcdsaKeyPair::from_pkcs8(&ECDSA_P256_SHA256_ASN1_SIGNING, pkcs8.as_ref(), &rng)
        .map_err(|e| KioskError::KeyMaterial(format!("key parsing failed: {e}")))?;

    let mut spki = P256_SPKI_PREFIX.to_vec();
    spki.extend_from_slice(key_pair.public_key().as_ref());

    debug!(pkcs8_len = pkcs8.as_ref().len(), "P-256 key pair generated");
    Ok(GeneratedKeyPair {
        private_pem: encode_pem("PRIVATE KEY", pkcs8.as_ref()),
        public_pem: encode_pem("PUBLIC KEY", &spki),
    })
}
