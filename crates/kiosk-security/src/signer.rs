// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Message signing between the kiosk and the remote server.
//
// A signed message is a list of fragments concatenated without separators:
// byte fragments as-is, everything else as its display string. Signatures
// travel as lowercase hex. RSA keys sign with PKCS#1 v1.5, P-256 keys with
// ASN.1-encoded ECDSA, both over SHA-256.

use std::path::Path;

use kiosk_core::error::{KioskError, Result};
use ring::rand::SystemRandom;
use ring::signature::{
    ECDSA_P256_SHA256_ASN1, ECDSA_P256_SHA256_ASN1_SIGNING, EcdsaKeyPair, RSA_PKCS1_2048_8192_SHA256,
    RSA_PKCS1_SHA256, RsaKeyPair, UnparsedPublicKey,
};
use tracing::{debug, instrument, warn};

use crate::keys::{self, PemBlock, PublicKeyDer};

/// A value that can be part of a signed message.
pub trait SignField {
    fn append_to(&self, message: &mut Vec<u8>);
}

impl SignField for &str {
    fn append_to(&self, message: &mut Vec<u8>) {
        message.extend_from_slice(self.as_bytes());
    }
}

impl SignField for String {
    fn append_to(&self, message: &mut Vec<u8>) {
        message.extend_from_slice(self.as_bytes());
    }
}

impl SignField for &[u8] {
    fn append_to(&self, message: &mut Vec<u8>) {
        message.extend_from_slice(self);
    }
}

macro_rules! display_sign_field {
    ($($ty:ty),*) => {
        $(impl SignField for $ty {
            fn append_to(&self, message: &mut Vec<u8>) {
                message.extend_from_slice(self.to_string().as_bytes());
            }
        })*
    };
}

display_sign_field!(i64, u64, u32, i32);

/// Concatenate fragments into the bytes that get signed.
pub fn canonical_message(fragments: &[&dyn SignField]) -> Vec<u8> {
    let mut message = Vec::new();
    for fragment in fragments {
        fragment.append_to(&mut message);
    }
    message
}

enum SigningKey {
    Rsa(RsaKeyPair),
    EcdsaP256(EcdsaKeyPair),
}

/// Signs outgoing messages with this kiosk's private key.
pub struct Signer {
    key: SigningKey,
    rng: SystemRandom,
}

impl std::fmt::Debug for Signer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let algorithm = match self.key {
            SigningKey::Rsa(_) => "rsa-pkcs1-sha256",
            SigningKey::EcdsaP256(_) => "ecdsa-p256-sha256",
        };
        f.debug_struct("Signer").field("algorithm", &algorithm).finish()
    }
}

impl Signer {
    /// Load the private key from a PEM file.
    pub fn from_pem_file(path: impl AsRef<Path>) -> Result<Self> {
        Self::from_block(&keys::read_pem(path)?)
    }

    pub fn from_pem(text: &str) -> Result<Self> {
        Self::from_block(&keys::parse_pem(text)?)
    }

    fn from_block(block: &PemBlock) -> Result<Self> {
        let rng = SystemRandom::new();
        let key = match block.label.as_str() {
            "RSA PRIVATE KEY" => RsaKeyPair::from_der(&block.der)
                .map(SigningKey::Rsa)
                .map_err(|e| KioskError::KeyMaterial(format!("PKCS#1 RSA key: {e}")))?,
            "PRIVATE KEY" => match RsaKeyPair::from_pkcs8(&block.der) {
                Ok(pair) => SigningKey::Rsa(pair),
                Err(_) => {
                    EcdsaKeyPair::from_pkcs8(&ECDSA_P256_SHA256_ASN1_SIGNING, &block.der, &rng)
                        .map(SigningKey::EcdsaP256)
                        .map_err(|e| {
                            KioskError::KeyMaterial(format!(
                                "PKCS#8 key is neither RSA nor P-256: {e}"
                            ))
                        })?
                }
            },
            other => {
                return Err(KioskError::KeyMaterial(format!(
                    "expected a private key, found {other}"
                )));
            }
        };
        let signer = Self { key, rng };
        debug!(?signer, "signing key ready");
        Ok(signer)
    }

    /// Sign the concatenation of `fragments`, returning lowercase hex.
    pub fn sign(&self, fragments: &[&dyn SignField]) -> Result<String> {
        let message = canonical_message(fragments);
        let signature = match &self.key {
            SigningKey::Rsa(pair) => {
                let mut signature = vec![0u8; pair.public().modulus_len()];
                pair.sign(&RSA_PKCS1_SHA256, &self.rng, &message, &mut signature)
                    .map_err(|e| KioskError::KeyMaterial(format!("RSA signing failed: {e}")))?;
                signature
            }
            SigningKey::EcdsaP256(pair) => pair
                .sign(&self.rng, &message)
                .map_err(|e| KioskError::KeyMaterial(format!("ECDSA signing failed: {e}")))?
                .as_ref()
                .to_vec(),
        };
        Ok(hex::encode(signature))
    }
}

/// Checks signatures made by the remote server.
#[derive(Debug, Clone)]
pub struct Verifier {
    key: PublicKeyDer,
}

impl Verifier {
    /// Load the public key from a PEM file.
    pub fn from_pem_file(path: impl AsRef<Path>) -> Result<Self> {
        let key = keys::public_key_from_pem(&keys::read_pem(path)?)?;
        Ok(Self { key })
    }

    pub fn from_pem(text: &str) -> Result<Self> {
        let key = keys::public_key_from_pem(&keys::parse_pem(text)?)?;
        Ok(Self { key })
    }

    /// Whether `signature_hex` is a valid signature over the concatenation
    /// of `fragments`. Malformed input is simply invalid.
    #[instrument(skip_all)]
    pub fn verify(&self, signature_hex: &str, fragments: &[&dyn SignField]) -> bool {
        let Ok(signature) = hex::decode(signature_hex) else {
            warn!("signature is not hex");
            return false;
        };
        let message = canonical_message(fragments);
        let verified = match &self.key {
            PublicKeyDer::Rsa(der) => UnparsedPublicKey::new(&RSA_PKCS1_2048_8192_SHA256, der)
                .verify(&message, &signature)
                .is_ok(),
            PublicKeyDer::EcdsaP256(point) => UnparsedPublicKey::new(&ECDSA_P256_SHA256_ASN1, point)
                .verify(&message, &signature)
                .is_ok(),
        };
        debug!(verified, "signature checked");
        verified
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::generate_p256_keypair;

    const RSA_PRIVATE_PKCS1: &str = include_str!("../testdata/rsa_private.pem");
    const RSA_PRIVATE_PKCS8: &str = include_str!("../testdata/rsa_private_pkcs8.pem");
    const RSA_PUBLIC_PKCS1: &str = include_str!("../testdata/rsa_public.pem");
    const RSA_PUBLIC_SPKI: &str = include_str!("../testdata/rsa_public_spki.pem");
    // openssl dgst -sha256 -sign rsa_private.pem over "0420" ++ "1700000000"
    const OPENSSL_SIGNATURE: &str = include_str!("../testdata/token_0420_1700000000.sig");

    #[test]
    fn fragments_concatenate_without_separator() {
        let message = canonical_message(&[&"0420", &1_700_000_000i64, &b"!".as_slice()]);
        assert_eq!(message, b"04201700000000!");
    }

    #[test]
    fn verifies_signature_made_by_openssl() {
        let verifier = Verifier::from_pem(RSA_PUBLIC_PKCS1).expect("verifier");
        assert!(verifier.verify(OPENSSL_SIGNATURE.trim(), &[&"0420", &1_700_000_000i64]));
        assert!(!verifier.verify(OPENSSL_SIGNATURE.trim(), &[&"0421", &1_700_000_000i64]));
    }

    #[test]
    fn rsa_sign_and_verify_across_key_formats() {
        for private in [RSA_PRIVATE_PKCS1, RSA_PRIVATE_PKCS8] {
            let signer = Signer::from_pem(private).expect("signer");
            let signature = signer.sign(&[&"1234", &"{}", &7i64]).expect("sign");
            assert_eq!(signature, signature.to_lowercase());
            for public in [RSA_PUBLIC_PKCS1, RSA_PUBLIC_SPKI] {
                let verifier = Verifier::from_pem(public).expect("verifier");
                assert!(verifier.verify(&signature, &[&"1234", &"{}", &7i64]));
            }
        }
    }

    #[test]
    fn p256_sign_and_verify() {
        let pair = generate_p256_keypair().expect("generate");
        let signer = Signer::from_pem(&pair.private_pem).expect("signer");
        let verifier = Verifier::from_pem(&pair.public_pem).expect("verifier");

        let signature = signer.sign(&[&"0420", &"nonce-1"]).expect("sign");
        assert!(verifier.verify(&signature, &[&"0420", &"nonce-1"]));
        assert!(!verifier.verify(&signature, &[&"0420", &"nonce-2"]));
    }

    #[test]
    fn malformed_signatures_are_invalid_not_errors() {
        let verifier = Verifier::from_pem(RSA_PUBLIC_SPKI).expect("verifier");
        assert!(!verifier.verify("zz", &[&"0420"]));
        assert!(!verifier.verify("", &[&"0420"]));
        assert!(!verifier.verify("00ff", &[&"0420"]));
    }

    #[test]
    fn tampered_signature_fails() {
        let signer = Signer::from_pem(RSA_PRIVATE_PKCS1).expect("signer");
        let verifier = Verifier::from_pem(RSA_PUBLIC_PKCS1).expect("verifier");
        let mut signature = signer.sign(&[&"0420"]).expect("sign").into_bytes();
        signature[10] = if signature[10] == b'0' { b'1' } else { b'0' };
        let signature = String::from_utf8(signature).expect("utf8");
        assert!(!verifier.verify(&signature, &[&"0420"]));
    }

    #[test]
    fn public_key_cannot_sign() {
        assert!(Signer::from_pem(RSA_PUBLIC_PKCS1).is_err());
    }

    #[test]
    fn missing_key_file_is_key_material_error() {
        let err = Signer::from_pem_file("/nonexistent/endpoint.pem").expect_err("missing");
        assert!(matches!(err, KioskError::KeyMaterial(_)));
    }
}
