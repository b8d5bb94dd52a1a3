// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// kioskctl, operator tooling: key generation and job-token minting.

use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use ring::rand::{SecureRandom, SystemRandom};
use tracing::{error, info};

use kiosk_core::error::{KioskError, Result};
use kiosk_core::types::{JobCode, TokenProtocol};
use kiosk_security::{JobToken, Signer, generate_p256_keypair};

#[derive(Debug, Parser)]
#[command(name = "kioskctl", version, about = "Print kiosk operator tooling")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Generate a P-256 key pair
    Keygen {
        /// Where to write the public key (PEM)
        public: PathBuf,
        /// Where to write the private key (PEM)
        private: PathBuf,
    },
    /// Sign a job token for a pickup code and print it as JSON
    Token {
        code: String,
        /// Private key to sign with (PEM)
        key: PathBuf,
        /// Use a random nonce instead of the current time
        #[arg(long)]
        nonce: bool,
    },
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let outcome = match Cli::parse().command {
        Command::Keygen { public, private } => keygen(&public, &private),
        Command::Token { code, key, nonce } => token(&code, &key, nonce),
    };
    if let Err(e) = outcome {
        error!(error = %e, "kioskctl failed");
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}

fn keygen(public: &Path, private: &Path) -> Result<()> {
    let pair = generate_p256_keypair()?;
    std::fs::write(public, pair.public_pem)?;
    std::fs::write(private, pair.private_pem)?;
    info!(public = %public.display(), private = %private.display(), "key pair written");
    Ok(())
}

fn token(code: &str, key: &Path, nonce: bool) -> Result<()> {
    let code = JobCode::parse(code)?;
    let signer = Signer::from_pem_file(key)?;
    let (protocol, challenge) = if nonce {
        (TokenProtocol::Nonce, random_nonce()?)
    } else {
        (
            TokenProtocol::Timestamp,
            chrono::Utc::now().timestamp().to_string(),
        )
    };
    let token = JobToken::issue(&signer, &code, challenge)?;
    println!("{}", token.to_value(protocol));
    Ok(())
}

fn random_nonce() -> Result<String> {
    let mut bytes = [0u8; 16];
    SystemRandom::new()
        .fill(&mut bytes)
        .map_err(|e| KioskError::KeyMaterial(format!("nonce generation: {e}")))?;
    Ok(hex::encode(bytes))
}
