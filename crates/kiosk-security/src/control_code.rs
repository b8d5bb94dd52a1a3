// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Remote-control codes.
//
// The kiosk shows a QR code linking to `/control/<code>`; a phone that opened
// it can type on the kiosk keypad. Codes rotate on a fixed interval and the
// last `WINDOW` of them stay valid, so a page loaded just before a rotation
// keeps working for a while.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use kiosk_core::error::{KioskError, Result};
use ring::rand::{SecureRandom, SystemRandom};
use tokio::sync::{Notify, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, interval_at};
use tracing::{debug, info, instrument, warn};

/// How many recent codes are accepted.
pub const WINDOW: usize = 4;

/// Random bytes per code (hex-encoded on the wire).
const CODE_BYTES: usize = 8;

fn fresh_code(rng: &SystemRandom) -> Result<String> {
    let mut bytes = [0u8; CODE_BYTES];
    rng.fill(&mut bytes)
        .map_err(|e| KioskError::KeyMaterial(format!("control code generation: {e}")))?;
    Ok(hex::encode(bytes))
}

struct CodeWindow {
    codes: RwLock<VecDeque<String>>,
    updates: watch::Sender<String>,
    rng: SystemRandom,
}

impl CodeWindow {
    fn rotate(&self) -> Result<String> {
        let code = fresh_code(&self.rng)?;
        {
            let mut codes = self
                .codes
                .write()
                .map_err(|_| KioskError::KeyMaterial("control code lock poisoned".into()))?;
            codes.push_back(code.clone());
            while codes.len() > WINDOW {
                codes.pop_front();
            }
        }
        self.updates.send_replace(code.clone());
        Ok(code)
    }
}

/// Rolling window of valid control codes.
pub struct ControlCodeRotator {
    window: Arc<CodeWindow>,
    interval: Duration,
    shutdown_signal: Arc<Notify>,
    task_handle: Mutex<Option<JoinHandle<()>>>,
}

impl ControlCodeRotator {
    /// Create a rotator with a full window of fresh codes. Call [`start`] to
    /// begin rotating.
    ///
    /// [`start`]: Self::start
    pub fn new(interval: Duration) -> Result<Self> {
        let rng = SystemRandom::new();
        let mut codes = VecDeque::with_capacity(WINDOW + 1);
        for _ in 0..WINDOW {
            codes.push_back(fresh_code(&rng)?);
        }
        let newest = codes.back().cloned().unwrap_or_default();
        let (updates, _) = watch::channel(newest);
        Ok(Self {
            window: Arc::new(CodeWindow {
                codes: RwLock::new(codes),
                updates,
                rng,
            }),
            interval,
            shutdown_signal: Arc::new(Notify::new()),
            task_handle: Mutex::new(None),
        })
    }

    /// The newest code, the one the QR code should show.
    pub fn current(&self) -> String {
        self.window.updates.borrow().clone()
    }

    pub fn is_valid(&self, code: &str) -> bool {
        self.window
            .codes
            .read()
            .map(|codes| codes.iter().any(|c| c == code))
            .unwrap_or(false)
    }

    /// Receives every new code.
    pub fn subscribe(&self) -> watch::Receiver<String> {
        self.window.updates.subscribe()
    }

    /// Rotate now: append a fresh code and evict the oldest.
    pub fn rotate(&self) -> Result<String> {
        self.window.rotate()
    }

    pub fn is_running(&self) -> bool {
        self.task_handle
            .lock()
            .map(|handle| handle.is_some())
            .unwrap_or(false)
    }

    /// Spawn the rotation task.
    #[instrument(skip(self), fields(interval_ms = self.interval.as_millis() as u64))]
    pub fn start(&self) {
        let Ok(mut slot) = self.task_handle.lock() else {
            return;
        };
        if slot.is_some() {
            debug!("control code rotator already running");
            return;
        }
        let window = Arc::clone(&self.window);
        let shutdown = Arc::clone(&self.shutdown_signal);
        let period = self.interval;

        *slot = Some(tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            loop {
                tokio::select! {
                    _ = shutdown.notified() => {
                        debug!("control code rotator received shutdown signal");
                        break;
                    }
                    _ = ticker.tick() => {
                        match window.rotate() {
                            Ok(_) => debug!("control code rotated"),
                            Err(e) => warn!(error = %e, "control code rotation failed"),
                        }
                    }
                }
            }
        }));
        info!("control code rotator started");
    }

    /// Stop the rotation task and wait for it to exit.
    pub async fn stop(&self) -> Result<()> {
        let handle = match self.task_handle.lock() {
            Ok(mut slot) => slot.take(),
            Err(_) => None,
        };
        let Some(handle) = handle else {
            return Ok(());
        };
        self.shutdown_signal.notify_one();
        handle
            .await
            .map_err(|e| KioskError::Config(format!("control code task join: {e}")))?;
        info!("control code rotator stopped");
        Ok(())
    }
}

/// One key press arriving from the remote-control page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeypadInput {
    Digit(u8),
    Backspace,
    Enter,
}

impl KeypadInput {
    /// Decode a request body: `0`-`9`, `←` or `✓`. Anything else is `None`.
    pub fn parse(body: &str) -> Option<Self> {
        match body.trim() {
            "←" => Some(Self::Backspace),
            "✓" => Some(Self::Enter),
            s if s.len() == 1 => {
                let b = s.as_bytes()[0];
                b.is_ascii_digit().then(|| Self::Digit(b - b'0'))
            }
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_sixteen_hex_chars() {
        let rotator = ControlCodeRotator::new(Duration::from_secs(60)).expect("new");
        let code = rotator.current();
        assert_eq!(code.len(), 16);
        assert!(code.bytes().all(|b| b.is_ascii_hexdigit()));
        assert!(rotator.is_valid(&code));
    }

    #[test]
    fn window_keeps_last_four() {
        let rotator = ControlCodeRotator::new(Duration::from_secs(60)).expect("new");
        let first = rotator.rotate().expect("rotate");
        let mut later = Vec::new();
        for _ in 0..WINDOW - 1 {
            later.push(rotator.rotate().expect("rotate"));
        }
        assert!(rotator.is_valid(&first));
        rotator.rotate().expect("rotate");
        assert!(!rotator.is_valid(&first), "oldest code must be evicted");
        assert!(later.iter().all(|c| rotator.is_valid(c)));
        assert!(!rotator.is_valid("not-a-code"));
    }

    #[tokio::test]
    async fn running_rotator_publishes_new_codes() {
        let rotator = ControlCodeRotator::new(Duration::from_millis(20)).expect("new");
        let mut updates = rotator.subscribe();
        let before = rotator.current();

        rotator.start();
        tokio::time::timeout(Duration::from_secs(2), updates.changed())
            .await
            .expect("rotation within timeout")
            .expect("sender alive");
        let after = updates.borrow().clone();
        rotator.stop().await.expect("stop");

        assert_ne!(before, after);
        assert!(rotator.is_valid(&after));
        assert!(!rotator.is_running());
    }

    #[test]
    fn keypad_bodies() {
        assert_eq!(KeypadInput::parse("7"), Some(KeypadInput::Digit(7)));
        assert_eq!(KeypadInput::parse("←"), Some(KeypadInput::Backspace));
        assert_eq!(KeypadInput::parse("✓"), Some(KeypadInput::Enter));
        for body in ["", "10", "a", "enter", "٣"] {
            assert_eq!(KeypadInput::parse(body), None, "{body:?}");
        }
    }
}
