// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Printer status monitor.
//
// One background task per physical printer polls the adapter, keeps the
// latest normalized status, and publishes changes. Callers can block until
// the printer enters a given state.
//
// A change is detected by comparing the fresh poll with the held status
// (state and message). On a change the held value is replaced and pending
// waiters are settled while the same lock is held, so a waiter can never
// miss the transition it registered for. Events go out after the lock is
// released.
//
// Events per change:
//   Updated(status)          every change, including message-only changes
//   Entered(state, status)   the state differs from the previous one
//   Error(status)            the new state is an error state

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::{Notify, broadcast, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tracing::{debug, info, instrument, warn};

use kiosk_core::error::{KioskError, Result};
use kiosk_core::human_errors::join_status;
use kiosk_core::types::{DeviceStatus, PrinterKind, PrinterState};

use crate::adapter::PrinterAdapter;
use crate::profile::{PrinterBinding, PrinterBindings};

const EVENT_CAPACITY: usize = 64;

/// Change notification published by a monitor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatusEvent {
    Updated(DeviceStatus),
    Entered(PrinterState, DeviceStatus),
    Error(DeviceStatus),
}

/// Polling timing of a monitor.
#[derive(Debug, Clone, Copy)]
pub struct MonitorTiming {
    /// Time between polls.
    pub interval: Duration,
    /// Limit for a single status query.
    pub query_timeout: Duration,
}

impl Default for MonitorTiming {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(500),
            query_timeout: Duration::from_secs(2),
        }
    }
}

struct Waiter {
    target: PrinterState,
    tx: oneshot::Sender<Result<DeviceStatus>>,
}

struct Held {
    status: DeviceStatus,
    waiters: HashMap<u64, Waiter>,
    next_waiter: u64,
}

struct Shared {
    held: Mutex<Held>,
    events: broadcast::Sender<StatusEvent>,
    wait_requests: AtomicU64,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Held> {
        // Nothing panics while holding the lock; recover the data if it ever did.
        self.held.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Apply a fresh poll. Returns whether anything changed.
    fn apply(&self, fresh: DeviceStatus) -> bool {
        let mut held = self.lock();
        if held.status == fresh {
            return false;
        }
        let previous = std::mem::replace(&mut held.status, fresh.clone());
        let entered = previous.state != fresh.state;

        if entered {
            let settled: Vec<u64> = held
                .waiters
                .iter()
                .filter(|(_, w)| w.target == fresh.state || fresh.is_error())
                .map(|(id, _)| *id)
                .collect();
            for id in settled {
                if let Some(waiter) = held.waiters.remove(&id) {
                    let outcome = if waiter.target == fresh.state {
                        Ok(fresh.clone())
                    } else {
                        Err(KioskError::printer(&fresh))
                    };
                    // The receiver may have timed out already.
                    let _ = waiter.tx.send(outcome);
                }
            }
        }
        drop(held);

        // No subscribers is fine.
        let _ = self.events.send(StatusEvent::Updated(fresh.clone()));
        if entered {
            let _ = self
                .events
                .send(StatusEvent::Entered(fresh.state, fresh.clone()));
            if fresh.is_error() {
                let _ = self.events.send(StatusEvent::Error(fresh));
            }
        }
        true
    }
}

/// Status monitor of one printer.
pub struct DeviceStatusMonitor {
    binding: PrinterBinding,
    adapter: Arc<dyn PrinterAdapter>,
    timing: MonitorTiming,
    shared: Arc<Shared>,
    shutdown_signal: Arc<Notify>,
    task_handle: Mutex<Option<JoinHandle<()>>>,
}

impl DeviceStatusMonitor {
    /// Create a monitor holding `Unknown`. Call [`start`] to begin polling.
    ///
    /// [`start`]: Self::start
    pub fn new(binding: PrinterBinding, adapter: Arc<dyn PrinterAdapter>, timing: MonitorTiming) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            binding,
            adapter,
            timing,
            shared: Arc::new(Shared {
                held: Mutex::new(Held {
                    status: DeviceStatus::unknown(),
                    waiters: HashMap::new(),
                    next_waiter: 0,
                }),
                events,
                wait_requests: AtomicU64::new(0),
            }),
            shutdown_signal: Arc::new(Notify::new()),
            task_handle: Mutex::new(None),
        }
    }

    pub fn binding(&self) -> &PrinterBinding {
        &self.binding
    }

    /// The latest known status.
    pub fn current(&self) -> DeviceStatus {
        self.shared.lock().status.clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StatusEvent> {
        self.shared.events.subscribe()
    }

    /// How many times `wait_for` has been called.
    pub fn wait_requests(&self) -> u64 {
        self.shared.wait_requests.load(Ordering::Relaxed)
    }

    /// Number of waits still registered.
    pub fn pending_waiters(&self) -> usize {
        self.shared.lock().waiters.len()
    }

    /// Block until the printer transitions into `target`.
    ///
    /// Fails with `PrinterError` if the printer transitions into an error
    /// state first, and with `WaitTimeout` if neither happens in time.
    #[instrument(skip(self), fields(printer = %self.binding.name))]
    pub async fn wait_for(&self, target: PrinterState, timeout: Duration) -> Result<DeviceStatus> {
        self.shared.wait_requests.fetch_add(1, Ordering::Relaxed);
        let (tx, mut rx) = oneshot::channel();
        let id = {
            let mut held = self.shared.lock();
            let id = held.next_waiter;
            held.next_waiter += 1;
            held.waiters.insert(id, Waiter { target, tx });
            id
        };
        debug!(id, "waiting for printer state");

        match tokio::time::timeout(timeout, &mut rx).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) => Err(KioskError::StatusQuery("monitor dropped a waiter".into())),
            Err(_) => {
                let removed = self.shared.lock().waiters.remove(&id).is_some();
                if !removed {
                    // Settled between the timer firing and the lock.
                    if let Ok(outcome) = rx.try_recv() {
                        return outcome;
                    }
                }
                warn!(?timeout, "printer did not reach target state in time");
                Err(KioskError::WaitTimeout { target, timeout })
            }
        }
    }

    /// Poll once and apply the result. Query failures leave the held status
    /// untouched.
    pub async fn poll_once(&self) -> Result<bool> {
        poll(&self.binding, self.adapter.as_ref(), &self.shared, self.timing.query_timeout).await
    }

    pub fn is_running(&self) -> bool {
        self.task_handle
            .lock()
            .map(|handle| handle.is_some())
            .unwrap_or(false)
    }

    /// Spawn the polling task.
    #[instrument(skip(self), fields(printer = %self.binding.name))]
    pub fn start(&self) {
        let Ok(mut slot) = self.task_handle.lock() else {
            return;
        };
        if slot.is_some() {
            debug!("status monitor already running");
            return;
        }

        let binding = self.binding.clone();
        let adapter = Arc::clone(&self.adapter);
        let shared = Arc::clone(&self.shared);
        let shutdown = Arc::clone(&self.shutdown_signal);
        let timing = self.timing;

        *slot = Some(tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now(), timing.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = shutdown.notified() => {
                        debug!(printer = %binding.name, "status monitor received shutdown signal");
                        break;
                    }
                    _ = ticker.tick() => {
                        if let Err(e) = poll(&binding, adapter.as_ref(), &shared, timing.query_timeout).await {
                            warn!(printer = %binding.name, error = %e, "status query failed");
                        }
                    }
                }
            }
        }));
        info!(interval = ?self.timing.interval, "status monitor started");
    }

    /// Stop the polling task and wait for it to exit.
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
            .map_err(|e| KioskError::StatusQuery(format!("monitor task join: {e}")))?;
        info!(printer = %self.binding.name, "status monitor stopped");
        Ok(())
    }
}

async fn poll(
    binding: &PrinterBinding,
    adapter: &dyn PrinterAdapter,
    shared: &Shared,
    query_timeout: Duration,
) -> Result<bool> {
    let fresh = tokio::time::timeout(query_timeout, adapter.query_status(binding))
        .await
        .map_err(|_| {
            KioskError::StatusQuery(format!("status query exceeded {query_timeout:?}"))
        })??;
    let changed = shared.apply(fresh);
    if changed {
        let status = shared.lock().status.clone();
        debug!(printer = %binding.name, state = %status.state, message = ?status.message, "printer status changed");
    }
    Ok(changed)
}

/// The kiosk's two status monitors.
pub struct DeviceStatusRegistry {
    mono: Arc<DeviceStatusMonitor>,
    color: Arc<DeviceStatusMonitor>,
}

impl DeviceStatusRegistry {
    pub fn new(
        bindings: &PrinterBindings,
        adapter: Arc<dyn PrinterAdapter>,
        timing: MonitorTiming,
    ) -> Self {
        let monitor = |kind| {
            Arc::new(DeviceStatusMonitor::new(
                bindings.get(kind).clone(),
                Arc::clone(&adapter),
                timing,
            ))
        };
        Self {
            mono: monitor(PrinterKind::Monochrome),
            color: monitor(PrinterKind::Color),
        }
    }

    pub fn monitor(&self, kind: PrinterKind) -> &Arc<DeviceStatusMonitor> {
        match kind {
            PrinterKind::Monochrome => &self.mono,
            PrinterKind::Color => &self.color,
        }
    }

    /// Both printers' status as one display line.
    pub fn summary(&self) -> String {
        join_status(&self.mono.current(), &self.color.current())
    }

    pub fn start(&self) {
        self.mono.start();
        self.color.start();
    }

    pub async fn stop(&self) -> Result<()> {
        self.mono.stop().await?;
        self.color.stop().await
    }
}
