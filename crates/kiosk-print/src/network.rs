// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Network watcher.
//
// Polls the kiosk's primary IPv4 address, publishes connectivity changes,
// and tells the cloud print server whenever the address changes so phones
// can reach the kiosk.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::net::UdpSocket;
use tokio::sync::{Notify, broadcast};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tracing::{debug, info, warn};

use kiosk_core::error::{KioskError, Result};

use crate::remote::RemoteClient;

/// Where the watcher learns the current address from.
#[async_trait]
pub trait AddressSource: Send + Sync {
    /// The primary non-loopback IPv4 address, if the host has one.
    async fn primary_ipv4(&self) -> Option<Ipv4Addr>;
}

/// Asks the routing table which local address would reach `target`.
/// Connecting a UDP socket sends nothing.
#[derive(Debug, Clone)]
pub struct UdpProbe {
    target: SocketAddr,
}

impl UdpProbe {
    pub fn new(target: SocketAddr) -> Self {
        Self { target }
    }
}

impl Default for UdpProbe {
    fn default() -> Self {
        Self::new(SocketAddr::from(([8, 8, 8, 8], 53)))
    }
}

#[async_trait]
impl AddressSource for UdpProbe {
    async fn primary_ipv4(&self) -> Option<Ipv4Addr> {
        let socket = UdpSocket::bind("0.0.0.0:0").await.ok()?;
        socket.connect(self.target).await.ok()?;
        let local = socket.local_addr().ok()?;
        match local.ip() {
            IpAddr::V4(ip) if !ip.is_loopback() && !ip.is_unspecified() => Some(ip),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkEvent {
    /// An address is back after the network was lost.
    Connected,
    /// The address disappeared.
    Disconnected,
    /// A new address was observed.
    AddressChanged(Ipv4Addr),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Connectivity {
    Unknown,
    Connected(Ipv4Addr),
    Disconnected,
}

impl Connectivity {
    fn observe(&mut self, seen: Option<Ipv4Addr>) -> Vec<NetworkEvent> {
        let (next, events) = match (*self, seen) {
            (Self::Unknown, Some(ip)) => (Self::Connected(ip), vec![NetworkEvent::AddressChanged(ip)]),
            (Self::Unknown, None) => (Self::Disconnected, vec![NetworkEvent::Disconnected]),
            (Self::Disconnected, Some(ip)) => (
                Self::Connected(ip),
                vec![NetworkEvent::Connected, NetworkEvent::AddressChanged(ip)],
            ),
            (Self::Disconnected, None) => (Self::Disconnected, Vec::new()),
            (Self::Connected(old), Some(ip)) if old == ip => (Self::Connected(ip), Vec::new()),
            (Self::Connected(_), Some(ip)) => (Self::Connected(ip), vec![NetworkEvent::AddressChanged(ip)]),
            (Self::Connected(_), None) => (Self::Disconnected, vec![NetworkEvent::Disconnected]),
        };
        *self = next;
        events
    }
}

struct Shared {
    source: Arc<dyn AddressSource>,
    remote: Option<Arc<RemoteClient>>,
    state: Mutex<Connectivity>,
    events: broadcast::Sender<NetworkEvent>,
}

impl Shared {
    async fn check(&self) -> Vec<NetworkEvent> {
        let seen = self.source.primary_ipv4().await;
        let events = match self.state.lock() {
            Ok(mut state) => state.observe(seen),
            Err(_) => return Vec::new(),
        };

        for event in &events {
            match event {
                NetworkEvent::Connected => info!("network connectivity restored"),
                NetworkEvent::Disconnected => warn!("network connectivity lost"),
                NetworkEvent::AddressChanged(ip) => info!(%ip, "kiosk address changed"),
            }
            let _ = self.events.send(*event);
        }

        for event in &events {
            if let (NetworkEvent::AddressChanged(ip), Some(remote)) = (event, &self.remote) {
                if let Err(e) = remote.report_ip(&ip.to_string()).await {
                    warn!(%ip, error = %e, "could not report address to remote server");
                }
            }
        }
        events
    }
}

/// Background address watcher.
pub struct NetworkWatcher {
    shared: Arc<Shared>,
    interval: Duration,
    shutdown_signal: Arc<Notify>,
    task_handle: Mutex<Option<JoinHandle<()>>>,
}

impl NetworkWatcher {
    /// Address changes are reported through `remote` when one is given.
    pub fn new(
        source: Arc<dyn AddressSource>,
        remote: Option<Arc<RemoteClient>>,
        interval: Duration,
    ) -> Self {
        let (events, _) = broadcast::channel(16);
        Self {
            shared: Arc::new(Shared {
                source,
                remote,
                state: Mutex::new(Connectivity::Unknown),
                events,
            }),
            interval,
            shutdown_signal: Arc::new(Notify::new()),
            task_handle: Mutex::new(None),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<NetworkEvent> {
        self.shared.events.subscribe()
    }

    /// The last observed address.
    pub fn current(&self) -> Option<Ipv4Addr> {
        match self.shared.state.lock().map(|s| *s) {
            Ok(Connectivity::Connected(ip)) => Some(ip),
            _ => None,
        }
    }

    /// Look at the address once, publish and report what changed.
    pub async fn check_once(&self) -> Vec<NetworkEvent> {
        self.shared.check().await
    }

    pub fn is_running(&self) -> bool {
        self.task_handle
            .lock()
            .map(|handle| handle.is_some())
            .unwrap_or(false)
    }

    pub fn start(&self) {
        let Ok(mut slot) = self.task_handle.lock() else {
            return;
        };
        if slot.is_some() {
            debug!("network watcher already running");
            return;
        }

        let shared = Arc::clone(&self.shared);
        let shutdown = Arc::clone(&self.shutdown_signal);
        let period = self.interval;

        *slot = Some(tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now(), period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = shutdown.notified() => {
                        debug!("network watcher received shutdown signal");
                        break;
                    }
                    _ = ticker.tick() => {
                        shared.check().await;
                    }
                }
            }
        }));
        info!(interval = ?self.interval, "network watcher started");
    }

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
            .map_err(|e| KioskError::Remote(format!("network watcher join: {e}")))?;
        info!("network watcher stopped");
        Ok(())
    }
}
