//! Simulated short-range radio transport
//!
//! Owns device discovery and the single active connection, simulating
//! latency and probabilistic loss on every operation. Lifecycle and message
//! outcomes are announced through the shared [`EventBus`]; the active
//! connection is persisted as a versioned link snapshot so a restart comes
//! back up connected.
//!
//! All waits ride the tokio clock, so tests on a paused runtime advance
//! through scans, connects, and replies instantly. The state mutex is never
//! held across an await.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::{Deserialize, Serialize};
use tokio::time::sleep;
use tracing::{debug, warn};

use bluemesh_core::{
    ConnectionState, Device, DeviceId, EventBus, MeshEvent, StateStore, TimeSource,
};

use crate::config::SimulatorConfig;
use crate::error::{ConnectError, SendError};
use crate::rng::RandomSource;

/// Storage key for the link snapshot blob
pub const LINK_STATE_KEY: &str = "bluemesh_link";

/// Snapshot schema version understood by this build
const SNAPSHOT_VERSION: u32 = 1;

// ----------------------------------------------------------------------------
// Link Snapshot
// ----------------------------------------------------------------------------

/// Persisted form of the connection state
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LinkSnapshot {
    version: u32,
    connected_device: Option<Device>,
}

// ----------------------------------------------------------------------------
// Link State
// ----------------------------------------------------------------------------

/// Mutable transport state behind the simulator's mutex
#[derive(Debug, Default)]
struct LinkState {
    /// Devices synthesized by the current scan generation
    discovered: HashMap<DeviceId, Device>,
    /// The single active connection, if any
    connected: Option<Device>,
    /// Whether a scan pass is in progress
    scanning: bool,
}

// ----------------------------------------------------------------------------
// Radio Simulator
// ----------------------------------------------------------------------------

/// The transport simulator
///
/// Cloning yields another handle onto the same transport; the synthetic
/// reply task holds one internally after a successful send.
pub struct RadioSimulator<S, R, C> {
    inner: Arc<Inner<S, R, C>>,
}

struct Inner<S, R, C> {
    config: SimulatorConfig,
    events: EventBus,
    store: S,
    rng: Mutex<R>,
    clock: C,
    link: Mutex<LinkState>,
}

impl<S, R, C> Clone for RadioSimulator<S, R, C> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<S, R, C> RadioSimulator<S, R, C>
where
    S: StateStore + Send + Sync + 'static,
    R: RandomSource + Send + 'static,
    C: TimeSource + Send + Sync + 'static,
{
    /// Create a simulator with default tuning, restoring any persisted link
    pub fn new(events: EventBus, store: S, rng: R, clock: C) -> Self {
        Self::with_config(events, store, rng, clock, SimulatorConfig::default())
    }

    /// Create a simulator with custom tuning
    pub fn with_config(
        events: EventBus,
        store: S,
        rng: R,
        clock: C,
        config: SimulatorConfig,
    ) -> Self {
        let connected = load_link_snapshot(&store);
        Self {
            inner: Arc::new(Inner {
                config,
                events,
                store,
                rng: Mutex::new(rng),
                clock,
                link: Mutex::new(LinkState {
                    connected,
                    ..LinkState::default()
                }),
            }),
        }
    }

    // ------------------------------------------------------------------
    // Discovery
    // ------------------------------------------------------------------

    /// Run one scan pass over the simulated neighborhood
    ///
    /// No-op when a scan is already in progress. Clears the discovered set,
    /// then walks the roster sequentially: a randomized delay, a cancellation
    /// check, then a synthesized device announced via `deviceDiscovered`.
    /// Exactly one `scanCompleted` is emitted, whether the pass ran to the
    /// end or was cancelled between iterations.
    pub async fn start_scanning(&self) {
        {
            let mut link = self.inner.lock_link();
            if link.scanning {
                return;
            }
            link.scanning = true;
            link.discovered.clear();
        }
        self.inner.events.publish(&MeshEvent::ScanStarted);
        debug!("scan started");

        for (index, profile) in self.inner.config.roster.iter().enumerate() {
            let delay = {
                let mut rng = self.inner.lock_rng();
                rng.duration_in(&self.inner.config.discovery_delay)
            };
            sleep(delay).await;

            // Cooperative cancellation; the in-flight delay above is never
            // aborted early.
            if !self.inner.lock_link().scanning {
                break;
            }

            let now = self.inner.clock.now();
            let jitter = self.inner.lock_rng().jitter_in(&self.inner.config.rssi_jitter);
            let device = Device::discovered(
                DeviceId::new(format!("device_{}_{}", index, now.as_millis())),
                profile.display_name,
                profile.base_rssi + jitter,
                now,
            );

            self.inner
                .lock_link()
                .discovered
                .insert(device.id.clone(), device.clone());
            self.inner
                .events
                .publish(&MeshEvent::DeviceDiscovered(device));
        }

        self.inner.lock_link().scanning = false;
        self.inner.events.publish(&MeshEvent::ScanCompleted);
        debug!("scan completed");
    }

    /// Cancel an in-progress scan
    ///
    /// Idempotent; observed between scan iterations, never mid-delay.
    pub fn stop_scanning(&self) {
        self.inner.lock_link().scanning = false;
    }

    /// Devices synthesized by the current scan generation
    pub fn discovered_devices(&self) -> Vec<Device> {
        self.inner.lock_link().discovered.values().cloned().collect()
    }

    /// Whether a scan pass is in progress
    pub fn is_scanning(&self) -> bool {
        self.inner.lock_link().scanning
    }

    // ------------------------------------------------------------------
    // Connection Lifecycle
    // ------------------------------------------------------------------

    /// Attempt to connect to a discovered device
    ///
    /// Fails immediately, without an event, when the id is not in the
    /// discovered set. Otherwise the device goes `Connecting` for the
    /// configured latency, then the attempt succeeds with the configured
    /// probability: the device becomes the active connection (persisted,
    /// `deviceConnected`) or reverts to `Disconnected` (`connectionFailed`).
    pub async fn connect(&self, device_id: &DeviceId) -> Result<Device, ConnectError> {
        let mut device = {
            let mut link = self.inner.lock_link();
            match link.discovered.get_mut(device_id) {
                Some(device) => {
                    device.connection_state = ConnectionState::Connecting;
                    device.clone()
                }
                None => {
                    return Err(ConnectError::UnknownDevice {
                        device_id: device_id.to_string(),
                    })
                }
            }
        };

        sleep(self.inner.config.connect_latency).await;

        let roll = self.inner.lock_rng().next_roll();
        if roll < self.inner.config.connect_success_rate {
            device.connection_state = ConnectionState::Connected;
            {
                let mut link = self.inner.lock_link();
                if let Some(entry) = link.discovered.get_mut(device_id) {
                    entry.connection_state = ConnectionState::Connected;
                }
                link.connected = Some(device.clone());
            }
            self.inner.persist_link();
            debug!(device = %device.id, "connected");
            self.inner
                .events
                .publish(&MeshEvent::DeviceConnected(device.clone()));
            Ok(device)
        } else {
            device.connection_state = ConnectionState::Disconnected;
            if let Some(entry) = self.inner.lock_link().discovered.get_mut(device_id) {
                entry.connection_state = ConnectionState::Disconnected;
            }
            debug!(device = %device.id, "connection failed");
            self.inner
                .events
                .publish(&MeshEvent::ConnectionFailed(device));
            Err(ConnectError::Failed {
                device_id: device_id.to_string(),
            })
        }
    }

    /// Tear down the active connection, if any
    pub fn disconnect(&self) {
        let device = {
            let mut link = self.inner.lock_link();
            match link.connected.take() {
                Some(mut device) => {
                    device.connection_state = ConnectionState::Disconnected;
                    if let Some(entry) = link.discovered.get_mut(&device.id) {
                        entry.connection_state = ConnectionState::Disconnected;
                    }
                    device
                }
                None => return,
            }
        };

        self.inner.persist_link();
        debug!(device = %device.id, "disconnected");
        self.inner
            .events
            .publish(&MeshEvent::DeviceDisconnected(device));
    }

    /// The active connection, if any
    pub fn connected_device(&self) -> Option<Device> {
        self.inner.lock_link().connected.clone()
    }

    /// Whether a connection is active
    pub fn is_connected(&self) -> bool {
        self.inner.lock_link().connected.is_some()
    }

    // ------------------------------------------------------------------
    // Messaging
    // ------------------------------------------------------------------

    /// Transmit content to the connected peer
    ///
    /// Fails immediately, without an event, when nothing is connected or the
    /// content exceeds the length bound. Otherwise the transmission takes a
    /// randomized latency and succeeds with the configured probability:
    /// `messageSent` is emitted and a detached reply task is scheduled,
    /// which delivers a canned `messageReceived` after an independent delay
    /// provided a connection is still active at fire time. A failed
    /// transmission returns an error with no event and no reply.
    pub async fn send_message(&self, content: &str) -> Result<(), SendError> {
        if content.chars().count() > self.inner.config.max_content_len {
            return Err(SendError::ContentTooLong {
                len: content.chars().count(),
                max: self.inner.config.max_content_len,
            });
        }

        let peer_id = match self.inner.lock_link().connected.as_ref() {
            Some(device) => device.id.clone(),
            None => return Err(SendError::NotConnected),
        };

        let delay = {
            let mut rng = self.inner.lock_rng();
            rng.duration_in(&self.inner.config.send_latency)
        };
        sleep(delay).await;

        let roll = self.inner.lock_rng().next_roll();
        if roll >= self.inner.config.send_success_rate {
            debug!(peer = %peer_id, "transmission failed");
            return Err(SendError::TransmissionFailed);
        }

        self.inner.events.publish(&MeshEvent::MessageSent {
            content: content.to_owned(),
            peer_id,
        });

        // The reply's delay and wording are fixed now; only the
        // still-connected check happens at fire time.
        let (reply_delay, reply) = {
            let mut rng = self.inner.lock_rng();
            let delay = rng.duration_in(&self.inner.config.reply_delay);
            let index = rng.pick_index(self.inner.config.canned_replies.len());
            (delay, self.inner.config.canned_replies[index].clone())
        };

        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            sleep(reply_delay).await;
            let peer = inner.lock_link().connected.as_ref().map(|d| d.id.clone());
            if let Some(peer_id) = peer {
                inner.events.publish(&MeshEvent::MessageReceived {
                    content: reply,
                    peer_id,
                });
            }
        });

        Ok(())
    }

    /// Handle onto the shared event bus
    pub fn events(&self) -> EventBus {
        self.inner.events.clone()
    }
}

impl<S, R, C> Inner<S, R, C>
where
    S: StateStore,
{
    fn lock_link(&self) -> MutexGuard<'_, LinkState> {
        self.link.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_rng(&self) -> MutexGuard<'_, R> {
        self.rng.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn persist_link(&self) {
        let snapshot = LinkSnapshot {
            version: SNAPSHOT_VERSION,
            connected_device: self.lock_link().connected.clone(),
        };

        let blob = match serde_json::to_string(&snapshot) {
            Ok(blob) => blob,
            Err(err) => {
                warn!(error = %err, "failed to serialize link snapshot");
                return;
            }
        };

        if let Err(err) = self.store.save(LINK_STATE_KEY, &blob) {
            warn!(error = %err, "failed to persist link snapshot");
        }
    }
}

/// Load the link snapshot, treating absent, malformed, or unknown-version
/// blobs as no prior connection
fn load_link_snapshot<S: StateStore>(store: &S) -> Option<Device> {
    let blob = match store.load(LINK_STATE_KEY) {
        Ok(Some(blob)) => blob,
        Ok(None) => return None,
        Err(err) => {
            warn!(error = %err, "failed to read link snapshot, starting disconnected");
            return None;
        }
    };

    match serde_json::from_str::<LinkSnapshot>(&blob) {
        Ok(snapshot) if snapshot.version == SNAPSHOT_VERSION => snapshot.connected_device,
        Ok(snapshot) => {
            warn!(
                version = snapshot.version,
                "unknown link snapshot version, starting disconnected"
            );
            None
        }
        Err(err) => {
            warn!(error = %err, "corrupt link snapshot, starting disconnected");
            None
        }
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
