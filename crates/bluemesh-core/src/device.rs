//! Discovered-device model and connection lifecycle states

use serde::{Deserialize, Serialize};

use crate::types::{DeviceId, Timestamp};

// ----------------------------------------------------------------------------
// Connection State
// ----------------------------------------------------------------------------

/// Lifecycle state of a device's link
///
/// A connection attempt moves `Disconnected → Connecting → Connected` on
/// success and falls back to `Disconnected` on failure. Only the transport
/// mutates this field.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
}

// ----------------------------------------------------------------------------
// Device
// ----------------------------------------------------------------------------

/// A nearby device synthesized during discovery
///
/// Devices are created on discovery and discarded wholesale on the next scan;
/// `last_seen_at` records the discovery instant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Device {
    /// Opaque unique id, valid within one discovery generation
    pub id: DeviceId,
    /// Human-readable name shown in device lists
    pub display_name: String,
    /// RSSI-like signal strength on a dBm scale (more negative = weaker)
    pub signal_strength: i16,
    /// Current link lifecycle state
    pub connection_state: ConnectionState,
    /// When this device was last seen by a scan
    pub last_seen_at: Timestamp,
}

impl Device {
    /// Create a freshly discovered, disconnected device
    pub fn discovered(
        id: DeviceId,
        display_name: impl Into<String>,
        signal_strength: i16,
        last_seen_at: Timestamp,
    ) -> Self {
        Self {
            id,
            display_name: display_name.into(),
            signal_strength,
            connection_state: ConnectionState::Disconnected,
            last_seen_at,
        }
    }

    /// Whether this device currently holds the active connection
    pub fn is_connected(&self) -> bool {
        self.connection_state == ConnectionState::Connected
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
