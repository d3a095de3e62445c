//! Simulator tuning: latencies, loss rates, and the simulated neighborhood

use std::ops::Range;
use std::time::Duration;

use bluemesh_core::MAX_CONTENT_LEN;

// ----------------------------------------------------------------------------
// Peer Roster
// ----------------------------------------------------------------------------

/// One entry of the simulated neighborhood
///
/// Each scan synthesizes a fresh [`bluemesh_core::Device`] from these
/// profiles, jittering the base signal strength per discovery.
#[derive(Debug, Clone)]
pub struct PeerProfile {
    /// Name shown in device lists
    pub display_name: &'static str,
    /// Baseline RSSI in dBm; jitter is applied on top
    pub base_rssi: i16,
}

/// The fixed candidate list every scan walks through
pub const DEFAULT_ROSTER: &[PeerProfile] = &[
    PeerProfile {
        display_name: "Alex's Phone",
        base_rssi: -45,
    },
    PeerProfile {
        display_name: "Sarah's Tablet",
        base_rssi: -62,
    },
    PeerProfile {
        display_name: "Mike's Device",
        base_rssi: -78,
    },
    PeerProfile {
        display_name: "Emma's Phone",
        base_rssi: -55,
    },
    PeerProfile {
        display_name: "David's Laptop",
        base_rssi: -88,
    },
];

/// Canned responses the simulated peer replies with after a successful send
pub const DEFAULT_REPLIES: &[&str] = &[
    "Got it!",
    "Thanks for the message!",
    "On my way",
    "I'll check on that",
    "Sure thing",
    "Sounds good",
];

// ----------------------------------------------------------------------------
// Simulator Configuration
// ----------------------------------------------------------------------------

/// Tunable behavior of the radio simulator
///
/// Probabilities are success rates in `[0.0, 1.0]`; an attempt succeeds when
/// the injected random roll falls below the rate.
#[derive(Debug, Clone)]
pub struct SimulatorConfig {
    /// Simulated peers walked through on every scan
    pub roster: Vec<PeerProfile>,
    /// Replies a connected peer may send back
    pub canned_replies: Vec<String>,
    /// Randomized wait before each discovery in a scan pass
    pub discovery_delay: Range<Duration>,
    /// RSSI jitter applied to a profile's baseline on discovery, in dBm
    pub rssi_jitter: Range<i16>,
    /// Fixed latency of a connection attempt
    pub connect_latency: Duration,
    /// Probability a connection attempt succeeds
    pub connect_success_rate: f64,
    /// Randomized latency of a message transmission
    pub send_latency: Range<Duration>,
    /// Probability a transmission succeeds
    pub send_success_rate: f64,
    /// Randomized wait before the synthetic reply to a successful send
    pub reply_delay: Range<Duration>,
    /// Maximum characters accepted per message
    pub max_content_len: usize,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            roster: DEFAULT_ROSTER.to_vec(),
            canned_replies: DEFAULT_REPLIES.iter().map(|s| (*s).to_owned()).collect(),
            discovery_delay: Duration::from_millis(300)..Duration::from_millis(1_000),
            rssi_jitter: -5..5,
            connect_latency: Duration::from_millis(1_000),
            connect_success_rate: 0.9,
            send_latency: Duration::from_millis(200)..Duration::from_millis(500),
            send_success_rate: 0.95,
            reply_delay: Duration::from_millis(1_000)..Duration::from_millis(3_000),
            max_content_len: MAX_CONTENT_LEN,
        }
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
