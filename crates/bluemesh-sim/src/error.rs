//! Transport failure taxonomy
//!
//! Every failure here is recoverable by design: a failed connect leaves the
//! device discoverable for another attempt, and a failed send leaves the
//! message pending for the retry engine.

// ----------------------------------------------------------------------------
// Connect Errors
// ----------------------------------------------------------------------------

/// Why a connection attempt did not produce an active link
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConnectError {
    /// The id is not among the currently discovered devices; no event is
    /// emitted for this case
    #[error("device {device_id} is not in the discovered set")]
    UnknownDevice { device_id: String },

    /// The simulated link negotiation failed; also reported through the
    /// `connectionFailed` event
    #[error("connection attempt to {device_id} failed")]
    Failed { device_id: String },
}

// ----------------------------------------------------------------------------
// Send Errors
// ----------------------------------------------------------------------------

/// Why outbound content was not transmitted
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SendError {
    /// No active connection; nothing was attempted and no event is emitted
    #[error("no device connected")]
    NotConnected,

    /// Content exceeds the transport's length bound
    #[error("content length {len} exceeds the {max}-character bound")]
    ContentTooLong { len: usize, max: usize },

    /// The simulated transmission failed after its latency window; the
    /// message stays pending for the retry engine
    #[error("transmission failed")]
    TransmissionFailed,
}
