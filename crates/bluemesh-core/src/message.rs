//! Message model and delivery bookkeeping
//!
//! A [`Message`] is immutable once created. Sent messages are wrapped in a
//! [`QueuedMessage`] that carries the retry bookkeeping the queue engine
//! needs; received messages are stored as plain [`Message`]s.

use serde::{Deserialize, Serialize};

use crate::types::{DeviceId, MessageId, Timestamp};

/// Maximum length of message content, in characters
pub const MAX_CONTENT_LEN: usize = 200;

/// Retry budget granted to every queued message
pub const MAX_RETRIES: u32 = 5;

// ----------------------------------------------------------------------------
// Direction
// ----------------------------------------------------------------------------

/// Whether a message left this node or arrived at it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    Sent,
    Received,
}

// ----------------------------------------------------------------------------
// Message
// ----------------------------------------------------------------------------

/// A single text message exchanged with one peer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    /// Globally unique id
    pub id: MessageId,
    /// The peer this message was sent to or received from
    pub peer_id: DeviceId,
    /// Text content, bounded to [`MAX_CONTENT_LEN`] at the transport boundary
    pub content: String,
    /// Creation timestamp
    pub created_at: Timestamp,
    /// Sent or Received
    pub direction: Direction,
}

impl Message {
    /// Create an outgoing message
    pub fn sent(
        id: MessageId,
        peer_id: DeviceId,
        content: impl Into<String>,
        created_at: Timestamp,
    ) -> Self {
        Self {
            id,
            peer_id,
            content: content.into(),
            created_at,
            direction: Direction::Sent,
        }
    }

    /// Create an incoming message
    pub fn received(
        id: MessageId,
        peer_id: DeviceId,
        content: impl Into<String>,
        created_at: Timestamp,
    ) -> Self {
        Self {
            id,
            peer_id,
            content: content.into(),
            created_at,
            direction: Direction::Received,
        }
    }
}

// ----------------------------------------------------------------------------
// Delivery State
// ----------------------------------------------------------------------------

/// Delivery state of a queued (Sent) message
///
/// `Undeliverable` is terminal: the retry budget ran out without a confirmed
/// delivery. Such entries are skipped by retry sweeps and surfaced separately
/// so callers can distinguish them from messages still worth retrying.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryState {
    /// Not yet delivered, retry budget remaining
    Pending,
    /// Delivery confirmed
    Delivered,
    /// Retry budget exhausted without delivery
    Undeliverable,
}

// ----------------------------------------------------------------------------
// Queued Message
// ----------------------------------------------------------------------------

/// A Sent message plus the retry bookkeeping tracked by the queue engine
///
/// Invariants: `retry_count <= max_retries`; `delivered` and `retry_count`
/// only ever move toward delivery, never back.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueuedMessage {
    #[serde(flatten)]
    pub message: Message,
    /// Whether delivery has been confirmed
    pub delivered: bool,
    /// Number of retry attempts made so far
    pub retry_count: u32,
    /// Retry budget for this message
    pub max_retries: u32,
    /// Earliest instant the next retry may run, unset before the first sweep
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub next_retry_at: Option<Timestamp>,
}

impl QueuedMessage {
    /// Wrap a Sent message with fresh retry bookkeeping
    pub fn new(message: Message) -> Self {
        Self {
            message,
            delivered: false,
            retry_count: 0,
            max_retries: MAX_RETRIES,
            next_retry_at: None,
        }
    }

    /// Current delivery state, derived from the bookkeeping fields
    pub fn delivery_state(&self) -> DeliveryState {
        if self.delivered {
            DeliveryState::Delivered
        } else if self.retry_count >= self.max_retries {
            DeliveryState::Undeliverable
        } else {
            DeliveryState::Pending
        }
    }

    /// Whether another retry attempt is allowed
    pub fn can_retry(&self) -> bool {
        self.delivery_state() == DeliveryState::Pending
    }

    /// Whether a retry may run now, honoring the `next_retry_at` backoff
    pub fn is_ready_for_retry(&self, now: Timestamp) -> bool {
        self.can_retry() && self.next_retry_at.map_or(true, |at| at <= now)
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
