//! Message queue engine: outbox/inbox bookkeeping, delivery tracking, and
//! retry scheduling
//!
//! The engine owns the outbox (sent messages with retry bookkeeping) and the
//! inbox (received messages). Every mutation re-serializes both maps into a
//! single versioned snapshot and writes it through the injected
//! [`StateStore`], so the two maps can never be persisted out of step.
//!
//! None of the operations here raise fatal errors: lookups signal absence
//! with booleans or empty results, and persistence failures are logged and
//! swallowed, leaving the in-memory state authoritative.

use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::message::{DeliveryState, Message, QueuedMessage, MAX_RETRIES};
use crate::store::StateStore;
use crate::types::{DeviceId, MessageId, TimeSource, Timestamp};

/// Storage key for the queue snapshot blob
pub const QUEUE_STATE_KEY: &str = "bluemesh_queue";

/// Snapshot schema version understood by this build
const SNAPSHOT_VERSION: u32 = 1;

// ----------------------------------------------------------------------------
// Configuration
// ----------------------------------------------------------------------------

/// Tunable retry and retention behavior
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Retry budget granted to each queued message
    pub max_retries: u32,
    /// Backoff applied after each retry attempt
    pub retry_delay: Duration,
    /// Entries older than this are removed by [`MessageQueue::cleanup_old_messages`]
    pub max_message_age: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_retries: MAX_RETRIES,
            retry_delay: Duration::from_millis(3_000),
            max_message_age: Duration::from_secs(7 * 24 * 60 * 60),
        }
    }
}

// ----------------------------------------------------------------------------
// Snapshot
// ----------------------------------------------------------------------------

/// Persisted form of the queue: both maps in one atomic blob
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct QueueSnapshot {
    version: u32,
    outbox: HashMap<MessageId, QueuedMessage>,
    inbox: HashMap<MessageId, Message>,
}

// ----------------------------------------------------------------------------
// Conversation Entries
// ----------------------------------------------------------------------------

/// One message of a conversation: a Sent entry with its delivery
/// bookkeeping, or a plain Received entry
#[derive(Debug, Clone, PartialEq)]
pub enum ConversationEntry {
    Sent(QueuedMessage),
    Received(Message),
}

impl ConversationEntry {
    /// The underlying message, regardless of direction
    pub fn message(&self) -> &Message {
        match self {
            ConversationEntry::Sent(queued) => &queued.message,
            ConversationEntry::Received(message) => message,
        }
    }

    /// Delivery state: Received entries are delivered by definition
    pub fn delivery_state(&self) -> DeliveryState {
        match self {
            ConversationEntry::Sent(queued) => queued.delivery_state(),
            ConversationEntry::Received(_) => DeliveryState::Delivered,
        }
    }
}

// ----------------------------------------------------------------------------
// Statistics
// ----------------------------------------------------------------------------

/// Counters summarizing the queue contents
///
/// `pending + delivered + undeliverable` equals the outbox size, `received`
/// the inbox size, and `total` the sum of both.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueStats {
    /// Undelivered entries with retry budget remaining
    pub pending: usize,
    /// Entries with confirmed delivery
    pub delivered: usize,
    /// Entries whose retry budget ran out without delivery
    pub undeliverable: usize,
    /// Inbox entries
    pub received: usize,
    /// Outbox plus inbox entries
    pub total: usize,
}

// ----------------------------------------------------------------------------
// Message Queue
// ----------------------------------------------------------------------------

/// The outbox/inbox engine
///
/// Mutating operations take `&mut self`; callers sharing an engine across
/// tasks wrap it in a lock to keep the single-writer discipline the
/// persistence model assumes.
pub struct MessageQueue<S, T> {
    outbox: HashMap<MessageId, QueuedMessage>,
    inbox: HashMap<MessageId, Message>,
    store: S,
    clock: T,
    config: QueueConfig,
}

impl<S: StateStore, T: TimeSource> MessageQueue<S, T> {
    /// Create an engine with default configuration, loading any prior
    /// snapshot from the store
    pub fn new(store: S, clock: T) -> Self {
        Self::with_config(store, clock, QueueConfig::default())
    }

    /// Create an engine with custom configuration
    pub fn with_config(store: S, clock: T, config: QueueConfig) -> Self {
        let snapshot = load_snapshot(&store);
        Self {
            outbox: snapshot.outbox,
            inbox: snapshot.inbox,
            store,
            clock,
            config,
        }
    }

    // ------------------------------------------------------------------
    // Mutations
    // ------------------------------------------------------------------

    /// Add a Sent message to the outbox with fresh retry bookkeeping
    ///
    /// Returns the stored entry.
    pub fn enqueue_message(&mut self, message: Message) -> QueuedMessage {
        let mut queued = QueuedMessage::new(message);
        queued.max_retries = self.config.max_retries;

        debug!(id = %queued.message.id, peer = %queued.message.peer_id, "enqueued message");
        self.outbox.insert(queued.message.id.clone(), queued.clone());
        self.persist();
        queued
    }

    /// Add a Received message to the inbox
    pub fn receive_message(&mut self, message: Message) {
        debug!(id = %message.id, peer = %message.peer_id, "received message");
        self.inbox.insert(message.id.clone(), message);
        self.persist();
    }

    /// Mark an outbox entry as delivered
    ///
    /// Returns `false` when the id is not in the outbox.
    pub fn mark_delivered(&mut self, id: &MessageId) -> bool {
        match self.outbox.get_mut(id) {
            Some(queued) => {
                queued.delivered = true;
                self.persist();
                true
            }
            None => false,
        }
    }

    /// Retry every eligible pending outbox entry for one peer
    ///
    /// An entry is eligible when its retry budget is not exhausted and its
    /// `next_retry_at` is unset or has elapsed. Each attempt increments the
    /// retry count, pushes the backoff forward, and invokes `send_fn` with
    /// the message content; a successful send marks the entry delivered.
    ///
    /// Returns the number of entries newly delivered this sweep.
    pub async fn retry_pending_messages<F, Fut>(
        &mut self,
        peer_id: &DeviceId,
        mut send_fn: F,
    ) -> usize
    where
        F: FnMut(String) -> Fut,
        Fut: Future<Output = bool>,
    {
        let now = self.clock.now();
        let due: Vec<MessageId> = self
            .outbox
            .values()
            .filter(|queued| {
                !queued.delivered
                    && queued.message.peer_id == *peer_id
                    && queued.is_ready_for_retry(now)
            })
            .map(|queued| queued.message.id.clone())
            .collect();

        let mut delivered_count = 0;
        for id in due {
            let content = match self.outbox.get_mut(&id) {
                Some(queued) => {
                    queued.retry_count += 1;
                    queued.next_retry_at = Some(now + self.config.retry_delay.as_millis() as u64);
                    queued.message.content.clone()
                }
                None => continue,
            };

            if send_fn(content).await {
                self.mark_delivered(&id);
                delivered_count += 1;
            } else if let Some(queued) = self.outbox.get(&id) {
                if queued.delivery_state() == DeliveryState::Undeliverable {
                    warn!(id = %id, peer = %peer_id, "retry budget exhausted, message is undeliverable");
                }
            }
        }

        self.persist();
        delivered_count
    }

    /// Remove entries strictly older than the retention window from both maps
    pub fn cleanup_old_messages(&mut self) {
        let cutoff = self
            .clock
            .now()
            .saturating_sub_millis(self.config.max_message_age.as_millis() as u64);

        let before = self.outbox.len() + self.inbox.len();
        self.outbox
            .retain(|_, queued| queued.message.created_at >= cutoff);
        self.inbox.retain(|_, message| message.created_at >= cutoff);

        let removed = before - (self.outbox.len() + self.inbox.len());
        if removed > 0 {
            debug!(removed, "cleaned up expired messages");
        }
        self.persist();
    }

    /// Empty both maps
    pub fn clear_all(&mut self) {
        self.outbox.clear();
        self.inbox.clear();
        self.persist();
    }

    // ------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------

    /// Undelivered outbox entries with retry budget remaining, optionally
    /// filtered by peer
    pub fn pending_messages(&self, peer_id: Option<&DeviceId>) -> Vec<QueuedMessage> {
        self.filter_outbox(peer_id, DeliveryState::Pending)
    }

    /// Outbox entries with confirmed delivery, optionally filtered by peer
    pub fn delivered_messages(&self, peer_id: Option<&DeviceId>) -> Vec<QueuedMessage> {
        self.filter_outbox(peer_id, DeliveryState::Delivered)
    }

    /// Outbox entries whose retry budget ran out, optionally filtered by peer
    pub fn undeliverable_messages(&self, peer_id: Option<&DeviceId>) -> Vec<QueuedMessage> {
        self.filter_outbox(peer_id, DeliveryState::Undeliverable)
    }

    /// Inbox entries, optionally filtered by peer
    pub fn received_messages(&self, peer_id: Option<&DeviceId>) -> Vec<Message> {
        self.inbox
            .values()
            .filter(|message| peer_id.map_or(true, |peer| message.peer_id == *peer))
            .cloned()
            .collect()
    }

    /// All entries exchanged with one peer, ascending by creation time
    ///
    /// Sent entries keep their delivery bookkeeping so callers can render
    /// per-message delivery state. Equal timestamps tie-break by message id
    /// so the order is deterministic.
    pub fn conversation(&self, peer_id: &DeviceId) -> Vec<ConversationEntry> {
        let mut entries: Vec<ConversationEntry> = self
            .outbox
            .values()
            .filter(|queued| queued.message.peer_id == *peer_id)
            .map(|queued| ConversationEntry::Sent(queued.clone()))
            .chain(
                self.inbox
                    .values()
                    .filter(|message| message.peer_id == *peer_id)
                    .map(|message| ConversationEntry::Received(message.clone())),
            )
            .collect();

        entries.sort_by(|a, b| {
            let (a, b) = (a.message(), b.message());
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.id.cmp(&b.id))
        });
        entries
    }

    /// Counters over the current queue contents
    pub fn stats(&self) -> QueueStats {
        let mut stats = QueueStats {
            received: self.inbox.len(),
            total: self.outbox.len() + self.inbox.len(),
            ..QueueStats::default()
        };

        for queued in self.outbox.values() {
            match queued.delivery_state() {
                DeliveryState::Pending => stats.pending += 1,
                DeliveryState::Delivered => stats.delivered += 1,
                DeliveryState::Undeliverable => stats.undeliverable += 1,
            }
        }

        stats
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    fn filter_outbox(&self, peer_id: Option<&DeviceId>, state: DeliveryState) -> Vec<QueuedMessage> {
        self.outbox
            .values()
            .filter(|queued| {
                queued.delivery_state() == state
                    && peer_id.map_or(true, |peer| queued.message.peer_id == *peer)
            })
            .cloned()
            .collect()
    }

    fn persist(&self) {
        let snapshot = QueueSnapshot {
            version: SNAPSHOT_VERSION,
            outbox: self.outbox.clone(),
            inbox: self.inbox.clone(),
        };

        let blob = match serde_json::to_string(&snapshot) {
            Ok(blob) => blob,
            Err(err) => {
                warn!(error = %err, "failed to serialize queue snapshot");
                return;
            }
        };

        if let Err(err) = self.store.save(QUEUE_STATE_KEY, &blob) {
            warn!(error = %err, "failed to persist queue snapshot");
        }
    }
}

/// Load the queue snapshot, treating absent, malformed, or unknown-version
/// blobs as empty state
fn load_snapshot<S: StateStore>(store: &S) -> QueueSnapshot {
    let blob = match store.load(QUEUE_STATE_KEY) {
        Ok(Some(blob)) => blob,
        Ok(None) => return QueueSnapshot::default(),
        Err(err) => {
            warn!(error = %err, "failed to read queue snapshot, starting empty");
            return QueueSnapshot::default();
        }
    };

    match serde_json::from_str::<QueueSnapshot>(&blob) {
        Ok(snapshot) if snapshot.version == SNAPSHOT_VERSION => snapshot,
        Ok(snapshot) => {
            warn!(
                version = snapshot.version,
                "unknown queue snapshot version, starting empty"
            );
            QueueSnapshot::default()
        }
        Err(err) => {
            warn!(error = %err, "corrupt queue snapshot, starting empty");
            QueueSnapshot::default()
        }
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
