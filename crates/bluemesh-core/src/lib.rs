//! BlueMesh Core
//!
//! Message queue engine, event bus, and persistence for the BlueMesh offline
//! peer-to-peer messenger. This crate holds everything that is independent
//! of the transport: the outbox/inbox bookkeeping with delivery tracking and
//! retry scheduling, the publish/subscribe event registry, and the key-value
//! snapshot storage both sides persist through.
//!
//! The transport itself (device discovery, connection lifecycle, simulated
//! radio sends) lives in the companion `bluemesh-sim` crate.

// ----------------------------------------------------------------------------
// Module Declarations
// ----------------------------------------------------------------------------

pub mod device;
pub mod events;
pub mod message;
pub mod queue;
pub mod store;
pub mod types;

// ----------------------------------------------------------------------------
// Public API
// ----------------------------------------------------------------------------

pub use device::{ConnectionState, Device};
pub use events::{EventBus, EventKind, MeshEvent, SubscriptionId};
pub use message::{DeliveryState, Direction, Message, QueuedMessage, MAX_CONTENT_LEN, MAX_RETRIES};
pub use queue::{ConversationEntry, MessageQueue, QueueConfig, QueueStats, QUEUE_STATE_KEY};
pub use store::{FileStore, MemoryStore, StateStore, StoreError};
pub use types::{DeviceId, MessageId, SystemTimeSource, TimeSource, Timestamp};
