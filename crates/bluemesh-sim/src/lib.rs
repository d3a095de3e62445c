//! BlueMesh Transport Simulator
//!
//! A simulated short-range radio transport for the BlueMesh offline
//! messenger: device discovery over a fixed simulated neighborhood, a
//! single-connection lifecycle, and probabilistic message transmission with
//! synthetic canned replies. Latency and loss are randomized through an
//! injectable [`RandomSource`]; all waits ride the tokio clock so tests can
//! advance time deterministically.
//!
//! Lifecycle and message outcomes are announced on the shared
//! [`bluemesh_core::EventBus`]; queue bookkeeping for the messages sent over
//! this transport lives in `bluemesh-core`.

// ----------------------------------------------------------------------------
// Module Declarations
// ----------------------------------------------------------------------------

pub mod config;
pub mod error;
pub mod rng;
pub mod simulator;

// ----------------------------------------------------------------------------
// Public API
// ----------------------------------------------------------------------------

pub use config::{PeerProfile, SimulatorConfig, DEFAULT_REPLIES, DEFAULT_ROSTER};
pub use error::{ConnectError, SendError};
pub use rng::{OsRandomSource, RandomSource, SeededRandomSource};
pub use simulator::{RadioSimulator, LINK_STATE_KEY};
