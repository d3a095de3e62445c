//! Injectable randomness for the simulator
//!
//! All probabilistic behavior (success/failure branches, latency jitter,
//! reply selection) flows through the [`RandomSource`] trait so tests can
//! force outcomes deterministically, either with a seeded generator or a
//! scripted fake.

use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

// ----------------------------------------------------------------------------
// Random Source Trait
// ----------------------------------------------------------------------------

/// Source of uniform random rolls in `[0.0, 1.0)`
///
/// The provided combinators derive ranges and picks from the unit roll, so
/// an implementation only has to supply `next_roll` and a scripted fake can
/// drive every branch from a queue of rolls.
pub trait RandomSource {
    /// Next uniform value in `[0.0, 1.0)`
    fn next_roll(&mut self) -> f64;

    /// Uniform duration in `[range.start, range.end)`
    fn duration_in(&mut self, range: &std::ops::Range<Duration>) -> Duration {
        let span = range.end.saturating_sub(range.start).as_millis() as f64;
        range.start + Duration::from_millis((self.next_roll() * span) as u64)
    }

    /// Uniform integer in `[range.start, range.end)`
    fn jitter_in(&mut self, range: &std::ops::Range<i16>) -> i16 {
        let span = (range.end - range.start) as f64;
        range.start + (self.next_roll() * span) as i16
    }

    /// Uniform index into a non-empty slice length
    fn pick_index(&mut self, len: usize) -> usize {
        debug_assert!(len > 0);
        ((self.next_roll() * len as f64) as usize).min(len - 1)
    }
}

// ----------------------------------------------------------------------------
// OS-Backed Source
// ----------------------------------------------------------------------------

/// Production randomness from the thread-local OS-seeded generator
#[derive(Debug, Clone, Copy, Default)]
pub struct OsRandomSource;

impl OsRandomSource {
    pub fn new() -> Self {
        Self
    }
}

impl RandomSource for OsRandomSource {
    fn next_roll(&mut self) -> f64 {
        rand::thread_rng().gen::<f64>()
    }
}

// ----------------------------------------------------------------------------
// Seeded Source
// ----------------------------------------------------------------------------

/// Deterministic randomness for reproducible runs and statistical tests
#[derive(Debug, Clone)]
pub struct SeededRandomSource {
    rng: StdRng,
}

impl SeededRandomSource {
    /// Create a source with a fixed seed
    pub fn from_seed(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }
}

impl RandomSource for SeededRandomSource {
    fn next_roll(&mut self) -> f64 {
        self.rng.gen::<f64>()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
