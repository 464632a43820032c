//! Randomness injection for the compressor.
//!
//! The compressor needs unpredictable values in two places only: the initial
//! MSN of profiles that generate their own sequence numbers, and the probe
//! start when allocating a CID in a crowded table. Both come from a
//! caller-injected source so engines stay deterministic under test.

use std::fmt::Debug;

/// Source of unpredictable 32-bit values.
pub trait RandomSource: Send + Sync + Debug {
    /// Next pseudo-random value.
    fn next_u32(&self) -> u32;
}

/// Default source backed by the thread-local generator of the `rand` crate.
#[derive(Debug, Default)]
pub struct SystemRandom;

impl RandomSource for SystemRandom {
    fn next_u32(&self) -> u32 {
        rand::random::<u32>()
    }
}

/// Deterministic source for tests: returns a fixed sequence.
#[derive(Debug)]
pub struct FixedRandom {
    values: std::sync::Mutex<std::vec::IntoIter<u32>>,
    fallback: u32,
}

impl FixedRandom {
    /// Creates a source yielding `values` in order, then `fallback` forever.
    pub fn new(values: Vec<u32>, fallback: u32) -> Self {
        Self {
            values: std::sync::Mutex::new(values.into_iter()),
            fallback,
        }
    }
}

impl RandomSource for FixedRandom {
    fn next_u32(&self) -> u32 {
        self.values
            .lock()
            .unwrap()
            .next()
            .unwrap_or(self.fallback)
    }
}
