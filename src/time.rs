//! Time abstraction so engines can be driven by a mock clock in tests.
//!
//! The core never blocks on time; the injected clock only feeds context
//! aging and the optional time-based IR refresh.

use std::fmt::Debug;
use std::time::Instant;

/// Source of "now" for the engines.
pub trait Clock: Send + Sync + Debug {
    /// Current instant.
    fn now(&self) -> Instant;
}

/// Default clock backed by `std::time::Instant`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Manually advanced clock for tests.
pub mod mock_clock {
    use super::*;
    use std::sync::Mutex;
    use std::time::Duration;

    /// A clock whose time only moves when told to.
    #[derive(Debug)]
    pub struct MockClock {
        current: Mutex<Instant>,
    }

    impl MockClock {
        /// Creates a mock clock frozen at `start`.
        pub fn new(start: Instant) -> Self {
            Self {
                current: Mutex::new(start),
            }
        }

        /// Moves time forward by `duration`.
        pub fn advance(&self, duration: Duration) {
            *self.current.lock().unwrap() += duration;
        }
    }

    impl Default for MockClock {
        fn default() -> Self {
            Self::new(Instant::now())
        }
    }

    impl Clock for MockClock {
        fn now(&self) -> Instant {
            *self.current.lock().unwrap()
        }
    }
}
