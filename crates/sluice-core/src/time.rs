//! An injectable clock, so timer and correlator tests don't depend on wall
//! clock jitter. Adapted from the teacher's `Clock` trait but trimmed down:
//! this crate has no async executor, so there is no `Sleep` future to
//! return — callers that need a deadline just compare against `now()`.
use std::sync::Mutex;
use std::time::{Duration, Instant};

pub trait Clock: Send + Sync + 'static {
    fn now(&self) -> Instant;
}

/// Real wall-clock time via [`Instant::now`].
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// A clock an integration test can advance deterministically.
pub struct MockClock {
    current: Mutex<Instant>,
}

impl MockClock {
    pub fn new() -> Self {
        Self {
            current: Mutex::new(Instant::now()),
        }
    }

    pub fn advance(&self, by: Duration) {
        let mut guard = self.current.lock().unwrap();
        *guard += by;
    }
}

impl Default for MockClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MockClock {
    fn now(&self) -> Instant {
        *self.current.lock().unwrap()
    }
}
