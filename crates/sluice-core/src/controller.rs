//! Cross-thread wake-up primitive (spec §4.B). One token per pending
//! wake-up; `interrupt(n)` tops the pending count up to at least `n`,
//! `acknowledge()` consumes exactly one.
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use mio::{Registry, Token};
use parking_lot::Mutex;

use crate::error::{Result, SocketError};

/// Backing wake-up primitive. The default (and only) implementation here
/// wraps [`mio::Waker`], which itself resolves to the best facility the
/// target OS offers (eventfd on Linux, kqueue `EVFILT_USER` on BSD/macOS,
/// a completion port on Windows) — so this trait exists to keep the
/// pluggability contract explicit rather than to offer a second working
/// backend today.
pub trait WakeupBackend: Send + Sync {
    fn wake(&self) -> Result<()>;
}

struct MioBackend(mio::Waker);

impl WakeupBackend for MioBackend {
    fn wake(&self) -> Result<()> {
        self.0.wake().map_err(SocketError::from)
    }
}

/// Guards `pending` and the act of writing wake-up tokens to the kernel
/// object, per spec §5 ("the Controller uses an internal lock around its
/// `pending` counter and the descriptor write").
struct Inner {
    backend: Arc<dyn WakeupBackend>,
    write_lock: Mutex<()>,
}

/// A single descriptor shared by every thread that needs to interrupt the
/// poller. Cloning is cheap (reference-counted); all clones observe the
/// same `pending` counter.
#[derive(Clone)]
pub struct Controller {
    inner: Arc<Inner>,
    pending: Arc<AtomicUsize>,
}

impl Controller {
    /// Registers the wake-up source with `registry` under `token` so the
    /// reactor can treat it as just another readable handle.
    pub fn new(registry: &Registry, token: Token) -> Result<Self> {
        let waker = mio::Waker::new(registry, token).map_err(SocketError::from)?;
        Ok(Self {
            inner: Arc::new(Inner {
                backend: Arc::new(MioBackend(waker)),
                write_lock: Mutex::new(()),
            }),
            pending: Arc::new(AtomicUsize::new(0)),
        })
    }

    /// Ensures at least `n` wake-ups are pending. Only the delta above the
    /// current pending count is actually written to the kernel object —
    /// `mio::Waker::wake` is idempotent-ish (one readiness edge) so this
    /// models "at least one token queued," matching the spec's contract
    /// that `pending` is a saturating, not precisely-counted, value once a
    /// wake is in flight.
    pub fn interrupt(&self, n: usize) -> Result<()> {
        let _guard = self.inner.write_lock.lock();
        let current = self.pending.load(Ordering::Acquire);
        if n <= current {
            return Ok(());
        }
        let delta = n - current;
        self.inner.backend.wake()?;
        self.pending.fetch_add(delta, Ordering::AcqRel);
        Ok(())
    }

    /// Consumes exactly one pending token. Returns `WouldBlock` if none
    /// are pending.
    pub fn acknowledge(&self) -> Result<()> {
        loop {
            let current = self.pending.load(Ordering::Acquire);
            if current == 0 {
                return Err(SocketError::WouldBlock);
            }
            if self
                .pending
                .compare_exchange(current, current - 1, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                return Ok(());
            }
        }
    }

    /// Current pending-token count, for diagnostics and tests.
    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Barrier;
    use std::thread;

    fn test_controller() -> (Controller, mio::Poll) {
        let poll = mio::Poll::new().unwrap();
        let controller = Controller::new(poll.registry(), Token(0)).unwrap();
        (controller, poll)
    }

    #[test]
    fn acknowledge_without_interrupt_would_block() {
        let (controller, _poll) = test_controller();
        assert!(matches!(controller.acknowledge(), Err(SocketError::WouldBlock)));
    }

    #[test]
    fn interrupt_then_acknowledge_round_trips() {
        let (controller, _poll) = test_controller();
        controller.interrupt(1).unwrap();
        assert_eq!(controller.pending(), 1);
        controller.acknowledge().unwrap();
        assert_eq!(controller.pending(), 0);
        assert!(matches!(controller.acknowledge(), Err(SocketError::WouldBlock)));
    }

    #[test]
    fn interrupt_only_tops_up_to_requested_count() {
        let (controller, _poll) = test_controller();
        controller.interrupt(3).unwrap();
        assert_eq!(controller.pending(), 3);
        controller.interrupt(2).unwrap();
        assert_eq!(controller.pending(), 3, "must not decrease pending");
    }

    #[test]
    fn n_interrupts_and_n_acknowledges_leave_pending_at_zero() {
        let (controller, _poll) = test_controller();
        let n = 16usize;
        for i in 1..=n {
            controller.interrupt(i).unwrap();
        }
        let barrier = Arc::new(Barrier::new(4));
        let controller = Arc::new(controller);
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let controller = controller.clone();
                let barrier = barrier.clone();
                thread::spawn(move || {
                    barrier.wait();
                    let mut acked = 0;
                    while controller.acknowledge().is_ok() {
                        acked += 1;
                    }
                    acked
                })
            })
            .collect();
        let total: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
        assert_eq!(total, n);
        assert_eq!(controller.pending(), 0);
    }
}
