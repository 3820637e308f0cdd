//! Detach-context lifecycle and the event pool that leases against it
//! (spec §4.G / §4.H). This is the mechanism that makes asynchronous
//! detach safe: a socket is only ever fully detached once every
//! outstanding callback/operation referencing it has released its lease.
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::error::{Result, SocketError};

/// Lifecycle state of a socket's attachment to its engine.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DetachState {
    Attached,
    Detaching,
    Detached,
}

impl DetachState {
    fn from_tag(tag: u64) -> Self {
        match tag {
            0 => DetachState::Attached,
            1 => DetachState::Detaching,
            2 => DetachState::Detached,
            other => unreachable!("invalid detach state tag {other}"),
        }
    }

    fn tag(self) -> u64 {
        match self {
            DetachState::Attached => 0,
            DetachState::Detaching => 1,
            DetachState::Detached => 2,
        }
    }
}

const STATE_SHIFT: u32 = 62;
const INFLIGHT_MASK: u64 = (1u64 << STATE_SHIFT) - 1;

fn pack(state: DetachState, inflight: u64) -> u64 {
    debug_assert!(inflight <= INFLIGHT_MASK);
    (state.tag() << STATE_SHIFT) | inflight
}

fn unpack(word: u64) -> (DetachState, u64) {
    (DetachState::from_tag(word >> STATE_SHIFT), word & INFLIGHT_MASK)
}

/// A trait object invoked exactly once, when the final outstanding lease
/// on a DETACHING socket releases and the context transitions to
/// DETACHED. Kept as a plain callback rather than a full socket trait to
/// avoid coupling this module to the session layer.
pub trait SocketDetachListener: Send + Sync {
    fn process_socket_detached(&self);
}

impl<F: Fn() + Send + Sync> SocketDetachListener for F {
    fn process_socket_detached(&self) {
        self()
    }
}

/// Lock-free state word `{state, inflight}` for one socket, per spec
/// §4.G. All transitions are single CAS operations on the packed word.
pub struct DetachContext {
    word: AtomicU64,
    listener: parking_lot::Mutex<Option<Arc<dyn SocketDetachListener>>>,
}

impl DetachContext {
    pub fn new() -> Self {
        Self {
            word: AtomicU64::new(pack(DetachState::Attached, 0)),
            listener: parking_lot::Mutex::new(None),
        }
    }

    /// Installs the listener notified on eventual DETACHED transition.
    /// Must be called before `detach()` can observe a DETACHING→DETACHED
    /// edge driven by lease release, though a caller racing detach() with
    /// registration is a usage error, not something this type guards.
    pub fn set_listener(&self, listener: Arc<dyn SocketDetachListener>) {
        *self.listener.lock() = Some(listener);
    }

    /// Fires the registered listener, if any. `detach()` itself only
    /// drives the DETACHING→DETACHED edge through lease release; a caller
    /// whose `detach()` call completed immediately (no outstanding
    /// leases) is responsible for calling this once, since no lease
    /// release will do it on that path.
    pub fn notify_detached(&self) {
        if let Some(listener) = self.listener.lock().clone() {
            listener.process_socket_detached();
        }
    }

    pub fn state(&self) -> DetachState {
        unpack(self.word.load(Ordering::Acquire)).0
    }

    pub fn inflight(&self) -> u64 {
        unpack(self.word.load(Ordering::Acquire)).1
    }

    /// Grants a lease if and only if the context is currently ATTACHED,
    /// incrementing `inflight`. Returns `Invalid` in any other state —
    /// per spec §4.I point 4 / §8 invariant 7, no new lease is ever
    /// granted once DETACHING or DETACHED.
    pub fn try_acquire_lease(self: &Arc<Self>) -> Result<EventLease> {
        loop {
            let current = self.word.load(Ordering::Acquire);
            let (state, inflight) = unpack(current);
            if state != DetachState::Attached {
                return Err(SocketError::Invalid("lease requested on a non-attached socket"));
            }
            let next = pack(state, inflight + 1);
            if self
                .word
                .compare_exchange(current, next, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                return Ok(EventLease { ctx: self.clone() });
            }
        }
    }

    fn release_lease(&self) {
        loop {
            let current = self.word.load(Ordering::Acquire);
            let (state, inflight) = unpack(current);
            debug_assert!(inflight > 0, "lease released with no outstanding leases");
            let new_inflight = inflight - 1;
            let (next_state, fires_detached) = if state == DetachState::Detaching && new_inflight == 0 {
                (DetachState::Detached, true)
            } else {
                (state, false)
            };
            let next = pack(next_state, new_inflight);
            if self
                .word
                .compare_exchange(current, next, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                if fires_detached {
                    if let Some(listener) = self.listener.lock().as_ref() {
                        listener.process_socket_detached();
                    }
                }
                return;
            }
        }
    }

    /// Attempts to detach the socket. ATTACHED with no outstanding leases
    /// transitions straight to DETACHED (caller is responsible for
    /// notifying, since no lease release will do it). ATTACHED with
    /// outstanding leases moves to DETACHING and returns `Pending`; the
    /// final lease release will transition to DETACHED and invoke the
    /// listener. Any other starting state is `Invalid`.
    pub fn detach(&self) -> Result<()> {
        loop {
            let current = self.word.load(Ordering::Acquire);
            let (state, inflight) = unpack(current);
            match state {
                DetachState::Attached if inflight == 0 => {
                    let next = pack(DetachState::Detached, 0);
                    if self
                        .word
                        .compare_exchange(current, next, Ordering::AcqRel, Ordering::Acquire)
                        .is_ok()
                    {
                        return Ok(());
                    }
                }
                DetachState::Attached => {
                    let next = pack(DetachState::Detaching, inflight);
                    if self
                        .word
                        .compare_exchange(current, next, Ordering::AcqRel, Ordering::Acquire)
                        .is_ok()
                    {
                        return Err(SocketError::Pending);
                    }
                }
                DetachState::Detaching | DetachState::Detached => {
                    return Err(SocketError::Invalid("detach called on a non-attached socket"));
                }
            }
        }
    }
}

impl Default for DetachContext {
    fn default() -> Self {
        Self::new()
    }
}

/// An RAII lease on a `DetachContext`. Releasing (on drop) may be the
/// transition that completes a pending detach.
pub struct EventLease {
    ctx: Arc<DetachContext>,
}

impl Drop for EventLease {
    fn drop(&mut self) {
        self.ctx.release_lease();
    }
}

/// What kind of completion or readiness an [`Event`] carries.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EventKind {
    Readable,
    Writable,
    Error,
    Completion,
    Timer,
}

/// Outcome of the operation or readiness edge an event reports.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EventStatus {
    Ok,
    Cancelled,
    Error,
}

/// A dispatchable unit of work obtained from an [`EventPool`]. Holds the
/// lease that keeps its socket's detach-context from completing while
/// the event is alive; releasing it (on drop) may complete a pending
/// detach.
pub struct Event {
    pub kind: EventKind,
    pub status: EventStatus,
    pub bytes_transferred: usize,
    _lease: EventLease,
}

impl Event {
    fn new(kind: EventKind, lease: EventLease) -> Self {
        Self {
            kind,
            status: EventStatus::Ok,
            bytes_transferred: 0,
            _lease: lease,
        }
    }
}

/// Pool of event records. Every checkout takes a lease against the
/// owning socket's detach-context, so the pool itself holds no identity
/// beyond "a thing that mints leased events" — actual record reuse is an
/// implementation freedom the spec leaves to callers (§4.A's "error modes"
/// note applies equally here: allocation failure surfaces, it is never
/// swallowed).
#[derive(Default)]
pub struct EventPool {
    #[cfg(debug_assertions)]
    issued: AtomicU64,
}

impl EventPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Checks out an event for `kind`, leasing `ctx`. Fails with
    /// `Invalid` if the socket is not ATTACHED.
    pub fn checkout(&self, ctx: &Arc<DetachContext>, kind: EventKind) -> Result<Event> {
        let lease = ctx.try_acquire_lease()?;
        #[cfg(debug_assertions)]
        self.issued.fetch_add(1, Ordering::Relaxed);
        Ok(Event::new(kind, lease))
    }

    #[cfg(debug_assertions)]
    pub fn issued_count(&self) -> u64 {
        self.issued.load(Ordering::Relaxed)
    }
}
