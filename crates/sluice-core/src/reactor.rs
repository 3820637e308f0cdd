//! Readiness-driven multiplexing engine (spec §4.I). Wraps [`mio::Poll`]:
//! attach a socket, arm read/write interest, block in `poll`, dispatch
//! readable/writable/error callbacks synchronously on the calling
//! thread — the engine's one and only suspension point.
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use mio::event::Source;
use mio::{Events, Interest, Poll, Token};

use crate::controller::Controller;
use crate::detach::{DetachContext, EventKind, EventPool};
use crate::error::{Result, SocketError};

/// User-facing callback surface a socket registers with the reactor.
/// Invoked synchronously from `poll`, holding an event lease for the
/// duration of the call — the strand guarantee (spec §5) follows from
/// the fact that only one thread is ever inside `poll` dispatching for a
/// given handle's Token at a time.
pub trait ReactorCallback: Send + Sync {
    fn on_readable(&self) {}
    fn on_writable(&self) {}
    fn on_error(&self, _err: SocketError) {}
}

/// Registration options for one direction of interest.
#[derive(Clone, Copy, Debug, Default)]
pub struct InterestOptions {
    /// When set, interest is automatically withdrawn for that direction
    /// after the next dispatch (the caller must re-arm to see more
    /// events). mio notifications are edge-triggered regardless; this
    /// flag only controls whether the reactor re-registers interest
    /// after dispatch.
    pub oneshot: bool,
}

struct SocketRecord {
    detach_ctx: Arc<DetachContext>,
    callback: Arc<dyn ReactorCallback>,
    readable_armed: bool,
    writable_armed: bool,
    readable_oneshot: bool,
    writable_oneshot: bool,
}

impl SocketRecord {
    fn interest(&self) -> Option<Interest> {
        match (self.readable_armed, self.writable_armed) {
            (true, true) => Some(Interest::READABLE | Interest::WRITABLE),
            (true, false) => Some(Interest::READABLE),
            (false, true) => Some(Interest::WRITABLE),
            (false, false) => None,
        }
    }
}

const CONTROLLER_TOKEN: Token = Token(usize::MAX);

/// The reactor engine. One [`Reactor`] owns one `mio::Poll` instance and
/// may be shared across threads; only the thread currently inside
/// [`Reactor::poll`] performs the actual kernel wait.
pub struct Reactor {
    poll: parking_lot::Mutex<Poll>,
    registry: mio::Registry,
    sockets: DashMap<Token, SocketRecord>,
    next_token: AtomicUsize,
    event_pool: EventPool,
    controller: Controller,
}

impl Reactor {
    pub fn new() -> Result<Self> {
        let poll = Poll::new().map_err(SocketError::from)?;
        let registry = poll.registry().try_clone().map_err(SocketError::from)?;
        let controller = Controller::new(&registry, CONTROLLER_TOKEN)?;
        Ok(Self {
            poll: parking_lot::Mutex::new(poll),
            registry,
            sockets: DashMap::new(),
            next_token: AtomicUsize::new(0),
            event_pool: EventPool::new(),
            controller,
        })
    }

    /// The cross-thread wake-up primitive backing this reactor. Any call
    /// that alters interest from a non-polling thread should use it to
    /// force the polling thread out of its kernel wait.
    pub fn controller(&self) -> &Controller {
        &self.controller
    }

    /// Attaches `source` to the reactor, allocating per-handle
    /// bookkeeping (interest mask, detach-context). Neither direction is
    /// armed yet; call `show_readable`/`show_writable` to begin
    /// receiving callbacks. Returns the `Token` identifying this
    /// attachment for subsequent calls.
    pub fn attach_socket<S: Source>(
        &self,
        source: &mut S,
        callback: Arc<dyn ReactorCallback>,
    ) -> Result<(Token, Arc<DetachContext>)> {
        let _ = source; // registered lazily, on the first show_readable/show_writable call
        let raw = self.next_token.fetch_add(1, Ordering::Relaxed);
        let token = Token(raw);
        let detach_ctx = Arc::new(DetachContext::new());
        self.sockets.insert(
            token,
            SocketRecord {
                detach_ctx: detach_ctx.clone(),
                callback,
                readable_armed: false,
                writable_armed: false,
                readable_oneshot: false,
                writable_oneshot: false,
            },
        );
        Ok((token, detach_ctx))
    }

    /// Reclaims per-handle bookkeeping. The caller is responsible for
    /// driving `detach_ctx.detach()` to completion (possibly
    /// asynchronously) before calling this; calling it while leases are
    /// outstanding would let a raw `mio` source be reused for a different
    /// socket while stale callbacks can still fire against the old
    /// `Token`.
    pub fn detach_socket<S: Source>(&self, token: Token, source: &mut S) -> Result<()> {
        let _ = self.registry.deregister(source);
        self.sockets.remove(&token);
        Ok(())
    }

    fn reregister<S: Source>(&self, token: Token, source: &mut S, record: &SocketRecord) -> Result<()> {
        match record.interest() {
            Some(interest) => self
                .registry
                .reregister(source, token, interest)
                .or_else(|_| self.registry.register(source, token, interest))
                .map_err(SocketError::from),
            None => self.registry.deregister(source).or(Ok(())).map_err(SocketError::from),
        }
    }

    pub fn show_readable<S: Source>(&self, token: Token, source: &mut S, opts: InterestOptions) -> Result<()> {
        let mut record = self
            .sockets
            .get_mut(&token)
            .ok_or(SocketError::Invalid("unknown reactor token"))?;
        record.readable_armed = true;
        record.readable_oneshot = opts.oneshot;
        self.reregister(token, source, &record)
    }

    pub fn hide_readable<S: Source>(&self, token: Token, source: &mut S) -> Result<()> {
        let mut record = self
            .sockets
            .get_mut(&token)
            .ok_or(SocketError::Invalid("unknown reactor token"))?;
        record.readable_armed = false;
        self.reregister(token, source, &record)
    }

    pub fn show_writable<S: Source>(&self, token: Token, source: &mut S, opts: InterestOptions) -> Result<()> {
        let mut record = self
            .sockets
            .get_mut(&token)
            .ok_or(SocketError::Invalid("unknown reactor token"))?;
        record.writable_armed = true;
        record.writable_oneshot = opts.oneshot;
        self.reregister(token, source, &record)
    }

    pub fn hide_writable<S: Source>(&self, token: Token, source: &mut S) -> Result<()> {
        let mut record = self
            .sockets
            .get_mut(&token)
            .ok_or(SocketError::Invalid("unknown reactor token"))?;
        record.writable_armed = false;
        self.reregister(token, source, &record)
    }

    /// Blocks until at least one event is ready (or `timeout` elapses),
    /// then dispatches each ready handle's callbacks synchronously.
    /// Readable is always dispatched before writable before error for
    /// the same handle, per spec §4.I's ordering rule. Never fails on
    /// timeout — an empty `Events` set is a normal return, not an error.
    pub fn poll(&self, timeout: Option<Duration>) -> Result<usize> {
        let mut events = Events::with_capacity(256);
        {
            let mut poll = self.poll.lock();
            poll.poll(&mut events, timeout).map_err(SocketError::from)?;
        }

        let mut dispatched = 0;
        for event in events.iter() {
            let token = event.token();
            if token == CONTROLLER_TOKEN {
                let _ = self.controller.acknowledge();
                continue;
            }
            dispatched += 1;
            self.dispatch_one(token, event);
        }
        Ok(dispatched)
    }

    fn dispatch_one(&self, token: Token, event: &mio::event::Event) {
        let Some(record) = self.sockets.get(&token) else {
            return;
        };
        let Ok(lease) = self.event_pool.checkout(&record.detach_ctx, classify(event)) else {
            // DETACHING or DETACHED: per spec §4.I point 4, drop the dispatch.
            return;
        };
        let callback = record.callback.clone();
        let readable_oneshot = record.readable_oneshot;
        let writable_oneshot = record.writable_oneshot;
        drop(record);

        if event.is_readable() {
            callback.on_readable();
        }
        if event.is_writable() {
            callback.on_writable();
        }
        if event.is_error() {
            callback.on_error(SocketError::ConnectionReset);
        }
        drop(lease);

        if readable_oneshot && event.is_readable() {
            if let Some(mut record) = self.sockets.get_mut(&token) {
                record.readable_armed = false;
            }
        }
        if writable_oneshot && event.is_writable() {
            if let Some(mut record) = self.sockets.get_mut(&token) {
                record.writable_armed = false;
            }
        }
    }
}

fn classify(event: &mio::event::Event) -> EventKind {
    if event.is_error() {
        EventKind::Error
    } else if event.is_readable() {
        EventKind::Readable
    } else {
        EventKind::Writable
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write as _;
    use std::net::TcpListener;
    use std::sync::atomic::AtomicBool;
    use std::sync::Arc;

    struct FlagCallback {
        readable: Arc<AtomicBool>,
    }

    impl ReactorCallback for FlagCallback {
        fn on_readable(&self) {
            self.readable.store(true, Ordering::SeqCst);
        }
    }

    #[test]
    fn readable_interest_fires_on_incoming_bytes() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let mut client = std::net::TcpStream::connect(addr).unwrap();
        let (server, _) = listener.accept().unwrap();
        server.set_nonblocking(true).unwrap();
        let mut mio_server = mio::net::TcpStream::from_std(server);

        let reactor = Reactor::new().unwrap();
        let readable = Arc::new(AtomicBool::new(false));
        let callback = Arc::new(FlagCallback { readable: readable.clone() });
        let (token, _detach_ctx) = reactor.attach_socket(&mut mio_server, callback).unwrap();
        reactor
            .show_readable(token, &mut mio_server, InterestOptions::default())
            .unwrap();

        client.write_all(b"x").unwrap();

        let dispatched = reactor.poll(Some(Duration::from_secs(5))).unwrap();
        assert!(dispatched >= 1);
        assert!(readable.load(Ordering::SeqCst));
    }

    #[test]
    fn detach_while_leased_defers_to_lease_release() {
        let reactor = Reactor::new().unwrap();
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        listener.set_nonblocking(true).unwrap();
        let mut mio_listener = mio::net::TcpListener::from_std(listener);
        let callback = Arc::new(FlagCallback { readable: Arc::new(AtomicBool::new(false)) });
        let (_token, detach_ctx) = reactor.attach_socket(&mut mio_listener, callback).unwrap();

        let lease = reactor.event_pool.checkout(&detach_ctx, EventKind::Readable).unwrap();
        assert!(matches!(detach_ctx.detach(), Err(SocketError::Pending)));
        drop(lease);
        assert_eq!(detach_ctx.state(), crate::detach::DetachState::Detached);
    }
}
