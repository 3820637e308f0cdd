//! Stream socket (TCP) session: binds a `mio::net::TcpStream` to a
//! [`StreamSession`] and a [`Reactor`] attachment, implementing the
//! user-level contract of spec §4.K.
use std::net::TcpStream as StdTcpStream;
use std::sync::{Arc, OnceLock};

use mio::Token;
use parking_lot::Mutex;
use sluice_core::config::StreamSocketOptions;
use sluice_core::detach::DetachContext;
use sluice_core::endpoint::{Endpoint, SocketHandle, Transport};
use sluice_core::error::{Result, SocketError};
use sluice_core::flow_control::{EngineAction, Reconciliation};
use sluice_core::reactor::{InterestOptions, Reactor, ReactorCallback};
use sluice_core::shutdown::{Direction, Origin};

use crate::handle_api::{self, ShutdownHow};
use crate::session::{SessionListener, StreamSession};

struct StreamInner {
    mio_stream: mio::net::TcpStream,
    session: StreamSession,
    connected: bool,
}

/// Applies a `Reconciliation` to the reactor registration for `stream`.
/// Shared between the engine-driven drain path and the user-facing
/// `send`/`receive` calls so neither can forget the other's half of the
/// interest bookkeeping.
fn apply_reconciliation(reactor: &Reactor, token: Token, stream: &mut mio::net::TcpStream, reconciliation: Reconciliation) -> Result<()> {
    match reconciliation.read {
        EngineAction::Show => reactor.show_readable(token, stream, InterestOptions::default())?,
        EngineAction::Hide => reactor.hide_readable(token, stream)?,
        EngineAction::None => {}
    }
    match reconciliation.write {
        EngineAction::Show => reactor.show_writable(token, stream, InterestOptions::default())?,
        EngineAction::Hide => reactor.hide_writable(token, stream)?,
        EngineAction::None => {}
    }
    Ok(())
}

/// Bridges reactor readable/writable callbacks into `StreamSession`
/// drain operations. Holds a weak-by-convention `Arc<Mutex<..>>` back to
/// the owning `StreamSocket` state — the design notes' "arena + typed
/// handle" alternative to raw weak pointers (spec §9). `token` is filled
/// in once, right after `Reactor::attach_socket` hands it back, since the
/// callback itself is constructed before the token exists.
struct StreamReactorCallback {
    inner: Arc<Mutex<StreamInner>>,
    reactor: Arc<Reactor>,
    token: OnceLock<Token>,
}

impl StreamReactorCallback {
    fn apply(&self, guard: &mut StreamInner, reconciliation: Reconciliation) {
        if let Some(&token) = self.token.get() {
            let _ = apply_reconciliation(&self.reactor, token, &mut guard.mio_stream, reconciliation);
        }
    }
}

impl ReactorCallback for StreamReactorCallback {
    fn on_readable(&self) {
        let mut guard = self.inner.lock();
        let reconciliation = if !guard.connected {
            drain_connect(&mut guard)
        } else {
            drain_readable(&mut guard)
        };
        self.apply(&mut guard, reconciliation);
    }

    fn on_writable(&self) {
        let mut guard = self.inner.lock();
        let reconciliation = if !guard.connected {
            drain_connect(&mut guard)
        } else {
            drain_writable(&mut guard)
        };
        self.apply(&mut guard, reconciliation);
    }

    fn on_error(&self, err: SocketError) {
        let mut guard = self.inner.lock();
        guard.session.on_flow_terminating_error(err, Direction::Send);
    }
}

const NO_RECONCILIATION: Reconciliation = Reconciliation { read: EngineAction::None, write: EngineAction::None };

/// Folds two reconciliations, keeping the later non-`None` action per
/// direction — draining may cross more than one watermark edge in a
/// single callback, and only the final engine state matters.
fn fold_reconciliation(acc: Reconciliation, next: Reconciliation) -> Reconciliation {
    Reconciliation {
        read: if next.read == EngineAction::None { acc.read } else { next.read },
        write: if next.write == EngineAction::None { acc.write } else { next.write },
    }
}

fn drain_connect(guard: &mut StreamInner) -> Reconciliation {
    // `SockRef` borrows the fd without taking ownership, so the SO_ERROR
    // check needs no unsafe fd duplication.
    let sock_ref = socket2::SockRef::from(&guard.mio_stream);
    match handle_api::take_connect_error_ref(&sock_ref) {
        Ok(()) => guard.connected = true,
        Err(err) => guard.session.on_flow_terminating_error(err, Direction::Send),
    }
    NO_RECONCILIATION
}

fn drain_readable(guard: &mut StreamInner) -> Reconciliation {
    use std::io::Read as _;
    let mut reconciliation = NO_RECONCILIATION;
    loop {
        let (mut array, _count, byte_budget) = guard.session.read_queue.queue_mut().scatter(16, 64 * 1024);
        if byte_budget == 0 {
            break;
        }
        let mut total = 0usize;
        let mut blocked = false;
        let mut hit_eof = false;
        for buffer in array.iter_mut() {
            let slice = buffer.as_mut_slice();
            match (&guard.mio_stream).read(slice) {
                Ok(0) => {
                    hit_eof = true;
                    break;
                }
                Ok(n) => {
                    total += n;
                    if n < slice.len() {
                        break;
                    }
                }
                Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => {
                    blocked = true;
                    break;
                }
                Err(err) => {
                    drop(array);
                    guard.session.on_flow_terminating_error(SocketError::from(err), Direction::Receive);
                    return reconciliation;
                }
            }
        }
        drop(array);
        if total > 0 {
            reconciliation = fold_reconciliation(reconciliation, guard.session.on_read_filled(total));
        }
        // The read queue's high watermark may have armed on this pass;
        // stop scattering immediately rather than looping until
        // WouldBlock, since continuing would let the queue grow past its
        // configured bound before the caller ever observes the crossing.
        if guard.session.read_queue.is_armed() {
            break;
        }
        if hit_eof {
            reconciliation = fold_reconciliation(reconciliation, guard.session.try_shutdown_receive(Origin::Remote));
            break;
        }
        if blocked {
            break;
        }
    }
    reconciliation
}

fn drain_writable(guard: &mut StreamInner) -> Reconciliation {
    use std::io::Write as _;
    let mut reconciliation = NO_RECONCILIATION;
    loop {
        let (array, _count, byte_budget) = guard.session.write_queue.queue().gather(16, 64 * 1024);
        if byte_budget == 0 {
            break;
        }
        let slices = array.as_io_slices();
        match std::io::Write::write_vectored(&mut &guard.mio_stream, &slices) {
            Ok(0) => break,
            Ok(n) => {
                drop(array);
                reconciliation = fold_reconciliation(reconciliation, guard.session.on_write_drained(n));
                if n < byte_budget {
                    break;
                }
            }
            Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => break,
            Err(err) => {
                drop(array);
                guard.session.on_flow_terminating_error(SocketError::from(err), Direction::Send);
                break;
            }
        }
    }
    reconciliation
}

/// A connected TCP stream socket bound into a [`Reactor`].
pub struct StreamSocket {
    inner: Arc<Mutex<StreamInner>>,
    reactor: Arc<Reactor>,
    token: Token,
    detach_ctx: Arc<DetachContext>,
    handle: SocketHandle,
}

impl StreamSocket {
    /// Opens a new TCP stream socket and connects it to `endpoint`.
    /// Registration with `reactor` happens immediately; completion of
    /// the connect itself is reported asynchronously through
    /// `listener.on_shutdown`/`on_error` if it fails, since spec §4.K
    /// says connect "register[s] on engine ... complete[s] via ...
    /// reactor writability + SO_ERROR check".
    pub fn connect(
        reactor: Arc<Reactor>,
        endpoint: &Endpoint,
        options: &StreamSocketOptions,
        listener: Arc<dyn SessionListener>,
    ) -> Result<Self> {
        let raw = handle_api::open(Transport::Tcp)?;
        if options.reuse_address {
            raw.set_reuse_address(true).map_err(SocketError::from)?;
        }
        match handle_api::connect(&raw, endpoint) {
            Ok(()) | Err(SocketError::Pending) => {}
            Err(err) => return Err(err),
        }
        handle_api::set_no_delay(&raw, options.no_delay)?;
        if let Some(linger) = options.linger {
            handle_api::set_linger(&raw, Some(linger.timeout))?;
        }
        let std_stream: StdTcpStream = raw.into();
        let mio_stream = mio::net::TcpStream::from_std(std_stream);
        Self::from_parts(reactor, mio_stream, options, listener, false)
    }

    /// Wraps an already-connected stream (e.g. one just produced by
    /// `ListenerSocket::accept`).
    pub fn from_accepted(
        reactor: Arc<Reactor>,
        mio_stream: mio::net::TcpStream,
        options: &StreamSocketOptions,
        listener: Arc<dyn SessionListener>,
    ) -> Result<Self> {
        Self::from_parts(reactor, mio_stream, options, listener, true)
    }

    fn from_parts(
        reactor: Arc<Reactor>,
        mio_stream: mio::net::TcpStream,
        options: &StreamSocketOptions,
        listener: Arc<dyn SessionListener>,
        connected: bool,
    ) -> Result<Self> {
        // A placeholder context satisfies `StreamSession::new`'s
        // constructor; it is replaced below with the real one the
        // reactor mints on attachment, before anything can observe it.
        let session = StreamSession::new(options, Arc::new(DetachContext::new()), listener);
        let inner = Arc::new(Mutex::new(StreamInner { mio_stream, session, connected }));

        let callback = Arc::new(StreamReactorCallback {
            inner: inner.clone(),
            reactor: reactor.clone(),
            token: OnceLock::new(),
        });
        let (token, detach_ctx) = {
            let mut guard = inner.lock();
            reactor.attach_socket(&mut guard.mio_stream, callback.clone())?
        };
        // `attach_socket` only hands back the token after the callback it
        // was given has already been constructed and registered; fill the
        // slot now so `on_readable`/`on_writable` can apply reconciliations
        // from here on.
        let _ = callback.token.set(token);
        let handle = SocketHandle::from_raw(token.0 as u64);
        {
            let mut guard = inner.lock();
            guard.session.detach_ctx = detach_ctx.clone();
            guard.session.set_handle(handle);
        }
        tracing::debug!(handle = %handle, connected, "stream socket attached to reactor");

        {
            let mut guard = inner.lock();
            reactor.show_readable(token, &mut guard.mio_stream, InterestOptions::default())?;
            if !connected {
                reactor.show_writable(token, &mut guard.mio_stream, InterestOptions::default())?;
            }
        }

        Ok(Self { inner, reactor, token, detach_ctx, handle })
    }

    pub fn handle(&self) -> SocketHandle {
        self.handle
    }

    /// Registers the callback the detach-context fires exactly once, the
    /// transition from DETACHING to DETACHED (spec §4.G's
    /// `processSocketDetached`).
    pub fn on_detach(&self, listener: Arc<dyn sluice_core::detach::SocketDetachListener>) {
        self.detach_ctx.set_listener(listener);
    }

    /// Enqueues `data` for sending, arming write interest as needed
    /// (spec §4.K `send`).
    pub fn send(&self, data: &[u8]) -> Result<()> {
        let mut guard = self.inner.lock();
        // The watermark latch itself already tracks the high-crossing
        // edge; spec §4.K's "already past HIGH" gate is a queue-depth
        // cap this runtime core leaves to the caller's configured
        // `maxOutstandingWrite`-style policy, which is out of this
        // crate's scope (no such cap is specified).
        let reconciliation = guard.session.enqueue_send(data, false)?;
        drop(guard);
        self.apply_reconciliation(reconciliation)
    }

    /// Copies up to `max` bytes already received into the read queue out
    /// to the caller.
    pub fn receive(&self, max: usize) -> Vec<u8> {
        let mut guard = self.inner.lock();
        let (data, reconciliation) = guard.session.consume_read(max);
        drop(guard);
        let _ = self.apply_reconciliation(reconciliation);
        data
    }

    pub fn shutdown(&self, direction: Direction) {
        let mut guard = self.inner.lock();
        match direction {
            Direction::Send => {
                guard.session.try_shutdown_send();
                let _ = handle_api_shutdown(&guard.mio_stream, ShutdownHow::Send);
            }
            Direction::Receive => {
                guard.session.try_shutdown_receive(Origin::Source);
                let _ = handle_api_shutdown(&guard.mio_stream, ShutdownHow::Receive);
            }
        }
    }

    /// Initiates the close/detach sequence of spec §4.K: flow-control to
    /// closed both ways, then `detachSocket`. If leases are outstanding,
    /// detach completion (and the handle close that follows it) happens
    /// asynchronously via the detach-context listener.
    pub fn close(self) -> Result<()> {
        {
            let mut guard = self.inner.lock();
            guard.session.flow_control.close_read();
            guard.session.flow_control.close_write();
        }
        match self.detach_ctx.detach() {
            Ok(()) => {
                self.detach_ctx.notify_detached();
                Ok(())
            }
            Err(SocketError::Pending) => Ok(()),
            Err(err) => Err(err),
        }
    }

    fn apply_reconciliation(&self, reconciliation: Reconciliation) -> Result<()> {
        let mut guard = self.inner.lock();
        apply_reconciliation(&self.reactor, self.token, &mut guard.mio_stream, reconciliation)
    }
}

fn handle_api_shutdown(stream: &mio::net::TcpStream, how: ShutdownHow) -> Result<()> {
    let how = match how {
        ShutdownHow::Send => std::net::Shutdown::Write,
        ShutdownHow::Receive => std::net::Shutdown::Read,
        ShutdownHow::Both => std::net::Shutdown::Both,
    };
    stream.shutdown(how).map_err(SocketError::from)
}
