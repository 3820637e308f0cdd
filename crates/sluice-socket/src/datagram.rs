//! Datagram socket (UDP) session: unlike `StreamSocket`, message
//! boundaries matter, so the byte-oriented `WatermarkQueue` is not a
//! fit — each inbound/outbound unit is a whole datagram plus its peer
//! address (spec §4.K, applied to a message-oriented transport).
use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::{Arc, OnceLock};

use mio::Token;
use parking_lot::Mutex;
use sluice_core::config::DatagramSocketOptions;
use sluice_core::detach::DetachContext;
use sluice_core::endpoint::{Endpoint, SocketHandle, Transport};
use sluice_core::error::{Result, SocketError};
use sluice_core::observability;
use sluice_core::reactor::{InterestOptions, Reactor, ReactorCallback};

use crate::handle_api;

/// One received datagram and the address it arrived from.
pub struct Datagram {
    pub data: Vec<u8>,
    pub from: SocketAddr,
}

/// Observer for a `DatagramSocket`'s inbound traffic and terminal
/// errors; there is no watermark/shutdown state machine to report here
/// since UDP has no connection lifecycle to track.
pub trait DatagramListener: Send + Sync {
    fn on_datagram(&self, datagram: Datagram);
    fn on_error(&self, err: &SocketError);
}

const MAX_DATAGRAM_SIZE: usize = 64 * 1024;

struct DatagramInner {
    mio_socket: mio::net::UdpSocket,
    pending_sends: VecDeque<(Vec<u8>, SocketAddr)>,
}

struct DatagramReactorCallback {
    inner: Arc<Mutex<DatagramInner>>,
    listener: Arc<dyn DatagramListener>,
    /// Filled in right after `attach_socket` returns its token, same
    /// deferred-slot pattern `StreamReactorCallback` uses for its token.
    handle: OnceLock<SocketHandle>,
}

impl DatagramReactorCallback {
    fn handle(&self) -> SocketHandle {
        self.handle.get().copied().unwrap_or(SocketHandle::INVALID)
    }
}

impl ReactorCallback for DatagramReactorCallback {
    fn on_readable(&self) {
        let mut buf = [0u8; MAX_DATAGRAM_SIZE];
        loop {
            let received = {
                let guard = self.inner.lock();
                guard.mio_socket.recv_from(&mut buf)
            };
            match received {
                Ok((n, from)) => self.listener.on_datagram(Datagram { data: buf[..n].to_vec(), from }),
                Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => break,
                Err(err) => {
                    let err = SocketError::from(err);
                    observability::trace_error_event(self.handle(), "ReceiveFailed", &err.to_string());
                    self.listener.on_error(&err);
                    break;
                }
            }
        }
    }

    fn on_writable(&self) {
        let mut guard = self.inner.lock();
        while let Some((data, to)) = guard.pending_sends.pop_front() {
            match guard.mio_socket.send_to(&data, to) {
                Ok(_) => {}
                Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => {
                    guard.pending_sends.push_front((data, to));
                    break;
                }
                Err(err) => {
                    drop(guard);
                    let err = SocketError::from(err);
                    observability::trace_error_event(self.handle(), "SendFailed", &err.to_string());
                    self.listener.on_error(&err);
                    return;
                }
            }
        }
    }
}

/// A bound UDP socket registered with a [`Reactor`].
pub struct DatagramSocket {
    inner: Arc<Mutex<DatagramInner>>,
    reactor: Arc<Reactor>,
    token: Token,
    detach_ctx: Arc<DetachContext>,
    handle: SocketHandle,
}

impl DatagramSocket {
    pub fn bind(
        reactor: Arc<Reactor>,
        endpoint: &Endpoint,
        options: &DatagramSocketOptions,
        listener: Arc<dyn DatagramListener>,
    ) -> Result<Self> {
        let raw = handle_api::open(Transport::Udp)?;
        handle_api::bind(&raw, endpoint, options.reuse_address)?;
        let std_socket: std::net::UdpSocket = raw.into();
        let mio_socket = mio::net::UdpSocket::from_std(std_socket);

        let inner = Arc::new(Mutex::new(DatagramInner { mio_socket, pending_sends: VecDeque::new() }));
        let callback = Arc::new(DatagramReactorCallback { inner: inner.clone(), listener, handle: OnceLock::new() });

        let (token, detach_ctx) = {
            let mut guard = inner.lock();
            reactor.attach_socket(&mut guard.mio_socket, callback.clone())?
        };
        let handle = SocketHandle::from_raw(token.0 as u64);
        let _ = callback.handle.set(handle);
        tracing::debug!(handle = %handle, "datagram socket attached to reactor");
        {
            let mut guard = inner.lock();
            reactor.show_readable(token, &mut guard.mio_socket, InterestOptions::default())?;
        }

        Ok(Self { inner, reactor, token, detach_ctx, handle })
    }

    pub fn handle(&self) -> SocketHandle {
        self.handle
    }

    /// Registers the callback the detach-context fires exactly once, the
    /// transition to DETACHED (spec §4.G's `processSocketDetached`).
    pub fn on_detach(&self, listener: Arc<dyn sluice_core::detach::SocketDetachListener>) {
        self.detach_ctx.set_listener(listener);
    }

    /// Sends `data` to `to`. If the socket is not currently writable the
    /// datagram queues and write interest is armed; UDP has no
    /// watermark/backpressure contract to honor here (spec §4.K's
    /// queueing model is byte-stream specific).
    pub fn send_to(&self, data: &[u8], to: SocketAddr) -> Result<()> {
        let mut guard = self.inner.lock();
        if guard.pending_sends.is_empty() {
            match guard.mio_socket.send_to(data, to) {
                Ok(_) => return Ok(()),
                Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => {}
                Err(err) => return Err(SocketError::from(err)),
            }
        }
        guard.pending_sends.push_back((data.to_vec(), to));
        self.reactor.show_writable(self.token, &mut guard.mio_socket, InterestOptions::default())
    }

    pub fn close(self) -> Result<()> {
        {
            let mut guard = self.inner.lock();
            let _ = self.reactor.hide_readable(self.token, &mut guard.mio_socket);
            let _ = self.reactor.hide_writable(self.token, &mut guard.mio_socket);
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

    fn local_addr(&self) -> Result<SocketAddr> {
        self.inner.lock().mio_socket.local_addr().map_err(SocketError::from)
    }
}
