//! Listener socket: binds, listens, and accepts connections into
//! [`StreamSocket`]s (spec §4.K's `open`/`bind`/`listen`/`accept`
//! family, specialised for TCP).
use std::sync::{Arc, OnceLock};

use mio::Token;
use parking_lot::Mutex;
use sluice_core::config::ListenerSocketOptions;
use sluice_core::detach::DetachContext;
use sluice_core::endpoint::{Endpoint, SocketHandle, Transport};
use sluice_core::error::{Result, SocketError};
use sluice_core::observability;
use sluice_core::reactor::{InterestOptions, Reactor, ReactorCallback};

use crate::handle_api;
use crate::session::SessionListener;
use crate::stream::StreamSocket;

/// Invoked once per accepted connection. Returning `Err` drops the
/// connection without further notice (mirrors a session-listener
/// construction failure, which has nowhere else to report to since the
/// session does not exist yet).
pub trait AcceptListener: Send + Sync {
    fn on_accept(&self, socket: StreamSocket);
    fn make_session_listener(&self) -> Arc<dyn SessionListener>;
}

struct ListenerInner {
    mio_listener: mio::net::TcpListener,
}

struct ListenerReactorCallback {
    inner: Arc<Mutex<ListenerInner>>,
    reactor: Arc<Reactor>,
    options: ListenerSocketOptions,
    accept_listener: Arc<dyn AcceptListener>,
    /// Filled in right after `attach_socket` returns its token, same
    /// deferred-slot pattern `StreamReactorCallback` uses for its token.
    handle: OnceLock<SocketHandle>,
}

impl ReactorCallback for ListenerReactorCallback {
    fn on_readable(&self) {
        let handle = self.handle.get().copied().unwrap_or(SocketHandle::INVALID);
        loop {
            let accepted = {
                let guard = self.inner.lock();
                guard.mio_listener.accept()
            };
            match accepted {
                Ok((stream, _addr)) => {
                    let session_listener = self.accept_listener.make_session_listener();
                    match StreamSocket::from_accepted(
                        self.reactor.clone(),
                        stream,
                        &self.options.accepted_socket_options,
                        session_listener,
                    ) {
                        Ok(socket) => self.accept_listener.on_accept(socket),
                        Err(err) => {
                            observability::trace_error_event(handle, "AcceptRejected", &err.to_string());
                            continue;
                        }
                    }
                }
                Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => break,
                Err(err) => {
                    observability::trace_error_event(handle, "AcceptFailed", &err.to_string());
                    break;
                }
            }
        }
    }
}

/// A bound, listening TCP socket registered with a [`Reactor`].
pub struct ListenerSocket {
    inner: Arc<Mutex<ListenerInner>>,
    reactor: Arc<Reactor>,
    token: Token,
    detach_ctx: Arc<DetachContext>,
    handle: SocketHandle,
}

impl ListenerSocket {
    pub fn bind(
        reactor: Arc<Reactor>,
        endpoint: &Endpoint,
        options: ListenerSocketOptions,
        accept_listener: Arc<dyn AcceptListener>,
    ) -> Result<Self> {
        let raw = handle_api::open(Transport::Tcp)?;
        handle_api::bind(&raw, endpoint, options.reuse_address)?;
        handle_api::listen(&raw, options.backlog as i32)?;
        let std_listener: std::net::TcpListener = raw.into();
        let mio_listener = mio::net::TcpListener::from_std(std_listener);

        let inner = Arc::new(Mutex::new(ListenerInner { mio_listener }));

        let callback = Arc::new(ListenerReactorCallback {
            inner: inner.clone(),
            reactor: reactor.clone(),
            options,
            accept_listener,
            handle: OnceLock::new(),
        });

        let (token, detach_ctx) = {
            let mut guard = inner.lock();
            reactor.attach_socket(&mut guard.mio_listener, callback.clone())?
        };
        let handle = SocketHandle::from_raw(token.0 as u64);
        let _ = callback.handle.set(handle);
        tracing::debug!(handle = %handle, "listener socket attached to reactor");
        {
            let mut guard = inner.lock();
            reactor.show_readable(token, &mut guard.mio_listener, InterestOptions::default())?;
        }

        Ok(Self { inner, reactor, token, detach_ctx, handle })
    }

    pub fn handle(&self) -> SocketHandle {
        self.handle
    }

    pub fn local_addr(&self) -> Result<std::net::SocketAddr> {
        self.inner.lock().mio_listener.local_addr().map_err(SocketError::from)
    }

    /// Registers the callback the detach-context fires exactly once, the
    /// transition from DETACHING to DETACHED (spec §4.G's
    /// `processSocketDetached`).
    pub fn on_detach(&self, listener: Arc<dyn sluice_core::detach::SocketDetachListener>) {
        self.detach_ctx.set_listener(listener);
    }

    pub fn close(self) -> Result<()> {
        {
            let mut guard = self.inner.lock();
            let _ = self.reactor.hide_readable(self.token, &mut guard.mio_listener);
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
}

#[cfg(test)]
mod tests {
    use std::net::TcpStream as StdTcpStream;
    use std::sync::Mutex as StdMutex;
    use std::time::Duration;

    use sluice_core::config::StreamSocketOptions;

    use super::*;

    struct NoopSessionListener;
    impl SessionListener for NoopSessionListener {}

    #[derive(Default)]
    struct CollectingAcceptListener {
        accepted: StdMutex<Vec<StreamSocket>>,
    }

    impl AcceptListener for CollectingAcceptListener {
        fn on_accept(&self, socket: StreamSocket) {
            self.accepted.lock().unwrap().push(socket);
        }
        fn make_session_listener(&self) -> Arc<dyn SessionListener> {
            Arc::new(NoopSessionListener)
        }
    }

    #[test]
    fn accepts_an_incoming_connection() {
        let reactor = Arc::new(Reactor::new().unwrap());
        let endpoint = Endpoint::Ip4 { addr: std::net::Ipv4Addr::LOCALHOST, port: 0 };
        let accept_listener = Arc::new(CollectingAcceptListener::default());

        let listener_socket = ListenerSocket::bind(
            reactor.clone(),
            &endpoint,
            ListenerSocketOptions {
                reuse_address: false,
                backlog: 16,
                accepted_socket_options: StreamSocketOptions::default(),
            },
            accept_listener.clone(),
        )
        .unwrap();

        let addr = listener_socket.local_addr().unwrap();
        let _client = StdTcpStream::connect(addr).unwrap();

        let mut saw_accept = false;
        for _ in 0..50 {
            let _ = reactor.poll(Some(Duration::from_millis(20)));
            if !accept_listener.accepted.lock().unwrap().is_empty() {
                saw_accept = true;
                break;
            }
        }
        assert!(saw_accept, "listener never dispatched the incoming connection");
        assert!(listener_socket.handle().is_valid());
    }
}
