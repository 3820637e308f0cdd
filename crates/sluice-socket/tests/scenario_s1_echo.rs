//! A single reactor, one poller: listener accepts a client, the two
//! sides echo one byte each way, then half-close in turn, then all three
//! sockets detach — each exactly once.
use std::net::Ipv4Addr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use sluice_core::config::{ListenerSocketOptions, StreamSocketOptions};
use sluice_core::detach::SocketDetachListener;
use sluice_core::endpoint::Endpoint;
use sluice_core::error::SocketError;
use sluice_core::reactor::Reactor;
use sluice_core::shutdown::{Direction, ShutdownContext};
use sluice_socket::listener::{AcceptListener, ListenerSocket};
use sluice_socket::session::SessionListener;
use sluice_socket::stream::StreamSocket;

#[derive(Default)]
struct Recorder {
    shutdowns: Mutex<Vec<ShutdownContext>>,
}

impl SessionListener for Recorder {
    fn on_shutdown(&self, context: ShutdownContext) {
        self.shutdowns.lock().unwrap().push(context);
    }
    fn on_error(&self, _err: &SocketError) {}
}

struct SingleSlotAcceptListener {
    recorder: Arc<Recorder>,
    accepted: Mutex<Option<StreamSocket>>,
}

impl AcceptListener for SingleSlotAcceptListener {
    fn on_accept(&self, socket: StreamSocket) {
        *self.accepted.lock().unwrap() = Some(socket);
    }
    fn make_session_listener(&self) -> Arc<dyn SessionListener> {
        self.recorder.clone()
    }
}

fn detach_counter() -> (Arc<AtomicUsize>, Arc<dyn SocketDetachListener>) {
    let counter = Arc::new(AtomicUsize::new(0));
    let counter_for_closure = counter.clone();
    let listener: Arc<dyn SocketDetachListener> =
        Arc::new(move || { counter_for_closure.fetch_add(1, Ordering::SeqCst); });
    (counter, listener)
}

fn poll_until(reactor: &Reactor, mut predicate: impl FnMut() -> bool) -> bool {
    for _ in 0..200 {
        let _ = reactor.poll(Some(Duration::from_millis(10)));
        if predicate() {
            return true;
        }
    }
    false
}

#[test]
fn reactor_stream_echo_then_half_close_then_detach_all() {
    let reactor = Arc::new(Reactor::new().unwrap());

    let listener_endpoint = Endpoint::Ip4 { addr: Ipv4Addr::LOCALHOST, port: 0 };
    let accept_listener = Arc::new(SingleSlotAcceptListener {
        recorder: Arc::new(Recorder::default()),
        accepted: Mutex::new(None),
    });
    let listener_socket = ListenerSocket::bind(
        reactor.clone(),
        &listener_endpoint,
        ListenerSocketOptions {
            reuse_address: false,
            backlog: 16,
            accepted_socket_options: StreamSocketOptions::default(),
        },
        accept_listener.clone(),
    )
    .unwrap();
    let server_addr = listener_socket.local_addr().unwrap();

    let client_recorder = Arc::new(Recorder::default());
    let client = StreamSocket::connect(
        reactor.clone(),
        &Endpoint::Ip4 { addr: Ipv4Addr::LOCALHOST, port: server_addr.port() },
        &StreamSocketOptions::default(),
        client_recorder.clone(),
    )
    .unwrap();

    assert!(
        poll_until(&reactor, || accept_listener.accepted.lock().unwrap().is_some()),
        "listener never accepted the client connection"
    );
    let server = accept_listener.accepted.lock().unwrap().take().unwrap();

    client.send(b"C").unwrap();
    let mut server_received = Vec::new();
    assert!(
        poll_until(&reactor, || {
            server_received.extend(server.receive(16));
            !server_received.is_empty()
        }),
        "server never observed the client's byte"
    );
    assert_eq!(server_received, b"C");

    server.send(b"S").unwrap();
    let mut client_received = Vec::new();
    assert!(
        poll_until(&reactor, || {
            client_received.extend(client.receive(16));
            !client_received.is_empty()
        }),
        "client never observed the server's byte"
    );
    assert_eq!(client_received, b"S");

    client.shutdown(Direction::Send);
    assert!(
        poll_until(&reactor, || !accept_listener.recorder.shutdowns.lock().unwrap().is_empty()),
        "server never observed the client's half-close as EOF"
    );

    server.shutdown(Direction::Send);
    assert!(
        poll_until(&reactor, || !client_recorder.shutdowns.lock().unwrap().is_empty()),
        "client never observed the server's half-close as EOF"
    );

    let (client_detach_count, client_detach_listener) = detach_counter();
    let (server_detach_count, server_detach_listener) = detach_counter();
    let (listener_detach_count, listener_detach_listener) = detach_counter();
    client.on_detach(client_detach_listener);
    server.on_detach(server_detach_listener);
    listener_socket.on_detach(listener_detach_listener);

    client.close().unwrap();
    server.close().unwrap();
    listener_socket.close().unwrap();

    assert_eq!(client_detach_count.load(Ordering::SeqCst), 1);
    assert_eq!(server_detach_count.load(Ordering::SeqCst), 1);
    assert_eq!(listener_detach_count.load(Ordering::SeqCst), 1);
}
