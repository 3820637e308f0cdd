//! The "socket handle API" of spec §6: a capability set over raw OS
//! sockets, treated by the core as an opaque collaborator with a
//! consistent error enum. This module supplies the one concrete
//! implementation this repository ships — TCP/UDP over `socket2` +
//! `mio::net` — so the engines have something real to drive.
use std::io::{Read, Write};
use std::net::SocketAddr;
use std::time::Duration;

use socket2::{Domain, Protocol, Socket, Type};
use sluice_core::endpoint::{Endpoint, Transport};
use sluice_core::error::{Result, SocketError};

fn to_socket_addr(endpoint: &Endpoint) -> Result<SocketAddr> {
    match endpoint {
        Endpoint::Ip4 { addr, port } => Ok(SocketAddr::new((*addr).into(), *port)),
        Endpoint::Ip6 { addr, port, .. } => Ok(SocketAddr::new((*addr).into(), *port)),
        Endpoint::Local(_) => Err(SocketError::NotImplemented),
    }
}

/// Builds a non-blocking `socket2::Socket` for `transport`, ready to
/// `bind`/`connect`/`listen` but not yet any of those.
pub fn open(transport: Transport) -> Result<Socket> {
    let (domain, ty, protocol) = match transport {
        Transport::Tcp => (Domain::IPV4, Type::STREAM, Some(Protocol::TCP)),
        Transport::Udp => (Domain::IPV4, Type::DGRAM, Some(Protocol::UDP)),
        Transport::LocalStream | Transport::LocalDatagram => {
            return Err(SocketError::NotImplemented)
        }
    };
    let socket = Socket::new(domain, ty, protocol).map_err(SocketError::from)?;
    socket.set_nonblocking(true).map_err(SocketError::from)?;
    Ok(socket)
}

pub fn bind(socket: &Socket, endpoint: &Endpoint, reuse_address: bool) -> Result<()> {
    if reuse_address {
        socket.set_reuse_address(true).map_err(SocketError::from)?;
    }
    let addr = to_socket_addr(endpoint)?;
    socket.bind(&addr.into()).map_err(SocketError::from)
}

pub fn listen(socket: &Socket, backlog: i32) -> Result<()> {
    socket.listen(backlog).map_err(SocketError::from)
}

pub fn connect(socket: &Socket, endpoint: &Endpoint) -> Result<()> {
    let addr = to_socket_addr(endpoint)?;
    match socket.connect(&addr.into()) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => Err(SocketError::Pending),
        Err(err) if matches!(err.raw_os_error(), Some(libc::EINPROGRESS)) => Err(SocketError::Pending),
        Err(err) => Err(SocketError::from(err)),
    }
}

/// Reads the deferred connect outcome via `SO_ERROR`, the reactor
/// pattern noted in spec §4.K ("complete via... reactor writability +
/// SO_ERROR check").
pub fn take_connect_error(socket: &Socket) -> Result<()> {
    match socket.take_error().map_err(SocketError::from)? {
        None => Ok(()),
        Some(err) => Err(SocketError::from(err)),
    }
}

/// Same check against a borrowed `SockRef`, for callers (e.g. a
/// `mio::net::TcpStream` owned elsewhere) that cannot hand over a
/// `socket2::Socket` without duplicating the fd.
pub fn take_connect_error_ref(socket: &socket2::SockRef<'_>) -> Result<()> {
    match socket.take_error().map_err(SocketError::from)? {
        None => Ok(()),
        Some(err) => Err(SocketError::from(err)),
    }
}

pub fn send(socket: &Socket, data: &[u8]) -> Result<usize> {
    let mut stream: &Socket = socket;
    match stream.write(data) {
        Ok(n) => Ok(n),
        Err(err) => Err(SocketError::from(err)),
    }
}

pub fn receive(socket: &Socket, buffer: &mut [u8]) -> Result<usize> {
    let mut stream: &Socket = socket;
    match stream.read(buffer) {
        Ok(0) => Err(SocketError::Eof),
        Ok(n) => Ok(n),
        Err(err) => Err(SocketError::from(err)),
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ShutdownHow {
    Send,
    Receive,
    Both,
}

pub fn shutdown(socket: &Socket, how: ShutdownHow) -> Result<()> {
    let how = match how {
        ShutdownHow::Send => socket2::Shutdown::Write,
        ShutdownHow::Receive => socket2::Shutdown::Read,
        ShutdownHow::Both => socket2::Shutdown::Both,
    };
    socket.shutdown(how).map_err(SocketError::from)
}

pub fn set_linger(socket: &Socket, timeout: Option<Duration>) -> Result<()> {
    socket.set_linger(timeout).map_err(SocketError::from)
}

pub fn set_no_delay(socket: &Socket, value: bool) -> Result<()> {
    socket.set_nodelay(value).map_err(SocketError::from)
}

pub fn set_keepalive(socket: &Socket, value: bool) -> Result<()> {
    let params = socket2::TcpKeepalive::new();
    if value {
        socket.set_tcp_keepalive(&params).map_err(SocketError::from)
    } else {
        // socket2 has no direct "disable" call distinct from the OS
        // default; disabling is expressed by never having enabled it.
        Ok(())
    }
}
