//! The data model of spec §3: `SocketHandle`, `Endpoint`, `Transport`, plus
//! the text wire format and JSON codec of spec §6.
use std::fmt;
use std::net::{Ipv4Addr, Ipv6Addr};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::SocketError;

/// An opaque OS descriptor. Bitwise-copyable; `INVALID` is the sentinel.
///
/// The raw value is never dereferenced by this crate; it only round-trips
/// through [`crate::socket_api::SocketHandleApi`] implementations (the
/// opaque "socket handle API" of spec §1).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SocketHandle(u64);

impl SocketHandle {
    pub const INVALID: SocketHandle = SocketHandle(u64::MAX);

    pub const fn from_raw(raw: u64) -> Self {
        SocketHandle(raw)
    }

    pub const fn raw(self) -> u64 {
        self.0
    }

    pub const fn is_valid(self) -> bool {
        self.0 != Self::INVALID.0
    }
}

impl Default for SocketHandle {
    fn default() -> Self {
        Self::INVALID
    }
}

impl fmt::Display for SocketHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_valid() {
            write!(f, "fd#{}", self.0)
        } else {
            f.write_str("fd#invalid")
        }
    }
}

/// Transport kind carried alongside an [`Endpoint`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Transport {
    Tcp,
    Udp,
    LocalStream,
    LocalDatagram,
}

/// Maximum length (in bytes) of a local (unix-domain) name, matching the
/// `sun_path`-equivalent bound of spec §6.
pub const LOCAL_NAME_MAX_LEN: usize = 108;

/// A filesystem path or, on Linux, an "abstract" name (leading NUL, not a
/// real path). The abstract-name prefix consumes one byte of the budget,
/// per spec §6.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LocalName {
    Path(String),
    Abstract(String),
}

impl LocalName {
    pub fn parse(text: &str) -> Result<Self, SocketError> {
        if let Some(name) = text.strip_prefix('@') {
            let candidate = LocalName::Abstract(name.to_owned());
            candidate.validate()?;
            Ok(candidate)
        } else {
            let candidate = LocalName::Path(text.to_owned());
            candidate.validate()?;
            Ok(candidate)
        }
    }

    fn validate(&self) -> Result<(), SocketError> {
        let encoded_len = match self {
            // the abstract prefix consumes one byte of the sun_path budget
            LocalName::Abstract(name) => name.len() + 1,
            LocalName::Path(path) => path.len(),
        };
        if encoded_len >= LOCAL_NAME_MAX_LEN {
            return Err(SocketError::Limit("local name exceeds platform length bound"));
        }
        Ok(())
    }

    pub fn to_text(&self) -> String {
        match self {
            LocalName::Path(path) => path.clone(),
            LocalName::Abstract(name) => format!("@{name}"),
        }
    }
}

impl fmt::Display for LocalName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_text())
    }
}

/// IPv4 or IPv6 address plus port and (for v6) an optional scope id, or a
/// local-domain name — the tagged union of spec §3.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Endpoint {
    Ip4 { addr: Ipv4Addr, port: u16 },
    Ip6 { addr: Ipv6Addr, port: u16, scope_id: Option<u32> },
    Local(LocalName),
}

impl Endpoint {
    pub fn transport_hint(&self) -> Option<&'static str> {
        match self {
            Endpoint::Ip4 { .. } | Endpoint::Ip6 { .. } => None,
            Endpoint::Local(_) => Some("local"),
        }
    }

    /// Parses the canonical text form: `a.b.c.d:port`, `[addr[%scope]]:port`
    /// or a raw path/`@abstract-name` for local endpoints.
    pub fn parse(text: &str) -> Result<Self, SocketError> {
        if let Some(rest) = text.strip_prefix('[') {
            let close = rest
                .find(']')
                .ok_or(SocketError::Invalid("missing ']' in ipv6 endpoint"))?;
            let (host, after) = rest.split_at(close);
            let after = &after[1..]; // skip ']'
            let port_str = after
                .strip_prefix(':')
                .ok_or(SocketError::Invalid("missing port after ipv6 address"))?;
            let port: u16 = port_str
                .parse()
                .map_err(|_| SocketError::Invalid("invalid port"))?;
            let (addr_str, scope_id) = match host.split_once('%') {
                Some((addr, scope)) => (
                    addr,
                    Some(
                        scope
                            .parse::<u32>()
                            .map_err(|_| SocketError::Invalid("invalid scope id"))?,
                    ),
                ),
                None => (host, None),
            };
            let addr = Ipv6Addr::from_str(addr_str)
                .map_err(|_| SocketError::Invalid("invalid ipv6 address"))?;
            return Ok(Endpoint::Ip6 { addr, port, scope_id });
        }

        if let Some((host, port_str)) = text.rsplit_once(':') {
            if let Ok(addr) = Ipv4Addr::from_str(host) {
                let port: u16 = port_str
                    .parse()
                    .map_err(|_| SocketError::Invalid("invalid port"))?;
                return Ok(Endpoint::Ip4 { addr, port });
            }
        }

        Ok(Endpoint::Local(LocalName::parse(text)?))
    }

    /// Renders the canonical text form, with IPv6 zero-collapsing handled by
    /// `std::net::Ipv6Addr`'s own `Display`.
    pub fn to_text(&self) -> String {
        match self {
            Endpoint::Ip4 { addr, port } => format!("{addr}:{port}"),
            Endpoint::Ip6 { addr, port, scope_id } => match scope_id {
                Some(scope) => format!("[{addr}%{scope}]:{port}"),
                None => format!("[{addr}]:{port}"),
            },
            Endpoint::Local(name) => name.to_text(),
        }
    }

    /// Endian-neutral comparison: two endpoints compare equal iff their
    /// network-byte-order address representation matches, independent of
    /// how they were constructed. `Endpoint` already derives `PartialEq`
    /// over canonical field values (`Ipv4Addr`/`Ipv6Addr` compare by their
    /// big-endian octets), so this is just a documented alias.
    pub fn same_network_address(&self, other: &Endpoint) -> bool {
        self == other
    }

    /// Serializes through the JSON codec of spec §6. Round-trips exactly
    /// via [`Endpoint::from_json`].
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).expect("Endpoint serialization is infallible")
    }

    pub fn from_json(text: &str) -> Result<Self, SocketError> {
        serde_json::from_str(text).map_err(|_| SocketError::Invalid("malformed endpoint json"))
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_text())
    }
}
