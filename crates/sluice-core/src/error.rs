//! Stable error taxonomy shared by every engine, queue and socket session.
//!
//! # Why
//! The engines (reactor/proactor) and the per-socket session must agree on a
//! single error vocabulary so that "this op failed" can be routed to the
//! right state-machine transition (retry internally, shut the direction
//! down, surface to the caller untouched, or fire a cancellation) without
//! each call site re-deriving that policy from a raw `io::ErrorKind`. See
//! `spec.md` §7 for the full propagation table; [`SocketError::category`]
//! is that table made executable.
use std::io;
use std::time::Duration;

/// The socket-handle-API error enum required by `spec.md` §6.
///
/// `Ok` is represented by `Result::Ok` rather than a variant here, matching
/// the teacher's convention of keeping the success path out of the error
/// type.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum SocketError {
    #[error("operation would block")]
    WouldBlock,
    #[error("operation interrupted by signal")]
    Interrupted,
    #[error("operation pending completion")]
    Pending,
    #[error("connection is dead")]
    ConnectionDead,
    #[error("connection refused")]
    ConnectionRefused,
    #[error("connection reset by peer")]
    ConnectionReset,
    #[error("end of stream")]
    Eof,
    #[error("invalid argument: {0}")]
    Invalid(&'static str),
    #[error("resource limit exceeded: {0}")]
    Limit(&'static str),
    #[error("operation not implemented")]
    NotImplemented,
    #[error("operation cancelled")]
    Cancelled,
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),
}

/// Disposition of an error, driving the propagation policy of spec §7.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Recovered internally by drain loops, or surfaced verbatim to a
    /// caller that must retry itself (`WouldBlock`/`Interrupted`/`Pending`).
    Transient,
    /// Shuts down the affected direction, fires `DISCARDED` on the queue and
    /// an error event to the session listener.
    FlowTerminating,
    /// Surfaced to the caller unchanged; no queue or state-machine mutation.
    FatalConfiguration,
    /// Delivered as the in-flight operation's completion status, not as an
    /// error event.
    Cancelled,
}

impl SocketError {
    /// Classifies this error per the propagation policy of spec §7.
    pub fn category(&self) -> ErrorCategory {
        match self {
            SocketError::WouldBlock | SocketError::Interrupted | SocketError::Pending => {
                ErrorCategory::Transient
            }
            SocketError::ConnectionDead
            | SocketError::ConnectionReset
            | SocketError::Eof
            | SocketError::ConnectionRefused => ErrorCategory::FlowTerminating,
            SocketError::Invalid(_) | SocketError::Limit(_) | SocketError::NotImplemented => {
                ErrorCategory::FatalConfiguration
            }
            SocketError::Cancelled => ErrorCategory::Cancelled,
            SocketError::Io(err) => classify_io_error(err).category(),
        }
    }

    /// Maps a raw `io::Error` the way the socket-handle API is expected to:
    /// retryable kernel signals collapse to `WouldBlock`/`Interrupted`,
    /// connection teardown signals collapse to their named variant, and
    /// anything unrecognized is retained as `Io` so no information is lost.
    pub fn from_io(err: io::Error) -> Self {
        classify_io_error(&err)
    }

    /// Suggested backoff before retrying a transient error, or `None` if the
    /// caller should retry immediately (the engine's own readiness
    /// notification is the better signal in that case).
    pub fn retry_after(&self) -> Option<Duration> {
        match self.category() {
            ErrorCategory::Transient => Some(Duration::from_millis(1)),
            _ => None,
        }
    }
}

fn classify_io_error(err: &io::Error) -> SocketError {
    use io::ErrorKind;
    match err.kind() {
        ErrorKind::WouldBlock => SocketError::WouldBlock,
        ErrorKind::Interrupted => SocketError::Interrupted,
        ErrorKind::ConnectionRefused => SocketError::ConnectionRefused,
        ErrorKind::ConnectionReset | ErrorKind::ConnectionAborted | ErrorKind::BrokenPipe => {
            SocketError::ConnectionReset
        }
        ErrorKind::NotConnected | ErrorKind::UnexpectedEof => SocketError::ConnectionDead,
        ErrorKind::InvalidInput | ErrorKind::InvalidData => {
            SocketError::Invalid("invalid argument")
        }
        ErrorKind::Unsupported => SocketError::NotImplemented,
        _ => SocketError::Io(io::Error::new(err.kind(), err.to_string())),
    }
}

pub type Result<T> = core::result::Result<T, SocketError>;
