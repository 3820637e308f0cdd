//! Structured logging facade. The core never picks a subscriber — it only
//! emits `tracing` spans/events with a consistent field vocabulary so any
//! embedding application can route them to its own backend.
use crate::endpoint::SocketHandle;

/// Span fields attached to every per-socket trace, following the
/// teacher's convention of naming fields after the domain noun they
/// carry rather than a generic `id`/`value`.
pub fn socket_span(handle: SocketHandle) -> tracing::Span {
    tracing::info_span!("socket", handle = %handle)
}

/// Emits a structured watermark-crossing event at debug level; callers
/// pass the direction name (`"read"`/`"write"`) rather than this module
/// depending on the queue module's event enum, keeping the dependency
/// edge one-directional.
pub fn trace_watermark_event(handle: SocketHandle, direction: &str, event: &str, queue_len: usize) {
    tracing::debug!(
        target: "sluice_core::watermark",
        handle = %handle,
        direction,
        event,
        queue_len,
        "watermark event"
    );
}

/// Emits a structured shutdown-transition event at info level.
pub fn trace_shutdown_event(handle: SocketHandle, initiated: bool, send: bool, receive: bool, completed: bool) {
    tracing::info!(
        target: "sluice_core::shutdown",
        handle = %handle,
        initiated,
        send,
        receive,
        completed,
        "shutdown transition"
    );
}

/// Emits a structured detach-lifecycle transition at info level.
pub fn trace_detach_event(handle: SocketHandle, state: &str, inflight: u64) {
    tracing::info!(
        target: "sluice_core::detach",
        handle = %handle,
        state,
        inflight,
        "detach transition"
    );
}

/// Emits a structured error event at warn level, tagged with the error's
/// propagation category so log consumers can filter without parsing the
/// message text.
pub fn trace_error_event(handle: SocketHandle, category: &str, message: &str) {
    tracing::warn!(
        target: "sluice_core::error",
        handle = %handle,
        category,
        message,
        "socket error"
    );
}
