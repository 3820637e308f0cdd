//! Per-socket session state (spec §4.K): binds the watermark queues,
//! shutdown state machine and flow-control state machine to one handle,
//! independent of which concrete transport (stream/datagram) or engine
//! (reactor/proactor) drives it.
use std::sync::Arc;

use sluice_core::buffer::{QueueEvent, WatermarkQueue};
use sluice_core::config::StreamSocketOptions;
use sluice_core::detach::DetachContext;
use sluice_core::endpoint::SocketHandle;
use sluice_core::error::{Result, SocketError};
use sluice_core::flow_control::{EngineAction, FlowControlState, Reconciliation};
use sluice_core::observability;
use sluice_core::shutdown::{CloseMode, Origin, ShutdownContext, ShutdownState};

/// Observer callbacks the session reports state transitions to. Kept
/// minimal and non-generic so `StreamSession` stays usable from any
/// transport wrapper without a type parameter explosion.
pub trait SessionListener: Send + Sync {
    fn on_read_watermark(&self, _event: QueueEvent) {}
    fn on_write_watermark(&self, _event: QueueEvent) {}
    fn on_shutdown(&self, _context: ShutdownContext) {}
    fn on_error(&self, _err: &SocketError) {}
}

/// Queueing, shutdown and flow-control state for one stream-oriented
/// socket. Engine-facing `send`/`on_readable_drain`/`on_writable_drain`
/// calls are the contract spec §4.K describes; this type does not itself
/// touch the kernel — callers (e.g. `StreamSocket`) supply the actual
/// `send`/`receive` syscalls.
pub struct StreamSession {
    pub read_queue: WatermarkQueue,
    pub write_queue: WatermarkQueue,
    pub shutdown: ShutdownState,
    pub flow_control: FlowControlState,
    pub detach_ctx: Arc<DetachContext>,
    listener: Arc<dyn SessionListener>,
    /// Set once the owning transport knows its reactor-assigned token
    /// (spec §4.K); `INVALID` until then, so early trace events before
    /// attachment just carry a placeholder rather than failing.
    handle: SocketHandle,
}

impl StreamSession {
    pub fn new(options: &StreamSocketOptions, detach_ctx: Arc<DetachContext>, listener: Arc<dyn SessionListener>) -> Self {
        let mode = if options.keep_half_open { CloseMode::HalfOpen } else { CloseMode::FullClose };
        Self {
            read_queue: WatermarkQueue::new(
                options.read_queue_watermarks.low,
                options.read_queue_watermarks.high,
            ),
            write_queue: WatermarkQueue::new(
                options.write_queue_watermarks.low,
                options.write_queue_watermarks.high,
            ),
            shutdown: ShutdownState::new(mode),
            flow_control: FlowControlState::new(),
            detach_ctx,
            listener,
            handle: SocketHandle::INVALID,
        }
    }

    /// Records the handle the reactor assigned on attachment, so
    /// subsequent trace events are tagged with it instead of `INVALID`.
    pub fn set_handle(&mut self, handle: SocketHandle) {
        self.handle = handle;
    }

    /// Step 1-3 of spec §4.K's `send`: reject if the send side is
    /// closed, append to the write queue (surfacing `HIGH_WATERMARK` if
    /// crossed), and report whether the engine needs write interest
    /// armed. Returns `ConnectionDead` if the send side is already
    /// closed; `WouldBlock` if the queue was already past HIGH before
    /// this call (so the payload cannot be buffered without unbounded
    /// growth) — matching spec §4.K point 2's "fail caller with
    /// WOULD_BLOCK if the queue was already past HIGH".
    pub fn enqueue_send(&mut self, data: &[u8], already_past_high: bool) -> Result<Reconciliation> {
        if !self.shutdown.send_open() {
            return Err(SocketError::ConnectionDead);
        }
        if already_past_high {
            return Err(SocketError::WouldBlock);
        }
        if let Some(event) = self.write_queue.append(data) {
            self.trace_watermark("write", event, self.write_queue.len());
            self.listener.on_write_watermark(event);
        }
        Ok(self.reconcile())
    }

    /// Called on a writable engine event: the caller has drained
    /// `bytes_drained` bytes from `write_queue` to the kernel.
    pub fn on_write_drained(&mut self, bytes_drained: usize) -> Reconciliation {
        let (_data, event) = self.write_queue.pop(bytes_drained);
        if let Some(event) = event {
            self.trace_watermark("write", event, self.write_queue.len());
            self.listener.on_write_watermark(event);
        }
        self.reconcile()
    }

    /// Called on a readable engine event: `bytes_read` kernel bytes have
    /// been scattered into `read_queue`'s tail capacity and committed.
    pub fn on_read_filled(&mut self, bytes_read: usize) -> Reconciliation {
        if let Some(event) = self.read_queue.commit_scattered(bytes_read) {
            self.trace_watermark("read", event, self.read_queue.len());
            self.listener.on_read_watermark(event);
        }
        self.reconcile()
    }

    /// Drains up to `max` bytes the user has consumed from the read
    /// queue, surfacing any watermark crossing.
    pub fn consume_read(&mut self, max: usize) -> (Vec<u8>, Reconciliation) {
        let (data, event) = self.read_queue.pop(max);
        if let Some(event) = event {
            self.trace_watermark("read", event, self.read_queue.len());
            self.listener.on_read_watermark(event);
        }
        (data, self.reconcile())
    }

    fn trace_watermark(&self, direction: &str, event: QueueEvent, queue_len: usize) {
        let event = match event {
            QueueEvent::High => "HIGH_WATERMARK",
            QueueEvent::Low => "LOW_WATERMARK",
        };
        observability::trace_watermark_event(self.handle, direction, event, queue_len);
    }

    /// Unrecoverable error on either direction: discards the affected
    /// queue, shuts down that direction, and reports to the listener —
    /// the flow-terminating path of spec §7.
    pub fn on_flow_terminating_error(&mut self, err: SocketError, direction: sluice_core::shutdown::Direction) {
        observability::trace_error_event(self.handle, "FlowTerminating", &err.to_string());
        self.listener.on_error(&err);
        let context = match direction {
            sluice_core::shutdown::Direction::Send => {
                self.write_queue.clear();
                self.shutdown.try_shutdown_send()
            }
            sluice_core::shutdown::Direction::Receive => {
                self.read_queue.clear();
                self.shutdown.try_shutdown_receive(Origin::Remote)
            }
        };
        self.trace_and_notify_shutdown(context);
    }

    pub fn try_shutdown_send(&mut self) -> ShutdownContext {
        let context = self.shutdown.try_shutdown_send();
        self.trace_and_notify_shutdown(context);
        context
    }

    pub fn try_shutdown_receive(&mut self, origin: Origin) -> ShutdownContext {
        let context = self.shutdown.try_shutdown_receive(origin);
        self.trace_and_notify_shutdown(context);
        context
    }

    fn trace_and_notify_shutdown(&self, context: ShutdownContext) {
        if context.any() {
            observability::trace_shutdown_event(self.handle, context.initiated, context.send, context.receive, context.completed);
            self.listener.on_shutdown(context);
        }
    }

    /// Recomputes desired engine interest from current queue occupancy
    /// and shutdown state, per spec §4.E.
    fn reconcile(&mut self) -> Reconciliation {
        if !self.shutdown.receive_open() {
            self.flow_control.close_read();
        }
        if !self.shutdown.send_open() {
            self.flow_control.close_write();
        }
        // Read interest must drop while the read queue's high watermark is
        // armed (spec §4.F: a HIGH on the read side means the kernel-to-queue
        // copier must pause), not just while the receive side is open.
        let read_wants_data = self.shutdown.receive_open() && !self.read_queue.is_armed();
        let write_has_data = !self.write_queue.is_empty();
        self.flow_control.reconcile(read_wants_data, write_has_data)
    }
}

/// True iff `action` requires the caller to actually touch the engine.
pub fn needs_engine_call(action: EngineAction) -> bool {
    !matches!(action, EngineAction::None)
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use sluice_core::config::WatermarkOptions;
    use sluice_core::shutdown::Direction;

    use super::*;

    #[derive(Default)]
    struct RecordingListener {
        read_watermarks: parking_lot::Mutex<Vec<QueueEvent>>,
        write_watermarks: parking_lot::Mutex<Vec<QueueEvent>>,
        shutdowns: parking_lot::Mutex<Vec<ShutdownContext>>,
        errors: AtomicUsize,
    }

    impl SessionListener for RecordingListener {
        fn on_read_watermark(&self, event: QueueEvent) {
            self.read_watermarks.lock().push(event);
        }
        fn on_write_watermark(&self, event: QueueEvent) {
            self.write_watermarks.lock().push(event);
        }
        fn on_shutdown(&self, context: ShutdownContext) {
            self.shutdowns.lock().push(context);
        }
        fn on_error(&self, _err: &SocketError) {
            self.errors.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn options_with_small_watermarks() -> StreamSocketOptions {
        StreamSocketOptions {
            write_queue_watermarks: WatermarkOptions { low: 4, high: 8 },
            read_queue_watermarks: WatermarkOptions { low: 4, high: 8 },
            ..StreamSocketOptions::default()
        }
    }

    #[test]
    fn enqueue_send_on_closed_send_side_is_connection_dead() {
        let listener = Arc::new(RecordingListener::default());
        let mut session = StreamSession::new(
            &options_with_small_watermarks(),
            Arc::new(DetachContext::new()),
            listener,
        );
        session.try_shutdown_send();
        let err = session.enqueue_send(b"hi", false).unwrap_err();
        assert!(matches!(err, SocketError::ConnectionDead));
    }

    #[test]
    fn enqueue_send_surfaces_high_watermark_and_arms_write() {
        let listener = Arc::new(RecordingListener::default());
        let mut session = StreamSession::new(
            &options_with_small_watermarks(),
            Arc::new(DetachContext::new()),
            listener.clone(),
        );
        let reconciliation = session.enqueue_send(b"0123456789", false).unwrap();
        assert_eq!(reconciliation.write, EngineAction::Show);
        assert_eq!(listener.write_watermarks.lock().as_slice(), &[QueueEvent::High]);
    }

    #[test]
    fn on_write_drained_fully_hides_write_interest() {
        let listener = Arc::new(RecordingListener::default());
        let mut session = StreamSession::new(
            &options_with_small_watermarks(),
            Arc::new(DetachContext::new()),
            listener,
        );
        session.enqueue_send(b"0123456789", false).unwrap();
        let reconciliation = session.on_write_drained(10);
        assert_eq!(reconciliation.write, EngineAction::Hide);
    }

    #[test]
    fn flow_terminating_receive_error_shuts_down_receive_side() {
        let listener = Arc::new(RecordingListener::default());
        let mut session = StreamSession::new(
            &options_with_small_watermarks(),
            Arc::new(DetachContext::new()),
            listener.clone(),
        );
        session.on_flow_terminating_error(SocketError::ConnectionReset, Direction::Receive);
        assert!(!session.shutdown.receive_open());
        assert_eq!(listener.errors.load(Ordering::SeqCst), 1);
        assert_eq!(listener.shutdowns.lock().len(), 1);
    }
}
