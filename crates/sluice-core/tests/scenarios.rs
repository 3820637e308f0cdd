//! Literal exercises of the numbered scenarios: each test follows one
//! scenario's exact sequence of calls and numbers rather than probing the
//! underlying state machine's general shape (that's what the unit tests
//! alongside each module are for).
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use sluice_core::buffer::{QueueEvent, WatermarkQueue};
use sluice_core::detach::{DetachContext, DetachState, EventKind, EventPool};
use sluice_core::error::SocketError;
use sluice_core::shutdown::{CloseMode, Direction, Origin, ShutdownContext, ShutdownState};
use sluice_core::timestamp::{InvalidateOnHit, TimestampCorrelator, TimestampDelivery, TimestampKind};

#[test]
fn s2_watermark_back_pressure() {
    let mut write_queue = WatermarkQueue::new(64, 256);

    assert_eq!(write_queue.append(&vec![0u8; 128]), None);
    assert_eq!(write_queue.len(), 128);

    assert_eq!(write_queue.append(&vec![0u8; 200]), Some(QueueEvent::High));
    assert_eq!(write_queue.len(), 328);

    let (_drained, event) = write_queue.pop(100);
    assert_eq!(event, None);
    assert_eq!(write_queue.len(), 228);

    let (_drained, event) = write_queue.pop(200);
    assert_eq!(event, Some(QueueEvent::Low));
    assert_eq!(write_queue.len(), 28);
}

#[test]
fn s3_timestamp_correlator_wrap() {
    let mut correlator = TimestampCorrelator::new(256, InvalidateOnHit::Always);

    // The very first delivery only arms the correlator and is always
    // discarded, so arm it before any of the saves below — otherwise
    // `save_before_send` is a no-op and the ring never actually fills.
    let arming = correlator.on_timestamp_received(TimestampDelivery {
        id: u32::MAX,
        kind: TimestampKind::Sent,
        time: Duration::ZERO,
    });
    assert_eq!(arming, None, "first delivery only arms the correlator");

    for id in 0u32..512 {
        correlator.save_before_send(Duration::from_secs((id + 1) as u64), id);
    }

    for id in 256u32..512 {
        let ref_time = Duration::from_secs((id + 1) as u64);
        let delivered = ref_time + Duration::from_secs(2);
        let delta = correlator.on_timestamp_received(TimestampDelivery {
            id,
            kind: TimestampKind::Sent,
            time: delivered,
        });
        assert_eq!(delta, Some(Duration::from_secs(2)), "id {id} must correlate to its saved refTime");
    }

    let overwritten = correlator.on_timestamp_received(TimestampDelivery {
        id: 0,
        kind: TimestampKind::Sent,
        time: Duration::from_secs(999),
    });
    assert_eq!(overwritten, None, "id 0's slot was overwritten by ids 256.. wrapping the ring");
}

#[test]
fn s4_half_open_shutdown_order() {
    let mut state = ShutdownState::new(CloseMode::HalfOpen);

    let context = state.try_shutdown_send();
    assert_eq!(context, ShutdownContext { initiated: true, send: true, receive: false, completed: false });

    let context = state.try_shutdown_receive(Origin::Remote);
    assert_eq!(context, ShutdownContext { initiated: false, send: false, receive: true, completed: true });

    let context = state.try_shutdown_send();
    assert_eq!(context, ShutdownContext::default());
    let context = state.try_shutdown_receive(Origin::Remote);
    assert_eq!(context, ShutdownContext::default());
}

#[test]
fn s5_detach_with_in_flight_operation() {
    let ctx = Arc::new(DetachContext::new());
    let fired = Arc::new(AtomicBool::new(false));
    let fired_for_listener = fired.clone();
    ctx.set_listener(Arc::new(move || {
        fired_for_listener.store(true, Ordering::SeqCst);
    }));

    let pool = EventPool::new();
    let send_event = pool.checkout(&ctx, EventKind::Completion).unwrap();

    let result = ctx.detach();
    assert!(matches!(result, Err(SocketError::Pending)));
    assert_eq!(ctx.state(), DetachState::Detaching);
    assert!(!fired.load(Ordering::SeqCst), "processSocketDetached must not fire while the send is in flight");

    drop(send_event);
    assert_eq!(ctx.state(), DetachState::Detached);
    assert!(fired.load(Ordering::SeqCst), "the send's lease release must drive the DETACHED transition");

    assert!(matches!(ctx.detach(), Err(SocketError::Invalid(_))));
}
