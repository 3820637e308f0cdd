//! Ring-buffered correlator mapping outgoing-packet id to send-time (spec
//! §4.C). Attaches kernel-reported TX/RX timestamps back to previously
//! sent payloads.
use std::time::Duration;

/// Sentinel id marking a ring slot as invalidated (either never written,
/// overwritten, or consumed by a prior match on a stream transport).
const SENTINEL_ID: u32 = u32::MAX;

/// Default ring capacity, matching spec §3's `K = 256`.
pub const DEFAULT_CAPACITY: usize = 256;

#[derive(Clone, Copy, Debug)]
struct RingEntry {
    id: u32,
    reference_time: Duration,
}

/// Which of the three timestamp kinds a delivery refers to. Spec §4.C /
/// §9's open question: datagram transports may match each kind once per
/// id; stream transports invalidate on first match regardless of kind.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TimestampKind {
    Scheduled,
    Sent,
    Acknowledged,
}

/// A kernel-reported timestamp delivery.
#[derive(Clone, Copy, Debug)]
pub struct TimestampDelivery {
    pub id: u32,
    pub kind: TimestampKind,
    pub time: Duration,
}

/// Whether a hit should invalidate its ring entry. Spec §9 leaves this an
/// open question for datagram transports with multiple timestamp kinds;
/// we make it an explicit parameter instead of guessing, per the spec's
/// own recommendation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InvalidateOnHit {
    /// Stream transports: a match consumes the entry so repeated
    /// deliveries for the same id return `None` afterward.
    Always,
    /// Datagram transports: a match does not consume the entry, so each
    /// of `Scheduled`/`Sent`/`Acknowledged` can independently match once.
    Retain,
}

/// Fixed-capacity power-of-two ring correlating send-time with delivered
/// timestamps. Must be armed (by the first delivery, which is always
/// discarded) before any match can occur — the very first timestamp seen
/// may describe a packet sent before correlation began.
pub struct TimestampCorrelator {
    entries: Vec<RingEntry>,
    capacity: usize,
    write_index: usize,
    armed: bool,
    invalidate: InvalidateOnHit,
}

impl TimestampCorrelator {
    /// `capacity` must be a power of two; panics otherwise, mirroring the
    /// ring's modulo-by-mask implementation below.
    pub fn new(capacity: usize, invalidate: InvalidateOnHit) -> Self {
        assert!(capacity.is_power_of_two(), "ring capacity must be a power of two");
        Self {
            entries: vec![
                RingEntry { id: SENTINEL_ID, reference_time: Duration::ZERO };
                capacity
            ],
            capacity,
            write_index: 0,
            armed: false,
            invalidate,
        }
    }

    pub fn with_default_capacity(invalidate: InvalidateOnHit) -> Self {
        Self::new(DEFAULT_CAPACITY, invalidate)
    }

    fn slot(&self, logical_index: usize) -> usize {
        logical_index & (self.capacity - 1)
    }

    /// Records the send-time of an outgoing packet. A no-op before the
    /// correlator is armed, since an unarmed correlator will discard its
    /// first delivery anyway.
    pub fn save_before_send(&mut self, reference_time: Duration, id: u32) {
        if !self.armed {
            return;
        }
        let slot = self.slot(self.write_index);
        self.entries[slot] = RingEntry { id, reference_time };
        self.write_index += 1;
    }

    /// Correlates a kernel-reported timestamp with a previously saved
    /// send-time. The first call ever made arms the correlator and always
    /// returns `None`.
    pub fn on_timestamp_received(&mut self, delivery: TimestampDelivery) -> Option<Duration> {
        if !self.armed {
            self.armed = true;
            return None;
        }

        let scan_count = self.capacity.min(self.write_index);
        for back in 1..=scan_count {
            let logical = self.write_index - back;
            let slot = self.slot(logical);
            if self.entries[slot].id == delivery.id {
                let delta = delivery.time.saturating_sub(self.entries[slot].reference_time);
                if self.invalidate == InvalidateOnHit::Always {
                    self.entries[slot].id = SENTINEL_ID;
                }
                return Some(delta);
            }
        }
        None
    }

    /// Clears all entries and returns to the unarmed state.
    pub fn reset(&mut self) {
        for entry in &mut self.entries {
            entry.id = SENTINEL_ID;
            entry.reference_time = Duration::ZERO;
        }
        self.write_index = 0;
        self.armed = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn arm(c: &mut TimestampCorrelator) {
        // the very first delivery is always discarded and only arms
        c.on_timestamp_received(TimestampDelivery {
            id: SENTINEL_ID,
            kind: TimestampKind::Sent,
            time: Duration::ZERO,
        });
    }

    #[test]
    fn first_call_arms_and_returns_none() {
        let mut c = TimestampCorrelator::with_default_capacity(InvalidateOnHit::Always);
        c.save_before_send(Duration::from_secs(1), 7);
        let result = c.on_timestamp_received(TimestampDelivery {
            id: 7,
            kind: TimestampKind::Sent,
            time: Duration::from_secs(3),
        });
        assert_eq!(result, None, "first call must only arm, never match");
    }

    #[test]
    fn stream_transport_invalidates_after_first_match() {
        let mut c = TimestampCorrelator::with_default_capacity(InvalidateOnHit::Always);
        arm(&mut c);
        c.save_before_send(Duration::from_secs(1), 7);
        let first = c.on_timestamp_received(TimestampDelivery {
            id: 7,
            kind: TimestampKind::Sent,
            time: Duration::from_secs(3),
        });
        assert_eq!(first, Some(Duration::from_secs(2)));
        let second = c.on_timestamp_received(TimestampDelivery {
            id: 7,
            kind: TimestampKind::Acknowledged,
            time: Duration::from_secs(4),
        });
        assert_eq!(second, None, "entry must be consumed on first hit for stream transports");
    }

    #[test]
    fn datagram_transport_retains_entry_across_kinds() {
        let mut c = TimestampCorrelator::with_default_capacity(InvalidateOnHit::Retain);
        arm(&mut c);
        c.save_before_send(Duration::from_secs(1), 7);
        let scheduled = c.on_timestamp_received(TimestampDelivery {
            id: 7,
            kind: TimestampKind::Scheduled,
            time: Duration::from_secs(2),
        });
        let sent = c.on_timestamp_received(TimestampDelivery {
            id: 7,
            kind: TimestampKind::Sent,
            time: Duration::from_secs(3),
        });
        let acked = c.on_timestamp_received(TimestampDelivery {
            id: 7,
            kind: TimestampKind::Acknowledged,
            time: Duration::from_secs(4),
        });
        assert_eq!(scheduled, Some(Duration::from_secs(1)));
        assert_eq!(sent, Some(Duration::from_secs(2)));
        assert_eq!(acked, Some(Duration::from_secs(3)));
    }

    #[test]
    fn ring_wrap_overwrites_oldest_entries() {
        // Mirrors scenario S3: K=256, save ids 0..511 with refTimes 1s..512s,
        // then deliver for ids 256..511 expecting exactly a 2s delta, and a
        // final delivery for id 0 (overwritten) returning None.
        let mut c = TimestampCorrelator::new(256, InvalidateOnHit::Always);
        arm(&mut c);
        for id in 0u32..512 {
            c.save_before_send(Duration::from_secs((id + 1) as u64), id);
        }
        for id in 256u32..512 {
            let ref_time = Duration::from_secs((id + 1) as u64);
            let delivered = ref_time + Duration::from_secs(2);
            let delta = c.on_timestamp_received(TimestampDelivery {
                id,
                kind: TimestampKind::Sent,
                time: delivered,
            });
            assert_eq!(delta, Some(Duration::from_secs(2)), "id {id} must match its saved refTime");
        }
        let overwritten = c.on_timestamp_received(TimestampDelivery {
            id: 0,
            kind: TimestampKind::Sent,
            time: Duration::from_secs(999),
        });
        assert_eq!(overwritten, None, "id 0 was overwritten by the wrap and must not match");
    }

    #[test]
    fn reset_clears_ring_and_disarms() {
        let mut c = TimestampCorrelator::with_default_capacity(InvalidateOnHit::Always);
        arm(&mut c);
        c.save_before_send(Duration::from_secs(1), 7);
        c.reset();
        // unarmed again: first call after reset only arms
        let result = c.on_timestamp_received(TimestampDelivery {
            id: 7,
            kind: TimestampKind::Sent,
            time: Duration::from_secs(2),
        });
        assert_eq!(result, None);
    }
}
