//! Low/high watermark latch over a [`ByteQueue`] (spec §4.F).
//!
//! `HIGH` fires once, the first time the queue's length crosses the high
//! watermark going up; no further `HIGH` fires until the length has
//! dropped back below the low watermark and `LOW` has fired. The two
//! events strictly alternate, `HIGH` always first.
use super::ByteQueue;

/// A one-shot crossing notification. Consumers should treat repeated
/// notifications of the same kind within one latch cycle as a bug in this
/// type, not something they need to guard against.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum QueueEvent {
    /// Length has crossed above `high_watermark`; producers should stop
    /// enqueuing until `Low` fires.
    High,
    /// Length has dropped below `low_watermark` after a prior `High`;
    /// producers may resume.
    Low,
}

/// Which side of the latch the queue is currently on.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Latch {
    /// No `High` has fired since the last `Low` (or ever).
    Open,
    /// `High` has fired; waiting for length to fall below `low_watermark`.
    Armed,
}

/// A [`ByteQueue`] paired with watermark thresholds. All mutation goes
/// through this wrapper so the latch state stays consistent with the
/// queue's length.
#[derive(Debug)]
pub struct WatermarkQueue {
    queue: ByteQueue,
    low_watermark: usize,
    high_watermark: usize,
    latch: Latch,
}

impl WatermarkQueue {
    /// `low_watermark` must not exceed `high_watermark`; equal values are
    /// permitted (degenerate case: every enqueue past the line toggles).
    pub fn new(low_watermark: usize, high_watermark: usize) -> Self {
        assert!(
            low_watermark <= high_watermark,
            "low watermark must not exceed high watermark"
        );
        Self {
            queue: ByteQueue::new(),
            low_watermark,
            high_watermark,
            latch: Latch::Open,
        }
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn queue(&self) -> &ByteQueue {
        &self.queue
    }

    pub fn queue_mut(&mut self) -> &mut ByteQueue {
        &mut self.queue
    }

    /// Appends `bytes` and returns `Some(QueueEvent::High)` iff this
    /// append is the crossing that arms the latch.
    pub fn append(&mut self, bytes: &[u8]) -> Option<QueueEvent> {
        self.queue.append(bytes);
        self.reevaluate()
    }

    /// Pops up to `max` bytes and returns the data plus `Some(Low)` iff
    /// this pop is the crossing that disarms the latch.
    pub fn pop(&mut self, max: usize) -> (Vec<u8>, Option<QueueEvent>) {
        let data = self.queue.pop(max);
        (data, self.reevaluate())
    }

    /// Re-derives the latch transition from the current queue length.
    /// Called after any mutation so `append`/`pop`/`commit_scattered` all
    /// share one source of truth for crossing detection.
    fn reevaluate(&mut self) -> Option<QueueEvent> {
        let len = self.queue.len();
        match self.latch {
            Latch::Open if len >= self.high_watermark => {
                self.latch = Latch::Armed;
                Some(QueueEvent::High)
            }
            Latch::Armed if len < self.low_watermark => {
                self.latch = Latch::Open;
                Some(QueueEvent::Low)
            }
            _ => None,
        }
    }

    /// True while the high watermark has fired and no matching `Low` has
    /// fired yet. Callers driving flow control off this queue (rather than
    /// its raw length) should treat `Armed` as "stop feeding this queue".
    pub fn is_armed(&self) -> bool {
        matches!(self.latch, Latch::Armed)
    }

    /// Marks previously-scattered tail bytes valid, mirroring
    /// [`ByteQueue::commit_scattered`], and surfaces any watermark
    /// crossing it caused.
    pub fn commit_scattered(&mut self, written: usize) -> Option<QueueEvent> {
        self.queue.commit_scattered(written);
        self.reevaluate()
    }

    /// Drops all buffered bytes, surfacing a `Low` event if this discards
    /// an armed latch (e.g. on `DISCARDED`-triggering errors).
    pub fn clear(&mut self) -> Option<QueueEvent> {
        self.queue.clear();
        self.reevaluate()
    }
}
