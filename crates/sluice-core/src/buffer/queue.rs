//! The segmented `ByteQueue` of spec §3 and its scatter/gather/copy
//! contract (spec §4.A).
use std::collections::VecDeque;

use super::BufferArray;

/// Fixed capacity of a freshly allocated chunk. Chosen to match a typical
/// kernel socket-buffer read size; callers never see this constant, only
/// its effect on how many chunks a given payload spans.
pub const CHUNK_CAPACITY: usize = 16 * 1024;

/// One reference-counted, fixed-capacity segment. `used` marks the first
/// free byte; bytes `[0, used)` are valid storage, `[used, capacity)` is
/// free tail space a `scatter` call may write into.
#[derive(Debug)]
struct Chunk {
    data: Box<[u8]>,
    used: usize,
}

impl Chunk {
    fn new(capacity: usize) -> Self {
        Self {
            data: vec![0u8; capacity].into_boxed_slice(),
            used: 0,
        }
    }

    fn capacity(&self) -> usize {
        self.data.len()
    }

    fn free(&self) -> usize {
        self.capacity() - self.used
    }
}

/// An ordered list of chunks with a head index marking the first unread
/// byte and a tail index (implicit: `chunks.back().used`) marking the
/// first free byte of the last chunk.
///
/// Invariants: every chunk before the first one is fully consumed and
/// already popped (so `chunks[0]`, if present, always holds at least one
/// unread byte); the last chunk may be partially filled.
#[derive(Debug, Default)]
pub struct ByteQueue {
    chunks: VecDeque<Chunk>,
    head_offset: usize,
    length: usize,
    chunk_capacity: usize,
}

impl ByteQueue {
    pub fn new() -> Self {
        Self::with_chunk_capacity(CHUNK_CAPACITY)
    }

    pub fn with_chunk_capacity(chunk_capacity: usize) -> Self {
        Self {
            chunks: VecDeque::new(),
            head_offset: 0,
            length: 0,
            chunk_capacity: chunk_capacity.max(1),
        }
    }

    /// Total unread byte count. Monotone additive on `append`, subtractive
    /// on `pop`.
    pub fn len(&self) -> usize {
        self.length
    }

    pub fn is_empty(&self) -> bool {
        self.length == 0
    }

    /// Appends `bytes` to the tail, allocating new chunks as needed.
    pub fn append(&mut self, mut bytes: &[u8]) {
        while !bytes.is_empty() {
            if self.chunks.back().map(Chunk::free).unwrap_or(0) == 0 {
                self.chunks.push_back(Chunk::new(self.chunk_capacity));
            }
            let chunk = self.chunks.back_mut().expect("just pushed");
            let take = bytes.len().min(chunk.free());
            let start = chunk.used;
            chunk.data[start..start + take].copy_from_slice(&bytes[..take]);
            chunk.used += take;
            self.length += take;
            bytes = &bytes[take..];
        }
    }

    /// Removes and returns up to `max` bytes from the head, recycling fully
    /// consumed chunks.
    pub fn pop(&mut self, max: usize) -> Vec<u8> {
        let mut out = Vec::with_capacity(max.min(self.length));
        let mut remaining = max.min(self.length);
        while remaining > 0 {
            let Some(chunk) = self.chunks.front() else {
                break;
            };
            let available = chunk.used - self.head_offset;
            let take = available.min(remaining);
            out.extend_from_slice(&chunk.data[self.head_offset..self.head_offset + take]);
            self.head_offset += take;
            remaining -= take;
            self.length -= take;
            if self.head_offset == chunk.used {
                self.chunks.pop_front();
                self.head_offset = 0;
            }
        }
        out
    }

    /// Discards all buffered bytes, as happens when `DISCARDED` fires on an
    /// unrecoverable queue error.
    pub fn clear(&mut self) {
        self.chunks.clear();
        self.head_offset = 0;
        self.length = 0;
    }

    /// Iterates unread chunk slices head-to-tail, for callers that need a
    /// read-only view without consuming.
    fn head_to_tail_slices(&self) -> impl Iterator<Item = &[u8]> {
        self.chunks.iter().enumerate().map(|(i, chunk)| {
            let start = if i == 0 { self.head_offset } else { 0 };
            &chunk.data[start..chunk.used]
        })
    }

    /// Gathers up to `max_buffers` buffers covering up to `max_bytes`,
    /// iterating chunks head-to-tail. The last emitted buffer is shortened
    /// to respect `max_bytes`. Returns `(array, buffer_count, byte_count)`.
    /// An empty queue yields `(empty array, 0, 0)` with no special-casing.
    pub fn gather(&self, max_buffers: usize, max_bytes: usize) -> (BufferArray<'_>, usize, usize) {
        let mut array = BufferArray::new();
        let mut bytes_so_far = 0usize;
        for slice in self.head_to_tail_slices() {
            if array.len() >= max_buffers || bytes_so_far >= max_bytes || slice.is_empty() {
                break;
            }
            let remaining_budget = max_bytes - bytes_so_far;
            let take = slice.len().min(remaining_budget);
            array.push(super::Buffer::Const(&slice[..take]));
            bytes_so_far += take;
        }
        let count = array.len();
        (array, count, bytes_so_far)
    }

    /// Scatters up to `max_buffers` mutable buffers over the queue's free
    /// tail capacity (allocating new chunks as needed up front), capped at
    /// `max_bytes` total. Used by the engine to hand the kernel somewhere
    /// to write an incoming read directly into queue storage.
    pub fn scatter(&mut self, max_buffers: usize, max_bytes: usize) -> (BufferArray<'_>, usize, usize) {
        // Ensure at least one chunk with free space exists up front so the
        // loop below can borrow tail chunks without re-allocating mid-scan.
        if self.chunks.back().map(Chunk::free).unwrap_or(0) == 0 {
            self.chunks.push_back(Chunk::new(self.chunk_capacity));
        }
        let mut needed_bytes = max_bytes;
        while needed_bytes > self.chunks.back().map(Chunk::free).unwrap_or(0)
            && self.chunks.len() < max_buffers
        {
            let covered = self.chunks.back().map(Chunk::free).unwrap_or(0);
            needed_bytes = needed_bytes.saturating_sub(covered);
            self.chunks.push_back(Chunk::new(self.chunk_capacity));
        }

        let mut array = BufferArray::new();
        let mut bytes_so_far = 0usize;
        for chunk in self.chunks.iter_mut() {
            if array.len() >= max_buffers || bytes_so_far >= max_bytes || chunk.free() == 0 {
                continue;
            }
            let remaining_budget = max_bytes - bytes_so_far;
            let free_start = chunk.used;
            let take = chunk.free().min(remaining_budget);
            array.push(super::Buffer::Mut(&mut chunk.data[free_start..free_start + take]));
            bytes_so_far += take;
        }
        let count = array.len();
        (array, count, bytes_so_far)
    }

    /// Marks `written` bytes of previously-scattered tail space as now
    /// valid (used by the engine once a readable callback has copied
    /// kernel data into the buffers `scatter` handed out).
    pub fn commit_scattered(&mut self, mut written: usize) {
        for chunk in self.chunks.iter_mut() {
            if written == 0 {
                break;
            }
            let take = chunk.free().min(written);
            chunk.used += take;
            self.length += take;
            written -= take;
        }
    }

    /// Appends the contents of `array` (starting at `offset` bytes into the
    /// logical concatenation of its buffers) to the queue, allocating new
    /// chunks as needed. Mirrors `gather` in reverse.
    pub fn copy_from(&mut self, array: &BufferArray<'_>, offset: usize) {
        let mut skip = offset;
        for buffer in array.iter() {
            let slice = buffer.as_slice();
            if skip >= slice.len() {
                skip -= slice.len();
                continue;
            }
            self.append(&slice[skip..]);
            skip = 0;
        }
    }
}
