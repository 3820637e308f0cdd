//! Scatter/gather buffers and the buffer↔blob conversions of spec §4.A.
//!
//! `Buffer`/`BufferArray` model the kernel-facing vectored-IO shape (a list
//! of `{ptr, len}` pairs); `ByteQueue` (see [`queue`]) is the segmented,
//! owned byte storage that buffers are gathered from or scattered into.
mod queue;
mod watermark;

pub use queue::{ByteQueue, CHUNK_CAPACITY};
pub use watermark::{QueueEvent, WatermarkQueue};

use std::os::fd::RawFd;

/// A single scatter/gather element, either read-only or writable.
///
/// The invariant of spec §3 — no element has a null pointer unless its
/// length is zero — is upheld by construction here: a `Buffer` can only be
/// built from an existing Rust slice, so an empty buffer is simply a
/// zero-length, otherwise-valid slice rather than a null pointer.
#[derive(Debug)]
pub enum Buffer<'a> {
    Const(&'a [u8]),
    Mut(&'a mut [u8]),
}

impl<'a> Buffer<'a> {
    pub fn len(&self) -> usize {
        match self {
            Buffer::Const(s) => s.len(),
            Buffer::Mut(s) => s.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn as_slice(&self) -> &[u8] {
        match self {
            Buffer::Const(s) => s,
            Buffer::Mut(s) => s,
        }
    }

    /// Writable view, for callers (the engine's readable-callback path)
    /// that scattered into this buffer and now need to copy kernel data
    /// in. Panics if called on a `Const` buffer — scatter never produces
    /// one, so this is a programmer-error assertion, not a runtime case.
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        match self {
            Buffer::Const(_) => panic!("as_mut_slice called on a Const buffer"),
            Buffer::Mut(s) => s,
        }
    }
}

/// An ordered sequence of buffers representing one logical datagram or
/// stream segment. Total size is the sum of element lengths.
#[derive(Debug, Default)]
pub struct BufferArray<'a> {
    buffers: Vec<Buffer<'a>>,
}

impl<'a> BufferArray<'a> {
    pub fn new() -> Self {
        Self { buffers: Vec::new() }
    }

    pub fn push(&mut self, buffer: Buffer<'a>) {
        self.buffers.push(buffer);
    }

    pub fn len(&self) -> usize {
        self.buffers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffers.is_empty()
    }

    pub fn total_bytes(&self) -> usize {
        self.buffers.iter().map(Buffer::len).sum()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Buffer<'a>> {
        self.buffers.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Buffer<'a>> {
        self.buffers.iter_mut()
    }

    pub fn as_io_slices(&self) -> Vec<std::io::IoSlice<'_>> {
        self.buffers
            .iter()
            .map(|b| std::io::IoSlice::new(b.as_slice()))
            .collect()
    }
}

/// A single payload passed across the socket-handle API: one buffer, an
/// array of buffers, a whole segmented queue, a file range (for
/// zero-copy sendfile-style transfer) or a string. Owned, so it can cross
/// the session/engine boundary without borrowing from caller state.
#[derive(Debug)]
pub enum Data {
    Buffer(Vec<u8>),
    Array(Vec<Vec<u8>>),
    Queue(ByteQueue),
    FileRange { fd: RawFd, offset: u64, length: u64 },
    Text(String),
}

impl Data {
    pub fn total_len(&self) -> usize {
        match self {
            Data::Buffer(b) => b.len(),
            Data::Array(a) => a.iter().map(Vec::len).sum(),
            Data::Queue(q) => q.len(),
            Data::FileRange { length, .. } => *length as usize,
            Data::Text(s) => s.len(),
        }
    }
}
