//! Attached endpoint memory.
//!
//! Long payloads land in a segment owned by the destination endpoint.
//! The transport writes into it while delivering and hands the handler
//! a borrow of the landed bytes; the client addresses it by offset when
//! issuing long sends.

use std::cell::UnsafeCell;

use crate::error::{Error, Result};

/// A fixed block of endpoint memory addressable by remote long sends.
///
/// Interior mutability in place of `&mut` is required because the
/// segment is written on the delivery path while the owning endpoint is
/// shared. Synchronization comes from the delivery discipline: a
/// landing zone is written before its handler runs and never
/// concurrently with it.
pub(crate) struct Segment {
    mem: UnsafeCell<Box<[u8]>>,
    len: usize,
}

// Access is serialized by the delivery path (network lock or mailbox
// order) as documented on `write` and `range`.
unsafe impl Sync for Segment {}

impl Segment {
    pub(crate) fn new(len: usize) -> Self {
        Segment {
            mem: UnsafeCell::new(vec![0u8; len].into_boxed_slice()),
            len,
        }
    }

    #[inline]
    pub(crate) fn len(&self) -> usize {
        self.len
    }

    /// Checks that `[offset, offset + len)` lies inside the segment.
    pub(crate) fn check_range(&self, offset: usize, len: usize) -> Result<()> {
        match offset.checked_add(len) {
            Some(end) if end <= self.len => Ok(()),
            _ => Err(Error::BadArgument(format!(
                "range [{}, {}+{}) exceeds segment of {} bytes",
                offset, offset, len, self.len
            ))),
        }
    }

    /// Copies `data` into the segment at `offset`.
    ///
    /// # Safety
    ///
    /// The caller must hold the delivery path for this endpoint (the
    /// network lock, or the mailbox drain position) so no other write
    /// or handler borrow of this region is live, and the range must
    /// have passed [`Segment::check_range`].
    pub(crate) unsafe fn write(&self, offset: usize, data: &[u8]) {
        let mem = &mut *self.mem.get();
        mem[offset..offset + data.len()].copy_from_slice(data);
    }

    /// Borrows `len` bytes of the segment starting at `offset`.
    ///
    /// # Safety
    ///
    /// Same discipline as [`Segment::write`]: the borrow must not
    /// outlive the delivery step that created it, and no concurrent
    /// write to the range may happen while it is live.
    pub(crate) unsafe fn range(&self, offset: usize, len: usize) -> &[u8] {
        let mem = &*self.mem.get();
        &mem[offset..offset + len]
    }
}
