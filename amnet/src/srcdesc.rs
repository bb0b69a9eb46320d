//! Source descriptors for negotiated-payload sends.
//!
//! A prepare call negotiates a payload size and hands back a
//! [`SrcDesc`] tied to the calling thread. The caller fills the
//! descriptor's buffer (or relies on the client buffer it registered)
//! and then commits, which consumes the descriptor and injects the
//! message. Between prepare and commit the thread may not inject other
//! traffic or poll; debug builds enforce this window with a
//! thread-local guard.

use std::alloc::{self, Layout};
#[cfg(debug_assertions)]
use std::cell::Cell;
use std::marker::PhantomData;
use std::ptr::NonNull;
use std::slice;

use crate::error::{Error, Result};
use crate::flags::{Category, Direction, LcOpt, SendFlags};
use crate::Rank;

/// Alignment of transport-allocated payload buffers.
pub(crate) const PAYLOAD_ALIGN: usize = 64;

/// Heap buffer for a payload under construction, aligned to
/// [`PAYLOAD_ALIGN`] so clients can fill it with vector stores.
#[derive(Debug)]
pub(crate) struct PayloadBuf {
    ptr: NonNull<u8>,
    capacity: usize,
}

// The buffer owns its allocation exclusively.
unsafe impl Send for PayloadBuf {}

impl PayloadBuf {
    pub(crate) fn new(capacity: usize) -> Result<Self> {
        if capacity == 0 {
            return Ok(PayloadBuf {
                ptr: NonNull::dangling(),
                capacity: 0,
            });
        }
        let layout = Layout::from_size_align(capacity, PAYLOAD_ALIGN).map_err(|_| {
            Error::BadArgument(format!("payload of {} bytes cannot be laid out", capacity))
        })?;
        let raw = unsafe { alloc::alloc(layout) };
        let Some(ptr) = NonNull::new(raw) else {
            return Err(Error::Resource(format!(
                "failed to allocate a {} byte payload buffer",
                capacity
            )));
        };
        Ok(PayloadBuf { ptr, capacity })
    }

    #[inline]
    pub(crate) fn capacity(&self) -> usize {
        self.capacity
    }

    #[inline]
    pub(crate) fn as_slice(&self) -> &[u8] {
        unsafe { slice::from_raw_parts(self.ptr.as_ptr(), self.capacity) }
    }

    #[inline]
    pub(crate) fn as_mut_slice(&mut self) -> &mut [u8] {
        unsafe { slice::from_raw_parts_mut(self.ptr.as_ptr(), self.capacity) }
    }
}

impl Drop for PayloadBuf {
    fn drop(&mut self) {
        if self.capacity != 0 {
            unsafe {
                let layout = Layout::from_size_align_unchecked(self.capacity, PAYLOAD_ALIGN);
                alloc::dealloc(self.ptr.as_ptr(), layout);
            }
        }
    }
}

/// Where the payload bytes for a negotiated send live.
#[derive(Debug)]
pub(crate) enum SdBuf<'b> {
    /// The caller's own buffer, registered at prepare time. The
    /// transport reads the leading `nbytes` of it at commit.
    Client(&'b [u8]),
    /// A transport-allocated buffer the caller fills through
    /// [`SrcDesc::payload_mut`]. Freed after the commit captures it.
    Owned(PayloadBuf),
}

/// In-flight state of a negotiated send, returned by prepare and
/// consumed by commit.
///
/// The descriptor is bound to the preparing thread; it is deliberately
/// not `Send`. Dropping it without committing abandons the send but
/// leaves the thread's injection window closed in debug builds, so the
/// next injection attempt reports the leak.
#[derive(Debug)]
pub struct SrcDesc<'b> {
    pub(crate) dir: Direction,
    pub(crate) cat: Category,
    pub(crate) dest: Rank,
    pub(crate) nbrhd: bool,
    pub(crate) buf: SdBuf<'b>,
    pub(crate) size: usize,
    pub(crate) dest_addr: Option<usize>,
    pub(crate) lc: LcOpt,
    pub(crate) flags: SendFlags,
    pub(crate) nargs: u8,
    _not_send: PhantomData<*mut u8>,
}

impl<'b> SrcDesc<'b> {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        dir: Direction,
        cat: Category,
        dest: Rank,
        nbrhd: bool,
        buf: SdBuf<'b>,
        size: usize,
        dest_addr: Option<usize>,
        lc: LcOpt,
        flags: SendFlags,
        nargs: u8,
    ) -> Self {
        SrcDesc {
            dir,
            cat,
            dest,
            nbrhd,
            buf,
            size,
            dest_addr,
            lc,
            flags,
            nargs,
            _not_send: PhantomData,
        }
    }

    /// Negotiated payload capacity in bytes. A commit may supply at
    /// most this many bytes.
    #[inline]
    pub fn size(&self) -> usize {
        self.size
    }

    /// Whether the payload lives in the buffer the caller registered
    /// at prepare time.
    #[inline]
    pub fn uses_client_buffer(&self) -> bool {
        matches!(self.buf, SdBuf::Client(_))
    }

    /// Payload category negotiated for this send.
    #[inline]
    pub fn category(&self) -> Category {
        self.cat
    }

    /// The transport-allocated buffer to fill before committing.
    ///
    /// # Panics
    ///
    /// Panics if the descriptor was prepared over a client buffer; in
    /// that case the payload is written through the caller's own
    /// buffer instead.
    pub fn payload_mut(&mut self) -> &mut [u8] {
        match &mut self.buf {
            SdBuf::Owned(buf) => buf.as_mut_slice(),
            SdBuf::Client(_) => {
                panic!("descriptor wraps a caller-supplied buffer, write the payload there")
            }
        }
    }
}

#[cfg(debug_assertions)]
const GUARD_REQUEST: u8 = 1 << 0;
#[cfg(debug_assertions)]
const GUARD_REPLY: u8 = 1 << 1;

#[cfg(debug_assertions)]
thread_local! {
    static NPAM_GUARD: Cell<u8> = Cell::new(0);
}

#[cfg(debug_assertions)]
fn guard_bit(dir: Direction) -> u8 {
    match dir {
        Direction::Request => GUARD_REQUEST,
        Direction::Reply => GUARD_REPLY,
    }
}

/// Marks this thread as holding an open prepare window.
pub(crate) fn guard_arm(_dir: Direction) {
    #[cfg(debug_assertions)]
    NPAM_GUARD.with(|g| g.set(g.get() | guard_bit(_dir)));
}

/// Closes the window opened by [`guard_arm`]. Runs before the commit
/// touches the network so that handlers running under the commit's
/// poll may open their own reply windows.
pub(crate) fn guard_disarm(_dir: Direction) {
    #[cfg(debug_assertions)]
    NPAM_GUARD.with(|g| g.set(g.get() & !guard_bit(_dir)));
}

/// Rejects injection attempts made inside an open prepare window.
///
/// A reply prepare bars all traffic until its commit. A request
/// prepare bars further request traffic and polling but admits reply
/// operations, so a handler can still answer its request while the
/// window is open.
pub(crate) fn guard_check_injection(_for_reply: bool) {
    #[cfg(debug_assertions)]
    NPAM_GUARD.with(|g| {
        let armed = g.get();
        if armed & GUARD_REPLY != 0 {
            panic!("communication is not allowed between a reply prepare and its commit");
        }
        if !_for_reply && armed & GUARD_REQUEST != 0 {
            panic!("communication is not allowed between a request prepare and its commit");
        }
    });
}
