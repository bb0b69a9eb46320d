//! Handler invocation.
//!
//! Both delivery paths funnel through [`deliver`]: resolve the handler
//! entry, land the payload, build the token, run the function. The
//! handler table lock is only held for the resolution step, never
//! across the handler itself, so handlers are free to consult the
//! table through token introspection.

use std::cell::Cell;

use crate::endpoint::EpShared;
use crate::flags::Category;
use crate::token::{Route, Token};
use crate::wire::Frame;

#[cfg(debug_assertions)]
use crate::flags::EntryFlags;
#[cfg(debug_assertions)]
use crate::handler::{HandlerEntry, NARGS_UNKNOWN};

thread_local! {
    static HANDLER_DEPTH: Cell<u32> = Cell::new(0);
}

#[cfg(debug_assertions)]
pub(crate) fn in_handler() -> bool {
    HANDLER_DEPTH.with(|depth| depth.get() > 0)
}

/// Rejects operations that are off limits inside a handler: polling
/// and every form of request injection. Replies stay legal.
pub(crate) fn check_not_in_handler(_what: &str) {
    #[cfg(debug_assertions)]
    if in_handler() {
        panic!("{} is not allowed from handler context", _what);
    }
}

struct DepthGuard;

impl DepthGuard {
    fn enter() -> DepthGuard {
        HANDLER_DEPTH.with(|depth| depth.set(depth.get() + 1));
        DepthGuard
    }
}

impl Drop for DepthGuard {
    fn drop(&mut self) {
        HANDLER_DEPTH.with(|depth| depth.set(depth.get() - 1));
    }
}

#[cfg(debug_assertions)]
fn check_delivery(ep: &EpShared, entry: &HandlerEntry, frame: &Frame) {
    if entry.nargs != NARGS_UNKNOWN && usize::from(entry.nargs) != frame.args.len() {
        panic!(
            "handler #{} invoked with {} arguments but registered with {}",
            entry.index,
            frame.args.len(),
            entry.nargs
        );
    }
    let dir = if frame.is_req {
        EntryFlags::REQUEST
    } else {
        EntryFlags::REPLY
    };
    if !entry.flags.contains(dir) {
        panic!(
            "handler #{} does not accept {}s",
            entry.index,
            if frame.is_req { "request" } else { "reply" }
        );
    }
    if !entry.flags.contains(frame.cat.flag()) {
        panic!(
            "handler #{} does not accept {} messages",
            entry.index,
            frame.cat.name()
        );
    }
    if frame.cat == Category::Long {
        ep.segment
            .check_range(frame.dest_addr, frame.payload.len())
            .expect("long landing zone escapes the segment");
    }
}

/// Delivers one frame to its handler on the current thread.
pub(crate) fn deliver<'a>(ep: &'a EpShared, frame: Frame, route: Route<'a>) {
    let entry = crate::cluster::lock_tolerant(&ep.table).lookup(frame.handler);
    #[cfg(debug_assertions)]
    check_delivery(ep, &entry, &frame);

    let payload: &[u8] = match frame.cat {
        Category::Short => &[],
        Category::Medium => &frame.payload,
        // The caller serializes delivery for this endpoint (network
        // lock or mailbox drain), so the landing region is quiescent
        // for the duration of the write and the handler borrow.
        Category::Long => unsafe {
            ep.segment.write(frame.dest_addr, &frame.payload);
            ep.segment.range(frame.dest_addr, frame.payload.len())
        },
    };
    tracing::trace!(
        src = frame.src,
        handler = frame.handler,
        category = frame.cat.name(),
        nbytes = frame.payload.len(),
        "delivering"
    );
    let mut token = Token {
        ep,
        src: frame.src,
        handler: frame.handler,
        cat: frame.cat,
        is_req: frame.is_req,
        route,
        replied: false,
    };
    let _depth = DepthGuard::enter();
    (entry.func)(&mut token, payload, &frame.args);
}
