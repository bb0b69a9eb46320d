//! Negotiated-payload sends.
//!
//! The prepare step sizes the payload window, secures a buffer and
//! opens the thread's injection window; the commit step captures the
//! payload, closes the window and injects. The window closes before
//! any network activity so that a self-destined commit, which runs its
//! handler in-band, can legally prepare a reply.

use crate::args::Args;
use crate::dispatch;
use crate::endpoint::{self, EpShared};
use crate::error::{Error, Result};
use crate::flags::{complete_local, Category, Direction, LcOpt, SendFlags};
use crate::limits;
use crate::nbrhd;
use crate::srcdesc::{self, PayloadBuf, SdBuf, SrcDesc};
use crate::token::{Route, Token};
use crate::wire::{Frame, InjectError};
use crate::Rank;

/// Opens a negotiated request toward `rank`.
///
/// Polls once before opening the window, unless `IMMEDIATE` asked for
/// a strictly non-blocking attempt.
#[allow(clippy::too_many_arguments)]
pub(crate) fn prepare_request<'b>(
    ep: &EpShared,
    cat: Category,
    rank: Rank,
    client_buffer: Option<&'b [u8]>,
    least: usize,
    most: usize,
    dest_addr: Option<usize>,
    lc: LcOpt,
    flags: SendFlags,
    nargs: u8,
) -> Result<SrcDesc<'b>> {
    dispatch::check_not_in_handler("request preparation");
    srcdesc::guard_check_injection(false);
    if rank as usize >= ep.cluster.nranks() {
        return Err(Error::BadArgument(format!("rank {} does not exist", rank)));
    }
    if !flags.contains(SendFlags::IMMEDIATE) {
        endpoint::poll_inner(ep);
    }
    let nbrhd = ep.cluster.same_host(ep.rank, rank);
    prepare_common(
        ep,
        Direction::Request,
        cat,
        rank,
        nbrhd,
        client_buffer,
        least,
        most,
        dest_addr,
        lc,
        flags,
        nargs,
    )
}

/// Opens a negotiated reply for the request `token` is handling.
/// Never polls; it runs in handler context.
#[allow(clippy::too_many_arguments)]
pub(crate) fn prepare_reply<'b>(
    token: &mut Token<'_>,
    cat: Category,
    client_buffer: Option<&'b [u8]>,
    least: usize,
    most: usize,
    dest_addr: Option<usize>,
    lc: LcOpt,
    flags: SendFlags,
    nargs: u8,
) -> Result<SrcDesc<'b>> {
    srcdesc::guard_check_injection(true);
    if !token.is_req {
        return Err(Error::BadArgument(
            "a reply handler cannot send a further reply".to_string(),
        ));
    }
    if token.replied {
        return Err(Error::BadArgument(
            "at most one reply may answer a request".to_string(),
        ));
    }
    let nbrhd = token.is_nbrhd();
    prepare_common(
        token.ep,
        Direction::Reply,
        cat,
        token.src,
        nbrhd,
        client_buffer,
        least,
        most,
        dest_addr,
        lc,
        flags,
        nargs,
    )
}

#[allow(clippy::too_many_arguments)]
fn prepare_common<'b>(
    ep: &EpShared,
    dir: Direction,
    cat: Category,
    dest: Rank,
    nbrhd: bool,
    client_buffer: Option<&'b [u8]>,
    least: usize,
    most: usize,
    dest_addr: Option<usize>,
    lc: LcOpt,
    flags: SendFlags,
    nargs: u8,
) -> Result<SrcDesc<'b>> {
    debug_assert!(
        cat != Category::Short,
        "short messages carry no negotiable payload"
    );
    limits::check_query_args(dir, &lc, flags, nargs);
    let limit = limits::max_payload(&ep.cluster.config, cat, nbrhd);
    #[cfg(debug_assertions)]
    {
        if least > most {
            panic!("least payload {} exceeds most payload {}", least, most);
        }
        let honoring_least =
            flags.intersects(SendFlags::LEAST_CLIENT | SendFlags::LEAST_ALLOC);
        if !honoring_least && most.min(limit) < least {
            panic!(
                "negotiated size {} cannot satisfy the least payload bound {}",
                most.min(limit),
                least
            );
        }
    }
    let size = most.min(limit);
    if flags.contains(SendFlags::IMMEDIATE)
        && dir == Direction::Request
        && !has_room(ep, dest, nbrhd)
    {
        return Err(Error::Resource(format!(
            "no immediate send capacity toward rank {}",
            dest
        )));
    }
    let buf = match client_buffer {
        Some(bytes) => {
            assert!(
                bytes.len() >= size,
                "client buffer holds {} bytes but the negotiated size is {}",
                bytes.len(),
                size
            );
            SdBuf::Client(bytes)
        }
        None => SdBuf::Owned(PayloadBuf::new(size)?),
    };
    srcdesc::guard_arm(dir);
    tracing::trace!(to = dest, category = cat.name(), size, "send prepared");
    Ok(SrcDesc::new(
        dir, cat, dest, nbrhd, buf, size, dest_addr, lc, flags, nargs,
    ))
}

/// Best-effort capacity probe for `IMMEDIATE` prepares. A peer that
/// has already vanished reports room; the commit surfaces that case.
fn has_room(ep: &EpShared, dest: Rank, nbrhd: bool) -> bool {
    if dest == ep.rank {
        return true;
    }
    if nbrhd {
        match ep.cluster.nbrhd_tx(dest) {
            Ok(tx) => !tx.is_full(),
            Err(_) => true,
        }
    } else {
        !crate::cluster::lock_tolerant(&ep.cluster.net).request_queue_full(dest)
    }
}

fn payload_bytes(sd: &SrcDesc<'_>, nbytes: usize) -> Box<[u8]> {
    let bytes = match &sd.buf {
        SdBuf::Client(buf) => &buf[..nbytes],
        SdBuf::Owned(buf) => &buf.as_slice()[..nbytes],
    };
    Box::from(bytes)
}

/// Closes a prepared request: captures `nbytes` of payload, closes the
/// injection window and sends. The commit itself cannot fail back to
/// the caller; a vanished peer is reported by debug builds and the
/// message is dropped otherwise, matching the fire-and-forget contract
/// of the fixed-payload path once validation has passed.
pub(crate) fn commit_request(
    ep: &EpShared,
    sd: SrcDesc<'_>,
    cat: Category,
    handler: u8,
    nbytes: usize,
    dest_addr: usize,
    args: &Args,
) {
    debug_assert!(
        sd.dir == Direction::Request,
        "reply descriptor committed as a request"
    );
    debug_assert!(
        sd.cat == cat,
        "{} descriptor committed as {}",
        sd.cat.name(),
        cat.name()
    );
    debug_assert!(
        usize::from(sd.nargs) == args.len(),
        "commit carries {} arguments but prepare declared {}",
        args.len(),
        sd.nargs
    );
    debug_assert!(
        nbytes <= sd.size,
        "commit supplies {} bytes but only {} were negotiated",
        nbytes,
        sd.size
    );
    #[cfg(debug_assertions)]
    if cat == Category::Long {
        if let Some(prepared) = sd.dest_addr {
            assert_eq!(
                prepared, dest_addr,
                "commit names a different landing address than prepare"
            );
        }
        if let Ok(seg_len) = ep.cluster.seg_len_of(sd.dest) {
            assert!(
                dest_addr.checked_add(nbytes).map_or(false, |end| end <= seg_len),
                "long landing zone [{}, +{}) escapes rank {} segment of {} bytes",
                dest_addr,
                nbytes,
                sd.dest,
                seg_len
            );
        }
    }
    srcdesc::guard_disarm(Direction::Request);
    let frame = Frame {
        src: ep.rank,
        dst: sd.dest,
        handler,
        cat,
        is_req: true,
        args: *args,
        payload: payload_bytes(&sd, nbytes),
        dest_addr,
    };
    let _result = if sd.nbrhd {
        nbrhd::inject(ep, frame, false, true)
    } else {
        endpoint::net_inject(ep, frame, false)
    };
    debug_assert!(
        _result.is_ok(),
        "request commit failed: {:?}",
        _result.err()
    );
    complete_local(&sd.lc);
    drop(sd);
}

/// Closes a prepared reply through the token it was prepared for.
pub(crate) fn commit_reply(
    token: &mut Token<'_>,
    sd: SrcDesc<'_>,
    cat: Category,
    handler: u8,
    nbytes: usize,
    dest_addr: usize,
    args: &Args,
) {
    debug_assert!(
        sd.dir == Direction::Reply,
        "request descriptor committed as a reply"
    );
    debug_assert!(
        sd.cat == cat,
        "{} descriptor committed as {}",
        sd.cat.name(),
        cat.name()
    );
    debug_assert!(
        usize::from(sd.nargs) == args.len(),
        "commit carries {} arguments but prepare declared {}",
        args.len(),
        sd.nargs
    );
    debug_assert!(
        nbytes <= sd.size,
        "commit supplies {} bytes but only {} were negotiated",
        nbytes,
        sd.size
    );
    debug_assert!(
        sd.dest == token.src,
        "reply committed through a different token than it was prepared for"
    );
    debug_assert!(sd.nbrhd == token.is_nbrhd());
    #[cfg(debug_assertions)]
    if cat == Category::Long {
        if let Some(prepared) = sd.dest_addr {
            assert_eq!(
                prepared, dest_addr,
                "commit names a different landing address than prepare"
            );
        }
        if let Ok(seg_len) = token.ep.cluster.seg_len_of(token.src) {
            assert!(
                dest_addr.checked_add(nbytes).map_or(false, |end| end <= seg_len),
                "long landing zone [{}, +{}) escapes rank {} segment of {} bytes",
                dest_addr,
                nbytes,
                token.src,
                seg_len
            );
        }
    }
    srcdesc::guard_disarm(Direction::Reply);
    let frame = Frame {
        src: token.ep.rank,
        dst: token.src,
        handler,
        cat,
        is_req: false,
        args: *args,
        payload: payload_bytes(&sd, nbytes),
        dest_addr,
    };
    let _result: Result<()> = match &mut token.route {
        Route::Net(net) => match net.inject(frame) {
            Ok(()) => Ok(()),
            Err(InjectError::Gone) => Err(Error::NotInitialized(format!(
                "rank {} dropped its endpoint",
                token.src
            ))),
            Err(InjectError::Full(_)) => {
                unreachable!("replies are exempt from the queue bound")
            }
        },
        Route::Nbrhd => nbrhd::inject(token.ep, frame, false, false),
    };
    debug_assert!(_result.is_ok(), "reply commit failed: {:?}", _result.err());
    token.replied = true;
    complete_local(&sd.lc);
    drop(sd);
}
