//! Endpoints.
//!
//! An endpoint is one rank's attachment to the cluster: its handler
//! table, its segment, its mailbox, and the injection entry points.
//! Nothing arrives at an endpoint until some thread polls it; all
//! handler execution happens inside `poll` (or inside an injection
//! call that polls on the caller's behalf).

use std::sync::{Arc, Mutex, TryLockError};

use crate::args::Args;
use crate::cluster::{lock_tolerant, ClusterCore};
use crate::config::{CLIENT_RANGE, CORE_RANGE, EXTENDED_RANGE};
use crate::dispatch;
use crate::error::{Error, Result};
use crate::flags::{complete_local, Category, Direction, LcOpt, SendFlags};
use crate::handler::{self, HandlerEntry, HandlerTable, LegacyEntry};
use crate::limits;
use crate::nbrhd::{self, NbrhdPort};
use crate::npam;
use crate::segment::Segment;
use crate::srcdesc::{self, SrcDesc};
use crate::token::Route;
use crate::wire::{Frame, InjectError};
use crate::Rank;

/// State shared by every clone of an [`Endpoint`] handle. Dropping the
/// last clone detaches the rank from the cluster.
pub(crate) struct EpShared {
    pub(crate) rank: Rank,
    pub(crate) ep_index: usize,
    pub(crate) cluster: Arc<ClusterCore>,
    pub(crate) table: Mutex<HandlerTable>,
    pub(crate) segment: Segment,
    pub(crate) nbrhd: NbrhdPort,
}

impl Drop for EpShared {
    fn drop(&mut self) {
        self.cluster.detach(self.rank, self.ep_index);
    }
}

/// Drains both arrival paths for `ep`, running handlers inline.
///
/// The network drain is skipped entirely when every rank shares one
/// host; the mailboxes are the only transport then.
pub(crate) fn poll_inner(ep: &EpShared) -> usize {
    let mut delivered = nbrhd::poll(ep);
    if ep.cluster.multi_host {
        let mut net = lock_tolerant(&ep.cluster.net);
        while let Some(frame) = net.pop(ep.rank) {
            dispatch::deliver(ep, frame, Route::Net(&mut net));
            delivered += 1;
        }
    }
    delivered
}

/// Pushes a frame into the fabric, waiting out backpressure.
///
/// On a full destination queue the sender keeps its own endpoint
/// drained while it waits, so two ranks flooding each other still make
/// progress. `immediate` trades the wait for `Error::Resource`.
pub(crate) fn net_inject(ep: &EpShared, frame: Frame, immediate: bool) -> Result<()> {
    let dst = frame.dst;
    let mut frame = frame;
    loop {
        let outcome = lock_tolerant(&ep.cluster.net).inject(frame);
        match outcome {
            Ok(()) => return Ok(()),
            Err(InjectError::Full(rejected)) => {
                if immediate {
                    return Err(Error::Resource(format!(
                        "network queue toward rank {} is full",
                        dst
                    )));
                }
                frame = rejected;
                poll_inner(ep);
                ep.cluster.wait_mode().relax();
            }
            Err(InjectError::Gone) => {
                return Err(Error::NotInitialized(format!(
                    "rank {} dropped its endpoint",
                    dst
                )));
            }
        }
    }
}

/// A rank's live attachment to a cluster.
///
/// Handles are cheap clones of shared state and may be used from any
/// thread. The endpoint leaves the cluster when the last handle drops.
#[derive(Clone)]
pub struct Endpoint {
    shared: Arc<EpShared>,
}

impl Endpoint {
    pub(crate) fn new(shared: Arc<EpShared>) -> Self {
        Endpoint { shared }
    }

    /// This endpoint's rank.
    #[inline]
    pub fn rank(&self) -> Rank {
        self.shared.rank
    }

    /// Cluster-wide index of this endpoint, as reported by token
    /// introspection on messages it receives.
    #[inline]
    pub fn index(&self) -> usize {
        self.shared.ep_index
    }

    /// Size of the attached segment in bytes.
    #[inline]
    pub fn segment_len(&self) -> usize {
        self.shared.segment.len()
    }

    /// Delivers pending messages, running their handlers on this
    /// thread. Returns how many were delivered. This is the only
    /// delivery mechanism; a cluster where nobody polls receives
    /// nothing.
    pub fn poll(&self) -> usize {
        dispatch::check_not_in_handler("polling");
        srcdesc::guard_check_injection(false);
        poll_inner(&self.shared)
    }

    /// Like [`Endpoint::poll`] but never waits for the network lock.
    /// Returns `None` when the lock was contended; the mailbox is
    /// drained either way. Meant for progress attempts from contexts
    /// that cannot afford to block, such as fatal error paths.
    pub fn poll_cautious(&self) -> Option<usize> {
        dispatch::check_not_in_handler("polling");
        srcdesc::guard_check_injection(false);
        let ep = &*self.shared;
        let mut delivered = 0;
        while let Some(frame) = ep.nbrhd.try_pop() {
            dispatch::deliver(ep, frame, Route::Nbrhd);
            delivered += 1;
        }
        if ep.cluster.multi_host {
            let mut net = match ep.cluster.net.try_lock() {
                Ok(guard) => guard,
                Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner(),
                Err(TryLockError::WouldBlock) => return None,
            };
            while let Some(frame) = net.pop(ep.rank) {
                dispatch::deliver(ep, frame, Route::Net(&mut net));
                delivered += 1;
            }
        }
        Some(delivered)
    }

    /// Registers client handlers into `[128, 256)`.
    pub fn register_handlers(&self, entries: &mut [HandlerEntry]) -> Result<usize> {
        self.register_range(entries, CLIENT_RANGE)
    }

    /// Registers core-layer handlers into `[1, 64)`.
    pub fn register_core_handlers(&self, entries: &mut [HandlerEntry]) -> Result<usize> {
        self.register_range(entries, CORE_RANGE)
    }

    /// Registers extended-layer handlers into `[64, 128)`.
    pub fn register_extended_handlers(&self, entries: &mut [HandlerEntry]) -> Result<usize> {
        self.register_range(entries, EXTENDED_RANGE)
    }

    fn register_range(
        &self,
        entries: &mut [HandlerEntry],
        range: (usize, usize),
    ) -> Result<usize> {
        dispatch::check_not_in_handler("handler registration");
        let count = lock_tolerant(&self.shared.table).register(entries, range)?;
        tracing::debug!(rank = self.shared.rank, count, "handlers registered");
        Ok(count)
    }

    /// Registers a legacy table of bare `(index, fn)` rows. The rows
    /// become wildcard entries; assigned indices are written back.
    pub fn register_legacy(&self, entries: &mut [LegacyEntry]) -> Result<usize> {
        let mut modern = handler::legacy_entries(entries);
        let count = self.register_range(&mut modern, CLIENT_RANGE)?;
        for (legacy, entry) in entries.iter_mut().zip(modern.iter()) {
            legacy.index = entry.index;
        }
        Ok(count)
    }

    /// Sends an argument-only request to `rank`.
    pub fn request_short(
        &self,
        rank: Rank,
        handler: u8,
        args: &Args,
        flags: SendFlags,
    ) -> Result<()> {
        self.send_request(Category::Short, rank, handler, &[], 0, LcOpt::Now, flags, args)
    }

    /// Sends a request whose payload is delivered inline.
    pub fn request_medium(
        &self,
        rank: Rank,
        handler: u8,
        payload: &[u8],
        lc: LcOpt,
        flags: SendFlags,
        args: &Args,
    ) -> Result<()> {
        self.send_request(Category::Medium, rank, handler, payload, 0, lc, flags, args)
    }

    /// Sends a request whose payload lands in `rank`'s segment at
    /// `dest_addr`.
    #[allow(clippy::too_many_arguments)]
    pub fn request_long(
        &self,
        rank: Rank,
        handler: u8,
        payload: &[u8],
        dest_addr: usize,
        lc: LcOpt,
        flags: SendFlags,
        args: &Args,
    ) -> Result<()> {
        self.send_request(Category::Long, rank, handler, payload, dest_addr, lc, flags, args)
    }

    #[allow(clippy::too_many_arguments)]
    fn send_request(
        &self,
        cat: Category,
        rank: Rank,
        handler: u8,
        payload: &[u8],
        dest_addr: usize,
        lc: LcOpt,
        flags: SendFlags,
        args: &Args,
    ) -> Result<()> {
        dispatch::check_not_in_handler("request injection");
        srcdesc::guard_check_injection(false);
        let ep = &*self.shared;
        if rank as usize >= ep.cluster.nranks() {
            return Err(Error::BadArgument(format!("rank {} does not exist", rank)));
        }
        let nbrhd = ep.cluster.same_host(ep.rank, rank);
        if cat != Category::Short {
            let limit = limits::max_payload(&ep.cluster.config, cat, nbrhd);
            if payload.len() > limit {
                return Err(Error::BadArgument(format!(
                    "{} byte {} payload exceeds the {} byte limit",
                    payload.len(),
                    cat.name(),
                    limit
                )));
            }
        }
        if cat == Category::Long {
            let seg_len = ep.cluster.seg_len_of(rank)?;
            if dest_addr
                .checked_add(payload.len())
                .map_or(true, |end| end > seg_len)
            {
                return Err(Error::BadArgument(format!(
                    "long landing zone [{}, +{}) exceeds rank {} segment of {} bytes",
                    dest_addr,
                    payload.len(),
                    rank,
                    seg_len
                )));
            }
        }
        // Injection doubles as a progress point so that a rank which
        // only ever sends still serves its inbound requests.
        if !flags.contains(SendFlags::IMMEDIATE) {
            poll_inner(ep);
        }
        let frame = Frame {
            src: ep.rank,
            dst: rank,
            handler,
            cat,
            is_req: true,
            args: *args,
            payload: Box::from(payload),
            dest_addr,
        };
        if nbrhd {
            nbrhd::inject(ep, frame, flags.contains(SendFlags::IMMEDIATE), true)?;
        } else {
            net_inject(ep, frame, flags.contains(SendFlags::IMMEDIATE))?;
        }
        complete_local(&lc);
        tracing::trace!(to = rank, handler, category = cat.name(), "request sent");
        Ok(())
    }

    /// Opens a negotiated medium request toward `rank`. See
    /// [`SrcDesc`] for the fill-and-commit protocol.
    pub fn prepare_request_medium<'b>(
        &self,
        rank: Rank,
        client_buffer: Option<&'b [u8]>,
        least: usize,
        most: usize,
        lc: LcOpt,
        flags: SendFlags,
        nargs: u8,
    ) -> Result<SrcDesc<'b>> {
        npam::prepare_request(
            &self.shared,
            Category::Medium,
            rank,
            client_buffer,
            least,
            most,
            None,
            lc,
            flags,
            nargs,
        )
    }

    /// Opens a negotiated long request toward `rank`. The landing
    /// address may be fixed now or left to the commit.
    #[allow(clippy::too_many_arguments)]
    pub fn prepare_request_long<'b>(
        &self,
        rank: Rank,
        client_buffer: Option<&'b [u8]>,
        least: usize,
        most: usize,
        dest_addr: Option<usize>,
        lc: LcOpt,
        flags: SendFlags,
        nargs: u8,
    ) -> Result<SrcDesc<'b>> {
        npam::prepare_request(
            &self.shared,
            Category::Long,
            rank,
            client_buffer,
            least,
            most,
            dest_addr,
            lc,
            flags,
            nargs,
        )
    }

    /// Closes a prepared medium request, sending `nbytes` of payload.
    pub fn commit_request_medium(
        &self,
        sd: SrcDesc<'_>,
        handler: u8,
        nbytes: usize,
        args: &Args,
    ) {
        npam::commit_request(&self.shared, sd, Category::Medium, handler, nbytes, 0, args);
    }

    /// Closes a prepared long request, landing `nbytes` at `dest_addr`.
    pub fn commit_request_long(
        &self,
        sd: SrcDesc<'_>,
        handler: u8,
        nbytes: usize,
        dest_addr: usize,
        args: &Args,
    ) {
        npam::commit_request(
            &self.shared,
            sd,
            Category::Long,
            handler,
            nbytes,
            dest_addr,
            args,
        );
    }

    /// Largest medium request payload toward `rank`.
    pub fn max_request_medium(
        &self,
        rank: Rank,
        lc: &LcOpt,
        flags: SendFlags,
        nargs: u8,
    ) -> usize {
        self.max_request(Category::Medium, rank, lc, flags, nargs)
    }

    /// Largest long request payload toward `rank`.
    pub fn max_request_long(
        &self,
        rank: Rank,
        lc: &LcOpt,
        flags: SendFlags,
        nargs: u8,
    ) -> usize {
        self.max_request(Category::Long, rank, lc, flags, nargs)
    }

    fn max_request(
        &self,
        cat: Category,
        rank: Rank,
        lc: &LcOpt,
        flags: SendFlags,
        nargs: u8,
    ) -> usize {
        let nbrhd = self.shared.cluster.same_host(self.shared.rank, rank);
        limits::query(
            &self.shared.cluster.config,
            Direction::Request,
            cat,
            nbrhd,
            lc,
            flags,
            nargs,
        )
    }

    /// Largest medium reply payload toward `rank`, for sizing ahead of
    /// the request that will trigger the reply. Inside a handler,
    /// [`Token::max_reply_medium`](crate::token::Token::max_reply_medium)
    /// answers for the concrete message.
    pub fn max_reply_medium(
        &self,
        rank: Rank,
        lc: &LcOpt,
        flags: SendFlags,
        nargs: u8,
    ) -> usize {
        self.max_reply(Category::Medium, rank, lc, flags, nargs)
    }

    /// Largest long reply payload toward `rank`.
    pub fn max_reply_long(
        &self,
        rank: Rank,
        lc: &LcOpt,
        flags: SendFlags,
        nargs: u8,
    ) -> usize {
        self.max_reply(Category::Long, rank, lc, flags, nargs)
    }

    fn max_reply(
        &self,
        cat: Category,
        rank: Rank,
        lc: &LcOpt,
        flags: SendFlags,
        nargs: u8,
    ) -> usize {
        let nbrhd = self.shared.cluster.same_host(self.shared.rank, rank);
        limits::query(
            &self.shared.cluster.config,
            Direction::Reply,
            cat,
            nbrhd,
            lc,
            flags,
            nargs,
        )
    }

    /// Medium payload size every peer is guaranteed to accept.
    pub fn lub_medium(&self) -> usize {
        limits::lub(&self.shared.cluster.config, Category::Medium)
    }

    /// Long payload size every peer is guaranteed to accept.
    pub fn lub_long(&self) -> usize {
        limits::lub(&self.shared.cluster.config, Category::Long)
    }
}
