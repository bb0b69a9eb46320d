//! Handler tokens.
//!
//! Every handler invocation receives a [`Token`] describing the message
//! being delivered. The token is the only way to answer a request: it
//! knows which path the message arrived on and routes the reply back
//! over it. For cross-host messages that path is the network lock the
//! poller already holds, so a reply from handler context never takes
//! the lock a second time.

use crate::args::Args;
use crate::cluster::lock_tolerant;
use crate::endpoint::EpShared;
use crate::error::{Error, Result};
use crate::flags::{complete_local, Category, Direction, LcOpt, SendFlags, TokenMask};
use crate::handler::HandlerEntry;
use crate::limits;
use crate::nbrhd;
use crate::npam;
use crate::srcdesc::{self, SrcDesc};
use crate::wire::{Frame, InjectError, NetCore};
use crate::Rank;

#[cfg(debug_assertions)]
use crate::flags::EntryFlags;

/// How a message reached this endpoint, and therefore how its reply
/// leaves. Network arrivals carry the exclusive borrow of the fabric
/// that delivery holds anyway; same-host arrivals need nothing.
pub(crate) enum Route<'a> {
    Net(&'a mut NetCore),
    Nbrhd,
}

/// Fields describing a message in delivery, filled on demand by
/// [`Token::info`]. A field is `None` unless it was both requested and
/// available on the arrival path.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokenInfo {
    /// Rank that injected the message.
    pub src_rank: Option<Rank>,
    /// Index of the receiving endpoint.
    pub ep_index: Option<usize>,
    /// Table entry of the handler being run.
    pub entry: Option<HandlerEntry>,
    /// Whether the message is a request.
    pub is_request: Option<bool>,
    /// Whether the payload landed in the segment.
    pub is_long: Option<bool>,
}

/// Identity of one message delivery, passed to its handler.
pub struct Token<'a> {
    pub(crate) ep: &'a EpShared,
    pub(crate) src: Rank,
    pub(crate) handler: u8,
    pub(crate) cat: Category,
    pub(crate) is_req: bool,
    pub(crate) route: Route<'a>,
    pub(crate) replied: bool,
}

impl<'a> Token<'a> {
    /// Rank that sent the message being handled.
    #[inline]
    pub fn src_rank(&self) -> Rank {
        self.src
    }

    /// Whether the handled message is a request. Only request tokens
    /// may send replies.
    #[inline]
    pub fn is_request(&self) -> bool {
        self.is_req
    }

    pub(crate) fn is_nbrhd(&self) -> bool {
        matches!(self.route, Route::Nbrhd)
    }

    fn lookup_entry(&self) -> HandlerEntry {
        lock_tolerant(&self.ep.table).lookup(self.handler)
    }

    /// Queries message metadata.
    ///
    /// `mask` names the fields of interest; the returned mask names the
    /// fields actually filled in. Same-host deliveries supply every
    /// field, network deliveries supply the ones they can reconstruct,
    /// and the source rank and endpoint index are always available.
    pub fn info(&self, mask: TokenMask) -> (TokenInfo, TokenMask) {
        let mut info = TokenInfo {
            src_rank: Some(self.src),
            ep_index: Some(self.ep.ep_index),
            ..TokenInfo::default()
        };
        let mut supplied = TokenMask::SRC_RANK | TokenMask::EP;
        match self.route {
            Route::Nbrhd => {
                info.entry = Some(self.lookup_entry());
                info.is_request = Some(self.is_req);
                info.is_long = Some(self.cat == Category::Long);
                supplied = TokenMask::ALL;
            }
            Route::Net(_) => {
                if mask.contains(TokenMask::ENTRY) {
                    info.entry = Some(self.lookup_entry());
                    supplied |= TokenMask::ENTRY;
                }
                if mask.contains(TokenMask::IS_REQUEST) {
                    info.is_request = Some(self.is_req);
                    supplied |= TokenMask::IS_REQUEST;
                }
                if mask.contains(TokenMask::IS_LONG) {
                    info.is_long = Some(self.cat == Category::Long);
                    supplied |= TokenMask::IS_LONG;
                }
            }
        }
        debug_assert!((self.src as usize) < self.ep.cluster.nranks());
        token_info_return(info, supplied, mask)
    }

    /// Sends an argument-only reply to the request being handled.
    pub fn reply_short(&mut self, handler: u8, args: &Args, flags: SendFlags) -> Result<()> {
        self.reply_common(Category::Short, handler, &[], 0, LcOpt::Now, flags, args)
    }

    /// Sends a reply with an inline payload.
    pub fn reply_medium(
        &mut self,
        handler: u8,
        payload: &[u8],
        lc: LcOpt,
        flags: SendFlags,
        args: &Args,
    ) -> Result<()> {
        self.reply_common(Category::Medium, handler, payload, 0, lc, flags, args)
    }

    /// Sends a reply whose payload lands in the requester's segment at
    /// `dest_addr`.
    pub fn reply_long(
        &mut self,
        handler: u8,
        payload: &[u8],
        dest_addr: usize,
        lc: LcOpt,
        flags: SendFlags,
        args: &Args,
    ) -> Result<()> {
        self.reply_common(Category::Long, handler, payload, dest_addr, lc, flags, args)
    }

    #[allow(clippy::too_many_arguments)]
    fn reply_common(
        &mut self,
        cat: Category,
        handler: u8,
        payload: &[u8],
        dest_addr: usize,
        lc: LcOpt,
        flags: SendFlags,
        args: &Args,
    ) -> Result<()> {
        srcdesc::guard_check_injection(true);
        if !self.is_req {
            return Err(Error::BadArgument(
                "a reply handler cannot send a further reply".to_string(),
            ));
        }
        if self.replied {
            return Err(Error::BadArgument(
                "at most one reply may answer a request".to_string(),
            ));
        }
        limits::check_reply_lc(&lc);
        let nbrhd = self.is_nbrhd();
        if cat != Category::Short {
            let limit = limits::max_payload(&self.ep.cluster.config, cat, nbrhd);
            if payload.len() > limit {
                return Err(Error::BadArgument(format!(
                    "{} byte {} reply exceeds the {} byte limit",
                    payload.len(),
                    cat.name(),
                    limit
                )));
            }
        }
        if cat == Category::Long {
            let seg_len = self.ep.cluster.seg_len_of(self.src)?;
            if dest_addr
                .checked_add(payload.len())
                .map_or(true, |end| end > seg_len)
            {
                return Err(Error::BadArgument(format!(
                    "long reply [{}, +{}) exceeds rank {} segment of {} bytes",
                    dest_addr,
                    payload.len(),
                    self.src,
                    seg_len
                )));
            }
        }
        let frame = Frame {
            src: self.ep.rank,
            dst: self.src,
            handler,
            cat,
            is_req: false,
            args: *args,
            payload: Box::from(payload),
            dest_addr,
        };
        match &mut self.route {
            Route::Net(net) => match net.inject(frame) {
                Ok(()) => {}
                Err(InjectError::Gone) => {
                    return Err(Error::NotInitialized(format!(
                        "rank {} dropped its endpoint",
                        self.src
                    )))
                }
                Err(InjectError::Full(_)) => {
                    unreachable!("replies are exempt from the queue bound")
                }
            },
            Route::Nbrhd => {
                nbrhd::inject(
                    self.ep,
                    frame,
                    flags.contains(SendFlags::IMMEDIATE),
                    false,
                )?;
            }
        }
        self.replied = true;
        complete_local(&lc);
        tracing::trace!(
            to = self.src,
            handler,
            category = cat.name(),
            "reply sent"
        );
        Ok(())
    }

    /// Opens a negotiated-payload reply of medium category.
    ///
    /// Unlike a request prepare this never polls: it runs inside a
    /// handler, where polling is off limits.
    pub fn prepare_reply_medium<'b>(
        &mut self,
        client_buffer: Option<&'b [u8]>,
        least: usize,
        most: usize,
        lc: LcOpt,
        flags: SendFlags,
        nargs: u8,
    ) -> Result<SrcDesc<'b>> {
        npam::prepare_reply(
            self,
            Category::Medium,
            client_buffer,
            least,
            most,
            None,
            lc,
            flags,
            nargs,
        )
    }

    /// Opens a negotiated-payload reply of long category. `dest_addr`
    /// may be fixed now or deferred to the commit.
    #[allow(clippy::too_many_arguments)]
    pub fn prepare_reply_long<'b>(
        &mut self,
        client_buffer: Option<&'b [u8]>,
        least: usize,
        most: usize,
        dest_addr: Option<usize>,
        lc: LcOpt,
        flags: SendFlags,
        nargs: u8,
    ) -> Result<SrcDesc<'b>> {
        npam::prepare_reply(
            self,
            Category::Long,
            client_buffer,
            least,
            most,
            dest_addr,
            lc,
            flags,
            nargs,
        )
    }

    /// Closes a prepared medium reply, sending `nbytes` of its buffer.
    pub fn commit_reply_medium(
        &mut self,
        sd: SrcDesc<'_>,
        handler: u8,
        nbytes: usize,
        args: &Args,
    ) {
        npam::commit_reply(self, sd, Category::Medium, handler, nbytes, 0, args);
    }

    /// Closes a prepared long reply, landing `nbytes` at `dest_addr` in
    /// the requester's segment.
    pub fn commit_reply_long(
        &mut self,
        sd: SrcDesc<'_>,
        handler: u8,
        nbytes: usize,
        dest_addr: usize,
        args: &Args,
    ) {
        npam::commit_reply(self, sd, Category::Long, handler, nbytes, dest_addr, args);
    }

    /// Largest medium reply payload this token can send.
    pub fn max_reply_medium(&self, lc: &LcOpt, flags: SendFlags, nargs: u8) -> usize {
        limits::query(
            &self.ep.cluster.config,
            Direction::Reply,
            Category::Medium,
            self.is_nbrhd(),
            lc,
            flags,
            nargs,
        )
    }

    /// Largest long reply payload this token can send.
    pub fn max_reply_long(&self, lc: &LcOpt, flags: SendFlags, nargs: u8) -> usize {
        limits::query(
            &self.ep.cluster.config,
            Direction::Reply,
            Category::Long,
            self.is_nbrhd(),
            lc,
            flags,
            nargs,
        )
    }
}

/// Post-processes an info query: verifies consistency in debug builds,
/// then narrows the result to the intersection of what was requested
/// and what the arrival path supplied. Fields outside the intersection
/// are cleared so callers cannot rely on them by accident.
pub(crate) fn token_info_return(
    mut info: TokenInfo,
    supplied: TokenMask,
    requested: TokenMask,
) -> (TokenInfo, TokenMask) {
    #[cfg(debug_assertions)]
    {
        assert!(
            TokenMask::ALL.contains(requested),
            "unknown bits {:#x} in token info mask",
            requested.difference(TokenMask::ALL).bits()
        );
        if supplied.contains(TokenMask::ENTRY) {
            let entry = info.entry.as_ref().expect("entry bit set without a value");
            crate::handler::validate_entry(entry);
            if supplied.contains(TokenMask::IS_REQUEST) {
                let dir = if info.is_request.expect("is_request bit set without a value") {
                    EntryFlags::REQUEST
                } else {
                    EntryFlags::REPLY
                };
                assert!(
                    entry.flags.contains(dir),
                    "token direction disagrees with the handler entry"
                );
            }
            if supplied.contains(TokenMask::IS_LONG) {
                let needed = if info.is_long.expect("is_long bit set without a value") {
                    EntryFlags::LONG
                } else {
                    EntryFlags::SHORT | EntryFlags::MEDIUM
                };
                assert!(
                    entry.flags.intersects(needed),
                    "token category disagrees with the handler entry"
                );
            }
        }
    }
    let actual = supplied.intersection(requested);
    if !actual.contains(TokenMask::SRC_RANK) {
        info.src_rank = None;
    }
    if !actual.contains(TokenMask::EP) {
        info.ep_index = None;
    }
    if !actual.contains(TokenMask::ENTRY) {
        info.entry = None;
    }
    if !actual.contains(TokenMask::IS_REQUEST) {
        info.is_request = None;
    }
    if !actual.contains(TokenMask::IS_LONG) {
        info.is_long = None;
    }
    (info, actual)
}
