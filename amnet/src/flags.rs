//! Flag sets and small enums shared across the crate.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bitflags::bitflags;

bitflags! {
    /// Capabilities declared when registering a handler.
    ///
    /// A typed entry names one direction or both, and exactly one
    /// payload category. Wildcard entries installed through the legacy
    /// table carry every bit plus [`EntryFlags::LEGACY`].
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct EntryFlags: u32 {
        /// The handler may be the target of a request.
        const REQUEST = 1 << 0;
        /// The handler may be the target of a reply.
        const REPLY = 1 << 1;
        /// The handler accepts argument-only messages.
        const SHORT = 1 << 2;
        /// The handler accepts messages with an inline payload.
        const MEDIUM = 1 << 3;
        /// The handler accepts messages landing in the peer segment.
        const LONG = 1 << 4;
        /// The entry was installed through the legacy table and
        /// accepts every direction and category.
        const LEGACY = 1 << 5;

        /// Both directions and all three categories.
        const ANY = Self::REQUEST.bits()
            | Self::REPLY.bits()
            | Self::SHORT.bits()
            | Self::MEDIUM.bits()
            | Self::LONG.bits();
    }
}

impl EntryFlags {
    /// All category bits.
    pub const CATEGORY_MASK: EntryFlags = EntryFlags::SHORT
        .union(EntryFlags::MEDIUM)
        .union(EntryFlags::LONG);

    /// All direction bits.
    pub const DIRECTION_MASK: EntryFlags = EntryFlags::REQUEST.union(EntryFlags::REPLY);

    /// Number of category bits set.
    pub(crate) fn category_count(self) -> u32 {
        self.intersection(Self::CATEGORY_MASK).bits().count_ones()
    }
}

bitflags! {
    /// Per-call options accepted by the injection and query entry points.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct SendFlags: u32 {
        /// Fail with `Error::Resource` instead of stalling when the
        /// destination queue is full, and skip the pre-injection poll.
        const IMMEDIATE = 1 << 0;
        /// The caller will supply its own payload buffer to a prepare
        /// call and wants the least bound honored over the usual
        /// maximum guarantee.
        const LEAST_CLIENT = 1 << 1;
        /// Same as [`SendFlags::LEAST_CLIENT`] but for transport
        /// allocated buffers.
        const LEAST_ALLOC = 1 << 2;
    }
}

bitflags! {
    /// Fields a handler can request from [`crate::token::Token::info`].
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct TokenMask: u32 {
        /// Rank that injected the message.
        const SRC_RANK = 1 << 0;
        /// Index of the endpoint the message arrived on.
        const EP = 1 << 1;
        /// Registered entry for the handler being run.
        const ENTRY = 1 << 2;
        /// Whether the message was a request.
        const IS_REQUEST = 1 << 3;
        /// Whether the message carried a segment payload.
        const IS_LONG = 1 << 4;

        /// Every queryable field.
        const ALL = Self::SRC_RANK.bits()
            | Self::EP.bits()
            | Self::ENTRY.bits()
            | Self::IS_REQUEST.bits()
            | Self::IS_LONG.bits();
    }
}

/// Payload category of a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Category {
    /// Arguments only.
    Short,
    /// Payload delivered alongside the arguments into a bounce buffer.
    Medium,
    /// Payload written into the destination segment at a caller-chosen
    /// offset.
    Long,
}

impl Category {
    pub(crate) fn flag(self) -> EntryFlags {
        match self {
            Category::Short => EntryFlags::SHORT,
            Category::Medium => EntryFlags::MEDIUM,
            Category::Long => EntryFlags::LONG,
        }
    }

    pub(crate) fn name(self) -> &'static str {
        match self {
            Category::Short => "short",
            Category::Medium => "medium",
            Category::Long => "long",
        }
    }
}

/// Direction of a message relative to the exchange it belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Unsolicited message, may be answered by at most one reply.
    Request,
    /// Answer to a request, sent from the request handler.
    Reply,
}

impl Direction {
    pub(crate) fn flag(self) -> EntryFlags {
        match self {
            Direction::Request => EntryFlags::REQUEST,
            Direction::Reply => EntryFlags::REPLY,
        }
    }
}

/// Local completion policy for a payload-carrying send.
///
/// The transport copies payloads before the injection call returns, so
/// every variant observes completion by return. The variants still
/// differ in bookkeeping: [`LcOpt::Event`] additionally signals the
/// supplied event, while [`LcOpt::Group`] and [`LcOpt::Defer`] are
/// rejected for replies.
#[derive(Debug, Clone, Default)]
pub enum LcOpt {
    /// The payload is reusable when the call returns.
    #[default]
    Now,
    /// Count the completion toward the caller's bulk accounting
    /// instead of an individual event. Requests only.
    Group,
    /// Signal the given event once the payload has been captured.
    Event(CompletionEvent),
    /// The caller polls for completion through other means. Not legal
    /// for replies or capacity queries.
    Defer,
}

/// Completion flag signaled when a payload has been captured by the
/// transport. Cheap to clone; all clones observe the same signal.
#[derive(Debug, Clone, Default)]
pub struct CompletionEvent {
    signaled: Arc<AtomicBool>,
}

impl CompletionEvent {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the associated payload has been captured.
    pub fn is_done(&self) -> bool {
        self.signaled.load(Ordering::Acquire)
    }

    pub(crate) fn signal(&self) {
        self.signaled.store(true, Ordering::Release);
    }
}

/// Runs the local completion action for a finished injection.
pub(crate) fn complete_local(lc: &LcOpt) {
    match lc {
        LcOpt::Now | LcOpt::Group => {}
        LcOpt::Event(ev) => ev.signal(),
        LcOpt::Defer => {}
    }
}
