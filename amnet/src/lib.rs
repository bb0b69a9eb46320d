//! amnet - Active-message transport with handler tables, negotiated payloads and a same-host fast path.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                          Cluster                                 │
//! │  ┌──────────────┐  ┌──────────────────────────────────────────┐ │
//! │  │   NetCore    │  │  Rank registry                           │ │
//! │  │ (one mutex,  │  │  topology, segments, mailbox senders     │ │
//! │  │ per-dst      │  │                                          │ │
//! │  │ queues)      │  │                                          │ │
//! │  └──────────────┘  └──────────────────────────────────────────┘ │
//! │                                                                  │
//! │  poll() drains mailbox + net queue → handler runs on that thread │
//! └─────────────────────────────────────────────────────────────────┘
//!                     │
//!           ┌─────────┼─────────┐
//!           ▼         ▼         ▼
//!     ┌──────────┐ ┌──────────┐ ┌──────────┐
//!     │ Endpoint │ │ Endpoint │ │ Endpoint │
//!     │ table +  │ │ table +  │ │ table +  │
//!     │ segment  │ │ segment  │ │ segment  │
//!     └──────────┘ └──────────┘ └──────────┘
//! ```
//!
//! - **One network lock**: cross-host traffic serializes on the cluster's
//!   `NetCore` mutex; handlers for network arrivals run while it is held,
//!   and their replies reuse it through the token
//! - **Neighborhood fast path**: same-host peers bypass the network lock
//!   entirely and exchange frames through bounded per-endpoint mailboxes
//! - **Poll-driven**: nothing is delivered until a thread polls the
//!   receiving endpoint; injection calls poll on the caller's behalf so
//!   busy senders still serve inbound requests
//!
//! Handlers are plain functions registered into a 256-slot table (index 0
//! is the unregistered-handler sentinel). A message names its handler by
//! index and carries up to [`MAX_ARGS`] word arguments plus a payload:
//! none ([`Category::Short`]), inline ([`Category::Medium`]) or written
//! into the receiver's segment ([`Category::Long`]). Requests may be
//! answered at most once through the handler's [`Token`]. Payloads above
//! what the caller wants to copy twice go through the prepare/commit
//! protocol on [`SrcDesc`].

pub mod args;
pub mod cluster;
pub mod config;
pub mod endpoint;
pub mod error;
pub mod flags;
pub mod handler;
pub mod token;

mod dispatch;
mod limits;
mod nbrhd;
mod npam;
mod segment;
mod srcdesc;
mod wire;

pub use args::{Args, MAX_ARGS};
pub use cluster::{Cluster, ClusterBuilder};
pub use config::{
    AmConfig, WaitMode, CLIENT_RANGE, CORE_RANGE, EXTENDED_RANGE, MIN_MEDIUM, TABLE_SIZE,
};
pub use endpoint::Endpoint;
pub use error::{Error, Result};
pub use flags::{
    Category, CompletionEvent, Direction, EntryFlags, LcOpt, SendFlags, TokenMask,
};
pub use handler::{HandlerEntry, HandlerFn, LegacyEntry, NARGS_UNKNOWN};
pub use srcdesc::SrcDesc;
pub use token::{Token, TokenInfo};

/// Identifies one member of a cluster. Ranks are dense, starting at 0.
pub type Rank = u32;
