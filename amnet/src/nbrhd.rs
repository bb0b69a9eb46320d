//! Same-host ("neighborhood") delivery.
//!
//! Peers on one host bypass the network lock entirely: each endpoint
//! owns a bounded mailbox, senders push frames into it, and the owner
//! delivers them while polling. Self-destined frames skip even the
//! mailbox and run their handler in the injecting call.

use std::sync::{Mutex, TryLockError};

use mailbox::TrySendError;

use crate::cluster::lock_tolerant;
use crate::dispatch;
use crate::endpoint::EpShared;
use crate::error::{Error, Result};
use crate::token::Route;
use crate::wire::Frame;

/// Receiving side of an endpoint's mailbox. The mutex admits polling
/// from any thread; frames are popped one at a time so a handler panic
/// cannot strand undelivered frames behind a dead drain loop.
pub(crate) struct NbrhdPort {
    rx: Mutex<mailbox::Receiver<Frame>>,
}

impl NbrhdPort {
    pub(crate) fn new(rx: mailbox::Receiver<Frame>) -> Self {
        NbrhdPort { rx: Mutex::new(rx) }
    }

    fn pop(&self) -> Option<Frame> {
        lock_tolerant(&self.rx).try_recv().ok()
    }

    /// Like `pop` but refuses to wait for a contended lock; a
    /// contending thread is already draining this mailbox.
    pub(crate) fn try_pop(&self) -> Option<Frame> {
        match self.rx.try_lock() {
            Ok(rx) => rx.try_recv().ok(),
            Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner().try_recv().ok(),
            Err(TryLockError::WouldBlock) => None,
        }
    }
}

/// Drains and delivers every frame currently in `ep`'s mailbox.
pub(crate) fn poll(ep: &EpShared) -> usize {
    let mut delivered = 0;
    while let Some(frame) = ep.nbrhd.pop() {
        dispatch::deliver(ep, frame, Route::Nbrhd);
        delivered += 1;
    }
    delivered
}

/// Sends a frame to a same-host peer.
///
/// Requests honor the mailbox bound: on a full queue the sender either
/// fails (`immediate`) or waits, draining its own mailbox meanwhile
/// when `may_poll` allows. Replies bypass the bound, which keeps two
/// handlers answering each other from wedging on a pair of full
/// mailboxes.
pub(crate) fn inject(ep: &EpShared, frame: Frame, immediate: bool, may_poll: bool) -> Result<()> {
    if frame.dst == ep.rank {
        // A message to oneself runs its handler in the injecting call.
        dispatch::deliver(ep, frame, Route::Nbrhd);
        return Ok(());
    }
    let tx = ep.cluster.nbrhd_tx(frame.dst)?;
    let mut frame = frame;
    loop {
        let outcome = if frame.is_req {
            tx.try_send(frame)
        } else {
            tx.force_send(frame)
        };
        match outcome {
            Ok(()) => return Ok(()),
            Err(TrySendError::Full(rejected)) => {
                if immediate {
                    return Err(Error::Resource(format!(
                        "rank {} neighborhood queue is full",
                        rejected.dst
                    )));
                }
                frame = rejected;
                if may_poll {
                    poll(ep);
                }
                ep.cluster.wait_mode().relax();
            }
            Err(TrySendError::Disconnected(rejected)) => {
                return Err(Error::NotInitialized(format!(
                    "rank {} dropped its endpoint",
                    rejected.dst
                )));
            }
        }
    }
}
