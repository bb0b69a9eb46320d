//! In-memory network fabric.
//!
//! Cross-host traffic flows through [`NetCore`], a set of
//! per-destination inboxes guarded by one cluster-wide lock. The lock
//! covers injection, polling and handler execution on this path, which
//! keeps delivery single-threaded per message the way a serialized NIC
//! driver would.

use std::collections::VecDeque;

use crate::args::Args;
use crate::flags::Category;
use crate::Rank;

/// One message in flight. The payload is already serialized; for long
/// messages `dest_addr` names the landing offset in the destination
/// segment.
pub(crate) struct Frame {
    pub(crate) src: Rank,
    pub(crate) dst: Rank,
    pub(crate) handler: u8,
    pub(crate) cat: Category,
    pub(crate) is_req: bool,
    pub(crate) args: Args,
    pub(crate) payload: Box<[u8]>,
    pub(crate) dest_addr: usize,
}

/// Why an injection did not happen.
pub(crate) enum InjectError {
    /// The destination's request queue is at capacity. The frame is
    /// handed back for retry.
    Full(Frame),
    /// The destination endpoint does not exist anymore.
    Gone,
}

struct Inbox {
    queue: VecDeque<Frame>,
    connected: bool,
}

/// The shared fabric state. Lives behind the cluster's network lock.
pub(crate) struct NetCore {
    depth: usize,
    inboxes: Vec<Inbox>,
}

impl NetCore {
    pub(crate) fn new(nranks: usize, depth: usize) -> Self {
        let inboxes = (0..nranks)
            .map(|_| Inbox {
                queue: VecDeque::new(),
                connected: false,
            })
            .collect();
        NetCore { depth, inboxes }
    }

    pub(crate) fn connect(&mut self, rank: Rank) {
        self.inboxes[rank as usize].connected = true;
    }

    pub(crate) fn disconnect(&mut self, rank: Rank) {
        let inbox = &mut self.inboxes[rank as usize];
        inbox.connected = false;
        inbox.queue.clear();
    }

    /// Queues a frame for its destination.
    ///
    /// Only requests count against the depth bound. Each outstanding
    /// request reserves headroom for its reply at the requester, so a
    /// reply must always be accepted or the drain rule deadlocks.
    pub(crate) fn inject(&mut self, frame: Frame) -> Result<(), InjectError> {
        let inbox = &mut self.inboxes[frame.dst as usize];
        if !inbox.connected {
            return Err(InjectError::Gone);
        }
        if frame.is_req && inbox.queue.len() >= self.depth {
            return Err(InjectError::Full(frame));
        }
        inbox.queue.push_back(frame);
        Ok(())
    }

    /// Takes the oldest frame addressed to `rank`, if any.
    pub(crate) fn pop(&mut self, rank: Rank) -> Option<Frame> {
        self.inboxes[rank as usize].queue.pop_front()
    }

    /// Whether a request toward `rank` would bounce right now. Used by
    /// `IMMEDIATE` capacity probes; a missing peer does not count as
    /// full.
    pub(crate) fn request_queue_full(&self, rank: Rank) -> bool {
        let inbox = &self.inboxes[rank as usize];
        inbox.connected && inbox.queue.len() >= self.depth
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(dst: Rank, is_req: bool, tag: u32) -> Frame {
        Frame {
            src: 0,
            dst,
            handler: 128,
            cat: Category::Short,
            is_req,
            args: Args::new(&[tag]),
            payload: Box::from(&[][..]),
            dest_addr: 0,
        }
    }

    #[test]
    fn test_inject_pop_fifo() {
        let mut net = NetCore::new(2, 8);
        net.connect(1);
        net.inject(frame(1, true, 10)).ok().expect("inject failed");
        net.inject(frame(1, true, 20)).ok().expect("inject failed");
        assert_eq!(net.pop(1).expect("pop failed").args[0], 10);
        assert_eq!(net.pop(1).expect("pop failed").args[0], 20);
        assert!(net.pop(1).is_none());
    }

    #[test]
    fn test_requests_bounded_replies_exempt() {
        let mut net = NetCore::new(2, 2);
        net.connect(1);
        net.inject(frame(1, true, 0)).ok().expect("inject failed");
        net.inject(frame(1, true, 1)).ok().expect("inject failed");
        match net.inject(frame(1, true, 2)) {
            Err(InjectError::Full(f)) => assert_eq!(f.args[0], 2),
            _ => panic!("third request should have been bounced"),
        }
        // A reply rides over the bound.
        assert!(net.inject(frame(1, false, 3)).is_ok());
    }

    #[test]
    fn test_disconnected_destination() {
        let mut net = NetCore::new(2, 8);
        assert!(matches!(net.inject(frame(1, true, 0)), Err(InjectError::Gone)));
        net.connect(1);
        assert!(net.inject(frame(1, true, 0)).is_ok());
        net.disconnect(1);
        assert!(matches!(net.inject(frame(1, true, 0)), Err(InjectError::Gone)));
        assert!(net.pop(1).is_none());
    }
}
