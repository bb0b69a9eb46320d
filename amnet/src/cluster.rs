//! Cluster construction and rank bookkeeping.
//!
//! A [`Cluster`] fixes the rank count, the host layout and the limits
//! up front; endpoints attach to it afterwards. The host layout decides
//! which rank pairs use the mailbox fast path and whether the shared
//! network core is active at all.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use slab::Slab;

use crate::config::{AmConfig, WaitMode};
use crate::endpoint::{Endpoint, EpShared};
use crate::error::{Error, Result};
use crate::handler::HandlerTable;
use crate::nbrhd::NbrhdPort;
use crate::segment::Segment;
use crate::wire::{Frame, NetCore};
use crate::Rank;

/// Locks `mutex`, accepting a poisoned lock. Guarded state is mutated
/// to a consistent point before every handler call, so data behind a
/// lock poisoned by a handler panic is still usable.
pub(crate) fn lock_tolerant<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Per-rank attachment record.
struct RankSlot {
    ep_index: usize,
    seg_len: usize,
}

/// State shared by a [`Cluster`] handle and every endpoint it created.
pub(crate) struct ClusterCore {
    pub(crate) config: AmConfig,
    /// Host id per rank. Ranks with equal ids share a neighborhood.
    topo: Vec<u32>,
    /// False when every rank maps to one host; the network core is
    /// never touched then.
    pub(crate) multi_host: bool,
    pub(crate) net: Mutex<NetCore>,
    nbrhd_txs: Mutex<Vec<Option<mailbox::Sender<Frame>>>>,
    attached: Mutex<Vec<Option<RankSlot>>>,
    endpoints: Mutex<Slab<Rank>>,
    wait: AtomicU8,
}

impl ClusterCore {
    pub(crate) fn nranks(&self) -> usize {
        self.topo.len()
    }

    pub(crate) fn same_host(&self, a: Rank, b: Rank) -> bool {
        self.topo[a as usize] == self.topo[b as usize]
    }

    pub(crate) fn wait_mode(&self) -> WaitMode {
        WaitMode::from_u8(self.wait.load(Ordering::Relaxed))
    }

    pub(crate) fn set_wait_mode(&self, mode: WaitMode) {
        self.wait.store(mode.as_u8(), Ordering::Relaxed);
    }

    /// Segment size of `rank`, or `NotInitialized` when it has not
    /// attached an endpoint (or has already dropped it).
    pub(crate) fn seg_len_of(&self, rank: Rank) -> Result<usize> {
        lock_tolerant(&self.attached)[rank as usize]
            .as_ref()
            .map(|slot| slot.seg_len)
            .ok_or_else(|| {
                Error::NotInitialized(format!("rank {} has no endpoint", rank))
            })
    }

    /// Mailbox sender toward `rank`, for same-host delivery.
    pub(crate) fn nbrhd_tx(&self, rank: Rank) -> Result<mailbox::Sender<Frame>> {
        lock_tolerant(&self.nbrhd_txs)[rank as usize]
            .clone()
            .ok_or_else(|| {
                Error::NotInitialized(format!("rank {} has no endpoint", rank))
            })
    }

    /// Removes a rank's attachment. Each lock is taken and released on
    /// its own so teardown never nests them.
    pub(crate) fn detach(&self, rank: Rank, ep_index: usize) {
        lock_tolerant(&self.net).disconnect(rank);
        lock_tolerant(&self.nbrhd_txs)[rank as usize] = None;
        lock_tolerant(&self.attached)[rank as usize] = None;
        lock_tolerant(&self.endpoints).try_remove(ep_index);
        tracing::debug!(rank, "endpoint detached");
    }
}

/// Configures and builds a [`Cluster`].
pub struct ClusterBuilder {
    ranks: usize,
    hosts: Option<Vec<u32>>,
    config: AmConfig,
}

impl ClusterBuilder {
    pub fn new() -> Self {
        ClusterBuilder {
            ranks: 1,
            hosts: None,
            config: AmConfig::default(),
        }
    }

    /// Sets the number of ranks. Defaults to 1.
    pub fn ranks(mut self, ranks: usize) -> Self {
        self.ranks = ranks;
        self
    }

    /// Assigns a host id to each rank. Ranks with equal ids exchange
    /// messages through mailboxes instead of the network core. Without
    /// this call every rank gets its own host.
    pub fn hosts(mut self, hosts: &[u32]) -> Self {
        self.hosts = Some(hosts.to_vec());
        self
    }

    /// Replaces the default limits.
    pub fn config(mut self, config: AmConfig) -> Self {
        self.config = config;
        self
    }

    pub fn build(self) -> Result<Cluster> {
        if self.ranks == 0 {
            return Err(Error::BadArgument(
                "a cluster needs at least one rank".to_string(),
            ));
        }
        self.config.validate()?;
        let topo = match self.hosts {
            Some(hosts) => {
                if hosts.len() != self.ranks {
                    return Err(Error::BadArgument(format!(
                        "{} host ids given for {} ranks",
                        hosts.len(),
                        self.ranks
                    )));
                }
                hosts
            }
            None => (0..self.ranks as u32).collect(),
        };
        let multi_host = topo.iter().any(|&h| h != topo[0]);
        tracing::debug!(ranks = self.ranks, multi_host, "cluster built");
        Ok(Cluster {
            core: Arc::new(ClusterCore {
                net: Mutex::new(NetCore::new(self.ranks, self.config.queue_depth)),
                nbrhd_txs: Mutex::new(vec![None; self.ranks]),
                attached: Mutex::new((0..self.ranks).map(|_| None).collect()),
                endpoints: Mutex::new(Slab::new()),
                wait: AtomicU8::new(WaitMode::default().as_u8()),
                config: self.config,
                topo,
                multi_host,
            }),
        })
    }
}

impl Default for ClusterBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// A fixed set of ranks that exchange active messages.
///
/// Clones share the same underlying cluster.
#[derive(Clone)]
pub struct Cluster {
    core: Arc<ClusterCore>,
}

impl Cluster {
    pub fn builder() -> ClusterBuilder {
        ClusterBuilder::new()
    }

    /// Number of ranks in the cluster.
    #[inline]
    pub fn ranks(&self) -> usize {
        self.core.nranks()
    }

    /// Whether `a` and `b` exchange messages through the same-host
    /// fast path.
    pub fn same_host(&self, a: Rank, b: Rank) -> bool {
        self.core.same_host(a, b)
    }

    /// Current waiting strategy for full queues.
    pub fn wait_mode(&self) -> WaitMode {
        self.core.wait_mode()
    }

    /// Replaces the waiting strategy for full queues, cluster-wide.
    pub fn set_wait_mode(&self, mode: WaitMode) {
        self.core.set_wait_mode(mode);
    }

    /// Attaches an endpoint for `rank` with the configured default
    /// segment size.
    pub fn create_endpoint(&self, rank: Rank) -> Result<Endpoint> {
        self.create_endpoint_with_segment(rank, self.core.config.segment_size)
    }

    /// Attaches an endpoint for `rank` with a `seg_len` byte segment.
    /// Each rank may hold at most one endpoint at a time.
    pub fn create_endpoint_with_segment(&self, rank: Rank, seg_len: usize) -> Result<Endpoint> {
        if rank as usize >= self.core.nranks() {
            return Err(Error::BadArgument(format!("rank {} does not exist", rank)));
        }
        let (tx, rx) = mailbox::channel(self.core.config.queue_depth);
        let ep_index;
        {
            let mut attached = lock_tolerant(&self.core.attached);
            if attached[rank as usize].is_some() {
                return Err(Error::BadArgument(format!(
                    "rank {} already has an endpoint",
                    rank
                )));
            }
            ep_index = lock_tolerant(&self.core.endpoints).insert(rank);
            attached[rank as usize] = Some(RankSlot { ep_index, seg_len });
        }
        lock_tolerant(&self.core.nbrhd_txs)[rank as usize] = Some(tx);
        lock_tolerant(&self.core.net).connect(rank);
        tracing::debug!(rank, ep_index, seg_len, "endpoint attached");
        Ok(Endpoint::new(Arc::new(EpShared {
            rank,
            ep_index,
            cluster: Arc::clone(&self.core),
            table: Mutex::new(HandlerTable::new()),
            segment: Segment::new(seg_len),
            nbrhd: NbrhdPort::new(rx),
        })))
    }
}
