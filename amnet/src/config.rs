//! Transport configuration.

use crate::error::{Error, Result};

/// Number of slots in a handler table. Index 0 is reserved for the
/// unregistered-handler sentinel.
pub const TABLE_SIZE: usize = 256;

/// Handler indices reserved for the core layer: `[1, 64)`.
pub const CORE_RANGE: (usize, usize) = (1, 64);

/// Handler indices reserved for the extended layer: `[64, 128)`.
pub const EXTENDED_RANGE: (usize, usize) = (64, 128);

/// Handler indices available to clients: `[128, 256)`.
pub const CLIENT_RANGE: (usize, usize) = (128, TABLE_SIZE);

/// Smallest medium payload limit any configuration may advertise.
pub const MIN_MEDIUM: usize = 512;

/// How an endpoint burns time while it waits for a queue to drain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WaitMode {
    /// Spin hint, lowest latency.
    #[default]
    Spin,
    /// Yield the OS scheduler slot between attempts.
    Yield,
    /// Sleep briefly between attempts, lowest CPU use.
    Block,
}

impl WaitMode {
    /// Executes one unit of waiting under this mode.
    pub(crate) fn relax(self) {
        match self {
            WaitMode::Spin => std::hint::spin_loop(),
            WaitMode::Yield => std::thread::yield_now(),
            WaitMode::Block => std::thread::sleep(std::time::Duration::from_micros(50)),
        }
    }

    pub(crate) fn as_u8(self) -> u8 {
        match self {
            WaitMode::Spin => 0,
            WaitMode::Yield => 1,
            WaitMode::Block => 2,
        }
    }

    pub(crate) fn from_u8(v: u8) -> WaitMode {
        match v {
            1 => WaitMode::Yield,
            2 => WaitMode::Block,
            _ => WaitMode::Spin,
        }
    }
}

/// Limits and sizing knobs for a cluster.
///
/// Same-host ("neighborhood") limits may exceed the network limits but
/// never undercut them, so a payload that fits for an arbitrary peer
/// also fits for a same-host peer.
#[derive(Debug, Clone)]
pub struct AmConfig {
    /// Maximum medium payload between distinct hosts.
    ///
    /// Default: 4096.
    pub max_medium: usize,

    /// Maximum long payload between distinct hosts.
    ///
    /// Default: 1 MiB.
    pub max_long: usize,

    /// Maximum medium payload between same-host peers.
    ///
    /// Default: 64 KiB.
    pub nbrhd_max_medium: usize,

    /// Maximum long payload between same-host peers.
    ///
    /// Default: 4 MiB.
    pub nbrhd_max_long: usize,

    /// Request slots per destination queue. Replies are exempt from the
    /// bound so a drain can always make progress.
    ///
    /// Default: 256.
    pub queue_depth: usize,

    /// Segment size given to endpoints created without an explicit one.
    ///
    /// Default: 1 MiB.
    pub segment_size: usize,
}

impl Default for AmConfig {
    fn default() -> Self {
        AmConfig {
            max_medium: 4096,
            max_long: 1 << 20,
            nbrhd_max_medium: 64 << 10,
            nbrhd_max_long: 4 << 20,
            queue_depth: 256,
            segment_size: 1 << 20,
        }
    }
}

impl AmConfig {
    /// Creates a configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the cross-host medium payload limit.
    pub fn with_max_medium(mut self, bytes: usize) -> Self {
        self.max_medium = bytes;
        self
    }

    /// Sets the cross-host long payload limit.
    pub fn with_max_long(mut self, bytes: usize) -> Self {
        self.max_long = bytes;
        self
    }

    /// Sets the same-host medium payload limit.
    pub fn with_nbrhd_max_medium(mut self, bytes: usize) -> Self {
        self.nbrhd_max_medium = bytes;
        self
    }

    /// Sets the same-host long payload limit.
    pub fn with_nbrhd_max_long(mut self, bytes: usize) -> Self {
        self.nbrhd_max_long = bytes;
        self
    }

    /// Sets the per-destination request queue depth.
    pub fn with_queue_depth(mut self, depth: usize) -> Self {
        self.queue_depth = depth;
        self
    }

    /// Sets the default endpoint segment size.
    pub fn with_segment_size(mut self, bytes: usize) -> Self {
        self.segment_size = bytes;
        self
    }

    /// Checks internal consistency of the limits.
    pub fn validate(&self) -> Result<()> {
        if self.max_medium < MIN_MEDIUM {
            return Err(Error::BadArgument(format!(
                "max_medium {} is below the required minimum of {}",
                self.max_medium, MIN_MEDIUM
            )));
        }
        if self.max_long < MIN_MEDIUM {
            return Err(Error::BadArgument(format!(
                "max_long {} is below the required minimum of {}",
                self.max_long, MIN_MEDIUM
            )));
        }
        if self.nbrhd_max_medium < self.max_medium {
            return Err(Error::BadArgument(format!(
                "nbrhd_max_medium {} undercuts max_medium {}",
                self.nbrhd_max_medium, self.max_medium
            )));
        }
        if self.nbrhd_max_long < self.max_long {
            return Err(Error::BadArgument(format!(
                "nbrhd_max_long {} undercuts max_long {}",
                self.nbrhd_max_long, self.max_long
            )));
        }
        if self.queue_depth == 0 {
            return Err(Error::BadArgument(
                "queue_depth must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}
