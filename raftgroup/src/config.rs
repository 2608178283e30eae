//! Runtime configuration, validated at construction time the way the
//! teacher's `Config`/`SnapshotPolicy` pair is (§3, §4.9).

use std::time::Duration;

/// Validated runtime configuration for a single group [`crate::node::Node`].
#[derive(Clone, Debug)]
pub struct Config {
    /// How often the run loop ticks the raft oracle.
    pub tick_interval: Duration,

    /// How often the snapshotter considers taking a snapshot.
    pub snapshot_interval: Duration,

    /// Number of trailing transactional indexes kept out of a periodic
    /// snapshot (§4.6). Explicit snapshot requests use `skip = 0`.
    pub snapshot_skip: u64,

    /// Bound on a single outstanding `ReadIndex` round trip (§4.5).
    pub read_index_timeout: Duration,

    /// Bound on `propose_and_wait` waiting for a proposal to commit (§4.8,
    /// §7: "Consensus" error kind).
    pub propose_timeout: Duration,

    /// Grace period given to a departing leader during `TransferLeadership`
    /// on shutdown (§4.7).
    pub leader_transfer_grace: Duration,

    /// Gap between the applied and the transactional watermark past which
    /// the snapshotter starts aborting stale transactions (§4.6).
    pub force_abort_difference: u64,

    /// Capacity of the process-wide pending-proposals admission semaphore
    /// (§5, §6).
    pub pending_proposals: usize,
}

impl Config {
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }
}

impl Default for Config {
    fn default() -> Self {
        ConfigBuilder::default().build().expect("default config is always valid")
    }
}

/// Builder that applies the same defaults as the teacher's config type and
/// rejects inconsistent combinations before a [`Config`] is handed to a
/// running node.
#[derive(Clone, Debug)]
pub struct ConfigBuilder {
    tick_interval: Duration,
    snapshot_interval: Duration,
    snapshot_skip: u64,
    read_index_timeout: Duration,
    propose_timeout: Duration,
    leader_transfer_grace: Duration,
    force_abort_difference: u64,
    pending_proposals: usize,
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_millis(20),
            snapshot_interval: Duration::from_secs(30),
            snapshot_skip: 10,
            read_index_timeout: Duration::from_secs(10),
            propose_timeout: Duration::from_secs(600),
            leader_transfer_grace: Duration::from_secs(1),
            force_abort_difference: 10_000,
            pending_proposals: 256,
        }
    }
}

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("tick_interval must be nonzero")]
    ZeroTickInterval,
    #[error("pending_proposals must be nonzero")]
    ZeroAdmissionLimit,
    #[error("force_abort_difference must be nonzero when snapshot_skip is nonzero")]
    InconsistentAbortDifference,
}

impl ConfigBuilder {
    pub fn tick_interval(mut self, d: Duration) -> Self {
        self.tick_interval = d;
        self
    }

    pub fn snapshot_interval(mut self, d: Duration) -> Self {
        self.snapshot_interval = d;
        self
    }

    pub fn snapshot_skip(mut self, skip: u64) -> Self {
        self.snapshot_skip = skip;
        self
    }

    pub fn read_index_timeout(mut self, d: Duration) -> Self {
        self.read_index_timeout = d;
        self
    }

    pub fn propose_timeout(mut self, d: Duration) -> Self {
        self.propose_timeout = d;
        self
    }

    pub fn leader_transfer_grace(mut self, d: Duration) -> Self {
        self.leader_transfer_grace = d;
        self
    }

    pub fn force_abort_difference(mut self, n: u64) -> Self {
        self.force_abort_difference = n;
        self
    }

    pub fn pending_proposals(mut self, n: usize) -> Self {
        self.pending_proposals = n;
        self
    }

    pub fn build(self) -> Result<Config, ConfigError> {
        if self.tick_interval.is_zero() {
            return Err(ConfigError::ZeroTickInterval);
        }
        if self.pending_proposals == 0 {
            return Err(ConfigError::ZeroAdmissionLimit);
        }
        if self.snapshot_skip > 0 && self.force_abort_difference == 0 {
            return Err(ConfigError::InconsistentAbortDifference);
        }
        Ok(Config {
            tick_interval: self.tick_interval,
            snapshot_interval: self.snapshot_interval,
            snapshot_skip: self.snapshot_skip,
            read_index_timeout: self.read_index_timeout,
            propose_timeout: self.propose_timeout,
            leader_transfer_grace: self.leader_transfer_grace,
            force_abort_difference: self.force_abort_difference,
            pending_proposals: self.pending_proposals,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let cfg = Config::default();
        assert_eq!(cfg.snapshot_skip, 10);
    }

    #[test]
    fn zero_tick_interval_is_rejected() {
        let err = Config::builder().tick_interval(Duration::from_millis(0)).build().unwrap_err();
        assert!(matches!(err, ConfigError::ZeroTickInterval));
    }

    #[test]
    fn zero_admission_limit_is_rejected() {
        let err = Config::builder().pending_proposals(0).build().unwrap_err();
        assert!(matches!(err, ConfigError::ZeroAdmissionLimit));
    }
}
