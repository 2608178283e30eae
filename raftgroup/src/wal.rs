//! Write-ahead log storage capability set (§6 "Log storage (WAL)").
//!
//! Narrowed from the teacher's `RaftStorage` trait
//! (`teacher_reference/storage.rs`) to the WAL-only duties this driver
//! needs once the Raft algorithm itself is delegated to the `raft` crate:
//! persisting `HardState`/entries/snapshots per group, and recovering
//! them at startup.

use async_trait::async_trait;
use raft::eraftpb::{Entry, HardState, Snapshot};

use crate::raft_types::GroupId;

/// Everything this driver needs from durable per-group storage.
///
/// Implementations must uphold the teacher's ordering contract: entries
/// are always presented in order, but each entry's index determines its
/// write location; `save_hard_state`/`store` failures are treated as
/// fatal by [`crate::run_loop::RunLoop`] exactly like a `RaftStorage`
/// method error is fatal to the teacher's `RaftCore`.
#[async_trait]
pub trait WalStore: Send + Sync + 'static {
    /// Persist a `HardState` update together with any newly appended
    /// entries for `group`, atomically from the caller's point of view.
    async fn store(&self, group: GroupId, hard_state: &HardState, entries: &[Entry]) -> anyhow::Result<()>;

    /// Persist a snapshot pointer for `group` (§4.7 step 5).
    async fn store_snapshot(&self, group: GroupId, snapshot: &Snapshot) -> anyhow::Result<()>;

    /// Recover the last known `HardState`, entries, and snapshot for
    /// `group` at startup (§4.8 step 1).
    async fn recover(&self, group: GroupId) -> anyhow::Result<Recovered>;
}

/// What [`WalStore::recover`] hands back to [`crate::lifecycle`].
#[derive(Clone, Debug, Default)]
pub struct Recovered {
    pub hard_state: Option<HardState>,
    pub entries: Vec<Entry>,
    pub snapshot: Option<Snapshot>,
}
