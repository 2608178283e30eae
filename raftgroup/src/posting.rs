//! Posting (graph-edge) store and MVCC oracle capability sets (§6).
//!
//! Generalizes the teacher's single `RaftStorage::apply_to_state_machine`
//! boundary (`teacher_reference/storage.rs`) into the two collaborators
//! this domain actually needs: a posting store for edge/schema/predicate
//! mutations, and an MVCC oracle for timestamp coordination — both
//! consumed as `async_trait` objects exactly the way the teacher consumes
//! `RaftStorage`/`RaftNetwork`.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// One graph edge mutation: `(subject, predicate, value_or_uid)` plus the
/// op (set/delete), kept abstract since the wire format is owned by the
/// query layer, not this driver.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EdgeMutation {
    pub subject: u64,
    pub predicate: String,
    pub op: EdgeOp,
    pub value: Vec<u8>,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub enum EdgeOp {
    Set,
    Delete,
}

impl EdgeMutation {
    /// The key used by [`crate::scheduler::Scheduler`] to serialize edges
    /// that touch the same primary key (§4.3).
    pub fn primary_key(&self) -> (u64, &str) {
        (self.subject, &self.predicate)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SchemaMutation {
    pub predicate: String,
    pub schema: Vec<u8>,
}

/// A handle to an in-flight MVCC transaction, opaque to this driver.
pub type TxnHandle = u64;

#[async_trait]
pub trait PostingStore: Send + Sync + 'static {
    /// Applies one edge mutation within `txn` (§4.3). Must observe the
    /// pre-image written by any prior task serialized ahead of it on the
    /// same primary key (§8 P4).
    async fn run_mutation(&self, txn: TxnHandle, edge: &EdgeMutation) -> anyhow::Result<()>;

    /// Applies a schema mutation for `predicate`, dispatched after all
    /// edge tasks of the same proposal complete (§4.3).
    async fn run_schema_mutation(&self, start_ts: u64, schema: &SchemaMutation) -> anyhow::Result<()>;

    /// Drops all data for `predicate` (§4.4 `CleanPredicate`).
    async fn delete_predicate(&self, predicate: &str) -> anyhow::Result<()>;

    /// Evicts the in-memory posting cache, used before a non-self
    /// snapshot is installed (§4.7 step 5).
    async fn evict_lru(&self) -> anyhow::Result<()>;

    /// Bulk key/value ingest during snapshot transfer (§4.4 `Kv[]`).
    async fn populate_key_values(&self, kvs: &[(Vec<u8>, Vec<u8>)]) -> anyhow::Result<()>;

    /// Streams posting data for this group from its current leader
    /// (§4.7 step 5).
    async fn populate_shard(&self, group_leader_addr: &str) -> anyhow::Result<()>;

    /// Reloads cached schema state from the authoritative source after a
    /// non-self snapshot has replaced this group's posting data (§4.7
    /// step 5): a stale schema cache could otherwise accept or reject
    /// mutations against predicates that no longer (or newly) exist.
    async fn reload_schema(&self, group_leader_addr: &str) -> anyhow::Result<()>;
}

#[async_trait]
pub trait MvccOracle: Send + Sync + 'static {
    /// Begins (or returns the existing) transaction keyed by `start_ts`
    /// (§9 Open Question (b)).
    async fn begin(&self, start_ts: u64) -> anyhow::Result<TxnHandle>;

    /// Blocks until `start_ts` has been observed by the oracle, i.e. no
    /// mutation may run ahead of the oracle's knowledge of its own
    /// transaction (§4.3 rationale).
    async fn wait_for_ts(&self, start_ts: u64) -> anyhow::Result<()>;

    /// Commits or aborts the transaction identified by `start_ts` at
    /// `commit_ts` (`None` means abort) (§4.4 `TxnContext`).
    async fn commit_or_abort(&self, start_ts: u64, commit_ts: Option<u64>) -> anyhow::Result<()>;

    /// Marks the transaction as fully done in the oracle's own
    /// bookkeeping, called once the commit/abort's effects are durable.
    async fn done(&self, start_ts: u64) -> anyhow::Result<()>;

    /// Number of transactions started at or before `max_start_ts` that
    /// have not yet been marked done, used by the snapshotter's
    /// back-pressure check (§4.6, §8 scenario 6).
    async fn pending_since(&self, max_start_ts: u64) -> anyhow::Result<u64>;
}
