//! Cluster/membership directory capability set (§6).
//!
//! Shaped like the teacher's `RaftNetwork` trait (peer addressing and
//! membership as an injected collaborator) but narrowed to the specific
//! lookups this driver performs: locating the group-zero leader for abort
//! RPCs, resolving this group's own peers, and triggering a membership
//! resync after a `SoftState`/`ConfChange` change (§4.7 step 2, §4.8).

use async_trait::async_trait;

use crate::raft_types::{GroupId, NodeId};

#[async_trait]
pub trait ClusterDirectory: Send + Sync + 'static {
    /// Which group currently owns `predicate`.
    async fn tablet(&self, predicate: &str) -> anyhow::Result<Option<GroupId>>;

    /// This process's own node id within `group`.
    async fn my_peer(&self, group: GroupId) -> anyhow::Result<NodeId>;

    /// The address of `group`'s current leader, if known.
    async fn leader(&self, group: GroupId) -> anyhow::Result<Option<String>>;

    /// All known members of `group`.
    async fn members(&self, group: GroupId) -> anyhow::Result<Vec<NodeId>>;

    /// Asks the cluster-coordination group (group zero) to abort any open
    /// transaction started `older_than` units of applied-index behind the
    /// current txn watermark (§4.6 `abortOldTransactions`).
    async fn abort_old_transactions(&self, older_than: u64) -> anyhow::Result<()>;

    /// Requests a refresh of this node's view of `group`'s membership,
    /// invoked whenever a `SoftState` or `ConfChange` is observed
    /// (§4.7 step 2, §4.8 `leaderBlocking`).
    async fn trigger_membership_sync(&self, group: GroupId) -> anyhow::Result<()>;
}
