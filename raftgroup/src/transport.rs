//! Outbound Raft message transport (§4.7 step 3/7, §5).
//!
//! Shaped like [`crate::cluster::ClusterDirectory`]: a narrow `async_trait`
//! collaborator the run loop hands already-addressed outbound messages to,
//! so that sending never blocks the tick/ready cycle. Grounded on the
//! teacher's `RaftNetwork` trait (`async-raft/src/raft.rs`, referenced
//! throughout `core/mod.rs`): peer RPC dispatch lives behind an injected
//! collaborator, never inline in the run loop.

use async_trait::async_trait;
use raft::prelude::Message;

use crate::raft_types::GroupId;

#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Delivers `messages` on `group`'s behalf. A send failure is logged
    /// by the caller and otherwise swallowed: a dropped Raft message is
    /// recovered by the next tick's retransmission, not by retrying here.
    async fn send(&self, group: GroupId, messages: Vec<Message>) -> anyhow::Result<()>;
}
