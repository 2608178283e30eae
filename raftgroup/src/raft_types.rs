//! Small shared value types threaded through the rest of the crate.
//!
//! Kept separate from [`crate::oracle`] so that modules which only need
//! identifiers (metrics, proposal registry, cluster directory) do not have
//! to depend on the `raft` crate's own types directly.

use serde::{Deserialize, Serialize};

pub type NodeId = u64;
pub type GroupId = u32;

/// Embedded in every outgoing Raft message's context and in snapshot
/// payloads so that peers can establish transport without prior
/// out-of-band configuration (§6 "Raft entry context").
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct RaftContext {
    pub id: NodeId,
    pub group: GroupId,
    pub addr: String,
}
