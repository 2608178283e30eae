//! A `watch`-distributed metrics snapshot plus a `Wait` helper, directly
//! analogous to the teacher's `RaftMetrics`/`Raft::metrics()`/`Wait` (see
//! `teacher_reference/raft.rs`).

use std::time::Duration;

use tokio::sync::watch;
use tokio::time::timeout;

use crate::raft_types::NodeId;

/// Role of this node in the consensus group, mirrors the teacher's
/// `State` enum (`NonVoter`/`Follower`/`Candidate`/`Leader`/`Shutdown`)
/// narrowed to what an external observer can usefully distinguish.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Role {
    Follower,
    Candidate,
    Leader,
    Learner,
    Shutdown,
}

/// A point-in-time snapshot of node state, refreshed whenever any field
/// changes (§3 "Node metrics").
#[derive(Clone, Debug, PartialEq)]
pub struct NodeMetrics {
    pub id: NodeId,
    pub role: Role,
    pub current_term: u64,
    pub last_log_index: u64,
    pub applied_index: u64,
    pub txn_mark_index: u64,
    pub current_leader: Option<NodeId>,
    pub membership: Vec<NodeId>,
}

impl NodeMetrics {
    pub fn pristine(id: NodeId) -> Self {
        Self {
            id,
            role: Role::Follower,
            current_term: 0,
            last_log_index: 0,
            applied_index: 0,
            txn_mark_index: 0,
            current_leader: None,
            membership: vec![id],
        }
    }
}

/// Owning half of the metrics channel, held by [`crate::run_loop::RunLoop`].
#[derive(Clone)]
pub struct MetricsWriter {
    tx: watch::Sender<NodeMetrics>,
}

impl MetricsWriter {
    pub fn new(initial: NodeMetrics) -> (Self, MetricsReader) {
        let (tx, rx) = watch::channel(initial);
        (Self { tx }, MetricsReader { rx })
    }

    /// Publishes a new snapshot only if it differs from the current one,
    /// matching the teacher's `report_metrics` dedup behavior.
    pub fn publish(&self, metrics: NodeMetrics) {
        let changed = self.tx.borrow().as_ref() != &metrics;
        if changed {
            // `send` only errors when there are no receivers left, which is
            // harmless here: the node is shutting down.
            let _ = self.tx.send(metrics);
        }
    }
}

/// Reader half handed out to clients and tests, analogous to the
/// teacher's `Raft::metrics()` + `Raft::wait()`.
#[derive(Clone)]
pub struct MetricsReader {
    rx: watch::Receiver<NodeMetrics>,
}

impl MetricsReader {
    pub fn borrow(&self) -> NodeMetrics {
        self.rx.borrow().clone()
    }

    /// Blocks until `matches` holds for some published snapshot, or the
    /// given duration elapses.
    pub async fn wait_for<F>(&mut self, bound: Duration, mut matches: F) -> Result<NodeMetrics, WaitTimeoutError>
    where
        F: FnMut(&NodeMetrics) -> bool,
    {
        if matches(&self.rx.borrow()) {
            return Ok(self.rx.borrow().clone());
        }
        let fut = async {
            loop {
                if self.rx.changed().await.is_err() {
                    return None;
                }
                let snapshot = self.rx.borrow().clone();
                if matches(&snapshot) {
                    return Some(snapshot);
                }
            }
        };
        timeout(bound, fut).await.ok().flatten().ok_or(WaitTimeoutError)
    }
}

#[derive(thiserror::Error, Debug, Clone, Copy)]
#[error("timed out waiting for the expected metrics condition")]
pub struct WaitTimeoutError;

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn publish_then_wait_for_resolves() {
        let (writer, mut reader) = MetricsWriter::new(NodeMetrics::pristine(1));
        let handle = tokio::spawn(async move {
            reader.wait_for(Duration::from_secs(1), |m| m.applied_index == 5).await
        });
        let mut next = NodeMetrics::pristine(1);
        next.applied_index = 5;
        writer.publish(next.clone());
        let observed = handle.await.unwrap().unwrap();
        assert_eq!(observed.applied_index, 5);
    }
}
