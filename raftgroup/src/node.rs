//! Public facade: `propose_and_wait`, `wait_linearizable_read`, and
//! lifecycle control, directly analogous to the teacher's
//! `Raft<D,R,N,S>` handle (`teacher_reference/raft.rs`): a small struct
//! wrapping channel senders and join handles, cheap to clone, safe to
//! share across the RPC layer.

use std::sync::Arc;
use std::time::Duration;

use raft::prelude::Message;
use tokio::sync::{mpsc, oneshot, watch, Notify, Semaphore};
use tracing::Span;

use crate::apply::{Proposal, ProposalFacet};
use crate::cluster::ClusterDirectory;
use crate::config::Config;
use crate::error::{ProposeError, ReadIndexError};
use crate::lifecycle::{self, Handles, StartMode};
use crate::metrics::{MetricsReader, NodeMetrics};
use crate::oracle::RaftOracle;
use crate::posting::{MvccOracle, PostingStore};
use crate::proposal::{ProposalContext, ProposalKey, ProposalRegistry};
use crate::raft_types::{GroupId, NodeId};
use crate::read_index::ReadIndexHandle;
use crate::run_loop::ProposeHandle;
use crate::transport::Transport;
use crate::wal::WalStore;
use crate::watermark::WaterMark;

/// A running per-group replication core. Cloning shares the same
/// underlying node (`Arc` fields throughout), matching the teacher's
/// `Raft` handle semantics.
#[derive(Clone)]
pub struct Node {
    group: GroupId,
    node_id: NodeId,
    registry: Arc<ProposalRegistry>,
    applied: Arc<WaterMark>,
    txn_marks: Arc<WaterMark>,
    read_index: ReadIndexHandle,
    metrics: MetricsReader,
    admission: Arc<Semaphore>,
    propose_timeout: Duration,
    leader_transfer_grace: Duration,
    shutdown_tx: Arc<watch::Sender<bool>>,
    closer: Arc<Notify>,
    propose: ProposeHandle,
    step_tx: mpsc::UnboundedSender<Message>,
    // Kept only so the JoinHandles are not dropped (and thus detached)
    // while the node is alive; `stop()` does not need to await them
    // directly, matching the teacher's fire-and-forget background tasks.
    _handles: Arc<Handles>,
}

impl Node {
    /// Starts a node in the given [`StartMode`] (§4.8). The caller is
    /// responsible for having already performed any "retry forever"
    /// collaborator calls (`retrieveSnapshot`, `joinPeers`,
    /// `IsPeer(leader)`) that precede construction of the `RaftOracle`.
    #[allow(clippy::too_many_arguments)]
    pub fn start<W, P, M, C, T>(
        oracle: RaftOracle,
        wal: Arc<W>,
        posting: Arc<P>,
        mvcc: Arc<M>,
        cluster: Arc<C>,
        transport: Arc<T>,
        group: GroupId,
        self_addr: String,
        mode: StartMode,
        cfg: &Config,
    ) -> Self
    where
        W: WalStore,
        P: PostingStore,
        M: MvccOracle,
        C: ClusterDirectory,
        T: Transport,
    {
        let node_id = oracle.id();
        let spawned = lifecycle::spawn(oracle, wal, posting, mvcc, cluster, transport, group, node_id, self_addr, mode, cfg);

        Self {
            group,
            node_id,
            registry: spawned.registry,
            applied: spawned.applied,
            txn_marks: spawned.txn_marks,
            read_index: spawned.read_index,
            metrics: spawned.metrics,
            admission: Arc::new(Semaphore::new(cfg.pending_proposals)),
            propose_timeout: cfg.propose_timeout,
            leader_transfer_grace: cfg.leader_transfer_grace,
            shutdown_tx: Arc::new(spawned.shutdown_tx),
            closer: spawned.closer,
            propose: spawned.propose,
            step_tx: spawned.step_tx,
            _handles: Arc::new(spawned.handles),
        }
    }

    pub fn id(&self) -> NodeId {
        self.node_id
    }

    pub fn group(&self) -> GroupId {
        self.group
    }

    pub fn metrics(&self) -> MetricsReader {
        self.metrics.clone()
    }

    /// Proposes a facet and waits for the registry to signal completion
    /// (§4.1, §7 "Consensus"/"Apply" kinds, §8 scenario 1/2/4). Routes
    /// the serialized entry through the run loop's task, the only place
    /// that holds mutable access to the `RaftOracle`.
    #[tracing::instrument(level = "info", skip(self, facet), fields(group = self.group))]
    pub async fn propose_and_wait(&self, facet: ProposalFacet) -> Result<(), ProposeError> {
        let _permit = self.admission.try_acquire().map_err(|_| ProposeError::AdmissionLimitReached)?;

        let key = ProposalKey::fresh(self.node_id);
        let (tx, rx) = oneshot::channel();
        self.registry
            .store(ProposalContext::new(key, tx, Span::current()))
            .map_err(|e| ProposeError::Consensus(e.into()))?;

        let proposal = Proposal { key, legacy_id: 0, facet };
        let bytes = serde_json::to_vec(&proposal).expect("Proposal always serializes");

        if let Err(err) = self.propose.submit(bytes).await {
            // Consensus-level rejection before commit: roll back the
            // registry entry we just created so it is not left dangling.
            self.registry.done(key, None);
            return Err(err);
        }

        match tokio::time::timeout(self.propose_timeout, rx).await {
            Ok(Ok(Ok(()))) => Ok(()),
            Ok(Ok(Err(apply_err))) => Err(ProposeError::Consensus(apply_err.into())),
            Ok(Err(_canceled)) => Err(ProposeError::ShuttingDown),
            Err(_timeout) => Err(ProposeError::Timeout),
        }
    }

    /// Feeds an inbound peer message (already deserialized by the RPC
    /// layer) to the run loop so it can call `RaftOracle::step` (§4.7,
    /// §5). Silently dropped if the node has already shut down.
    pub fn receive_message(&self, msg: Message) {
        let _ = self.step_tx.send(msg);
    }

    /// §4.5/§4.6 linearizable read: waits for a confirmed commit index
    /// and then for the applied watermark to reach it (§8 P6).
    pub async fn wait_linearizable_read(&self) -> Result<(), ReadIndexError> {
        self.read_index.wait_linearizable_read(&self.applied).await
    }

    pub fn applied_watermark(&self) -> u64 {
        self.applied.done_until()
    }

    pub fn txn_watermark(&self) -> u64 {
        self.txn_marks.done_until()
    }

    /// §4.7 stop sequence, blocking until the run loop acknowledges or
    /// the transfer grace period plus a fixed margin elapses.
    pub async fn stop(&self) {
        lifecycle::stop(&self.shutdown_tx, self.closer.clone(), self.leader_transfer_grace).await;
    }
}

impl From<crate::apply::ClusterState> for ProposalFacet {
    fn from(state: crate::apply::ClusterState) -> Self {
        ProposalFacet::State(state)
    }
}
