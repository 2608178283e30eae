//! Init / join / restart / stop (§4.8).
//!
//! Grounded on the teacher's `RaftCore::spawn` + `Raft::new`/`initialize`/
//! `shutdown` (`teacher_reference/raft.rs`): a constructor spawns the
//! background tasks and hands back a thin handle; shutdown signals a
//! channel and awaits the spawned tasks' join handles.

use std::sync::Arc;
use std::time::Duration;

use raft::prelude::Message;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::apply::{ApplyPipeline, CommittedEntry};
use crate::cluster::ClusterDirectory;
use crate::config::Config;
use crate::metrics::{MetricsReader, MetricsWriter, NodeMetrics};
use crate::oracle::RaftOracle;
use crate::posting::{MvccOracle, PostingStore};
use crate::proposal::ProposalRegistry;
use crate::raft_types::{GroupId, NodeId};
use crate::read_index::{ReadIndexHandle, ReadIndexLoop};
use crate::run_loop::{ProposeHandle, RunLoop};
use crate::transport::Transport;
use crate::wal::WalStore;
use crate::watermark::WaterMark;

/// How this node came to be running: determines whether it campaigns
/// immediately, waits to be offered membership, or restores from WAL
/// (§4.8 steps 2-5).
pub enum StartMode {
    /// Fresh node, no peers configured yet: becomes a single-voter group
    /// and may campaign immediately.
    FreshAlone,
    /// Fresh node joining an existing group: waits (by construction, the
    /// caller already performed `retrieveSnapshot`/`joinPeers` retries)
    /// to be offered membership.
    FreshWithPeers,
    /// Restarting from durable state recovered via [`WalStore::recover`].
    Restart,
}

pub struct Handles {
    pub run_loop: JoinHandle<()>,
    pub apply_pipeline: JoinHandle<()>,
    pub read_index_loop: JoinHandle<()>,
}

/// Everything [`spawn`] hands back to [`crate::node::Node::start`]:
/// the background task handles plus every collaborator handle a running
/// node needs to keep around.
pub struct Spawned {
    pub handles: Handles,
    pub registry: Arc<ProposalRegistry>,
    pub applied: Arc<WaterMark>,
    pub txn_marks: Arc<WaterMark>,
    pub read_index: ReadIndexHandle,
    pub metrics: MetricsReader,
    pub shutdown_tx: watch::Sender<bool>,
    pub closer: Arc<tokio::sync::Notify>,
    /// Routes a serialized proposal to the run loop's task so it can
    /// call `RaftOracle::propose` (§4.7, §5 — the only task that may
    /// hold `&mut RaftOracle`).
    pub propose: ProposeHandle,
    /// Feeds an inbound peer message to the run loop so it can call
    /// `RaftOracle::step` (§4.7, §5).
    pub step_tx: mpsc::UnboundedSender<Message>,
}

/// Spawns the three background tasks described in §4.8 step 6 and
/// returns the caller-facing handles plumbed together.
#[allow(clippy::too_many_arguments)]
pub fn spawn<W, P, M, C, T>(
    oracle: RaftOracle,
    wal: Arc<W>,
    posting: Arc<P>,
    mvcc: Arc<M>,
    cluster: Arc<C>,
    transport: Arc<T>,
    group: GroupId,
    node_id: NodeId,
    self_addr: String,
    mode: StartMode,
    cfg: &Config,
) -> Spawned
where
    W: WalStore,
    P: PostingStore,
    M: MvccOracle,
    C: ClusterDirectory,
    T: Transport,
{
    let applied = Arc::new(WaterMark::new("applied", 0));
    let registry = Arc::new(ProposalRegistry::new(applied.clone()));
    let txn_marks = Arc::new(WaterMark::new("txn_marks", 0));

    let (apply_tx, apply_rx) = mpsc::channel::<CommittedEntry>(1024);
    let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel();
    let (metrics_writer, metrics_reader) = MetricsWriter::new(NodeMetrics::pristine(node_id));
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let (propose_tx, propose_rx) = mpsc::channel(cfg.pending_proposals);
    let (step_tx, step_rx) = mpsc::unbounded_channel();

    let (read_index_loop, read_index_handle, read_index_requests_rx, read_states_tx) =
        ReadIndexLoop::<NullOracle>::new(cfg.read_index_timeout);

    let can_campaign = matches!(mode, StartMode::FreshAlone);

    let run_loop = RunLoop::new(
        oracle,
        wal,
        posting.clone(),
        cluster,
        group,
        applied.clone(),
        txn_marks.clone(),
        apply_tx,
        outbound_tx,
        read_index_requests_rx,
        read_states_tx,
        propose_rx,
        step_rx,
        metrics_writer,
        shutdown_rx,
        cfg,
        can_campaign,
        self_addr,
    );

    let apply_pipeline = ApplyPipeline::new(posting, mvcc, registry.clone(), applied.clone(), txn_marks.clone(), apply_rx);
    let closer = run_loop.closer();

    // Outbound message batcher: the dedicated task §4.7/§5 calls for, so
    // the run loop never blocks on network I/O.
    tokio::spawn(async move {
        while let Some(messages) = outbound_rx.recv().await {
            if let Err(err) = transport.send(group, messages).await {
                tracing::warn!(%err, "failed to send outbound raft messages");
            }
        }
    });

    let run_loop_handle = tokio::spawn(async move {
        if let Err(err) = run_loop.run().await {
            tracing::error!(%err, "run loop exited with an error");
        }
    });
    let apply_handle = tokio::spawn(async move {
        if let Err(err) = apply_pipeline.run().await {
            tracing::error!(%err, "apply pipeline hit a fatal error, process should be restarted");
        }
    });
    let read_index_handle_task = tokio::spawn(read_index_loop.run());

    let handles = Handles { run_loop: run_loop_handle, apply_pipeline: apply_handle, read_index_loop: read_index_handle_task };
    Spawned {
        handles,
        registry,
        applied,
        txn_marks,
        read_index: read_index_handle,
        metrics: metrics_reader,
        shutdown_tx,
        closer,
        propose: ProposeHandle::new(propose_tx),
        step_tx,
    }
}

struct NullOracle;
impl crate::read_index::ReadIndexOracle for NullOracle {
    fn request_read_index(&mut self, _ctx: [u8; 8]) {}
}

/// Blocking stop sequence: signals the run loop, then waits (bounded by
/// `grace`) for it to acknowledge via its `closer` notification.
pub async fn stop(shutdown_tx: &watch::Sender<bool>, closer: Arc<tokio::sync::Notify>, grace: Duration) {
    let _ = shutdown_tx.send(true);
    let _ = tokio::time::timeout(grace + Duration::from_secs(1), closer.notified()).await;
}
