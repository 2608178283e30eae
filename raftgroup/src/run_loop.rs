//! The sole driver of the Raft oracle: one tick per interval, one
//! `Ready` drained per iteration, entries persisted before being handed
//! onward (§4.7).
//!
//! Grounded on the teacher's `RaftCore::main` dispatch loop and
//! `LeaderState::run`/`FollowerState::run` `tokio::select!` shape
//! (`teacher_reference/core_mod.rs`): one dedicated task owns all
//! mutable oracle state, and every external effect (sends, persistence,
//! apply) is either awaited synchronously in the right order or handed
//! off to another task via a channel.

use std::sync::Arc;
use std::time::Duration;

use raft::prelude::Message;
use tokio::sync::{mpsc, oneshot, watch, Notify};
use tokio::time::MissedTickBehavior;

use crate::apply::CommittedEntry;
use crate::cluster::ClusterDirectory;
use crate::config::Config;
use crate::error::ProposeError;
use crate::metrics::{MetricsWriter, NodeMetrics, Role};
use crate::oracle::RaftOracle;
use crate::posting::PostingStore;
use crate::raft_types::{GroupId, NodeId, RaftContext};
use crate::wal::WalStore;
use crate::watermark::WaterMark;

/// Outbound messages, batched and sent from a dedicated task so the run
/// loop never blocks on network I/O (§4.7 step 3/7, §5).
pub type OutboundSender = mpsc::UnboundedSender<Vec<Message>>;

/// The reply half of a [`ProposeHandle::submit`] call: whether the oracle
/// accepted the propose call itself, not the eventual apply outcome
/// (which arrives separately through the caller's `ProposalRegistry`
/// completion channel).
pub type ProposeReply = oneshot::Sender<Result<(), ProposeError>>;

/// Handle used by [`crate::node::Node`] to route a serialized proposal to
/// the run loop's task, the only place that holds mutable access to the
/// `RaftOracle` (§4.7, §5). Mirrors [`crate::read_index::ReadIndexHandle`]'s
/// shape.
#[derive(Clone)]
pub struct ProposeHandle {
    tx: mpsc::Sender<(Vec<u8>, ProposeReply)>,
}

impl ProposeHandle {
    pub(crate) fn new(tx: mpsc::Sender<(Vec<u8>, ProposeReply)>) -> Self {
        Self { tx }
    }

    pub async fn submit(&self, data: Vec<u8>) -> Result<(), ProposeError> {
        let (respond_to, rx) = oneshot::channel();
        if self.tx.send((data, respond_to)).await.is_err() {
            return Err(ProposeError::ShuttingDown);
        }
        rx.await.map_err(|_| ProposeError::ShuttingDown)?
    }
}

pub struct RunLoop<W, P, C> {
    oracle: RaftOracle,
    wal: Arc<W>,
    posting: Arc<P>,
    cluster: Arc<C>,
    group: GroupId,
    node_id: NodeId,
    applied: Arc<WaterMark>,
    txn_marks: Arc<WaterMark>,
    apply_tx: mpsc::Sender<CommittedEntry>,
    outbound_tx: OutboundSender,
    read_index_requests_rx: mpsc::UnboundedReceiver<[u8; 8]>,
    read_states_tx: mpsc::UnboundedSender<([u8; 8], u64)>,
    propose_rx: mpsc::Receiver<(Vec<u8>, ProposeReply)>,
    step_rx: mpsc::UnboundedReceiver<Message>,
    metrics: MetricsWriter,
    closer: Arc<Notify>,
    shutdown: watch::Receiver<bool>,
    tick_interval: Duration,
    can_campaign: bool,
    self_addr: String,
}

impl<W, P, C> RunLoop<W, P, C>
where
    W: WalStore,
    P: PostingStore,
    C: ClusterDirectory,
{
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        oracle: RaftOracle,
        wal: Arc<W>,
        posting: Arc<P>,
        cluster: Arc<C>,
        group: GroupId,
        applied: Arc<WaterMark>,
        txn_marks: Arc<WaterMark>,
        apply_tx: mpsc::Sender<CommittedEntry>,
        outbound_tx: OutboundSender,
        read_index_requests_rx: mpsc::UnboundedReceiver<[u8; 8]>,
        read_states_tx: mpsc::UnboundedSender<([u8; 8], u64)>,
        propose_rx: mpsc::Receiver<(Vec<u8>, ProposeReply)>,
        step_rx: mpsc::UnboundedReceiver<Message>,
        metrics: MetricsWriter,
        shutdown: watch::Receiver<bool>,
        cfg: &Config,
        can_campaign: bool,
        self_addr: String,
    ) -> Self {
        let node_id = oracle.id();
        Self {
            oracle,
            wal,
            posting,
            cluster,
            group,
            node_id,
            applied,
            txn_marks,
            apply_tx,
            outbound_tx,
            read_index_requests_rx,
            read_states_tx,
            propose_rx,
            step_rx,
            metrics,
            closer: Arc::new(Notify::new()),
            shutdown,
            tick_interval: cfg.tick_interval,
            can_campaign,
            self_addr,
        }
    }

    pub fn closer(&self) -> Arc<Notify> {
        self.closer.clone()
    }

    #[tracing::instrument(level = "info", skip(self), name = "run_loop", fields(group = self.group, node = self.node_id))]
    pub async fn run(mut self) -> anyhow::Result<()> {
        if self.can_campaign {
            self.oracle.campaign()?;
        }

        let mut ticker = tokio::time::interval(self.tick_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.oracle.tick();
                }
                Some(ctx) = self.read_index_requests_rx.recv() => {
                    self.oracle.read_index(ctx.to_vec());
                }
                Some((data, respond_to)) = self.propose_rx.recv() => {
                    let result = self.oracle.propose(Vec::new(), data);
                    let _ = respond_to.send(result);
                }
                Some(msg) = self.step_rx.recv() => {
                    if let Err(err) = self.oracle.step(msg) {
                        tracing::warn!(%err, "oracle failed to step an inbound message");
                    }
                }
                _ = self.shutdown.changed() => {
                    if *self.shutdown.borrow() {
                        self.handle_stop().await;
                        return Ok(());
                    }
                }
            }

            if self.oracle.has_ready() {
                self.drain_ready().await?;
            }
        }
    }

    #[tracing::instrument(level = "debug", skip(self))]
    async fn drain_ready(&mut self) -> anyhow::Result<()> {
        let is_leader_before = self.oracle.is_leader();
        let cycle = self.oracle.ready_cycle();

        // Step 1: forward ReadStates to the ReadIndexLoop.
        for rs in &cycle.read_states {
            let mut ctx = [0u8; 8];
            let n = rs.request_ctx.len().min(8);
            ctx[..n].copy_from_slice(&rs.request_ctx[..n]);
            let _ = self.read_states_tx.send((ctx, rs.index));
        }

        if cycle.leader_changed {
            self.cluster.trigger_membership_sync(self.group).await.ok();
        }

        let messages = stamp_context(cycle.messages, self.node_id, self.group, &self.self_addr);

        // Step 3: leader sends immediately, in parallel with its own
        // durability write (§4.7 step 3).
        if is_leader_before {
            let _ = self.outbound_tx.send(messages.clone());
        }

        // Step 4: persist HardState + entries to the WAL.
        if cycle.hard_state.is_some() || !cycle.entries_to_persist.is_empty() {
            let hs = cycle.hard_state.clone().unwrap_or_default();
            self.wal.store(self.group, &hs, &cycle.entries_to_persist).await?;
        }

        // Step 5: install an incoming, non-self-authored snapshot.
        if let Some(snapshot) = &cycle.snapshot {
            self.install_snapshot_if_needed(snapshot).await?;
        }

        // Step 6: hand committed entries to the apply pipeline in order,
        // after calling `Applied.Begin` (§4.4, §8 P1). Followers apply
        // ConfChange inline rather than queuing it.
        for entry in cycle.committed_entries {
            let index = entry.index;
            self.applied.begin(index);
            let committed = CommittedEntry::from_raft_entry(entry);
            if !is_leader_before {
                if let CommittedEntry::ConfChange { cc, .. } = &committed {
                    self.oracle.apply_conf_change(cc)?;
                }
            }
            if self.apply_tx.send(committed).await.is_err() {
                anyhow::bail!("apply pipeline closed while run loop still active");
            }
        }

        // Step 7: followers send only after their own durability write.
        if !is_leader_before {
            let _ = self.outbound_tx.send(messages);
        }

        self.report_metrics();
        Ok(())
    }

    async fn install_snapshot_if_needed(&mut self, snapshot: &raft::prelude::Snapshot) -> anyhow::Result<()> {
        let ctx: RaftContext = serde_json::from_slice(&snapshot.data)?;
        if ctx.id == self.node_id {
            // Self-authored snapshot: persist, but never re-install our
            // own data (§4.7 step 5, §8 P7).
            self.wal.store_snapshot(self.group, snapshot).await?;
            return Ok(());
        }
        // Let any apply work already in flight finish before evicting the
        // cache out from under it (§4.7 step 5).
        self.applied.wait_for_mark(self.applied.last_index()).await;
        self.posting.evict_lru().await?;
        self.posting.populate_shard(&ctx.addr).await?;
        self.posting.reload_schema(&ctx.addr).await?;
        self.wal.store_snapshot(self.group, snapshot).await?;
        Ok(())
    }

    fn report_metrics(&self) {
        let role = if self.oracle.is_leader() {
            Role::Leader
        } else {
            Role::Follower
        };
        self.metrics.publish(NodeMetrics {
            id: self.node_id,
            role,
            current_term: self.oracle.term(),
            last_log_index: self.oracle.last_index(),
            applied_index: self.applied.done_until(),
            txn_mark_index: self.txn_marks.done_until(),
            current_leader: self.oracle.leader_id(),
            membership: vec![self.node_id],
        });
    }

    /// §4.7 stop sequence: best-effort leadership transfer, then stop the
    /// oracle and close the background loops.
    #[tracing::instrument(level = "info", skip(self))]
    async fn handle_stop(&mut self) {
        if self.oracle.is_leader() {
            if let Some(peer) = self.pick_transfer_target() {
                self.oracle.transfer_leader(peer);
                tokio::time::sleep(Duration::from_secs(1)).await;
            }
        }
        self.closer.notify_waiters();
    }

    fn pick_transfer_target(&self) -> Option<NodeId> {
        // A real implementation asks `ClusterDirectory::members` for a
        // caught-up peer; kept simple here since peer progress tracking
        // lives in the oracle, not this driver.
        None
    }
}

fn stamp_context(mut messages: Vec<Message>, id: NodeId, group: GroupId, addr: &str) -> Vec<Message> {
    let ctx = RaftContext { id, group, addr: addr.to_string() };
    let bytes = serde_json::to_vec(&ctx).unwrap_or_default();
    for m in &mut messages {
        m.context = bytes.clone().into();
    }
    messages
}
