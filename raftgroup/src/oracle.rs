//! Thin wrapper over the `raft` crate's (tikv-raft-rs) `RawNode`, the
//! external consensus oracle this driver consumes rather than
//! reimplements (§1, §6).
//!
//! The API shape (tick/has_ready/ready/advance, `is_empty_snap`,
//! `MemStorage`'s `wl()`/`rl()` write/read guards, `propose`,
//! `raft.leader_id`) is grounded on
//! `examples/other_examples/ab81b52d_cberner-fleetfs__src-raft_manager.rs.rs`,
//! which drives the same crate the same way. The surrounding loop
//! shape (tick timer, `Ready` drained every iteration, committed entries
//! handed to an apply stage) is grounded on the teacher's
//! `RaftCore::main`/`LeaderState::run` select-loop
//! (`teacher_reference/core_mod.rs`).

use raft::prelude::{ConfChange, ConfState, Entry, EntryType, HardState, Message, Snapshot};
use raft::storage::MemStorage;
use raft::{Config as RaftConfig, RawNode, StateRole};

use crate::error::ProposeError;
use crate::raft_types::NodeId;

/// Everything the run loop drains out of one `Ready` cycle.
pub struct ReadyCycle {
    pub messages: Vec<Message>,
    pub entries_to_persist: Vec<Entry>,
    pub hard_state: Option<HardState>,
    pub snapshot: Option<Snapshot>,
    pub committed_entries: Vec<Entry>,
    pub read_states: Vec<raft::prelude::ReadState>,
    pub leader_changed: bool,
    pub is_leader: bool,
}

/// Owns the `RawNode` and the in-memory log store the `raft` crate
/// requires (`MemStorage`). The durable WAL (`crate::wal::WalStore`) is a
/// separate collaborator the run loop writes to before calling
/// [`RaftOracle::advance`], matching the teacher's
/// "log store write, then in-memory store write" ordering
/// (`teacher_reference/core_mod.rs`, §4.7 step 4).
pub struct RaftOracle {
    node: RawNode<MemStorage>,
    logger: slog::Logger,
}

impl RaftOracle {
    /// Starts a brand-new, single-voter group containing only `id`
    /// (§4.8 "fresh-alone branch").
    pub fn bootstrap_alone(id: NodeId, cfg: &RaftConfig) -> anyhow::Result<Self> {
        let storage = MemStorage::new_with_conf_state((vec![id], vec![]));
        Self::from_storage(cfg.clone(), storage)
    }

    /// Starts a voter that has not yet been offered membership (§4.8
    /// "fresh-with-peers branch"); the conf state is empty until the
    /// leader replicates one to it.
    pub fn bootstrap_pending(cfg: &RaftConfig) -> anyhow::Result<Self> {
        let storage = MemStorage::new();
        Self::from_storage(cfg.clone(), storage)
    }

    /// Restores from a previously persisted snapshot + entries + hard
    /// state (§4.8 "restart branch").
    pub fn restore(
        cfg: &RaftConfig,
        snapshot: Option<Snapshot>,
        hard_state: Option<HardState>,
        entries: Vec<Entry>,
    ) -> anyhow::Result<Self> {
        let storage = MemStorage::new();
        if let Some(snap) = snapshot {
            storage.wl().apply_snapshot(snap)?;
        }
        if !entries.is_empty() {
            storage.wl().append(&entries)?;
        }
        if let Some(hs) = hard_state {
            storage.wl().set_hardstate(hs);
        }
        Self::from_storage(cfg.clone(), storage)
    }

    fn from_storage(cfg: RaftConfig, storage: MemStorage) -> anyhow::Result<Self> {
        cfg.validate()?;
        let logger = slog::Logger::root(slog::Discard, slog::o!());
        let node = RawNode::new(&cfg, storage, &logger)?;
        Ok(Self { node, logger })
    }

    #[tracing::instrument(level = "debug", skip(self))]
    pub fn tick(&mut self) {
        self.node.tick();
    }

    pub fn has_ready(&self) -> bool {
        self.node.has_ready()
    }

    /// Drains one `Ready` cycle into a plain struct so the rest of the
    /// crate never has to import `raft::prelude` types directly.
    #[tracing::instrument(level = "debug", skip(self))]
    pub fn ready_cycle(&mut self) -> ReadyCycle {
        let mut ready = self.node.ready();

        let messages = ready.take_messages();
        let entries_to_persist = ready.entries().to_vec();
        let hard_state = ready.hs().cloned();
        let snapshot = if raft::is_empty_snap(ready.snapshot()) {
            None
        } else {
            Some(ready.snapshot().clone())
        };
        let committed_entries = ready.take_committed_entries();
        let read_states = ready.read_states().to_vec();
        let leader_changed = ready.ss().is_some();
        let is_leader = self.node.raft.state == StateRole::Leader;

        self.store_ready_locally(&ready);
        // Matches the grounding reference's direct `raw_node.advance(ready)`
        // call: this targets the synchronous (non-async-ready) `advance`
        // API, so no further `advance_apply` bookkeeping is required here.
        self.node.advance(ready);

        ReadyCycle {
            messages,
            entries_to_persist,
            hard_state,
            snapshot,
            committed_entries,
            read_states,
            leader_changed,
            is_leader,
        }
    }

    /// Writes the just-drained entries/hardstate/snapshot into the
    /// crate-required `MemStorage` (§6 "Log storage (memory)"), mirroring
    /// the grounding reference's `.mut_store().wl().append(...)`.
    fn store_ready_locally(&mut self, ready: &raft::Ready) {
        let store = self.node.mut_store();
        if !raft::is_empty_snap(ready.snapshot()) {
            store.wl().apply_snapshot(ready.snapshot().clone()).expect("apply_snapshot");
        }
        if !ready.entries().is_empty() {
            store.wl().append(ready.entries()).expect("append");
        }
        if let Some(hs) = ready.hs() {
            store.wl().set_hardstate(hs.clone());
        }
    }

    pub fn propose(&mut self, ctx: Vec<u8>, data: Vec<u8>) -> Result<(), ProposeError> {
        if self.node.raft.state != StateRole::Leader {
            return Err(ProposeError::NotLeader);
        }
        self.node.propose(ctx, data).map_err(|e| ProposeError::Consensus(e.into()))
    }

    pub fn propose_conf_change(&mut self, ctx: Vec<u8>, cc: ConfChange) -> Result<(), ProposeError> {
        self.node.propose_conf_change(ctx, cc).map_err(|e| ProposeError::Consensus(e.into()))
    }

    pub fn apply_conf_change(&mut self, cc: &ConfChange) -> anyhow::Result<ConfState> {
        Ok(self.node.apply_conf_change(cc)?)
    }

    /// Registers a `ReadIndex` request (§4.5). The corresponding
    /// `ReadState` surfaces later through [`ReadyCycle::read_states`].
    pub fn read_index(&mut self, request_ctx: Vec<u8>) {
        self.node.read_index(request_ctx);
    }

    pub fn campaign(&mut self) -> anyhow::Result<()> {
        Ok(self.node.campaign()?)
    }

    pub fn transfer_leader(&mut self, transferee: NodeId) {
        self.node.transfer_leader(transferee);
    }

    pub fn step(&mut self, msg: Message) -> anyhow::Result<()> {
        Ok(self.node.step(msg)?)
    }

    pub fn is_leader(&self) -> bool {
        self.node.raft.state == StateRole::Leader
    }

    pub fn leader_id(&self) -> Option<NodeId> {
        let id = self.node.raft.leader_id;
        if id == raft::INVALID_ID {
            None
        } else {
            Some(id)
        }
    }

    pub fn id(&self) -> NodeId {
        self.node.raft.id
    }

    pub fn term(&self) -> u64 {
        self.node.raft.term
    }

    pub fn last_index(&self) -> u64 {
        self.node.raft.raft_log.last_index()
    }

    pub fn logger(&self) -> &slog::Logger {
        &self.logger
    }
}

/// Decodes a committed entry's kind: a `Normal` entry carries a
/// [`crate::apply::Proposal`] payload; a `ConfChange` entry is the
/// membership wire type (§3 "Entry kinds").
pub fn entry_is_conf_change(entry: &Entry) -> bool {
    matches!(entry.get_entry_type(), EntryType::EntryConfChange | EntryType::EntryConfChangeV2)
}
