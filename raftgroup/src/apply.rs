//! The committed-entry payload and the single-consumer pipeline that
//! dispatches it (§3 "Proposal (log-entry payload)", §4.4).
//!
//! Grounded on the teacher's `apply_entry_to_state_machine`/
//! `client_request_post_commit` (`teacher_reference/core_client.rs`): one
//! decode-then-dispatch step per committed entry, with the dispatch
//! target generalized from "the application's single state machine call"
//! to this domain's five proposal facets.

use std::sync::Arc;

use raft::prelude::Entry as RaftEntry;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::Span;

use crate::error::{ApplyError, FatalError};
use crate::oracle::entry_is_conf_change;
use crate::posting::{EdgeMutation, MvccOracle, PostingStore, SchemaMutation};
use crate::proposal::{ProposalContext, ProposalKey, ProposalRegistry};
use crate::scheduler::{MutationBatch, Scheduler};
use crate::watermark::WaterMark;

/// The payload carried by a `Normal` Raft entry (§3). Exactly one facet
/// is populated per instance; `key` and `legacy_id` are shared framing.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Proposal {
    pub key: ProposalKey,
    /// Nonzero for proposals originating before the 16-byte key scheme;
    /// rewritten into canonical form before apply (§4.4, §8 P8).
    pub legacy_id: u64,
    pub facet: ProposalFacet,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum ProposalFacet {
    Mutations { edges: Vec<EdgeMutation>, schema: Vec<SchemaMutation>, start_ts: u64 },
    Kv(Vec<(Vec<u8>, Vec<u8>)>),
    State(ClusterState),
    CleanPredicate(String),
    TxnContext { start_ts: u64, commit_ts: Option<u64> },
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ClusterState {
    pub members: Vec<u64>,
}

/// Committed entries as handed from [`crate::run_loop::RunLoop`] to the
/// apply pipeline (§4.7 step 6).
pub enum CommittedEntry {
    Normal { index: u64, data: Vec<u8> },
    ConfChange { index: u64, cc: raft::prelude::ConfChange },
    Empty { index: u64 },
}

impl CommittedEntry {
    pub fn from_raft_entry(entry: RaftEntry) -> Self {
        let index = entry.index;
        if entry.data.is_empty() {
            return CommittedEntry::Empty { index };
        }
        if entry_is_conf_change(&entry) {
            let cc = protobuf::Message::parse_from_bytes(&entry.data).expect("conf change entries are always well formed");
            return CommittedEntry::ConfChange { index, cc };
        }
        CommittedEntry::Normal { index, data: entry.data.to_vec() }
    }
}

pub struct ApplyPipeline<P, M> {
    posting: Arc<P>,
    mvcc: Arc<M>,
    registry: Arc<ProposalRegistry>,
    scheduler: Scheduler<P, M>,
    applied: Arc<WaterMark>,
    txn_marks: Arc<WaterMark>,
    /// A `Mutations` entry stages edges into a transaction but is not
    /// "durably reflected in the transactional index" until that
    /// transaction actually commits or aborts (§3 "Watermarks", §8
    /// scenario 1): its `TxnMarks.Done` is deferred here, keyed by
    /// `start_ts`, and fired together with the `TxnContext` entry's own
    /// index once that later entry is applied.
    deferred_txn_marks: Arc<parking_lot::Mutex<std::collections::HashMap<u64, Vec<u64>>>>,
    rx: mpsc::Receiver<CommittedEntry>,
}

impl<P, M> ApplyPipeline<P, M>
where
    P: PostingStore,
    M: MvccOracle,
{
    pub fn new(
        posting: Arc<P>,
        mvcc: Arc<M>,
        registry: Arc<ProposalRegistry>,
        applied: Arc<WaterMark>,
        txn_marks: Arc<WaterMark>,
        rx: mpsc::Receiver<CommittedEntry>,
    ) -> Self {
        let scheduler = Scheduler::new(posting.clone(), mvcc.clone(), registry.clone());
        Self { posting, mvcc, registry, scheduler, applied, txn_marks, deferred_txn_marks: Default::default(), rx }
    }

    /// Drives the pipeline until its channel is closed (node shutdown).
    #[tracing::instrument(level = "info", skip(self), name = "apply_pipeline")]
    pub async fn run(mut self) -> Result<(), FatalError> {
        while let Some(entry) = self.rx.recv().await {
            self.apply_one(entry).await?;
        }
        Ok(())
    }

    #[tracing::instrument(level = "debug", skip(self, entry))]
    async fn apply_one(&mut self, entry: CommittedEntry) -> Result<(), FatalError> {
        match entry {
            CommittedEntry::Empty { index } => {
                self.applied.done(index);
            }
            CommittedEntry::ConfChange { index, cc } => {
                // Conf-change entries are always applied inline by the run
                // loop / here, never routed through the proposal registry,
                // so there is no shared completion state that could
                // double-fire on replay (§9 Open Question (a)).
                tracing::info!(index, change_type = ?cc.get_change_type(), node_id = cc.node_id, "applying conf change");
                self.applied.done(index);
            }
            CommittedEntry::Normal { index, data } => {
                let proposal: Proposal = serde_json::from_slice(&data).map_err(|source| FatalError::Decode { index, source })?;
                self.dispatch_normal(index, proposal).await;
            }
        }
        Ok(())
    }

    async fn dispatch_normal(&mut self, index: u64, proposal: Proposal) {
        let key = if proposal.legacy_id != 0 { ProposalKey::from_legacy_id(proposal.legacy_id) } else { proposal.key };

        // Replay path: this node did not originate the proposal (or
        // restarted since), so there is no client waiting. Register a
        // throwaway context so the rest of the dispatch logic is uniform.
        self.registry.store_if_absent(key, || ProposalContext::for_replay(key));
        self.registry.set_index(key, index);
        self.txn_marks.begin(index);

        match proposal.facet {
            ProposalFacet::Mutations { edges, schema, start_ts } => {
                let fan_out = edges_chain_count(&edges) as i64 + if schema.is_empty() { 0 } else { 1 };
                if fan_out > 0 {
                    self.registry.inc_ref(key, fan_out);
                }
                self.scheduler.schedule(key, MutationBatch { edges, schema, start_ts }, Span::current());
                // `TxnMarks.Done` for this index happens once the
                // transaction actually commits (a later `TxnContext`
                // proposal), not here — a `Mutations` proposal only
                // stages edges into the open transaction.
                self.deferred_txn_marks.lock().entry(start_ts).or_default().push(index);
                // `Applied.Done` is not safe to call here: the actual
                // mutation work was just handed to the scheduler and may
                // still be in flight. `registry.done` below only retires
                // this dispatch's own share of the refcount; once the
                // fanned-out subtasks each call `registry.done` in turn,
                // the registry itself fires `Applied.Done(index)` the
                // moment the count reaches zero (§3 "Watermarks", §4.1).
                self.registry.done(key, None);
            }
            ProposalFacet::Kv(kvs) => {
                let err = self.posting.populate_key_values(&kvs).await.err().map(|e| ApplyError::Ingest(e.to_string()));
                self.txn_marks.done(index);
                // Synchronously awaited above, so it is already safe to
                // advance Applied before the registry's own fan-in fires.
                self.applied.done(index);
                self.registry.done(key, err);
            }
            ProposalFacet::State(state) => {
                tracing::info!(members = ?state.members, "applying cluster state");
                self.txn_marks.done(index);
                self.applied.done(index);
                self.registry.done(key, None);
            }
            ProposalFacet::CleanPredicate(predicate) => {
                let err = self.posting.delete_predicate(&predicate).await.err().map(|e| ApplyError::CleanPredicate(e.to_string()));
                self.txn_marks.done(index);
                self.applied.done(index);
                self.registry.done(key, err);
            }
            ProposalFacet::TxnContext { start_ts, commit_ts } => {
                let mvcc = self.mvcc.clone();
                let registry = self.registry.clone();
                let txn_marks = self.txn_marks.clone();
                let deferred_txn_marks = self.deferred_txn_marks.clone();
                tokio::spawn(async move {
                    let err = match mvcc.commit_or_abort(start_ts, commit_ts).await {
                        Ok(()) => match mvcc.done(start_ts).await {
                            Ok(()) => None,
                            Err(e) => Some(ApplyError::Txn(e.to_string())),
                        },
                        Err(e) => Some(ApplyError::Txn(e.to_string())),
                    };
                    // Whether the transaction committed or aborted, its
                    // `Mutations` entries are now resolved: P3 only
                    // requires TxnMarks to trail Applied, not that it
                    // reflects successful commits specifically, so stuck
                    // entries are released on abort too.
                    let deferred = deferred_txn_marks.lock().remove(&start_ts).unwrap_or_default();
                    for deferred_index in deferred {
                        txn_marks.done(deferred_index);
                    }
                    txn_marks.done(index);
                    // As with `Mutations`, the real work (commit/abort)
                    // just ran above inside this spawned task, so the
                    // registry's own `Applied.Done(index)` on the final
                    // `done()` call below is what actually advances the
                    // watermark, not a call made back in the run loop's
                    // dispatch path.
                    registry.done(key, err);
                });
            }
        }
    }
}

fn edges_chain_count(edges: &[EdgeMutation]) -> usize {
    let mut keys = std::collections::HashSet::new();
    for e in edges {
        let (s, p) = e.primary_key();
        keys.insert((s, p.to_string()));
    }
    keys.len()
}
