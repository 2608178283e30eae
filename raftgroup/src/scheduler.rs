//! Partitions a proposal's edge mutations so that edges sharing a primary
//! key execute serially while edges on different keys run in parallel
//! (§4.3, §8 P4).
//!
//! Grounded on the fan-out/fan-in concurrency idiom of the teacher's
//! `replicate_client_request` (`teacher_reference/core_client.rs`):
//! spawn one task per unit of work, report completion through a shared
//! registry rather than joining futures directly, so that different
//! proposals' subtasks interleave freely on the runtime.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::Span;

use crate::error::ApplyError;
use crate::posting::{EdgeMutation, MvccOracle, PostingStore, SchemaMutation};
use crate::proposal::{ProposalKey, ProposalRegistry};

/// The subset of a `Mutations` facet the scheduler needs, decoupled from
/// the wire `Proposal` type so it can be unit tested without a full
/// committed entry.
pub struct MutationBatch {
    pub edges: Vec<EdgeMutation>,
    pub schema: Vec<SchemaMutation>,
    pub start_ts: u64,
}

pub struct Scheduler<P, M> {
    posting: Arc<P>,
    mvcc: Arc<M>,
    registry: Arc<ProposalRegistry>,
}

impl<P, M> Scheduler<P, M>
where
    P: PostingStore,
    M: MvccOracle,
{
    pub fn new(posting: Arc<P>, mvcc: Arc<M>, registry: Arc<ProposalRegistry>) -> Self {
        Self { posting, mvcc, registry }
    }

    /// Schedules every edge/schema task for one committed proposal. The
    /// caller (the apply pipeline) has already called
    /// `registry.inc_ref(key, n)` for the `n` tasks this spawns (§4.4).
    #[tracing::instrument(level = "debug", skip(self, batch), fields(key = %key, edges = batch.edges.len()))]
    pub fn schedule(&self, key: ProposalKey, batch: MutationBatch, span: Span) {
        let mut by_key: HashMap<(u64, String), Vec<EdgeMutation>> = HashMap::new();
        for edge in batch.edges {
            let (subject, predicate) = edge.primary_key();
            by_key.entry((subject, predicate.to_string())).or_default().push(edge);
        }

        let chain_count = by_key.len();
        let schema = batch.schema;
        let start_ts = batch.start_ts;

        for (_primary_key, chain) in by_key {
            let posting = self.posting.clone();
            let mvcc = self.mvcc.clone();
            let registry = self.registry.clone();
            let span = span.clone();
            tokio::spawn(async move {
                let _entered = span.enter();
                let err = run_chain_serially(posting.as_ref(), mvcc.as_ref(), &registry, key, start_ts, chain).await;
                registry.done(key, err);
            });
        }

        if !schema.is_empty() {
            let posting = self.posting.clone();
            let registry = self.registry.clone();
            let span = span.clone();
            tokio::spawn(async move {
                let _entered = span.enter();
                let mut first_err = None;
                for s in &schema {
                    if let Err(e) = posting.run_schema_mutation(start_ts, s).await {
                        tracing::error!(error = %e, predicate = %s.predicate, "schema mutation failed");
                        first_err.get_or_insert(ApplyError::Schema(e.to_string()));
                    }
                }
                registry.done(key, first_err);
            });
        }

        let _ = chain_count;
    }
}

/// Runs one primary-key chain of edge mutations in order, returning the
/// first error encountered (subsequent edges in the chain are skipped on
/// error, matching "conflict aborts the rest of this key's chain").
async fn run_chain_serially<P: PostingStore, M: MvccOracle>(
    posting: &P,
    mvcc: &M,
    registry: &ProposalRegistry,
    key: ProposalKey,
    start_ts: u64,
    chain: Vec<EdgeMutation>,
) -> Option<ApplyError> {
    registry.set_start_ts_if_absent(key, start_ts);
    if let Err(e) = mvcc.wait_for_ts(start_ts).await {
        tracing::error!(error = %e, "mvcc oracle failed while waiting for start_ts");
        return Some(ApplyError::collaborator(e));
    }
    let txn = match mvcc.begin(start_ts).await {
        Ok(txn) => txn,
        Err(e) => return Some(ApplyError::collaborator(e)),
    };
    for edge in &chain {
        if let Err(e) = posting.run_mutation(txn, edge).await {
            tracing::error!(error = %e, subject = edge.subject, predicate = %edge.predicate, "mutation failed");
            return Some(ApplyError::Conflict);
        }
    }
    None
}
