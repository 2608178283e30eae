//! Shared test fixtures, analogous in spirit to the teacher's
//! `tests/fixtures/mod.rs` `RaftRouter` (`teacher_reference/tests_fixtures_mod.rs`):
//! one place that wires up the in-memory collaborators so each scenario
//! file stays focused on what it is actually asserting.

use std::sync::Arc;

use raftgroup::apply::{ApplyPipeline, CommittedEntry, Proposal, ProposalFacet};
use raftgroup::proposal::{ProposalContext, ProposalKey, ProposalRegistry};
use raftgroup::watermark::WaterMark;
use raftgroup_memstore::{MemClusterDirectory, MemMvccOracle, MemPostingStore};

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

/// A running [`ApplyPipeline`] wired to fresh in-memory collaborators,
/// plus a sender scenario files use to feed it committed entries the way
/// `RunLoop` would.
pub struct Harness {
    pub posting: Arc<MemPostingStore>,
    pub mvcc: Arc<MemMvccOracle>,
    pub cluster: Arc<MemClusterDirectory>,
    pub registry: Arc<ProposalRegistry>,
    pub applied: Arc<WaterMark>,
    pub txn_marks: Arc<WaterMark>,
    pub apply_tx: tokio::sync::mpsc::Sender<CommittedEntry>,
    pub pipeline_handle: tokio::task::JoinHandle<()>,
}

impl Harness {
    pub fn start() -> Self {
        let posting = MemPostingStore::new();
        let mvcc = MemMvccOracle::new();
        let cluster = MemClusterDirectory::new(vec![1]);
        let applied = Arc::new(WaterMark::new("applied", 0));
        let registry = Arc::new(ProposalRegistry::new(applied.clone()));
        let txn_marks = Arc::new(WaterMark::new("txn_marks", 0));
        let (apply_tx, apply_rx) = tokio::sync::mpsc::channel(256);

        let pipeline = ApplyPipeline::new(posting.clone(), mvcc.clone(), registry.clone(), applied.clone(), txn_marks.clone(), apply_rx);
        let pipeline_handle = tokio::spawn(async move {
            let _ = pipeline.run().await;
        });

        Self { posting, mvcc, cluster, registry, applied, txn_marks, apply_tx, pipeline_handle }
    }

    /// Registers a client-style proposal (as `Node::propose_and_wait`
    /// would) and returns its key plus a receiver for the outcome.
    pub fn register_client_proposal(&self) -> (ProposalKey, tokio::sync::oneshot::Receiver<raftgroup::proposal::ProposalOutcome>) {
        let key = ProposalKey::fresh(1);
        let (tx, rx) = tokio::sync::oneshot::channel();
        self.registry.store(ProposalContext::new(key, tx, tracing::Span::none())).unwrap();
        (key, rx)
    }

    /// Simulates the run loop committing `facet` at `index` under `key`.
    pub async fn commit(&self, index: u64, key: ProposalKey, facet: ProposalFacet) {
        self.applied.begin(index);
        let proposal = Proposal { key, legacy_id: 0, facet };
        let data = serde_json::to_vec(&proposal).unwrap();
        self.apply_tx.send(CommittedEntry::Normal { index, data }).await.unwrap();
    }
}
