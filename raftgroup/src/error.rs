//! Error taxonomy for the replication core (§7).
//!
//! Mirrors the propagation policy: everything below consensus commit is
//! retried locally by the caller; everything at or above commit is
//! reported to the client attached to the proposal (if any) and is never
//! retried once the entry has actually been applied.

use crate::proposal::ProposalKey;

/// Errors that can be returned from [`crate::node::Node::propose_and_wait`]
/// before or during consensus, i.e. before the proposal's fate has been
/// decided by the apply pipeline.
#[derive(thiserror::Error, Debug)]
pub enum ProposeError {
    #[error("predicate {0:?} is being moved to another group")]
    PredicateMoving(String),

    #[error("predicate {0:?} is not served by this group")]
    PredicateNotServed(String),

    #[error("invalid schema mutation: {0}")]
    InvalidSchema(String),

    #[error("admission limit reached, too many pending proposals")]
    AdmissionLimitReached,

    #[error("this node is not the leader")]
    NotLeader,

    #[error("raft refused the proposal: {0}")]
    Consensus(#[source] anyhow::Error),

    #[error("timed out waiting for proposal to commit")]
    Timeout,

    #[error("node is shutting down")]
    ShuttingDown,
}

/// Errors recorded into a [`crate::proposal::ProposalContext`] as the
/// terminal result of a committed entry's apply. These are never retried:
/// the entry has already passed through consensus.
#[derive(thiserror::Error, Debug, Clone)]
pub enum ApplyError {
    #[error("transaction aborted due to conflicting write")]
    Conflict,

    #[error("schema mutation failed: {0}")]
    Schema(String),

    #[error("key/value ingest failed: {0}")]
    Ingest(String),

    #[error("predicate deletion failed: {0}")]
    CleanPredicate(String),

    #[error("transaction commit/abort failed: {0}")]
    Txn(String),

    #[error("collaborator error: {0}")]
    Collaborator(String),
}

impl ApplyError {
    pub fn collaborator(err: anyhow::Error) -> Self {
        ApplyError::Collaborator(format!("{err:#}"))
    }
}

/// Returned by [`crate::read_index::ReadIndexLoop::wait_linearizable_read`]
/// (the `errReadIndex` sentinel).
#[derive(thiserror::Error, Debug, Clone, Copy)]
#[error("read index could not be confirmed before the timeout")]
pub struct ReadIndexError;

/// Conditions that indicate corruption of the replicated log or of the
/// registry's own invariants. These abort the process: continuing would
/// risk silently diverging replicas.
#[derive(thiserror::Error, Debug)]
pub enum FatalError {
    #[error("unknown proposal facet in committed entry at index {index}")]
    UnknownFacet { index: u64 },

    #[error("failed to decode committed entry at index {index}: {source}")]
    Decode {
        index: u64,
        #[source]
        source: serde_json::Error,
    },

    #[error("duplicate live proposal key {0:?}")]
    DuplicateProposalKey(ProposalKey),

    #[error("collaborator reported a fatal error: {0}")]
    Collaborator(#[source] anyhow::Error),
}

pub type ProposeResult<T> = Result<T, ProposeError>;
pub type ApplyResult<T> = Result<T, ApplyError>;
pub type FatalResult<T> = Result<T, FatalError>;
