//! ProposalContext and ProposalRegistry (§3, §4.1).
//!
//! The completion-fan-in pattern (a single channel signaled exactly once
//! when a ref count reaches zero) is grounded on the teacher's
//! `ClientOrInternalResponseTx`/`client_request_post_commit`
//! (`teacher_reference/core_client.rs`), generalized from "one log entry,
//! one response" to "one log entry, N fanned-out per-key subtasks, one
//! response" per §4.3/§4.4.

use std::fmt;

use parking_lot::RwLock;
use rand::RngCore;
use std::collections::HashMap;
use tokio::sync::oneshot;
use tracing::Span;

use crate::error::{ApplyError, FatalError};
use crate::watermark::WaterMark;
use std::sync::Arc;

/// 16-byte opaque proposal identifier: 8 bytes of this node's Raft id, 8
/// bytes of cryptographic randomness (§3, §9 "Proposal key uniqueness").
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, serde::Serialize, serde::Deserialize)]
pub struct ProposalKey([u8; 16]);

impl ProposalKey {
    pub fn fresh(node_id: u64) -> Self {
        let mut bytes = [0u8; 16];
        bytes[0..8].copy_from_slice(&node_id.to_be_bytes());
        rand::thread_rng().fill_bytes(&mut bytes[8..16]);
        Self(bytes)
    }

    /// Rewrites a legacy numeric id into its canonical key form (§4.4,
    /// §8 P8). A plain decimal-string rendering can never collide with
    /// `to_hex()`'s fixed 32 lowercase hex characters, so both forms can
    /// coexist as registry keys without ambiguity (§9 Open Question (c)).
    /// We still need a fixed 16-byte representation for the registry map,
    /// so legacy ids are zero-extended into the low 8 bytes.
    pub fn from_legacy_id(id: u64) -> Self {
        let mut bytes = [0u8; 16];
        bytes[8..16].copy_from_slice(&id.to_be_bytes());
        Self(bytes)
    }

    pub fn to_hex(&self) -> String {
        self.0.iter().map(|b| format!("{b:02x}")).collect()
    }
}

impl fmt::Display for ProposalKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

/// The terminal result of a proposal, delivered once through
/// [`ProposalContext::completion`].
pub type ProposalOutcome = Result<(), ApplyError>;

/// Handle created per client-initiated proposal (§3).
pub struct ProposalContext {
    pub key: ProposalKey,
    completion: Option<oneshot::Sender<ProposalOutcome>>,
    pub span: Span,
    /// Outstanding fanned-out subtasks. The proposal is finalized when
    /// this reaches zero.
    refcount: i64,
    /// First non-nil subtask error wins.
    err: Option<ApplyError>,
    /// Raft log index at which this proposal was observed committed.
    /// Zero until the apply pipeline has seen it.
    pub index: u64,
    /// Lazily created MVCC transaction handle, keyed by `start_ts`, the
    /// first time the `Mutations` facet is dispatched (§9 Open Question
    /// (b)). Represented abstractly as the start timestamp itself; the
    /// concrete transaction object lives behind `MvccOracle`.
    pub start_ts: Option<u64>,
}

impl ProposalContext {
    pub fn new(key: ProposalKey, completion: oneshot::Sender<ProposalOutcome>, span: Span) -> Self {
        Self {
            key,
            completion: Some(completion),
            span,
            refcount: 1,
            err: None,
            index: 0,
            start_ts: None,
        }
    }

    /// Constructs a context for an entry observed only via replay (this
    /// node did not originate the proposal, or restarted before the
    /// original client handle existed) — there is no client to notify.
    pub fn for_replay(key: ProposalKey) -> Self {
        let (tx, rx) = oneshot::channel();
        drop(rx);
        Self::new(key, tx, Span::none())
    }
}

/// Thread-safe map from [`ProposalKey`] to [`ProposalContext`], guarded by
/// a short-critical-section `RwLock` the way the teacher guards its
/// in-memory `RaftCore` maps synchronously (§4.1, §5).
pub struct ProposalRegistry {
    inner: RwLock<HashMap<ProposalKey, ProposalContext>>,
    /// Shared with [`crate::run_loop::RunLoop`]. `done()` advances this
    /// itself once a proposal's refcount reaches zero (§3 "Watermarks",
    /// §4.1), so `Applied.Done` is emitted from exactly one place
    /// regardless of which facet or subtask fires the final `done()`.
    applied: Arc<WaterMark>,
}

impl ProposalRegistry {
    pub fn new(applied: Arc<WaterMark>) -> Self {
        Self { inner: RwLock::new(HashMap::new()), applied }
    }

    /// Inserts a freshly created context. Returns `Err` (fatal, §7) if
    /// the key is already present.
    pub fn store(&self, ctx: ProposalContext) -> Result<(), FatalError> {
        let mut inner = self.inner.write();
        let key = ctx.key;
        if inner.contains_key(&key) {
            return Err(FatalError::DuplicateProposalKey(key));
        }
        inner.insert(key, ctx);
        Ok(())
    }

    /// Inserts a context for a committed entry not already tracked
    /// (replay path in §4.4), tolerating a pre-existing entry by leaving
    /// it untouched.
    pub fn store_if_absent(&self, key: ProposalKey, make: impl FnOnce() -> ProposalContext) {
        let mut inner = self.inner.write();
        inner.entry(key).or_insert_with(make);
    }

    pub fn inc_ref(&self, key: ProposalKey, n: i64) {
        let mut inner = self.inner.write();
        if let Some(ctx) = inner.get_mut(&key) {
            ctx.refcount += n;
        }
    }

    pub fn set_index(&self, key: ProposalKey, index: u64) {
        let mut inner = self.inner.write();
        if let Some(ctx) = inner.get_mut(&key) {
            ctx.index = index;
        }
    }

    /// Records the first non-nil `start_ts` for this proposal's lazily
    /// created transaction (§9 Open Question (b)), returning whether this
    /// call was the one that set it.
    pub fn set_start_ts_if_absent(&self, key: ProposalKey, start_ts: u64) -> bool {
        let mut inner = self.inner.write();
        match inner.get_mut(&key) {
            Some(ctx) if ctx.start_ts.is_none() => {
                ctx.start_ts = Some(start_ts);
                true
            }
            _ => false,
        }
    }

    /// Decrements the refcount by one, recording `err` if it is the first
    /// error seen for this proposal. When the refcount reaches zero, the
    /// entry is removed, its completion channel is signaled exactly once,
    /// and — if this proposal was ever actually observed committed via
    /// [`Self::set_index`] — `Applied.Done(index)` fires (§4.1). Tolerates
    /// a missing key (double-`Done` after a replay-only proposal, §9 Open
    /// Question (a)).
    pub fn done(&self, key: ProposalKey, err: Option<ApplyError>) {
        let mut inner = self.inner.write();
        let Some(ctx) = inner.get_mut(&key) else { return };
        if ctx.err.is_none() {
            ctx.err = err;
        }
        ctx.refcount -= 1;
        debug_assert!(ctx.refcount >= 0, "proposal {} refcount went negative", key);
        if ctx.refcount <= 0 {
            let mut ctx = inner.remove(&key).expect("just looked up");
            drop(inner);
            // `index == 0` means this proposal was rolled back before the
            // apply pipeline ever saw it (e.g. a pre-commit consensus
            // rejection) — there is no `Applied.Begin(0)` to match, so
            // nothing to mark done.
            if ctx.index != 0 {
                self.applied.done(ctx.index);
            }
            let outcome = match ctx.err.take() {
                Some(e) => Err(e),
                None => Ok(()),
            };
            if let Some(tx) = ctx.completion.take() {
                let _ = tx.send(outcome);
            }
        }
    }

    pub fn contains(&self, key: ProposalKey) -> bool {
        self.inner.read().contains_key(&key)
    }

    pub fn len(&self) -> usize {
        self.inner.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fresh_registry() -> ProposalRegistry {
        ProposalRegistry::new(Arc::new(WaterMark::new("applied", 0)))
    }

    #[test]
    fn store_rejects_duplicate_key() {
        let reg = fresh_registry();
        let key = ProposalKey::fresh(1);
        let (tx1, _rx1) = oneshot::channel();
        let (tx2, _rx2) = oneshot::channel();
        reg.store(ProposalContext::new(key, tx1, Span::none())).unwrap();
        let err = reg.store(ProposalContext::new(key, tx2, Span::none())).unwrap_err();
        assert!(matches!(err, FatalError::DuplicateProposalKey(_)));
    }

    #[tokio::test]
    async fn refcount_fan_in_fires_once() {
        let reg = fresh_registry();
        let key = ProposalKey::fresh(1);
        let (tx, rx) = oneshot::channel();
        reg.store(ProposalContext::new(key, tx, Span::none())).unwrap();
        reg.inc_ref(key, 2); // now 3 subtasks total
        reg.done(key, None);
        reg.done(key, None);
        assert!(reg.contains(key));
        reg.done(key, None);
        assert!(!reg.contains(key));
        assert!(rx.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn first_error_wins() {
        let reg = fresh_registry();
        let key = ProposalKey::fresh(1);
        let (tx, rx) = oneshot::channel();
        reg.store(ProposalContext::new(key, tx, Span::none())).unwrap();
        reg.inc_ref(key, 1);
        reg.done(key, Some(ApplyError::Conflict));
        reg.done(key, Some(ApplyError::Schema("late".into())));
        let outcome = rx.await.unwrap();
        assert!(matches!(outcome, Err(ApplyError::Conflict)));
    }

    #[test]
    fn done_on_missing_key_is_tolerated() {
        let reg = fresh_registry();
        reg.done(ProposalKey::fresh(1), None);
    }

    #[test]
    fn legacy_id_and_fresh_key_never_collide() {
        let legacy = ProposalKey::from_legacy_id(42);
        let fresh = ProposalKey::fresh(1);
        assert_ne!(legacy, fresh);
    }

    #[test]
    fn done_marks_applied_watermark_once_index_is_set() {
        let applied = Arc::new(WaterMark::new("applied", 0));
        let reg = ProposalRegistry::new(applied.clone());
        let key = ProposalKey::fresh(1);
        let (tx, _rx) = oneshot::channel();
        reg.store(ProposalContext::new(key, tx, Span::none())).unwrap();
        applied.begin(7);
        reg.set_index(key, 7);
        reg.done(key, None);
        assert_eq!(applied.done_until(), 7, "Applied.Done must fire from within Registry::done once ref hits 0");
    }

    #[test]
    fn done_does_not_mark_applied_watermark_for_a_never_committed_proposal() {
        let applied = Arc::new(WaterMark::new("applied", 0));
        let reg = ProposalRegistry::new(applied.clone());
        let key = ProposalKey::fresh(1);
        let (tx, _rx) = oneshot::channel();
        reg.store(ProposalContext::new(key, tx, Span::none())).unwrap();
        // Never saw `set_index`: a pre-commit rollback, e.g. the
        // consensus-rejection path in `Node::propose_and_wait`.
        reg.done(key, None);
        assert_eq!(applied.done_until(), 0);
    }
}
