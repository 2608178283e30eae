//! Happy-path mutation (§8 scenario 1).
//!
//! What does this test do?
//!
//! - commits a `Mutations` proposal for `<0x1> name "alice"`.
//! - asserts the completion channel returns `Ok(())`.
//! - asserts the posting store reflects the edge.
//! - asserts `Applied.DoneUntil()` advances by one for the mutation
//!   entry, and that the txn watermark only advances once the
//!   subsequent commit proposal is applied.

mod fixtures;

use raftgroup::apply::ProposalFacet;
use raftgroup::posting::{EdgeMutation, EdgeOp};

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn happy_path_mutation() {
    fixtures::init_tracing();
    let harness = fixtures::Harness::start();

    let (key, rx) = harness.register_client_proposal();
    harness
        .commit(
            1,
            key,
            ProposalFacet::Mutations {
                edges: vec![EdgeMutation { subject: 1, predicate: "name".into(), op: EdgeOp::Set, value: b"alice".to_vec() }],
                schema: vec![],
                start_ts: 10,
            },
        )
        .await;

    let outcome = rx.await.expect("completion channel should fire exactly once");
    assert!(outcome.is_ok());

    harness.applied.wait_for_mark(1).await;
    assert_eq!(harness.applied.done_until(), 1);

    let stored = harness.posting.get(1, "name").expect("edge should be applied");
    assert_eq!(stored.value, b"alice");

    assert_eq!(harness.txn_marks.done_until(), 0, "txn watermark must not advance before a commit proposal");

    let (commit_key, commit_rx) = harness.register_client_proposal();
    harness.commit(2, commit_key, ProposalFacet::TxnContext { start_ts: 10, commit_ts: Some(11) }).await;
    commit_rx.await.unwrap().unwrap();
    harness.txn_marks.wait_for_mark(2).await;
    assert_eq!(harness.txn_marks.done_until(), 2);

    harness.pipeline_handle.abort();
}
