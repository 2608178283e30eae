//! Conflicting overwrite (§8 scenario 2, P4).
//!
//! Two edges on the same subject/predicate in one proposal must be
//! serialized: the index entry for the first value is torn down before
//! the second is installed, never applied out of order or concurrently.

mod fixtures;

use raftgroup::apply::ProposalFacet;
use raftgroup::posting::{EdgeMutation, EdgeOp};

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn same_key_edges_apply_in_submission_order() {
    fixtures::init_tracing();
    let harness = fixtures::Harness::start();

    let (key, rx) = harness.register_client_proposal();
    harness
        .commit(
            1,
            key,
            ProposalFacet::Mutations {
                edges: vec![
                    EdgeMutation { subject: 1, predicate: "name".into(), op: EdgeOp::Set, value: b"janardhan".to_vec() },
                    EdgeMutation { subject: 1, predicate: "name".into(), op: EdgeOp::Set, value: b"pawan".to_vec() },
                ],
                schema: vec![],
                start_ts: 10,
            },
        )
        .await;

    let outcome = rx.await.expect("completion channel should fire exactly once");
    assert!(outcome.is_ok());

    let stored = harness.posting.get(1, "name").expect("edge should be applied");
    assert_eq!(stored.value, b"pawan");

    assert!(harness.posting.reverse_lookup(b"janardhan").is_empty(), "stale reverse entry must be torn down");
    assert_eq!(harness.posting.reverse_lookup(b"pawan"), vec![1]);

    harness.pipeline_handle.abort();
}
