//! Leader change mid-propose (§8 scenario 4), simplified.
//!
//! A live leader election/loss requires a multi-node `raft::RawNode`
//! cluster exchanging messages over real transport, which is out of
//! scope for this single-process harness (see DESIGN.md). What's
//! exercised here is the part of the scenario this crate owns regardless
//! of cluster topology: `Node::propose_and_wait` must surface a non-leader
//! rejection — not hang, not silently succeed — and no ghost apply
//! occurs in the meantime. `StartMode::FreshWithPeers` never calls
//! `campaign()`, so this node deterministically never becomes leader,
//! which is exactly the state a node that just lost leadership mid-propose
//! would observe when the run loop gets around to calling
//! `RaftOracle::propose`.

mod fixtures;

use std::sync::Arc;
use std::time::Duration;

use raft::Config as RaftConfig;
use raftgroup::config::Config;
use raftgroup::error::ProposeError;
use raftgroup::lifecycle::StartMode;
use raftgroup::oracle::RaftOracle;
use raftgroup::posting::{EdgeMutation, EdgeOp};
use raftgroup::Node;
use raftgroup_memstore::{MemClusterDirectory, MemMvccOracle, MemPostingStore, MemTransport, MemWalStore};

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn propose_is_rejected_when_this_node_never_became_leader() {
    fixtures::init_tracing();

    let cfg = Config::builder().propose_timeout(Duration::from_millis(150)).tick_interval(Duration::from_millis(10)).build().unwrap();

    let raft_cfg = RaftConfig { id: 1, ..Default::default() };
    let oracle = RaftOracle::bootstrap_pending(&raft_cfg).unwrap();

    let wal = MemWalStore::new();
    let posting = MemPostingStore::new();
    let mvcc = MemMvccOracle::new();
    let cluster = MemClusterDirectory::new(vec![1]);
    let transport = MemTransport::new();

    let node = Node::start(oracle, wal, posting.clone(), mvcc, cluster, transport, 1, "127.0.0.1:0".into(), StartMode::FreshWithPeers, &cfg);

    let facet = raftgroup::apply::ProposalFacet::Mutations {
        edges: vec![EdgeMutation { subject: 1, predicate: "name".into(), op: EdgeOp::Set, value: b"alice".to_vec() }],
        schema: vec![],
        start_ts: 10,
    };

    let result = node.propose_and_wait(facet).await;

    assert!(matches!(result, Err(ProposeError::NotLeader)), "a node that never became leader must reject the propose call, not hang or succeed");
    assert!(posting.get(1, "name").is_none(), "no ghost apply may occur for a proposal that was never accepted");

    node.stop().await;
}
