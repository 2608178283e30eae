//! Snapshot back-pressure (§8 scenario 6).
//!
//! Wires a real [`raftgroup::snapshot::Snapshotter`] to the in-memory
//! `raftgroup-memstore` collaborators plus a minimal fake log store, and
//! checks that a large applied/txn-watermark gap triggers
//! `abort_old_transactions` instead of a snapshot.

mod fixtures;

use std::sync::Arc;

use parking_lot::Mutex;
use raft::prelude::ConfState;
use raftgroup::config::Config;
use raftgroup::snapshot::{SnapshotOutcome, SnapshotStore, Snapshotter};
use raftgroup::watermark::WaterMark;
use raftgroup_memstore::{MemClusterDirectory, MemMvccOracle, MemWalStore};

struct FakeLogStore {
    last: Mutex<u64>,
}

impl SnapshotStore for FakeLogStore {
    fn create_snapshot(&self, index: u64, _conf_state: ConfState, _context: Vec<u8>) -> anyhow::Result<()> {
        *self.last.lock() = index;
        Ok(())
    }
    fn compact(&self, _index: u64) -> anyhow::Result<()> {
        Ok(())
    }
    fn last_snapshot_index(&self) -> u64 {
        *self.last.lock()
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn large_gap_aborts_old_transactions_without_snapshotting() {
    fixtures::init_tracing();

    let cfg = Config::builder().force_abort_difference(10).build().unwrap();
    let applied = Arc::new(WaterMark::new("applied", 0));
    let txn_marks = Arc::new(WaterMark::new("txn_marks", 0));
    let cluster = MemClusterDirectory::new(vec![1]);

    let snapshotter = Snapshotter::new(
        Arc::new(FakeLogStore { last: Mutex::new(0) }),
        MemWalStore::new(),
        cluster.clone(),
        MemMvccOracle::new(),
        applied.clone(),
        txn_marks.clone(),
        1,
        1,
        &cfg,
    );

    // TxnMarks never advances (no commit proposals applied) while Applied
    // races ahead to 100 — the gap (100) exceeds 1.5 * 10.
    applied.begin(100);
    applied.done(100);

    let outcome = snapshotter.snapshot(10, ConfState::default()).await.unwrap();
    assert_eq!(outcome, SnapshotOutcome::SkippedWithAbort { gap: 100 });
    assert_eq!(cluster.aborts(), vec![100]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn caught_up_watermark_produces_a_snapshot() {
    fixtures::init_tracing();

    let cfg = Config::builder().force_abort_difference(10).build().unwrap();
    let applied = Arc::new(WaterMark::new("applied", 0));
    let txn_marks = Arc::new(WaterMark::new("txn_marks", 0));
    let cluster = MemClusterDirectory::new(vec![1]);

    let snapshotter = Snapshotter::new(
        Arc::new(FakeLogStore { last: Mutex::new(0) }),
        MemWalStore::new(),
        cluster.clone(),
        MemMvccOracle::new(),
        applied,
        txn_marks.clone(),
        1,
        1,
        &cfg,
    );

    txn_marks.begin(50);
    txn_marks.done(50);

    let outcome = snapshotter.snapshot(10, ConfState::default()).await.unwrap();
    assert_eq!(outcome, SnapshotOutcome::Created(40));
    assert!(cluster.aborts().is_empty());
}
