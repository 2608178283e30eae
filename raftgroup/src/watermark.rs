//! Monotone progress counters with out-of-order `Done` but ordered
//! `DoneUntil` advancement (§3 "Watermarks", §8 P1/P3).
//!
//! The shape is the Badger/Dgraph `y.WaterMark`: indexes are `Begin`-ed in
//! strictly ascending order, may be `Done`-ed in any order, and
//! `DoneUntil` only advances across a contiguous prefix that has all been
//! marked done. There is no single teacher file for this utility; the
//! *idiom* (a small struct guarding a heap plus a notify, queried by
//! concurrent waiters) is grounded on how `teacher_reference/core_mod.rs`
//! tracks `last_applied`/`commit_index` as plain fields mutated only from
//! the single-owner run loop, generalized here to support concurrent
//! `Done` callers from fanned-out apply tasks.

use std::cmp::Reverse;
use std::collections::BinaryHeap;

use parking_lot::Mutex;
use tokio::sync::Notify;

struct Inner {
    done_until: u64,
    /// Indexes marked `Begin`-ed but not yet `Done`-ed, smallest first.
    pending: BinaryHeap<Reverse<u64>>,
    /// Indexes marked `Done`-ed out of order, waiting for `pending`'s
    /// smallest entry to catch up to them.
    waiting: std::collections::HashSet<u64>,
}

/// A single monotone watermark, e.g. `Applied` or `TxnMarks`.
pub struct WaterMark {
    inner: Mutex<Inner>,
    notify: Notify,
    name: &'static str,
}

impl WaterMark {
    pub fn new(name: &'static str, initial: u64) -> Self {
        Self {
            inner: Mutex::new(Inner {
                done_until: initial,
                pending: BinaryHeap::new(),
                waiting: std::collections::HashSet::new(),
            }),
            notify: Notify::new(),
            name,
        }
    }

    /// Records that apply work for `index` is starting. Must be called in
    /// strictly ascending order by the single producer (the run loop) —
    /// see §8 P1.
    pub fn begin(&self, index: u64) {
        let mut inner = self.inner.lock();
        debug_assert!(
            index > inner.done_until || inner.pending.peek().map(|Reverse(i)| *i < index).unwrap_or(true),
            "{}: begin({}) called out of order (done_until={})",
            self.name,
            index,
            inner.done_until
        );
        inner.pending.push(Reverse(index));
    }

    /// Records that `index`'s work has finished. May arrive out of order
    /// relative to other in-flight indexes.
    pub fn done(&self, index: u64) {
        let mut inner = self.inner.lock();
        if !inner.pending.iter().any(|Reverse(i)| *i == index) {
            // Already completed (or never begun, e.g. a replayed
            // no-op) — tolerate, matching the registry's own
            // double-`Done` tolerance.
            return;
        }
        inner.waiting.insert(index);
        // Pop the contiguous prefix of `pending` whose members are all in
        // `waiting`, advancing `done_until`.
        loop {
            let Some(&Reverse(smallest)) = inner.pending.peek() else { break };
            if !inner.waiting.remove(&smallest) {
                break;
            }
            inner.pending.pop();
            inner.done_until = smallest;
        }
        drop(inner);
        self.notify.notify_waiters();
    }

    pub fn done_until(&self) -> u64 {
        self.inner.lock().done_until
    }

    pub fn last_index(&self) -> u64 {
        let inner = self.inner.lock();
        inner.pending.peek().map(|Reverse(i)| *i).unwrap_or(inner.done_until)
    }

    /// Waits until `done_until() >= target`.
    pub async fn wait_for_mark(&self, target: u64) {
        loop {
            if self.done_until() >= target {
                return;
            }
            let notified = self.notify.notified();
            if self.done_until() >= target {
                return;
            }
            notified.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn advances_only_over_contiguous_prefix() {
        let wm = WaterMark::new("test", 0);
        wm.begin(1);
        wm.begin(2);
        wm.begin(3);
        wm.done(2);
        assert_eq!(wm.done_until(), 0, "index 1 still outstanding");
        wm.done(1);
        assert_eq!(wm.done_until(), 2, "1 and 2 both done, 3 still pending");
        wm.done(3);
        assert_eq!(wm.done_until(), 3);
    }

    #[tokio::test]
    async fn wait_for_mark_unblocks_on_done() {
        let wm = Arc::new(WaterMark::new("test", 0));
        wm.begin(1);
        let wm2 = wm.clone();
        let handle = tokio::spawn(async move { wm2.wait_for_mark(1).await });
        wm.done(1);
        handle.await.unwrap();
    }

    #[test]
    fn repeated_done_is_tolerated() {
        let wm = WaterMark::new("test", 0);
        wm.begin(1);
        wm.done(1);
        wm.done(1);
        assert_eq!(wm.done_until(), 1);
    }
}
