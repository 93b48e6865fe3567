//! Recording of lambda invocations across a simulated grid.

use parking_lot::Mutex;
use smallvec::SmallVec;
use std::collections::BTreeMap;

use crate::common::Idx;
use crate::statement::Invocation;

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Visit {
    pub block: Idx,
    pub thread: Idx,
    pub lambda: usize,
    pub indices: SmallVec<[Idx; 4]>,
}

/// A thread-safe log of [Visit]s.
#[derive(Debug, Default)]
pub struct VisitLog {
    visits: Mutex<Vec<Visit>>,
}

impl From<&Invocation<'_>> for Visit {
    fn from(inv: &Invocation<'_>) -> Self {
        Visit {
            block: inv.pos.block_idx,
            thread: inv.pos.thread_idx,
            lambda: inv.lambda,
            indices: SmallVec::from_slice(inv.indices),
        }
    }
}

impl VisitLog {
    pub fn new() -> Self {
        VisitLog::default()
    }

    pub fn record(&self, invocation: &Invocation<'_>) {
        self.visits.lock().push(Visit::from(invocation));
    }

    /// A loop body that records every call into this log.
    pub fn recorder(&self) -> impl Fn(&Invocation<'_>) + Sync + '_ {
        move |inv| self.record(inv)
    }

    pub fn len(&self) -> usize {
        self.visits.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.visits.lock().is_empty()
    }

    /// All visits, ordered by block then thread.
    ///
    /// Visits of one execution unit keep the order they were made in.
    pub fn visits(&self) -> Vec<Visit> {
        let mut visits = self.visits.lock().clone();
        visits.sort_by_key(|v| (v.block, v.thread));
        visits
    }

    /// The index tuples each (block, thread) visited, in visit order.
    pub fn by_unit(&self) -> BTreeMap<(Idx, Idx), Vec<SmallVec<[Idx; 4]>>> {
        let mut units: BTreeMap<_, Vec<_>> = BTreeMap::new();
        for v in self.visits() {
            units.entry((v.block, v.thread)).or_default().push(v.indices);
        }
        units
    }

    /// How many times each (lambda, index tuple) was visited.
    pub fn coverage(&self) -> BTreeMap<(usize, SmallVec<[Idx; 4]>), usize> {
        let mut counts = BTreeMap::new();
        for v in self.visits.lock().iter() {
            *counts.entry((v.lambda, v.indices.clone())).or_default() += 1;
        }
        counts
    }
}
