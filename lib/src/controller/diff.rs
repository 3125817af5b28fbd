//! Delta queries: the changes between two versions, within one patch tree
//! or across a chain of derived snapshots.

use std::sync::Arc;

use log::debug;

use crate::controller::delta::{
    forward_delta, forward_diff_delta, pattern_order, snapshot_diff, DeltaIter,
    MergeDiffIterator, SortedTripleDeltaIterator,
};
use crate::controller::Controller;
use crate::errors::{Error, Result};
use crate::options::{CountKind, DiffStrategy};
use crate::patch::{PatchId, PatchTree};
use crate::snapshot::Snapshot;
use crate::triple::{StringTriple, Triple, TripleComparator};

/// Whether `tree` records changes at its own snapshot id, so that version
/// `snapshot.id()` differs from the snapshot file.
fn changed_at_snapshot(snapshot: &Snapshot, tree: &PatchTree) -> bool {
    tree.changes_at(&Triple::any(), snapshot.id()).next().is_some()
}

/// Delta of one patch tree between `start` and `end`, both at or after its
/// snapshot. `None` when the pattern names a term the dictionary lacks.
fn tree_delta(
    snapshot: &Snapshot,
    tree: Option<&Arc<PatchTree>>,
    pattern: &StringTriple,
    start: PatchId,
    end: PatchId,
) -> Option<DeltaIter> {
    let tree = tree?;
    let max = tree.max_patch_id()?;
    let (start, end) = (start.min(max), end.min(max));
    if start == end {
        return None;
    }
    let encoded = snapshot.dictionary().encode_pattern(pattern)?;
    let dict = Arc::clone(snapshot.dictionary());
    Some(
        if start == snapshot.id() && !changed_at_snapshot(snapshot, tree) {
            forward_delta(tree, &encoded, end, dict)
        } else {
            forward_diff_delta(tree, &encoded, start, end, dict)
        },
    )
}

/// Changes of version `p` relative to the snapshot file itself. Snapshot
/// chains are composed file to file, so changes stored at the snapshot id
/// are part of this delta.
fn file_delta(
    snapshot: &Snapshot,
    tree: Option<&Arc<PatchTree>>,
    pattern: &StringTriple,
    p: PatchId,
) -> Option<DeltaIter> {
    let tree = tree?;
    let p = p.min(tree.max_patch_id()?);
    let encoded = snapshot.dictionary().encode_pattern(pattern)?;
    Some(forward_delta(tree, &encoded, p, Arc::clone(snapshot.dictionary())))
}

/// Size of the delta from the snapshot file to version `p`.
fn forward_size(snapshot: &Snapshot, tree: Option<&Arc<PatchTree>>, pattern: &StringTriple, p: PatchId) -> u64 {
    let (Some(tree), Some(encoded)) = (tree, snapshot.dictionary().encode_pattern(pattern)) else {
        return 0;
    };
    let Some(max) = tree.max_patch_id() else {
        return 0;
    };
    let p = p.min(max);
    tree.deletion_count(&encoded, p) + tree.addition_count(&encoded, p)
}

fn estimated(snapshot: &Snapshot, pattern: &StringTriple) -> u64 {
    snapshot
        .dictionary()
        .encode_pattern(pattern)
        .map(|p| snapshot.estimated_count(&p) as u64)
        .unwrap_or(0)
}

/// Snapshots from the one underlying `start` to the one underlying `end`.
struct Chain {
    snapshots: Vec<Arc<Snapshot>>,
    trees: Vec<Option<Arc<PatchTree>>>,
}

impl Chain {
    fn first(&self) -> (&Arc<Snapshot>, Option<&Arc<PatchTree>>) {
        (&self.snapshots[0], self.trees[0].as_ref())
    }

    fn last(&self) -> (&Arc<Snapshot>, Option<&Arc<PatchTree>>) {
        let i = self.snapshots.len() - 1;
        (&self.snapshots[i], self.trees[i].as_ref())
    }

    fn is_single(&self) -> bool {
        self.snapshots.len() == 1
    }

    /// Delta sizes of the transitions between consecutive snapshots.
    fn hop_sizes(&self, pattern: &StringTriple) -> u64 {
        self.snapshots
            .windows(2)
            .zip(&self.trees)
            .map(|(pair, tree)| forward_size(&pair[0], tree.as_ref(), pattern, pair[1].id()))
            .sum()
    }
}

impl Controller {
    fn delta_chain(&self, start: PatchId, end: PatchId) -> Result<Option<Chain>> {
        let (Some(first), Some(last)) = (
            self.snapshots.get_latest_snapshot(start)?,
            self.snapshots.get_latest_snapshot(end)?,
        ) else {
            return Ok(None);
        };
        let mut snapshots = Vec::new();
        let mut trees = Vec::new();
        for id in self.snapshots.get_snapshots_ids()? {
            if id < first || id > last {
                continue;
            }
            let Some(snapshot) = self.snapshots.get_snapshot(id)? else {
                return Ok(None);
            };
            if id > first && snapshot.meta().derived_from.is_none() {
                return Err(Error::Unsupported(format!(
                    "snapshot {id} is not derived from version {first}; no delta crosses it"
                )));
            }
            trees.push(self.get_patch_tree(id)?);
            snapshots.push(snapshot);
        }
        Ok(Some(Chain { snapshots, trees }))
    }

    fn check_range(start: PatchId, end: PatchId) -> Result<()> {
        if start > end {
            return Err(Error::Invalid(format!(
                "delta start {start} is after its end {end}"
            )));
        }
        Ok(())
    }

    /// Changes from version `start` to version `end` matching `pattern`,
    /// skipping the first `offset` results.
    pub fn get_delta_materialized(
        &self,
        pattern: &StringTriple,
        offset: usize,
        start: PatchId,
        end: PatchId,
        strategy: DiffStrategy,
    ) -> Result<DeltaIter> {
        Self::check_range(start, end)?;
        if start == end {
            return Ok(Box::new(std::iter::empty()));
        }
        let Some(chain) = self.delta_chain(start, end)? else {
            return Ok(Box::new(std::iter::empty()));
        };
        let deltas: DeltaIter = if chain.is_single() {
            let (snapshot, tree) = chain.first();
            match tree_delta(snapshot, tree, pattern, start, end) {
                Some(it) => it,
                None => Box::new(std::iter::empty()),
            }
        } else {
            self.cross_snapshot_delta(&chain, pattern, start, end, strategy)
        };
        Ok(Box::new(deltas.skip(offset)))
    }

    fn cross_snapshot_delta(
        &self,
        chain: &Chain,
        pattern: &StringTriple,
        start: PatchId,
        end: PatchId,
        strategy: DiffStrategy,
    ) -> DeltaIter {
        let comparator = TripleComparator::new(pattern_order(pattern));
        let sorted = |it: DeltaIter| -> DeltaIter {
            Box::new(SortedTripleDeltaIterator::new(it, comparator))
        };
        let (first, first_tree) = chain.first();
        let (last, last_tree) = chain.last();

        let iterative = match strategy {
            DiffStrategy::Iterative => true,
            DiffStrategy::Direct => false,
            DiffStrategy::Auto => {
                chain.snapshots.len() == 2
                    || chain.hop_sizes(pattern) <= estimated(first, pattern) + estimated(last, pattern)
            }
        };
        debug!(
            "delta {start}..{end} across snapshots {}..{} ({})",
            first.id(),
            last.id(),
            if iterative { "iterative" } else { "direct" }
        );
        let mut deltas: DeltaIter = if iterative {
            let mut acc: DeltaIter = Box::new(std::iter::empty());
            for (pair, tree) in chain.snapshots.windows(2).zip(&chain.trees) {
                if let Some(hop) = file_delta(&pair[0], tree.as_ref(), pattern, pair[1].id()) {
                    acc = Box::new(MergeDiffIterator::new(acc, sorted(hop), comparator));
                }
            }
            acc
        } else {
            snapshot_diff(first, last, pattern)
        };
        if let Some(tail) = file_delta(last, last_tree, pattern, end) {
            deltas = Box::new(MergeDiffIterator::new(deltas, sorted(tail), comparator));
        }
        if let Some(head) = file_delta(first, first_tree, pattern, start) {
            deltas = Box::new(MergeDiffIterator::case2(sorted(head), deltas, comparator));
        }
        deltas
    }

    /// Number of changes from `start` to `end`. Exact within one patch tree,
    /// an upper-bound estimate across snapshots.
    pub fn get_delta_materialized_count(
        &self,
        pattern: &StringTriple,
        start: PatchId,
        end: PatchId,
        strategy: DiffStrategy,
    ) -> Result<(u64, CountKind)> {
        Self::check_range(start, end)?;
        if start == end {
            return Ok((0, CountKind::Exact));
        }
        let Some(chain) = self.delta_chain(start, end)? else {
            return Ok((0, CountKind::Exact));
        };
        if chain.is_single() {
            let (snapshot, tree) = chain.first();
            let count = tree_delta(snapshot, tree, pattern, start, end)
                .map(|it| it.count() as u64)
                .unwrap_or(0);
            return Ok((count, CountKind::Exact));
        }
        let (first, first_tree) = chain.first();
        let (last, last_tree) = chain.last();
        let middle = match strategy {
            DiffStrategy::Direct => estimated(first, pattern) + estimated(last, pattern),
            _ => chain.hop_sizes(pattern),
        };
        let count = forward_size(first, first_tree, pattern, start)
            + middle
            + forward_size(last, last_tree, pattern, end);
        Ok((count, CountKind::Estimate))
    }
}
