//! Version materialization: the triples of one version, as a snapshot
//! search corrected by the deletions and additions of a patch tree.

use std::sync::Arc;

use log::debug;
use snapfile::TripleIter;

use crate::controller::Controller;
use crate::dictionary::DictionaryManager;
use crate::errors::Result;
use crate::options::CountKind;
use crate::patch::{PatchId, PatchTree};
use crate::snapshot::Snapshot;
use crate::triple::{StringTriple, Triple};

/// Triples of one version, with the dictionary their ids belong to.
pub struct VersionIterator {
    dict: Option<Arc<DictionaryManager>>,
    inner: Box<dyn Iterator<Item = Triple> + Send>,
}

impl VersionIterator {
    fn new(dict: Arc<DictionaryManager>, inner: Box<dyn Iterator<Item = Triple> + Send>) -> Self {
        VersionIterator {
            dict: Some(dict),
            inner,
        }
    }

    fn empty() -> Self {
        VersionIterator {
            dict: None,
            inner: Box::new(std::iter::empty()),
        }
    }

    pub fn dictionary(&self) -> Option<&Arc<DictionaryManager>> {
        self.dict.as_ref()
    }

    /// Decode every triple.
    pub fn strings(self) -> Box<dyn Iterator<Item = StringTriple> + Send> {
        match self.dict {
            Some(dict) => Box::new(self.inner.map(move |t| dict.decode(&t))),
            None => Box::new(std::iter::empty()),
        }
    }
}

impl Iterator for VersionIterator {
    type Item = Triple;

    fn next(&mut self) -> Option<Triple> {
        self.inner.next()
    }
}

/// Snapshot triples not deleted at `patch_id`, followed by the additions of
/// `patch_id`.
struct SnapshotPatchIterator {
    snapshot: TripleIter,
    tree: Arc<PatchTree>,
    pattern: Triple,
    patch_id: PatchId,
    additions: Option<Box<dyn Iterator<Item = Triple> + Send>>,
    addition_offset: usize,
}

impl Iterator for SnapshotPatchIterator {
    type Item = Triple;

    fn next(&mut self) -> Option<Triple> {
        for t in self.snapshot.by_ref() {
            let t = Triple::from_array(t);
            if !self.tree.is_deleted(&t, self.patch_id) {
                return Some(t);
            }
        }
        if self.additions.is_none() {
            let skip = self.addition_offset;
            self.additions = Some(Box::new(
                self.tree.additions_at(&self.pattern, self.patch_id).skip(skip),
            ));
        }
        self.additions.as_mut()?.next()
    }
}

/// Where a version query starts and how much it holds.
struct Plan {
    snapshot: Arc<Snapshot>,
    /// `None` when the snapshot alone answers the query.
    tree: Option<(Arc<PatchTree>, PatchId)>,
    pattern: Triple,
}

impl Controller {
    fn plan_version(&self, pattern: &StringTriple, patch_id: PatchId) -> Result<Option<Plan>> {
        let Some(snapshot) = self.get_snapshot_for(patch_id)? else {
            return Ok(None);
        };
        let Some(encoded) = snapshot.dictionary().encode_pattern(pattern) else {
            return Ok(None);
        };
        let tree = self
            .get_patch_tree(snapshot.id())?
            .and_then(|tree| {
                // versions past the last patch equal the last patch
                let p = patch_id.min(tree.max_patch_id()?);
                Some((tree, p))
            })
            .filter(|(tree, p)| {
                *p != snapshot.id() || tree.changes_at(&Triple::any(), *p).next().is_some()
            });
        Ok(Some(Plan {
            snapshot,
            tree,
            pattern: encoded,
        }))
    }

    /// Triples of version `patch_id` matching `pattern`, skipping the first
    /// `offset` results.
    pub fn get_version_materialized(
        &self,
        pattern: &StringTriple,
        offset: usize,
        patch_id: PatchId,
    ) -> Result<VersionIterator> {
        let Some(plan) = self.plan_version(pattern, patch_id)? else {
            return Ok(VersionIterator::empty());
        };
        let dict = Arc::clone(plan.snapshot.dictionary());
        let Some((tree, p)) = plan.tree else {
            let (it, _) = plan.snapshot.search_with_offset(&plan.pattern, offset);
            return Ok(VersionIterator::new(
                dict,
                Box::new(it.map(Triple::from_array)),
            ));
        };

        let pattern = plan.pattern;
        let total = plan.snapshot.exact_count(&pattern);
        let deletions = tree.deletion_count(&pattern, p) as usize;
        // smallest index i with i = offset + (deletions before snapshot[i])
        let mut index = offset;
        while index < total {
            let (mut it, _) = plan.snapshot.search_with_offset(&pattern, index);
            let Some(t) = it.next() else {
                break;
            };
            let next = offset + tree.deletions_before(&pattern, &Triple::from_array(t), p) as usize;
            if next == index {
                break;
            }
            index = next;
        }
        let addition_offset = if index < total {
            0
        } else {
            offset.saturating_sub(total.saturating_sub(deletions))
        };
        debug!(
            "version {p}: snapshot {} from {index}, additions from {addition_offset}",
            plan.snapshot.id()
        );
        let (snapshot_iter, _) = plan.snapshot.search_with_offset(&pattern, index);
        Ok(VersionIterator::new(
            dict,
            Box::new(SnapshotPatchIterator {
                snapshot: snapshot_iter,
                tree,
                pattern,
                patch_id: p,
                additions: None,
                addition_offset,
            }),
        ))
    }

    /// Number of triples of version `patch_id` matching `pattern`. Always exact.
    pub fn get_version_materialized_count(
        &self,
        pattern: &StringTriple,
        patch_id: PatchId,
    ) -> Result<(u64, CountKind)> {
        let Some(plan) = self.plan_version(pattern, patch_id)? else {
            return Ok((0, CountKind::Exact));
        };
        let total = plan.snapshot.exact_count(&plan.pattern) as u64;
        let count = match plan.tree {
            None => total,
            Some((tree, p)) => {
                total.saturating_sub(tree.deletion_count(&plan.pattern, p))
                    + tree.addition_count(&plan.pattern, p)
            }
        };
        Ok((count, CountKind::Exact))
    }
}
