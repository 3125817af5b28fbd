//! Version annotation: every triple ever matching a pattern, with the list of
//! versions it is present in.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;

use crate::controller::Controller;
use crate::errors::Result;
use crate::options::CountKind;
use crate::patch::{IteratorFilter, PatchId, PatchTree};
use crate::snapshot::Snapshot;
use crate::triple::{StringTriple, Triple};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TripleVersions {
    pub triple: StringTriple,
    /// Ascending.
    pub versions: Vec<PatchId>,
}

impl fmt::Display for TripleVersions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let versions: Vec<String> = self.versions.iter().map(|v| v.to_string()).collect();
        write!(f, "{} [{}]", self.triple, versions.join(","))
    }
}

pub type VersionsIter = Box<dyn Iterator<Item = TripleVersions> + Send>;

/// Versions of one snapshot's range, `first..=last`, for a single key.
fn present_in(tree: Option<&PatchTree>, triple: &Triple, first: PatchId, last: PatchId) -> Vec<PatchId> {
    match tree.and_then(|t| t.get(triple)) {
        Some(value) => (first..=last).filter(|p| value.is_present(*p)).collect(),
        None => (first..=last).collect(),
    }
}

/// Annotated triples of one snapshot and its tree: snapshot triples first,
/// then triples that only ever appear as additions.
fn snapshot_versions(
    snapshot: Arc<Snapshot>,
    tree: Option<Arc<PatchTree>>,
    pattern: &StringTriple,
    last: PatchId,
) -> VersionsIter {
    let Some(encoded) = snapshot.dictionary().encode_pattern(pattern) else {
        return Box::new(std::iter::empty());
    };
    let first = snapshot.id();
    let last = match tree.as_ref().and_then(|t| t.max_patch_id()) {
        Some(max) => max.min(last),
        None => first,
    };
    let dict = Arc::clone(snapshot.dictionary());
    let in_snapshot = {
        let tree = tree.clone();
        let dict = Arc::clone(&dict);
        snapshot.search(&encoded).filter_map(move |t| {
            let t = Triple::from_array(t);
            let versions = present_in(tree.as_deref(), &t, first, last);
            (!versions.is_empty()).then(|| TripleVersions {
                triple: dict.decode(&t),
                versions,
            })
        })
    };
    let added: VersionsIter = match tree {
        Some(tree) => {
            let keys = tree.iter_pattern(IteratorFilter::new(encoded));
            Box::new(keys.filter_map(move |(t, value)| {
                let first_addition = value.addition.first()?;
                if value.exists_in_snapshot() || first_addition.local_change {
                    return None;
                }
                let versions: Vec<PatchId> = (first_addition.patch_id..=last)
                    .filter(|p| value.is_present(*p))
                    .collect();
                (!versions.is_empty()).then(|| TripleVersions {
                    triple: dict.decode(&t),
                    versions,
                })
            }))
        }
        None => Box::new(std::iter::empty()),
    };
    Box::new(in_snapshot.chain(added))
}

impl Controller {
    /// Every triple matching `pattern` in any version, annotated with the
    /// versions containing it, skipping the first `offset` results.
    pub fn get_version(&self, pattern: &StringTriple, offset: usize) -> Result<VersionsIter> {
        let ids = self.snapshots.get_snapshots_ids()?;
        let max = self.get_max_patch_id()?.unwrap_or(0);
        let mut ranges = Vec::with_capacity(ids.len());
        for (i, id) in ids.iter().enumerate() {
            let Some(snapshot) = self.snapshots.get_snapshot(*id)? else {
                continue;
            };
            // versions from the next snapshot on belong to that snapshot
            let last = ids.get(i + 1).map(|next| next - 1).unwrap_or(max);
            ranges.push((snapshot, self.get_patch_tree(*id)?, last));
        }
        if ranges.len() <= 1 {
            let it: VersionsIter = match ranges.pop() {
                Some((snapshot, tree, last)) => snapshot_versions(snapshot, tree, pattern, last),
                None => Box::new(std::iter::empty()),
            };
            return Ok(Box::new(it.skip(offset)));
        }

        let mut merged: BTreeMap<StringTriple, BTreeSet<PatchId>> = BTreeMap::new();
        for (snapshot, tree, last) in ranges {
            for tv in snapshot_versions(snapshot, tree, pattern, last) {
                merged.entry(tv.triple).or_default().extend(tv.versions);
            }
        }
        Ok(Box::new(
            merged
                .into_iter()
                .map(|(triple, versions)| TripleVersions {
                    triple,
                    versions: versions.into_iter().collect(),
                })
                .skip(offset),
        ))
    }

    /// Number of distinct triples `get_version` yields. Always exact.
    pub fn get_version_count(&self, pattern: &StringTriple) -> Result<(u64, CountKind)> {
        Ok((self.get_version(pattern, 0)?.count() as u64, CountKind::Exact))
    }
}
