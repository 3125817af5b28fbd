//! The patch tree: version histories of one snapshot's patches, indexed
//! under all five orderings.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, RwLock};

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use crate::errors::{Error, Result};
use crate::options::{LocalChanges, Uniqueness};
use crate::patch::element::{PatchElement, PatchSorted};
use crate::patch::iterator::{EqualKeys, IteratorFilter, PatchTreeIterator, Sides};
use crate::patch::positions::{AppendContext, PatchPositions};
use crate::patch::value::{
    AdditionEntry, AdditionValue, DeletionValue, FullDeletion, HistoryEntry, PatchId,
    PatchTreeValue, ReducedDeletion,
};
use crate::storage::{Key, SortedTree};
use crate::triple::{Triple, TripleOrder};

/// A restartable source of patch elements in SPO order.
pub trait PatchStream: Iterator<Item = PatchElement> {
    /// Rewind to the first element.
    fn go_to_start(&mut self) -> Result<()>;
}

/// [`PatchStream`] over an in-memory sorted patch.
pub struct PatchSortedStream<'a> {
    patch: &'a PatchSorted,
    pos: usize,
}

impl<'a> PatchSortedStream<'a> {
    pub fn new(patch: &'a PatchSorted) -> Self {
        PatchSortedStream { patch, pos: 0 }
    }
}

impl Iterator for PatchSortedStream<'_> {
    type Item = PatchElement;

    fn next(&mut self) -> Option<PatchElement> {
        let e = self.patch.get(self.pos).copied();
        self.pos += 1;
        e
    }
}

impl PatchStream for PatchSortedStream<'_> {
    fn go_to_start(&mut self) -> Result<()> {
        self.pos = 0;
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
struct AdditionCount {
    patch_id: PatchId,
    pattern: [u64; 3],
    count: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct TreeMeta {
    min_patch_id: PatchId,
    max_patch_id: Option<PatchId>,
    #[serde(default)]
    addition_counts: Vec<AdditionCount>,
}

#[derive(Debug)]
struct MetaState {
    max_patch_id: Option<PatchId>,
    addition_counts: HashMap<(PatchId, [u64; 3]), u64>,
    dirty: bool,
}

/// File name prefix of the tree anchored at `min_patch_id`.
pub fn tree_file_prefix(min_patch_id: PatchId) -> String {
    format!("patchtree_{min_patch_id}")
}

pub fn tree_meta_path(root: &Path, min_patch_id: PatchId) -> PathBuf {
    root.join(format!("{}.meta.json", tree_file_prefix(min_patch_id)))
}

fn tree_path(root: &Path, min_patch_id: PatchId, order: TripleOrder, kind: &str) -> PathBuf {
    root.join(format!(
        "{}_{}_{kind}.vtt",
        tree_file_prefix(min_patch_id),
        order.name()
    ))
}

/// Index of a non-SPO ordering among the reduced deletion trees.
fn reduced_slot(order: TripleOrder) -> usize {
    order as usize - 1
}

type FullTree = SortedTree<DeletionValue<FullDeletion>>;
type ReducedTree = SortedTree<DeletionValue<ReducedDeletion>>;
type AdditionTree = SortedTree<AdditionValue>;

/// Versioned additions and deletions of one range of patch ids.
///
/// The SPO deletion map keeps relative positions, the other four deletion
/// maps keep reduced records. All ten maps hold the same keys and histories
/// permuted into their ordering.
#[derive(Debug)]
pub struct PatchTree {
    min_patch_id: PatchId,
    root: Option<PathBuf>,
    read_only: bool,
    min_addition_count: u64,
    deletions_spo: Arc<FullTree>,
    deletions: [Arc<ReducedTree>; 4],
    additions: [Arc<AdditionTree>; 5],
    meta: RwLock<MetaState>,
    writer: Mutex<()>,
}

impl PatchTree {
    /// Open (or create) the tree anchored at `min_patch_id` under `root`.
    pub fn open(
        root: &Path,
        min_patch_id: PatchId,
        read_only: bool,
        min_addition_count: u64,
    ) -> Result<Self> {
        let meta_path = tree_meta_path(root, min_patch_id);
        let meta = if meta_path.exists() {
            let meta: TreeMeta = serde_json::from_slice(&std::fs::read(&meta_path)?)?;
            if meta.min_patch_id != min_patch_id {
                return Err(Error::Corrupt(format!(
                    "{} holds tree {}",
                    meta_path.display(),
                    meta.min_patch_id
                )));
            }
            meta
        } else if read_only {
            return Err(Error::Invalid(format!(
                "patch tree {min_patch_id} does not exist"
            )));
        } else {
            TreeMeta {
                min_patch_id,
                max_patch_id: None,
                addition_counts: Vec::new(),
            }
        };
        let open_reduced = |order| -> Result<Arc<ReducedTree>> {
            Ok(Arc::new(SortedTree::open(
                tree_path(root, min_patch_id, order, "deletions"),
                read_only,
            )?))
        };
        let open_additions = |order| -> Result<Arc<AdditionTree>> {
            Ok(Arc::new(SortedTree::open(
                tree_path(root, min_patch_id, order, "additions"),
                read_only,
            )?))
        };
        let tree = PatchTree {
            min_patch_id,
            root: Some(root.to_path_buf()),
            read_only,
            min_addition_count,
            deletions_spo: Arc::new(SortedTree::open(
                tree_path(root, min_patch_id, TripleOrder::Spo, "deletions"),
                read_only,
            )?),
            deletions: [
                open_reduced(TripleOrder::Sop)?,
                open_reduced(TripleOrder::Pso)?,
                open_reduced(TripleOrder::Pos)?,
                open_reduced(TripleOrder::Osp)?,
            ],
            additions: [
                open_additions(TripleOrder::Spo)?,
                open_additions(TripleOrder::Sop)?,
                open_additions(TripleOrder::Pso)?,
                open_additions(TripleOrder::Pos)?,
                open_additions(TripleOrder::Osp)?,
            ],
            meta: RwLock::new(MetaState {
                max_patch_id: meta.max_patch_id,
                addition_counts: meta
                    .addition_counts
                    .into_iter()
                    .map(|c| ((c.patch_id, c.pattern), c.count))
                    .collect(),
                dirty: !meta_path.exists(),
            }),
            writer: Mutex::new(()),
        };
        debug!(
            "opened patch tree {} (max patch id {:?})",
            min_patch_id,
            tree.max_patch_id()
        );
        Ok(tree)
    }

    /// A tree that lives only in memory.
    pub fn in_memory(min_patch_id: PatchId, min_addition_count: u64) -> Self {
        PatchTree {
            min_patch_id,
            root: None,
            read_only: false,
            min_addition_count,
            deletions_spo: Arc::new(SortedTree::in_memory()),
            deletions: std::array::from_fn(|_| Arc::new(SortedTree::in_memory())),
            additions: std::array::from_fn(|_| Arc::new(SortedTree::in_memory())),
            meta: RwLock::new(MetaState {
                max_patch_id: None,
                addition_counts: HashMap::new(),
                dirty: false,
            }),
            writer: Mutex::new(()),
        }
    }

    pub fn min_patch_id(&self) -> PatchId {
        self.min_patch_id
    }

    /// Highest patch id appended so far, `None` for an empty tree.
    pub fn max_patch_id(&self) -> Option<PatchId> {
        self.meta.read().ok().and_then(|m| m.max_patch_id)
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    /// True when `p` lies within the stored patch id range.
    pub fn in_range(&self, p: PatchId) -> bool {
        self.max_patch_id()
            .is_some_and(|max| p >= self.min_patch_id && p <= max)
    }

    /// Number of distinct keys ever touched.
    pub fn len(&self) -> usize {
        self.deletions_spo.len() + self.addition_only_len()
    }

    fn addition_only_len(&self) -> usize {
        let Ok(adds) = self.additions[0].read() else {
            return 0;
        };
        let Ok(dels) = self.deletions_spo.read() else {
            return 0;
        };
        adds.keys().filter(|k| !dels.contains_key(*k)).count()
    }

    pub fn is_empty(&self) -> bool {
        self.max_patch_id().is_none()
    }

    fn check_patch_id(&self, p: PatchId) -> Result<()> {
        let allowed = match self.max_patch_id() {
            Some(max) => p == max || p == max + 1,
            None => p == self.min_patch_id || p == self.min_patch_id + 1,
        };
        if allowed {
            Ok(())
        } else {
            Err(Error::Invalid(format!(
                "patch {p} does not continue tree {} (max patch id {:?})",
                self.min_patch_id,
                self.max_patch_id()
            )))
        }
    }

    /// Full value of a key.
    pub fn get(&self, triple: &Triple) -> Option<PatchTreeValue<FullDeletion>> {
        let key = triple.as_array();
        let deletion = self.deletions_spo.get(&key);
        let addition = self.additions[0].get(&key);
        if deletion.is_none() && addition.is_none() {
            return None;
        }
        Some(PatchTreeValue::new(
            deletion.unwrap_or_default(),
            addition.unwrap_or_default(),
        ))
    }

    /// True when the key was changed by patch `p` itself rather than
    /// carried forward from an earlier patch.
    fn changed_at(value: &PatchTreeValue<FullDeletion>, p: PatchId) -> bool {
        let Some(at) = value.at(p) else {
            return false;
        };
        match p.checked_sub(1).and_then(|q| value.active(q)) {
            Some(before) => before.addition != at.addition,
            None => true,
        }
    }

    /// True when `element` is recorded with its polarity at `p`.
    pub fn contains(&self, element: &PatchElement, p: PatchId) -> bool {
        if !self.in_range(p) {
            return false;
        }
        self.get(&element.triple)
            .and_then(|v| v.at(p))
            .is_some_and(|e| e.addition == element.addition)
    }

    /// Append `patch` as patch `p`, refusing (and returning `false`) when an
    /// element collides with a change already recorded at `p`.
    pub fn append(&self, stream: &mut dyn PatchStream, p: PatchId) -> Result<bool> {
        if self.read_only {
            return Err(Error::ReadOnly);
        }
        for element in &mut *stream {
            if let Some(value) = self.get(&element.triple) {
                if Self::changed_at(&value, p) {
                    debug!("patch {p} already changes {}", element.triple);
                    stream.go_to_start()?;
                    return Ok(false);
                }
            }
        }
        stream.go_to_start()?;
        self.append_unsafe(stream, p)?;
        Ok(true)
    }

    /// Convenience wrapper over [`PatchTree::append`] and [`PatchTree::append_unsafe`].
    pub fn append_patch(&self, patch: &PatchSorted, p: PatchId, uniqueness: Uniqueness) -> Result<bool> {
        let mut stream = PatchSortedStream::new(patch);
        if uniqueness.is_checked() {
            self.append(&mut stream, p)
        } else {
            self.append_unsafe(&mut stream, p)?;
            Ok(true)
        }
    }

    /// Append without checking for collisions. Entries already recorded at
    /// `p` for the same key are overwritten.
    pub fn append_unsafe(&self, stream: &mut dyn PatchStream, p: PatchId) -> Result<()> {
        if self.read_only {
            return Err(Error::ReadOnly);
        }
        let _writer = self
            .writer
            .lock()
            .map_err(|_| Error::Corrupt("tree writer lock poisoned".into()))?;
        self.check_patch_id(p)?;
        let elements: Vec<PatchElement> = stream.collect();
        if let Some(w) = elements
            .windows(2)
            .find(|w| w[0].triple.as_array() >= w[1].triple.as_array())
        {
            return Err(Error::Invalid(format!(
                "patch {p} is not sorted: {} before {}",
                w[0].triple, w[1].triple
            )));
        }

        let (updates, counts) = self.merge(&elements, p)?;
        self.apply(updates)?;

        let mut meta = self
            .meta
            .write()
            .map_err(|_| Error::Corrupt("tree meta lock poisoned".into()))?;
        meta.addition_counts.retain(|(id, _), _| *id != p);
        for (pattern, count) in counts {
            if count >= self.min_addition_count {
                meta.addition_counts.insert((p, pattern.as_array()), count);
            }
        }
        meta.max_patch_id = Some(meta.max_patch_id.map_or(p, |m| m.max(p)));
        meta.dirty = true;
        drop(meta);
        info!(
            "appended {} elements as patch {p} to tree {}",
            elements.len(),
            self.min_patch_id
        );
        self.flush()
    }

    /// Three-way merge of the incoming elements with the SPO deletion and
    /// addition maps. Produces the new value of every touched key and the
    /// non-local addition counts at `p`.
    fn merge(
        &self,
        elements: &[PatchElement],
        p: PatchId,
    ) -> Result<(Vec<(Key, PatchTreeValue<FullDeletion>)>, Vec<(Triple, u64)>)> {
        let dels = self.deletions_spo.read()?;
        let adds = self.additions[0].read()?;
        let mut di = dels.iter().peekable();
        let mut ai = adds.iter().peekable();
        let mut ei = elements.iter().peekable();
        let mut positions = AppendContext::default();
        let mut additions = AppendContext::default();
        let mut updates = Vec::with_capacity(dels.len() + adds.len() + elements.len());

        loop {
            let heads = [
                di.peek().map(|(k, _)| **k),
                ai.peek().map(|(k, _)| **k),
                ei.peek().map(|e| e.triple.as_array()),
            ];
            let Some(key) = heads.iter().flatten().min().copied() else {
                break;
            };
            let deletion = di.next_if(|(k, _)| **k == key).map(|(_, v)| v.clone());
            let addition = ai.next_if(|(k, _)| **k == key).map(|(_, v)| v.clone());
            let element = ei.next_if(|e| e.triple.as_array() == key);

            let mut value =
                PatchTreeValue::new(deletion.unwrap_or_default(), addition.unwrap_or_default());
            let triple = Triple::from_array(key);
            Self::record(&mut value, element, p, &triple);

            match value.at(p) {
                Some(HistoryEntry {
                    addition: false,
                    local_change: false,
                    ..
                }) => {
                    value.deletion.set(FullDeletion {
                        patch_id: p,
                        positions: positions.next_deletion(&triple),
                        local_change: false,
                    });
                }
                Some(HistoryEntry {
                    addition: true,
                    local_change: false,
                    ..
                }) => additions.record_deletion(&triple),
                _ => {}
            }
            updates.push((key, value));
        }
        Ok((updates, additions.counts()))
    }

    /// Record the state of one key at `p`.
    fn record(
        value: &mut PatchTreeValue<FullDeletion>,
        element: Option<&PatchElement>,
        p: PatchId,
        triple: &Triple,
    ) {
        let previous = value.at(p);
        let before = p.checked_sub(1).and_then(|q| value.active(q));
        let (addition, local_change) = match (element, before) {
            (Some(e), None) => (e.addition, false),
            (Some(e), Some(b)) if e.addition == b.addition => (b.addition, b.local_change),
            (Some(e), Some(b)) => (e.addition, !b.local_change),
            // re-appending to `p`: untouched keys keep their entry
            (None, _) if previous.is_some() => return,
            (None, Some(b)) => (b.addition, b.local_change),
            (None, None) => return,
        };
        if let Some(prev) = previous {
            if prev.addition != addition && Self::changed_at(value, p) {
                warn!(
                    "overwriting {} of {triple} at patch {p}",
                    if prev.addition { "addition" } else { "deletion" }
                );
            }
        }
        value.addition.remove(p);
        value.deletion.remove(p);
        if addition {
            value.addition.set(AdditionEntry {
                patch_id: p,
                local_change,
            });
        } else {
            value.deletion.set(FullDeletion {
                patch_id: p,
                positions: PatchPositions::none(),
                local_change,
            });
        }
    }

    /// Write merged values into all ten maps.
    fn apply(&self, updates: Vec<(Key, PatchTreeValue<FullDeletion>)>) -> Result<()> {
        let mut spo_d = self.deletions_spo.write()?;
        let mut red_d = self
            .deletions
            .iter()
            .map(|t| t.write())
            .collect::<Result<Vec<_>>>()?;
        let mut adds = self
            .additions
            .iter()
            .map(|t| t.write())
            .collect::<Result<Vec<_>>>()?;
        for (key, value) in updates {
            let reduced: DeletionValue<ReducedDeletion> = value.deletion.reduce();
            for order in TripleOrder::ALL {
                let k = order.permute(key);
                let a = &mut adds[order as usize];
                if value.addition.is_empty() {
                    a.remove(&k);
                } else {
                    a.insert(k, value.addition.clone());
                }
                if order == TripleOrder::Spo {
                    continue;
                }
                let d = &mut red_d[reduced_slot(order)];
                if reduced.is_empty() {
                    d.remove(&k);
                } else {
                    d.insert(k, reduced.clone());
                }
            }
            if value.deletion.is_empty() {
                spo_d.remove(&key);
            } else {
                spo_d.insert(key, value.deletion);
            }
        }
        Ok(())
    }

    /// Every key recorded at `p`, as a sorted patch. Local changes are
    /// dropped unless `local_changes` includes them.
    pub fn reconstruct_patch(&self, p: PatchId, local_changes: LocalChanges) -> PatchSorted {
        let mut patch = PatchSorted::new();
        if !self.in_range(p) {
            return patch;
        }
        let mut filter = IteratorFilter::default().patch(p, true);
        if !local_changes.included() {
            filter = filter.skip_local_changes();
        }
        for (triple, value) in self.iter_spo(filter) {
            if let Some(entry) = value.at(p) {
                patch.add_unsorted(
                    PatchElement::new(triple, entry.addition).with_local_change(entry.local_change),
                );
            }
        }
        patch
    }

    /// Iterate the SPO maps with full deletion records.
    pub fn iter_spo(&self, filter: IteratorFilter) -> PatchTreeIterator<FullDeletion> {
        PatchTreeIterator::new(
            TripleOrder::Spo,
            Arc::clone(&self.deletions_spo),
            Arc::clone(&self.additions[0]),
            filter,
        )
    }

    /// Iterate the maps of a non-SPO ordering.
    pub fn iter_reduced(
        &self,
        order: TripleOrder,
        filter: IteratorFilter,
    ) -> PatchTreeIterator<ReducedDeletion> {
        let deletions = if order == TripleOrder::Spo {
            // reduced view of SPO is not stored; callers go through `iter`
            Arc::new(SortedTree::in_memory())
        } else {
            Arc::clone(&self.deletions[reduced_slot(order)])
        };
        PatchTreeIterator::new(
            order,
            deletions,
            Arc::clone(&self.additions[order as usize]),
            filter,
        )
    }

    /// Iterate any ordering, with deletion records reduced.
    pub fn iter(
        &self,
        order: TripleOrder,
        filter: IteratorFilter,
    ) -> Box<dyn Iterator<Item = (Triple, PatchTreeValue<ReducedDeletion>)> + Send> {
        if order == TripleOrder::Spo {
            Box::new(self.iter_spo(filter).map(|(t, v)| (t, v.reduced())))
        } else {
            Box::new(self.iter_reduced(order, filter))
        }
    }

    /// Iterate in the ordering of `filter.pattern`.
    pub fn iter_pattern(
        &self,
        filter: IteratorFilter,
    ) -> Box<dyn Iterator<Item = (Triple, PatchTreeValue<ReducedDeletion>)> + Send> {
        self.iter(filter.pattern.order(), filter)
    }

    /// Positions of the deletion of `triple` at `p`.
    pub fn positions(&self, triple: &Triple, p: PatchId) -> Option<PatchPositions> {
        self.deletions_spo
            .get(&triple.as_array())
            .and_then(|d| d.get(p).map(|e| e.positions))
    }

    /// Non-local deletions at `p` matching `pattern`.
    pub fn deletion_count(&self, pattern: &Triple, p: PatchId) -> u64 {
        let filter = IteratorFilter::new(*pattern)
            .patch(p, true)
            .skip_local_changes()
            .sides(Sides::Deletions)
            .reverse();
        match self.iter_pattern(filter).next() {
            Some((last, _)) => self
                .positions(&last, p)
                .map(|pos| pos.get_by_pattern(pattern) as u64 + 1)
                .unwrap_or(0),
            None => 0,
        }
    }

    /// Non-local deletions at `p` matching `pattern` that sort before
    /// `triple` in the pattern's ordering.
    pub fn deletions_before(&self, pattern: &Triple, triple: &Triple, p: PatchId) -> u64 {
        let order = pattern.order();
        let filter = IteratorFilter::new(*pattern)
            .patch(p, true)
            .skip_local_changes()
            .sides(Sides::Deletions);
        let next = if order == TripleOrder::Spo {
            let mut it = self.iter_spo(filter);
            it.jump(triple);
            it.next().map(|(t, _)| t)
        } else {
            let mut it = self.iter_reduced(order, filter);
            it.jump(triple);
            it.next().map(|(t, _)| t)
        };
        match next {
            Some(d) => self
                .positions(&d, p)
                .map(|pos| pos.get_by_pattern(pattern).max(0) as u64)
                .unwrap_or(0),
            None => self.deletion_count(pattern, p),
        }
    }

    /// True when `triple` carries a non-local deletion at `p`.
    pub fn is_deleted(&self, triple: &Triple, p: PatchId) -> bool {
        self.deletions_spo
            .get(&triple.as_array())
            .and_then(|d| d.get(p).copied())
            .is_some_and(|e| !e.local_change)
    }

    /// Non-local additions at `p` matching `pattern`.
    pub fn addition_count(&self, pattern: &Triple, p: PatchId) -> u64 {
        if let Ok(meta) = self.meta.read() {
            if let Some(count) = meta.addition_counts.get(&(p, pattern.as_array())) {
                return *count;
            }
        }
        let filter = IteratorFilter::new(*pattern)
            .patch(p, true)
            .skip_local_changes()
            .sides(Sides::Additions);
        self.iter_pattern(filter).count() as u64
    }

    /// Non-local additions at `p` matching `pattern`, in the pattern's ordering.
    pub fn additions_at(
        &self,
        pattern: &Triple,
        p: PatchId,
    ) -> Box<dyn Iterator<Item = Triple> + Send> {
        let filter = IteratorFilter::new(*pattern)
            .patch(p, true)
            .skip_local_changes()
            .sides(Sides::Additions);
        Box::new(self.iter_pattern(filter).map(|(t, _)| t))
    }

    /// Keys whose state at `p` differs from the snapshot, in the pattern's
    /// ordering. The flag is `true` for additions.
    pub fn changes_at(
        &self,
        pattern: &Triple,
        p: PatchId,
    ) -> Box<dyn Iterator<Item = (Triple, bool)> + Send> {
        let filter = IteratorFilter::new(*pattern)
            .patch(p, true)
            .skip_local_changes()
            .equal_keys(EqualKeys::Squash);
        Box::new(
            self.iter_pattern(filter)
                .filter_map(move |(t, v)| v.at(p).map(|e| (t, e.addition))),
        )
    }

    /// Persist all maps and the metadata.
    pub fn flush(&self) -> Result<()> {
        if self.read_only {
            return Ok(());
        }
        self.deletions_spo.flush()?;
        for t in &self.deletions {
            t.flush()?;
        }
        for t in &self.additions {
            t.flush()?;
        }
        let Some(root) = &self.root else {
            return Ok(());
        };
        let mut meta = self
            .meta
            .write()
            .map_err(|_| Error::Corrupt("tree meta lock poisoned".into()))?;
        if !meta.dirty {
            return Ok(());
        }
        let mut addition_counts: Vec<AdditionCount> = meta
            .addition_counts
            .iter()
            .map(|((patch_id, pattern), count)| AdditionCount {
                patch_id: *patch_id,
                pattern: *pattern,
                count: *count,
            })
            .collect();
        addition_counts.sort_by_key(|c| (c.patch_id, c.pattern));
        let out = TreeMeta {
            min_patch_id: self.min_patch_id,
            max_patch_id: meta.max_patch_id,
            addition_counts,
        };
        let path = tree_meta_path(root, self.min_patch_id);
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, serde_json::to_vec_pretty(&out)?)?;
        std::fs::rename(&tmp, &path)?;
        meta.dirty = false;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t(s: u64, p: u64, o: u64) -> Triple {
        Triple::new(s, p, o)
    }

    fn patch(elements: &[(Triple, bool)]) -> PatchSorted {
        elements
            .iter()
            .map(|(t, add)| PatchElement::new(*t, *add))
            .collect()
    }

    #[test]
    fn carry_forward_and_local_changes() {
        let tree = PatchTree::in_memory(0, 200);
        tree.append_patch(&patch(&[(t(1, 1, 1), false)]), 1, Uniqueness::Check)
            .unwrap();
        tree.append_patch(&patch(&[(t(2, 2, 2), true)]), 2, Uniqueness::Check)
            .unwrap();
        tree.append_patch(&patch(&[(t(1, 1, 1), true), (t(2, 2, 2), false)]), 3, Uniqueness::Check)
            .unwrap();

        let v = tree.get(&t(1, 1, 1)).unwrap();
        assert_eq!(v.deletion.patch_ids().collect::<Vec<_>>(), vec![1, 2]);
        assert!(v.is_present(3));
        assert!(v.is_local_change(3));
        assert!(v.exists_in_snapshot());

        let w = tree.get(&t(2, 2, 2)).unwrap();
        assert!(w.is_present(2));
        assert!(!w.is_present(3));
        assert!(w.is_local_change(3));

        assert!(tree.reconstruct_patch(3, LocalChanges::Ignore).is_empty());
        let all = tree.reconstruct_patch(3, LocalChanges::Include);
        assert_eq!(all.len(), 2);
        assert!(all.iter().all(|e| e.local_change));
        assert_eq!(tree.reconstruct_patch(2, LocalChanges::Ignore).len(), 2);
        assert!(tree.reconstruct_patch(9, LocalChanges::Include).is_empty());
    }

    #[test]
    fn rejects_gaps_and_unsorted_input() {
        let tree = PatchTree::in_memory(0, 200);
        let p = patch(&[(t(1, 1, 1), true)]);
        assert!(matches!(
            tree.append_patch(&p, 2, Uniqueness::Check),
            Err(Error::Invalid(_))
        ));
        let mut unsorted = PatchSorted::new();
        unsorted.add_unsorted(PatchElement::addition(t(2, 1, 1)));
        unsorted.add_unsorted(PatchElement::addition(t(1, 1, 1)));
        assert!(matches!(
            tree.append_patch(&unsorted, 1, Uniqueness::Trust),
            Err(Error::Invalid(_))
        ));
        assert!(tree.is_empty());
    }

    #[test]
    fn checked_append_detects_collisions() {
        let tree = PatchTree::in_memory(0, 200);
        let p = patch(&[(t(1, 1, 1), true)]);
        assert!(tree.append_patch(&p, 1, Uniqueness::Check).unwrap());
        assert!(!tree.append_patch(&p, 1, Uniqueness::Check).unwrap());
        let other = patch(&[(t(1, 1, 2), true)]);
        assert!(tree.append_patch(&other, 1, Uniqueness::Check).unwrap());
        assert!(tree.contains(&PatchElement::addition(t(1, 1, 1)), 1));
        assert!(tree.contains(&PatchElement::addition(t(1, 1, 2)), 1));
        assert!(!tree.contains(&PatchElement::deletion(t(1, 1, 1)), 1));
        assert!(!tree.contains(&PatchElement::addition(t(1, 1, 1)), 5));
    }

    #[test]
    fn unsafe_append_overwrites_same_patch() {
        let tree = PatchTree::in_memory(0, 200);
        tree.append_patch(&patch(&[(t(1, 1, 1), true)]), 1, Uniqueness::Trust)
            .unwrap();
        tree.append_patch(&patch(&[(t(1, 1, 1), false)]), 1, Uniqueness::Trust)
            .unwrap();
        let v = tree.get(&t(1, 1, 1)).unwrap();
        assert!(!v.has_addition());
        assert!(v.is_deletion(1, true));
    }

    #[test]
    fn positions_and_counts() {
        let tree = PatchTree::in_memory(0, 2);
        tree.append_patch(
            &patch(&[
                (t(1, 1, 1), false),
                (t(1, 1, 2), false),
                (t(1, 2, 2), true),
                (t(2, 1, 2), false),
                (t(3, 1, 1), true),
            ]),
            1,
            Uniqueness::Check,
        )
        .unwrap();
        assert_eq!(tree.deletion_count(&Triple::any(), 1), 3);
        assert_eq!(tree.deletion_count(&t(1, 0, 0), 1), 2);
        assert_eq!(tree.deletion_count(&t(0, 0, 2), 1), 2);
        assert_eq!(tree.deletion_count(&t(0, 9, 0), 1), 0);
        assert_eq!(tree.deletions_before(&Triple::any(), &t(2, 0, 0), 1), 2);
        assert_eq!(tree.deletions_before(&t(0, 1, 0), &t(2, 1, 2), 1), 2);
        assert_eq!(tree.deletions_before(&t(0, 1, 0), &t(9, 9, 9), 1), 3);
        assert!(tree.is_deleted(&t(2, 1, 2), 1));
        assert_eq!(tree.addition_count(&Triple::any(), 1), 2);
        assert_eq!(tree.addition_count(&t(0, 0, 2), 1), 1);

        // carried forward: same deletions and positions at 2
        tree.append_patch(&patch(&[(t(1, 1, 1), true)]), 2, Uniqueness::Check)
            .unwrap();
        assert_eq!(tree.deletion_count(&Triple::any(), 2), 2);
        assert_eq!(tree.positions(&t(2, 1, 2), 2).unwrap().all, 1);
        assert_eq!(tree.addition_count(&Triple::any(), 2), 2);
    }

    #[test]
    fn persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let tree = PatchTree::open(dir.path(), 0, false, 200).unwrap();
            tree.append_patch(&patch(&[(t(1, 1, 1), false)]), 1, Uniqueness::Check)
                .unwrap();
        }
        let tree = PatchTree::open(dir.path(), 0, true, 200).unwrap();
        assert_eq!(tree.max_patch_id(), Some(1));
        assert!(tree.is_deleted(&t(1, 1, 1), 1));
        assert_eq!(tree.positions(&t(1, 1, 1), 1).unwrap().all, 0);
        assert!(matches!(
            tree.append_patch(&patch(&[(t(2, 2, 2), true)]), 2, Uniqueness::Check),
            Err(Error::ReadOnly)
        ));
        assert!(PatchTree::open(dir.path(), 5, true, 200).is_err());
    }
}
