//! Dual-cursor iteration over the deletion and addition maps of one ordering.

use std::sync::Arc;

use crate::patch::value::{
    AdditionEntry, AdditionValue, DeletionEntry, DeletionValue, PatchId, PatchTreeValue,
};
use crate::storage::{Key, SortedTree, TreeCursor};
use crate::triple::{Triple, TripleOrder};

/// Which maps an iterator reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Sides {
    Deletions,
    Additions,
    #[default]
    Both,
}

/// How a key present and passing the filter on both maps is emitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EqualKeys {
    /// One emission carrying both histories.
    #[default]
    Squash,
    /// Keep only the side whose matched entry has the larger patch id.
    Latest,
}

#[derive(Debug, Clone, Default)]
pub struct IteratorFilter {
    pub pattern: Triple,
    /// `(p, exact)`: entries stamped with `p`, or the latest entry `<= p`.
    pub patch_id: Option<(PatchId, bool)>,
    pub skip_local_changes: bool,
    pub reverse: bool,
    pub sides: Sides,
    pub equal_keys: EqualKeys,
}

impl IteratorFilter {
    pub fn new(pattern: Triple) -> Self {
        IteratorFilter {
            pattern,
            ..IteratorFilter::default()
        }
    }

    pub fn patch(mut self, patch_id: PatchId, exact: bool) -> Self {
        self.patch_id = Some((patch_id, exact));
        self
    }

    pub fn skip_local_changes(mut self) -> Self {
        self.skip_local_changes = true;
        self
    }

    pub fn reverse(mut self) -> Self {
        self.reverse = true;
        self
    }

    pub fn sides(mut self, sides: Sides) -> Self {
        self.sides = sides;
        self
    }

    pub fn equal_keys(mut self, equal_keys: EqualKeys) -> Self {
        self.equal_keys = equal_keys;
        self
    }

    /// Patch id of the entry that makes a deletion history pass, if it does.
    fn deletion_match<E: DeletionEntry>(&self, v: &DeletionValue<E>) -> Option<PatchId> {
        let entry = match self.patch_id {
            Some((p, true)) => v.get(p),
            Some((p, false)) => v.latest(p),
            None => v.last(),
        }?;
        if self.skip_local_changes && entry.local_change() {
            return None;
        }
        Some(entry.patch_id())
    }

    fn addition_match(&self, v: &AdditionValue) -> Option<PatchId> {
        let entry: &AdditionEntry = match self.patch_id {
            Some((p, true)) => v.get(p),
            Some((p, false)) => v.latest(p),
            None => v.last(),
        }?;
        if self.skip_local_changes && entry.local_change {
            return None;
        }
        Some(entry.patch_id)
    }
}

/// Iterates `(triple, value)` pairs in the key order of one ordering,
/// merging the deletion and the addition cursor.
///
/// Iteration stops as soon as both cursors leave the run of keys sharing
/// the pattern's bound prefix in this ordering.
pub struct PatchTreeIterator<E: DeletionEntry> {
    order: TripleOrder,
    deletions: Option<TreeCursor<DeletionValue<E>>>,
    additions: Option<TreeCursor<AdditionValue>>,
    filter: IteratorFilter,
    prefix: Key,
    prefix_len: usize,
}

impl<E: DeletionEntry> PatchTreeIterator<E> {
    pub fn new(
        order: TripleOrder,
        deletions: Arc<SortedTree<DeletionValue<E>>>,
        additions: Arc<SortedTree<AdditionValue>>,
        filter: IteratorFilter,
    ) -> Self {
        let pattern = filter.pattern.as_array();
        let prefix = order.permute(pattern);
        let prefix_len = order.prefix_len(pattern);
        let deletions = (filter.sides != Sides::Additions).then(|| TreeCursor::new(deletions));
        let additions = (filter.sides != Sides::Deletions).then(|| TreeCursor::new(additions));
        let mut it = PatchTreeIterator {
            order,
            deletions,
            additions,
            filter,
            prefix,
            prefix_len,
        };
        it.rewind();
        it
    }

    fn bound(&self, fill: u64) -> Key {
        let mut key = self.prefix;
        for c in key.iter_mut().skip(self.prefix_len) {
            *c = fill;
        }
        key
    }

    /// Position both cursors at the start of the pattern's run.
    pub fn rewind(&mut self) {
        if self.filter.reverse {
            let upper = self.bound(u64::MAX);
            if let Some(c) = self.deletions.as_mut() {
                c.jump_back(&upper);
            }
            if let Some(c) = self.additions.as_mut() {
                c.jump_back(&upper);
            }
        } else {
            let lower = self.bound(0);
            self.jump_key(&lower);
        }
    }

    /// Continue forward iteration from the first key `>= triple`.
    pub fn jump(&mut self, triple: &Triple) {
        let lower = self.bound(0);
        let key = triple.key(self.order).max(lower);
        self.jump_key(&key);
    }

    fn jump_key(&mut self, key: &Key) {
        if let Some(c) = self.deletions.as_mut() {
            c.jump(key);
        }
        if let Some(c) = self.additions.as_mut() {
            c.jump(key);
        }
    }

    pub fn order(&self) -> TripleOrder {
        self.order
    }

    fn in_prefix(&self, key: &Key) -> bool {
        key[..self.prefix_len] == self.prefix[..self.prefix_len]
    }

    fn next_key(&self) -> Option<Key> {
        let d = self.deletions.as_ref().and_then(|c| c.key().copied());
        let a = self.additions.as_ref().and_then(|c| c.key().copied());
        match (d, a) {
            (Some(d), Some(a)) => Some(if self.filter.reverse { d.max(a) } else { d.min(a) }),
            (d, a) => d.or(a),
        }
    }

    fn take_deletion(&mut self, key: &Key) -> Option<DeletionValue<E>> {
        let reverse = self.filter.reverse;
        let cursor = self.deletions.as_mut()?;
        let (k, v) = cursor.get()?;
        if k != key {
            return None;
        }
        let v = v.clone();
        if reverse {
            cursor.step_back();
        } else {
            cursor.step();
        }
        Some(v)
    }

    fn take_addition(&mut self, key: &Key) -> Option<AdditionValue> {
        let reverse = self.filter.reverse;
        let cursor = self.additions.as_mut()?;
        let (k, v) = cursor.get()?;
        if k != key {
            return None;
        }
        let v = v.clone();
        if reverse {
            cursor.step_back();
        } else {
            cursor.step();
        }
        Some(v)
    }
}

impl<E: DeletionEntry> Iterator for PatchTreeIterator<E> {
    type Item = (Triple, PatchTreeValue<E>);

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let key = self.next_key()?;
            if !self.in_prefix(&key) {
                return None;
            }
            let deletion = self.take_deletion(&key);
            let addition = self.take_addition(&key);
            let triple = Triple::from_key(self.order, key);
            if !triple.matches(&self.filter.pattern) {
                continue;
            }
            let d_match = deletion.as_ref().and_then(|v| self.filter.deletion_match(v));
            let a_match = addition.as_ref().and_then(|v| self.filter.addition_match(v));
            let (keep_d, keep_a) = match (d_match, a_match) {
                (None, None) => continue,
                (Some(_), None) => (true, false),
                (None, Some(_)) => (false, true),
                (Some(d), Some(a)) => match self.filter.equal_keys {
                    EqualKeys::Squash => (true, true),
                    EqualKeys::Latest => (d > a, a >= d),
                },
            };
            let value = PatchTreeValue::new(
                deletion.filter(|_| keep_d).unwrap_or_default(),
                addition.filter(|_| keep_a).unwrap_or_default(),
            );
            return Some((triple, value));
        }
    }
}
