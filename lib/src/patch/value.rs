//! Per-key version histories stored in the patch trees.
//!
//! Once a key is touched, every later patch id appended to the tree records
//! the key's state at that id on one of the two histories, so an exact
//! lookup answers "what is the state at `p`".

use snapfile::header::{push_uvarint, read_uvarint};

use crate::patch::positions::PatchPositions;
use crate::storage::TreeValue;

pub type PatchId = u64;

/// Shape of one deletion record. The SPO tree stores [`FullDeletion`]s with
/// positions, the other orderings store [`ReducedDeletion`]s.
pub trait DeletionEntry: Copy + std::fmt::Debug + PartialEq + Send + Sync + 'static {
    fn patch_id(&self) -> PatchId;
    fn local_change(&self) -> bool;
    fn positions(&self) -> Option<&PatchPositions>;
    fn from_full(full: &FullDeletion) -> Self;
    fn encode(&self, out: &mut Vec<u8>);
    fn decode(buf: &[u8], off: usize) -> Option<(Self, usize)>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FullDeletion {
    pub patch_id: PatchId,
    pub positions: PatchPositions,
    pub local_change: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReducedDeletion {
    pub patch_id: PatchId,
    pub local_change: bool,
}

fn push_id_flag(id: PatchId, flag: bool, out: &mut Vec<u8>) {
    push_uvarint((id << 1) | flag as u64, out);
}

fn read_id_flag(buf: &[u8], off: usize) -> Option<(PatchId, bool, usize)> {
    let (v, off) = read_uvarint(buf, off)?;
    Some((v >> 1, v & 1 == 1, off))
}

impl DeletionEntry for FullDeletion {
    fn patch_id(&self) -> PatchId {
        self.patch_id
    }

    fn local_change(&self) -> bool {
        self.local_change
    }

    fn positions(&self) -> Option<&PatchPositions> {
        Some(&self.positions)
    }

    fn from_full(full: &FullDeletion) -> Self {
        *full
    }

    fn encode(&self, out: &mut Vec<u8>) {
        push_id_flag(self.patch_id, self.local_change, out);
        self.positions.encode(out);
    }

    fn decode(buf: &[u8], off: usize) -> Option<(Self, usize)> {
        let (patch_id, local_change, off) = read_id_flag(buf, off)?;
        let (positions, off) = PatchPositions::decode(buf, off)?;
        Some((
            FullDeletion {
                patch_id,
                positions,
                local_change,
            },
            off,
        ))
    }
}

impl DeletionEntry for ReducedDeletion {
    fn patch_id(&self) -> PatchId {
        self.patch_id
    }

    fn local_change(&self) -> bool {
        self.local_change
    }

    fn positions(&self) -> Option<&PatchPositions> {
        None
    }

    fn from_full(full: &FullDeletion) -> Self {
        ReducedDeletion {
            patch_id: full.patch_id,
            local_change: full.local_change,
        }
    }

    fn encode(&self, out: &mut Vec<u8>) {
        push_id_flag(self.patch_id, self.local_change, out);
    }

    fn decode(buf: &[u8], off: usize) -> Option<(Self, usize)> {
        let (patch_id, local_change, off) = read_id_flag(buf, off)?;
        Some((
            ReducedDeletion {
                patch_id,
                local_change,
            },
            off,
        ))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdditionEntry {
    pub patch_id: PatchId,
    pub local_change: bool,
}

/// Deletion history of one key, sorted by patch id.
#[derive(Debug, Clone, PartialEq)]
pub struct DeletionValue<E: DeletionEntry> {
    entries: Vec<E>,
}

impl<E: DeletionEntry> Default for DeletionValue<E> {
    fn default() -> Self {
        DeletionValue {
            entries: Vec::new(),
        }
    }
}

impl<E: DeletionEntry> DeletionValue<E> {
    pub fn from_entries(mut entries: Vec<E>) -> Self {
        entries.sort_by_key(|e| e.patch_id());
        DeletionValue { entries }
    }

    pub fn entries(&self) -> &[E] {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Entry stamped exactly with `patch_id`.
    pub fn get(&self, patch_id: PatchId) -> Option<&E> {
        self.entries
            .binary_search_by_key(&patch_id, |e| e.patch_id())
            .ok()
            .map(|i| &self.entries[i])
    }

    /// Greatest entry with id `<= patch_id`.
    pub fn latest(&self, patch_id: PatchId) -> Option<&E> {
        let n = self.entries.partition_point(|e| e.patch_id() <= patch_id);
        n.checked_sub(1).map(|i| &self.entries[i])
    }

    /// Insert or replace the entry for its patch id.
    pub fn set(&mut self, entry: E) {
        match self
            .entries
            .binary_search_by_key(&entry.patch_id(), |e| e.patch_id())
        {
            Ok(i) => self.entries[i] = entry,
            Err(i) => self.entries.insert(i, entry),
        }
    }

    pub fn remove(&mut self, patch_id: PatchId) -> Option<E> {
        let i = self
            .entries
            .binary_search_by_key(&patch_id, |e| e.patch_id())
            .ok()?;
        Some(self.entries.remove(i))
    }

    pub fn first(&self) -> Option<&E> {
        self.entries.first()
    }

    pub fn last(&self) -> Option<&E> {
        self.entries.last()
    }

    pub fn patch_ids(&self) -> impl Iterator<Item = PatchId> + '_ {
        self.entries.iter().map(|e| e.patch_id())
    }

    pub fn reduce<R: DeletionEntry>(&self) -> DeletionValue<R>
    where
        E: Into<FullDeletion>,
    {
        DeletionValue {
            entries: self
                .entries
                .iter()
                .map(|e| R::from_full(&(*e).into()))
                .collect(),
        }
    }
}

impl From<ReducedDeletion> for FullDeletion {
    fn from(r: ReducedDeletion) -> Self {
        FullDeletion {
            patch_id: r.patch_id,
            positions: PatchPositions::none(),
            local_change: r.local_change,
        }
    }
}

/// Addition history of one key, sorted by patch id.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AdditionValue {
    entries: Vec<AdditionEntry>,
}

impl AdditionValue {
    pub fn from_entries(mut entries: Vec<AdditionEntry>) -> Self {
        entries.sort_by_key(|e| e.patch_id);
        AdditionValue { entries }
    }

    pub fn entries(&self) -> &[AdditionEntry] {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn get(&self, patch_id: PatchId) -> Option<&AdditionEntry> {
        self.entries
            .binary_search_by_key(&patch_id, |e| e.patch_id)
            .ok()
            .map(|i| &self.entries[i])
    }

    pub fn latest(&self, patch_id: PatchId) -> Option<&AdditionEntry> {
        let n = self.entries.partition_point(|e| e.patch_id <= patch_id);
        n.checked_sub(1).map(|i| &self.entries[i])
    }

    pub fn set(&mut self, entry: AdditionEntry) {
        match self
            .entries
            .binary_search_by_key(&entry.patch_id, |e| e.patch_id)
        {
            Ok(i) => self.entries[i] = entry,
            Err(i) => self.entries.insert(i, entry),
        }
    }

    pub fn remove(&mut self, patch_id: PatchId) -> Option<AdditionEntry> {
        let i = self
            .entries
            .binary_search_by_key(&patch_id, |e| e.patch_id)
            .ok()?;
        Some(self.entries.remove(i))
    }

    pub fn first(&self) -> Option<&AdditionEntry> {
        self.entries.first()
    }

    pub fn last(&self) -> Option<&AdditionEntry> {
        self.entries.last()
    }

    pub fn patch_ids(&self) -> impl Iterator<Item = PatchId> + '_ {
        self.entries.iter().map(|e| e.patch_id)
    }
}

impl<E: DeletionEntry> TreeValue for DeletionValue<E> {
    fn encode(&self, out: &mut Vec<u8>) {
        push_uvarint(self.entries.len() as u64, out);
        for e in &self.entries {
            e.encode(out);
        }
    }

    fn decode(buf: &[u8], off: usize) -> Option<(Self, usize)> {
        let (n, mut off) = read_uvarint(buf, off)?;
        let mut entries = Vec::with_capacity(n.min(1024) as usize);
        for _ in 0..n {
            let (e, next) = E::decode(buf, off)?;
            entries.push(e);
            off = next;
        }
        Some((DeletionValue { entries }, off))
    }
}

impl TreeValue for AdditionValue {
    fn encode(&self, out: &mut Vec<u8>) {
        push_uvarint(self.entries.len() as u64, out);
        for e in &self.entries {
            push_id_flag(e.patch_id, e.local_change, out);
        }
    }

    fn decode(buf: &[u8], off: usize) -> Option<(Self, usize)> {
        let (n, mut off) = read_uvarint(buf, off)?;
        let mut entries = Vec::with_capacity(n.min(1024) as usize);
        for _ in 0..n {
            let (patch_id, local_change, next) = read_id_flag(buf, off)?;
            entries.push(AdditionEntry {
                patch_id,
                local_change,
            });
            off = next;
        }
        Some((AdditionValue { entries }, off))
    }
}

/// Both histories of one key.
#[derive(Debug, Clone, PartialEq)]
pub struct PatchTreeValue<E: DeletionEntry> {
    pub deletion: DeletionValue<E>,
    pub addition: AdditionValue,
}

impl<E: DeletionEntry> Default for PatchTreeValue<E> {
    fn default() -> Self {
        PatchTreeValue {
            deletion: DeletionValue::default(),
            addition: AdditionValue::default(),
        }
    }
}

/// One recorded state of a key: its polarity and local-change flag at an id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HistoryEntry {
    pub patch_id: PatchId,
    pub addition: bool,
    pub local_change: bool,
}

impl<E: DeletionEntry> PatchTreeValue<E> {
    pub fn new(deletion: DeletionValue<E>, addition: AdditionValue) -> Self {
        PatchTreeValue { deletion, addition }
    }

    pub fn has_addition(&self) -> bool {
        !self.addition.is_empty()
    }

    pub fn has_deletion(&self) -> bool {
        !self.deletion.is_empty()
    }

    /// Addition id at `patch_id` (exact) or the greatest one `<= patch_id`.
    pub fn get_addition_patch_id(&self, patch_id: PatchId, exact: bool) -> Option<PatchId> {
        if exact {
            self.addition.get(patch_id).map(|e| e.patch_id)
        } else {
            self.addition.latest(patch_id).map(|e| e.patch_id)
        }
    }

    pub fn get_deletion_patch_id(&self, patch_id: PatchId, exact: bool) -> Option<PatchId> {
        if exact {
            self.deletion.get(patch_id).map(|e| e.patch_id())
        } else {
            self.deletion.latest(patch_id).map(|e| e.patch_id())
        }
    }

    pub fn is_addition(&self, patch_id: PatchId, exact: bool) -> bool {
        self.get_addition_patch_id(patch_id, exact).is_some()
    }

    pub fn is_deletion(&self, patch_id: PatchId, exact: bool) -> bool {
        self.get_deletion_patch_id(patch_id, exact).is_some()
    }

    /// The key was in the snapshot: its history starts with a deletion.
    pub fn exists_in_snapshot(&self) -> bool {
        match (self.deletion.first(), self.addition.first()) {
            (Some(d), Some(a)) => d.patch_id() < a.patch_id,
            (Some(_), None) => true,
            _ => false,
        }
    }

    pub fn is_present(&self, patch_id: PatchId) -> bool {
        let addition = self.get_addition_patch_id(patch_id, true);
        let deletion = self.get_deletion_patch_id(patch_id, true);
        match (addition, deletion) {
            (None, None) => self.exists_in_snapshot(),
            (Some(a), Some(d)) => a > d,
            (Some(_), None) => true,
            (None, Some(_)) => false,
        }
    }

    pub fn is_delta_type_equal(&self, a: PatchId, b: PatchId) -> bool {
        self.is_present(a) == self.is_present(b)
    }

    /// The entry active at `patch_id`: the greatest entry `<= patch_id`
    /// across both histories.
    pub fn active(&self, patch_id: PatchId) -> Option<HistoryEntry> {
        let d = self.deletion.latest(patch_id).map(|e| HistoryEntry {
            patch_id: e.patch_id(),
            addition: false,
            local_change: e.local_change(),
        });
        let a = self.addition.latest(patch_id).map(|e| HistoryEntry {
            patch_id: e.patch_id,
            addition: true,
            local_change: e.local_change,
        });
        match (d, a) {
            (Some(d), Some(a)) => Some(if a.patch_id > d.patch_id { a } else { d }),
            (d, a) => d.or(a),
        }
    }

    /// The entry stamped exactly with `patch_id`, if any.
    pub fn at(&self, patch_id: PatchId) -> Option<HistoryEntry> {
        if let Some(a) = self.addition.get(patch_id) {
            return Some(HistoryEntry {
                patch_id,
                addition: true,
                local_change: a.local_change,
            });
        }
        self.deletion.get(patch_id).map(|d| HistoryEntry {
            patch_id,
            addition: false,
            local_change: d.local_change(),
        })
    }

    pub fn is_local_change(&self, patch_id: PatchId) -> bool {
        self.active(patch_id).is_some_and(|e| e.local_change)
    }

    /// Greatest patch id recorded on either history.
    pub fn max_patch_id(&self) -> Option<PatchId> {
        let d = self.deletion.last().map(|e| e.patch_id());
        let a = self.addition.last().map(|e| e.patch_id);
        d.max(a)
    }

    pub fn min_patch_id(&self) -> Option<PatchId> {
        let d = self.deletion.first().map(|e| e.patch_id());
        let a = self.addition.first().map(|e| e.patch_id);
        match (d, a) {
            (Some(d), Some(a)) => Some(d.min(a)),
            (d, a) => d.or(a),
        }
    }
}

impl PatchTreeValue<FullDeletion> {
    /// Positions of the deletion stamped exactly with `patch_id`.
    pub fn positions(&self, patch_id: PatchId) -> Option<PatchPositions> {
        self.deletion.get(patch_id).map(|d| d.positions)
    }

    pub fn reduced(&self) -> PatchTreeValue<ReducedDeletion> {
        PatchTreeValue {
            deletion: self.deletion.reduce(),
            addition: self.addition.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn del(patch_id: PatchId, local_change: bool) -> ReducedDeletion {
        ReducedDeletion {
            patch_id,
            local_change,
        }
    }

    fn add(patch_id: PatchId, local_change: bool) -> AdditionEntry {
        AdditionEntry {
            patch_id,
            local_change,
        }
    }

    fn value(d: Vec<ReducedDeletion>, a: Vec<AdditionEntry>) -> PatchTreeValue<ReducedDeletion> {
        PatchTreeValue::new(DeletionValue::from_entries(d), AdditionValue::from_entries(a))
    }

    #[test]
    fn snapshot_triple_deleted_then_restored() {
        // deleted at 1 and 2, restored at 3 and 4
        let v = value(
            vec![del(1, false), del(2, false)],
            vec![add(3, true), add(4, true)],
        );
        assert!(v.exists_in_snapshot());
        assert!(v.is_present(0));
        assert!(!v.is_present(1));
        assert!(!v.is_present(2));
        assert!(v.is_present(3));
        assert!(v.is_local_change(4));
        assert!(!v.is_local_change(2));
        assert!(v.is_delta_type_equal(0, 4));
        assert!(!v.is_delta_type_equal(0, 2));
        assert_eq!(v.get_deletion_patch_id(5, false), Some(2));
        assert_eq!(v.get_addition_patch_id(2, true), None);
        assert_eq!(v.max_patch_id(), Some(4));
    }

    #[test]
    fn added_triple_deleted_as_local_change() {
        let v = value(vec![del(2, true)], vec![add(1, false)]);
        assert!(!v.exists_in_snapshot());
        assert!(!v.is_present(0));
        assert!(v.is_present(1));
        assert!(!v.is_present(2));
        assert!(v.is_local_change(2));
        assert_eq!(
            v.active(7),
            Some(HistoryEntry {
                patch_id: 2,
                addition: false,
                local_change: true
            })
        );
    }

    #[test]
    fn encode_roundtrip() {
        let mut d = DeletionValue::<FullDeletion>::default();
        d.set(FullDeletion {
            patch_id: 3,
            positions: PatchPositions::none(),
            local_change: true,
        });
        let mut buf = Vec::new();
        d.encode(&mut buf);
        let (back, off) = DeletionValue::<FullDeletion>::decode(&buf, 0).unwrap();
        assert_eq!(back, d);
        assert_eq!(off, buf.len());
        let reduced: DeletionValue<ReducedDeletion> = d.reduce();
        assert_eq!(reduced.entries(), &[del(3, true)]);
    }
}
