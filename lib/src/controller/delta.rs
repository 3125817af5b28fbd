//! Triple delta iterators: the changes between two versions, produced from
//! one patch tree, from two snapshots, or composed from several of those.

use std::cmp::Ordering;
use std::iter::Peekable;
use std::sync::Arc;

use crate::dictionary::DictionaryManager;
use crate::patch::{EqualKeys, IteratorFilter, PatchId, PatchTree};
use crate::snapshot::Snapshot;
use crate::triple::{StringTriple, Triple, TripleComparator, TripleOrder};

/// One change: `triple` was added (or removed) between two versions.
#[derive(Debug, Clone)]
pub struct TripleDelta {
    pub triple: Triple,
    pub is_addition: bool,
    /// Dictionary the ids of `triple` belong to.
    pub dict: Arc<DictionaryManager>,
}

impl TripleDelta {
    pub fn new(triple: Triple, is_addition: bool, dict: Arc<DictionaryManager>) -> Self {
        TripleDelta {
            triple,
            is_addition,
            dict,
        }
    }

    pub fn to_string_triple(&self) -> StringTriple {
        self.dict.decode(&self.triple)
    }

    /// The same change seen in the opposite direction.
    pub fn inverted(mut self) -> Self {
        self.is_addition = !self.is_addition;
        self
    }

    fn compare(&self, other: &TripleDelta, comparator: &TripleComparator) -> Ordering {
        comparator.compare(&self.triple, &self.dict, &other.triple, &other.dict)
    }
}

impl std::fmt::Display for TripleDelta {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let sign = if self.is_addition { '+' } else { '-' };
        write!(f, "{sign} {}", self.to_string_triple())
    }
}

pub type DeltaIter = Box<dyn Iterator<Item = TripleDelta> + Send>;

/// Changes of patch `end` relative to the tree's snapshot.
pub fn forward_delta(
    tree: &PatchTree,
    pattern: &Triple,
    end: PatchId,
    dict: Arc<DictionaryManager>,
) -> DeltaIter {
    Box::new(
        tree.changes_at(pattern, end)
            .map(move |(t, addition)| TripleDelta::new(t, addition, Arc::clone(&dict))),
    )
}

/// Changes between two patches of the same tree: every key touched up to
/// `end` whose presence differs between `start` and `end`.
pub fn forward_diff_delta(
    tree: &PatchTree,
    pattern: &Triple,
    start: PatchId,
    end: PatchId,
    dict: Arc<DictionaryManager>,
) -> DeltaIter {
    let filter = IteratorFilter::new(*pattern)
        .patch(end, false)
        .equal_keys(EqualKeys::Squash);
    Box::new(tree.iter_pattern(filter).filter_map(move |(t, v)| {
        if v.is_delta_type_equal(start, end) {
            None
        } else {
            Some(TripleDelta::new(t, v.is_present(end), Arc::clone(&dict)))
        }
    }))
}

/// Re-sorts a delta stream under `comparator`.
pub struct SortedTripleDeltaIterator {
    items: std::vec::IntoIter<TripleDelta>,
}

impl SortedTripleDeltaIterator {
    pub fn new(inner: impl Iterator<Item = TripleDelta>, comparator: TripleComparator) -> Self {
        let mut items: Vec<TripleDelta> = inner.collect();
        items.sort_by(|a, b| a.compare(b, &comparator));
        SortedTripleDeltaIterator {
            items: items.into_iter(),
        }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.len() == 0
    }
}

impl Iterator for SortedTripleDeltaIterator {
    type Item = TripleDelta;

    fn next(&mut self) -> Option<TripleDelta> {
        self.items.next()
    }
}

/// Composes two consecutive deltas, both sorted by the same comparator.
///
/// A key present in both with opposite statuses cancels out; with the same
/// status it is emitted once.
pub struct MergeDiffIterator {
    first: Peekable<DeltaIter>,
    second: Peekable<DeltaIter>,
    comparator: TripleComparator,
}

impl MergeDiffIterator {
    pub fn new(first: DeltaIter, second: DeltaIter, comparator: TripleComparator) -> Self {
        MergeDiffIterator {
            first: first.peekable(),
            second: second.peekable(),
            comparator,
        }
    }

    /// Composition where the first delta leads from a version back to its
    /// snapshot: its changes are inverted before merging.
    pub fn case2(first: DeltaIter, second: DeltaIter, comparator: TripleComparator) -> Self {
        MergeDiffIterator::new(Box::new(first.map(TripleDelta::inverted)), second, comparator)
    }
}

impl Iterator for MergeDiffIterator {
    type Item = TripleDelta;

    fn next(&mut self) -> Option<TripleDelta> {
        loop {
            let ord = match (self.first.peek(), self.second.peek()) {
                (None, None) => return None,
                (Some(_), None) => Ordering::Less,
                (None, Some(_)) => Ordering::Greater,
                (Some(a), Some(b)) => a.compare(b, &self.comparator),
            };
            match ord {
                Ordering::Less => return self.first.next(),
                Ordering::Greater => return self.second.next(),
                Ordering::Equal => {
                    let a = self.first.next()?;
                    let b = self.second.next()?;
                    if a.is_addition == b.is_addition {
                        return Some(b);
                    }
                }
            }
        }
    }
}

/// Two-pointer diff of two sorted triple streams: triples only on the left
/// are deletions, triples only on the right are additions.
pub struct PlainDiffDeltaIterator<L, R>
where
    L: Iterator<Item = Triple>,
    R: Iterator<Item = Triple>,
{
    left: Peekable<L>,
    left_dict: Arc<DictionaryManager>,
    right: Peekable<R>,
    right_dict: Arc<DictionaryManager>,
    comparator: TripleComparator,
}

impl<L, R> PlainDiffDeltaIterator<L, R>
where
    L: Iterator<Item = Triple>,
    R: Iterator<Item = Triple>,
{
    pub fn new(
        left: L,
        left_dict: Arc<DictionaryManager>,
        right: R,
        right_dict: Arc<DictionaryManager>,
        comparator: TripleComparator,
    ) -> Self {
        PlainDiffDeltaIterator {
            left: left.peekable(),
            left_dict,
            right: right.peekable(),
            right_dict,
            comparator,
        }
    }
}

impl<L, R> Iterator for PlainDiffDeltaIterator<L, R>
where
    L: Iterator<Item = Triple>,
    R: Iterator<Item = Triple>,
{
    type Item = TripleDelta;

    fn next(&mut self) -> Option<TripleDelta> {
        loop {
            let ord = match (self.left.peek(), self.right.peek()) {
                (None, None) => return None,
                (Some(_), None) => Ordering::Less,
                (None, Some(_)) => Ordering::Greater,
                (Some(a), Some(b)) => {
                    self.comparator
                        .compare(a, &self.left_dict, b, &self.right_dict)
                }
            };
            match ord {
                Ordering::Less => {
                    let t = self.left.next()?;
                    return Some(TripleDelta::new(t, false, Arc::clone(&self.left_dict)));
                }
                Ordering::Greater => {
                    let t = self.right.next()?;
                    return Some(TripleDelta::new(t, true, Arc::clone(&self.right_dict)));
                }
                Ordering::Equal => {
                    self.left.next();
                    self.right.next();
                }
            }
        }
    }
}

/// Triples of `snapshot` matching a pattern given as strings; empty when a
/// bound term is unknown to the snapshot's dictionary.
pub(crate) fn snapshot_triples(
    snapshot: &Snapshot,
    pattern: &StringTriple,
) -> Box<dyn Iterator<Item = Triple> + Send> {
    match snapshot.dictionary().encode_pattern(pattern) {
        Some(p) => Box::new(snapshot.search(&p).map(Triple::from_array)),
        None => Box::new(std::iter::empty()),
    }
}

/// Direct diff of two snapshots.
pub fn snapshot_diff(from: &Snapshot, to: &Snapshot, pattern: &StringTriple) -> DeltaIter {
    let order = pattern_order(pattern);
    Box::new(PlainDiffDeltaIterator::new(
        snapshot_triples(from, pattern),
        Arc::clone(from.dictionary()),
        snapshot_triples(to, pattern),
        Arc::clone(to.dictionary()),
        TripleComparator::new(order),
    ))
}

/// Ordering whose prefix holds the bound components of a string pattern.
pub fn pattern_order(pattern: &StringTriple) -> TripleOrder {
    let bound = |c: &str| u64::from(!crate::triple::is_variable(c));
    TripleOrder::for_pattern([
        bound(&pattern.subject),
        bound(&pattern.predicate),
        bound(&pattern.object),
    ])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::Uniqueness;
    use crate::patch::{PatchElement, PatchSorted};

    fn dict() -> Arc<DictionaryManager> {
        Arc::new(DictionaryManager::in_memory())
    }

    fn ids(dict: &DictionaryManager, terms: [&str; 3]) -> Triple {
        dict.encode(&StringTriple::new(terms[0], terms[1], terms[2]))
            .unwrap()
    }

    fn delta(d: &Arc<DictionaryManager>, terms: [&str; 3], add: bool) -> TripleDelta {
        TripleDelta::new(ids(d, terms), add, Arc::clone(d))
    }

    fn render(it: impl Iterator<Item = TripleDelta>) -> Vec<String> {
        it.map(|d| d.to_string()).collect()
    }

    #[test]
    fn merge_diff_cancels_opposites() {
        let d = dict();
        let cmp = TripleComparator::new(TripleOrder::Spo);
        let first: DeltaIter = Box::new(
            vec![
                delta(&d, ["<a>", "<p>", "<o>"], true),
                delta(&d, ["<b>", "<p>", "<o>"], false),
            ]
            .into_iter(),
        );
        let second: DeltaIter = Box::new(
            vec![
                delta(&d, ["<a>", "<p>", "<o>"], false),
                delta(&d, ["<c>", "<p>", "<o>"], true),
            ]
            .into_iter(),
        );
        let merged = render(MergeDiffIterator::new(first, second, cmp));
        assert_eq!(merged, vec!["- <b> <p> <o>.", "+ <c> <p> <o>."]);
    }

    #[test]
    fn case2_inverts_first() {
        let d = dict();
        let cmp = TripleComparator::new(TripleOrder::Spo);
        let first: DeltaIter = Box::new(vec![delta(&d, ["<a>", "<p>", "<o>"], true)].into_iter());
        let second: DeltaIter = Box::new(std::iter::empty());
        let merged = render(MergeDiffIterator::case2(first, second, cmp));
        assert_eq!(merged, vec!["- <a> <p> <o>."]);
    }

    #[test]
    fn sorted_and_plain_diff_across_dictionaries() {
        let left = dict();
        let right = dict();
        // insertion order differs from string order
        let l: Vec<Triple> = [["<c>", "<p>", "<o>"], ["<a>", "<p>", "<o>"]]
            .iter()
            .map(|t| ids(&left, *t))
            .collect();
        let r: Vec<Triple> = [["<b>", "<p>", "<o>"], ["<c>", "<p>", "<o>"]]
            .iter()
            .map(|t| ids(&right, *t))
            .collect();
        let cmp = TripleComparator::new(TripleOrder::Spo);
        let sort = |v: Vec<Triple>, d: &Arc<DictionaryManager>| -> Vec<Triple> {
            SortedTripleDeltaIterator::new(
                v.into_iter().map(|t| TripleDelta::new(t, true, Arc::clone(d))),
                cmp,
            )
            .map(|x| x.triple)
            .collect()
        };
        let l = sort(l, &left);
        let r = sort(r, &right);
        let diff = render(PlainDiffDeltaIterator::new(
            l.into_iter(),
            Arc::clone(&left),
            r.into_iter(),
            Arc::clone(&right),
            cmp,
        ));
        assert_eq!(diff, vec!["- <a> <p> <o>.", "+ <b> <p> <o>."]);
    }

    #[test]
    fn forward_and_forward_diff() {
        let d = dict();
        let tree = PatchTree::in_memory(0, 200);
        let t1 = ids(&d, ["<x>", "<p>", "<o>"]);
        let t2 = ids(&d, ["<y>", "<p>", "<o>"]);
        let one: PatchSorted = [PatchElement::addition(t1)].into_iter().collect();
        tree.append_patch(&one, 1, Uniqueness::Check).unwrap();
        let two: PatchSorted = [PatchElement::addition(t1), PatchElement::addition(t2)]
            .into_iter()
            .collect();
        tree.append_patch(&two, 2, Uniqueness::Check).unwrap();

        let fwd = render(forward_delta(&tree, &Triple::any(), 2, Arc::clone(&d)));
        assert_eq!(fwd, vec!["+ <x> <p> <o>.", "+ <y> <p> <o>."]);
        let diff = render(forward_diff_delta(&tree, &Triple::any(), 1, 2, Arc::clone(&d)));
        assert_eq!(diff, vec!["+ <y> <p> <o>."]);
        let from_snapshot = render(forward_diff_delta(&tree, &Triple::any(), 0, 1, d));
        assert_eq!(from_snapshot, vec!["+ <x> <p> <o>."]);
    }

    #[test]
    fn order_of_string_patterns() {
        assert_eq!(pattern_order(&StringTriple::any()), TripleOrder::Spo);
        assert_eq!(
            pattern_order(&StringTriple::new("", "<p>", "")),
            TripleOrder::Pso
        );
        assert_eq!(
            pattern_order(&StringTriple::new("<s>", "?x", "<o>")),
            TripleOrder::Sop
        );
    }
}
