//! The five component orderings used to index triples.
//!
//! A triple pattern uses `0` for unbound components. [`TripleOrder::for_pattern`]
//! picks the ordering in which the bound components form a key prefix, so
//! every match of the pattern lies in one contiguous run of the index.

use std::cmp::Ordering;

/// Component ordering of an index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TripleOrder {
    Spo,
    Sop,
    Pso,
    Pos,
    Osp,
}

impl TripleOrder {
    /// All orderings, SPO first.
    pub const ALL: [TripleOrder; 5] = [
        TripleOrder::Spo,
        TripleOrder::Sop,
        TripleOrder::Pso,
        TripleOrder::Pos,
        TripleOrder::Osp,
    ];

    /// Positions of (s, p, o) inside a permuted key.
    fn slots(self) -> [usize; 3] {
        // slots()[i] = index of the i-th key component in (s, p, o)
        match self {
            TripleOrder::Spo => [0, 1, 2],
            TripleOrder::Sop => [0, 2, 1],
            TripleOrder::Pso => [1, 0, 2],
            TripleOrder::Pos => [1, 2, 0],
            TripleOrder::Osp => [2, 0, 1],
        }
    }

    /// Reorder an `(s, p, o)` triple into this ordering's key.
    pub fn permute(self, spo: [u64; 3]) -> [u64; 3] {
        let sl = self.slots();
        [spo[sl[0]], spo[sl[1]], spo[sl[2]]]
    }

    /// Inverse of [`TripleOrder::permute`].
    pub fn unpermute(self, key: [u64; 3]) -> [u64; 3] {
        let sl = self.slots();
        let mut spo = [0u64; 3];
        for (i, slot) in sl.iter().enumerate() {
            spo[*slot] = key[i];
        }
        spo
    }

    /// Ordering whose key prefix covers the bound components of `pattern`.
    pub fn for_pattern(pattern: [u64; 3]) -> TripleOrder {
        let [s, p, o] = pattern.map(|c| c != 0);
        match (s, p, o) {
            (true, false, true) => TripleOrder::Sop,
            (false, true, false) => TripleOrder::Pso,
            (false, true, true) => TripleOrder::Pos,
            (false, false, true) => TripleOrder::Osp,
            _ => TripleOrder::Spo,
        }
    }

    /// Number of leading bound components of `pattern` in this ordering.
    pub fn prefix_len(self, pattern: [u64; 3]) -> usize {
        self.permute(pattern).iter().take_while(|c| **c != 0).count()
    }

    /// True when every bound component of `pattern` sits in the key prefix.
    pub fn covers(self, pattern: [u64; 3]) -> bool {
        let bound = pattern.iter().filter(|c| **c != 0).count();
        self.prefix_len(pattern) == bound
    }

    /// Compare two `(s, p, o)` triples under this ordering.
    pub fn compare(self, a: [u64; 3], b: [u64; 3]) -> Ordering {
        self.permute(a).cmp(&self.permute(b))
    }

    /// Short lowercase name, used in file names.
    pub fn name(self) -> &'static str {
        match self {
            TripleOrder::Spo => "spo",
            TripleOrder::Sop => "sop",
            TripleOrder::Pso => "pso",
            TripleOrder::Pos => "pos",
            TripleOrder::Osp => "osp",
        }
    }

    pub(crate) fn index(self) -> usize {
        self as usize
    }
}

/// True when `triple` matches `pattern` (0 = wildcard).
pub fn matches(pattern: [u64; 3], triple: [u64; 3]) -> bool {
    pattern
        .iter()
        .zip(triple.iter())
        .all(|(p, t)| *p == 0 || p == t)
}
