use std::collections::HashMap;

use crate::storage::{push_ivarint, read_ivarint};
use crate::triple::Triple;

/// Relative positions of a deletion among the non-local deletions of the
/// same patch, one counter per combination of bound components.
///
/// Each counter is the number of deletions that share the bound components
/// and precede this one in SPO order. `-1` marks entries that carry no
/// position (additions and local changes).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PatchPositions {
    /// `sp?`
    pub sp: i64,
    /// `s?o`
    pub so: i64,
    /// `s??`
    pub s: i64,
    /// `?po`
    pub po: i64,
    /// `?p?`
    pub p: i64,
    /// `??o`
    pub o: i64,
    /// `???`
    pub all: i64,
}

impl Default for PatchPositions {
    fn default() -> Self {
        PatchPositions::none()
    }
}

impl PatchPositions {
    pub fn none() -> Self {
        PatchPositions {
            sp: -1,
            so: -1,
            s: -1,
            po: -1,
            p: -1,
            o: -1,
            all: -1,
        }
    }

    pub fn is_none(&self) -> bool {
        self.all < 0
    }

    /// The counter matching the bound components of `pattern`; `0` when
    /// the pattern is fully bound.
    pub fn get_by_pattern(&self, pattern: &Triple) -> i64 {
        match (
            pattern.subject != 0,
            pattern.predicate != 0,
            pattern.object != 0,
        ) {
            (true, true, true) => 0,
            (true, true, false) => self.sp,
            (true, false, true) => self.so,
            (true, false, false) => self.s,
            (false, true, true) => self.po,
            (false, true, false) => self.p,
            (false, false, true) => self.o,
            (false, false, false) => self.all,
        }
    }

    pub(crate) fn encode(&self, out: &mut Vec<u8>) {
        for v in [self.sp, self.so, self.s, self.po, self.p, self.o, self.all] {
            push_ivarint(v, out);
        }
    }

    pub(crate) fn decode(buf: &[u8], mut off: usize) -> Option<(Self, usize)> {
        let mut v = [0i64; 7];
        for slot in v.iter_mut() {
            let (x, next) = read_ivarint(buf, off)?;
            *slot = x;
            off = next;
        }
        Some((
            PatchPositions {
                sp: v[0],
                so: v[1],
                s: v[2],
                po: v[3],
                p: v[4],
                o: v[5],
                all: v[6],
            },
            off,
        ))
    }
}

/// Counters scoped to one append: how many non-local deletions (or
/// additions) were seen so far per bound-component key.
#[derive(Debug, Default)]
pub struct AppendContext {
    sp: HashMap<(u64, u64), i64>,
    so: HashMap<(u64, u64), i64>,
    s: HashMap<u64, i64>,
    po: HashMap<(u64, u64), i64>,
    p: HashMap<u64, i64>,
    o: HashMap<u64, i64>,
    all: i64,
}

impl AppendContext {
    /// Positions the next deletion of `t` would get, without recording it.
    pub fn positions(&self, t: &Triple) -> PatchPositions {
        let (s, p, o) = (t.subject, t.predicate, t.object);
        PatchPositions {
            sp: self.sp.get(&(s, p)).copied().unwrap_or(0),
            so: self.so.get(&(s, o)).copied().unwrap_or(0),
            s: self.s.get(&s).copied().unwrap_or(0),
            po: self.po.get(&(p, o)).copied().unwrap_or(0),
            p: self.p.get(&p).copied().unwrap_or(0),
            o: self.o.get(&o).copied().unwrap_or(0),
            all: self.all,
        }
    }

    pub fn record_deletion(&mut self, t: &Triple) {
        let (s, p, o) = (t.subject, t.predicate, t.object);
        *self.sp.entry((s, p)).or_default() += 1;
        *self.so.entry((s, o)).or_default() += 1;
        *self.s.entry(s).or_default() += 1;
        *self.po.entry((p, o)).or_default() += 1;
        *self.p.entry(p).or_default() += 1;
        *self.o.entry(o).or_default() += 1;
        self.all += 1;
    }

    /// Record a deletion and return the positions it was assigned.
    pub fn next_deletion(&mut self, t: &Triple) -> PatchPositions {
        let positions = self.positions(t);
        self.record_deletion(t);
        positions
    }

    /// Totals per pattern, as `(pattern, count)` pairs. The `???` pattern
    /// is included when anything was recorded.
    pub fn counts(&self) -> Vec<(Triple, u64)> {
        let mut out = Vec::new();
        out.extend(self.sp.iter().map(|(&(s, p), &n)| (Triple::new(s, p, 0), n as u64)));
        out.extend(self.so.iter().map(|(&(s, o), &n)| (Triple::new(s, 0, o), n as u64)));
        out.extend(self.s.iter().map(|(&s, &n)| (Triple::new(s, 0, 0), n as u64)));
        out.extend(self.po.iter().map(|(&(p, o), &n)| (Triple::new(0, p, o), n as u64)));
        out.extend(self.p.iter().map(|(&p, &n)| (Triple::new(0, p, 0), n as u64)));
        out.extend(self.o.iter().map(|(&o, &n)| (Triple::new(0, 0, o), n as u64)));
        if self.all > 0 {
            out.push((Triple::any(), self.all as u64));
        }
        out
    }
}
