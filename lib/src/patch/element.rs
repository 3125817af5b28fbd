use std::cmp::Ordering;
use std::collections::HashMap;
use std::fmt;

use crate::dictionary::DictionaryManager;
use crate::patch::positions::{AppendContext, PatchPositions};
use crate::triple::{Triple, TripleOrder};

/// One change of a patch: a triple that is added or deleted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PatchElement {
    pub triple: Triple,
    pub addition: bool,
    /// The change brings the triple back to its snapshot state.
    pub local_change: bool,
}

impl PatchElement {
    pub fn new(triple: Triple, addition: bool) -> Self {
        PatchElement {
            triple,
            addition,
            local_change: false,
        }
    }

    pub fn addition(triple: Triple) -> Self {
        PatchElement::new(triple, true)
    }

    pub fn deletion(triple: Triple) -> Self {
        PatchElement::new(triple, false)
    }

    pub fn with_local_change(mut self, local_change: bool) -> Self {
        self.local_change = local_change;
        self
    }

    pub fn to_string_with(&self, dict: &DictionaryManager) -> String {
        let sign = if self.addition { '+' } else { '-' };
        let mut out = format!("{sign} {}", self.triple.to_string_with(dict));
        if self.local_change {
            out.push_str(" L");
        }
        out
    }
}

impl fmt::Display for PatchElement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.addition { '+' } else { '-' };
        write!(f, "{sign} {}", self.triple)?;
        if self.local_change {
            write!(f, " L")?;
        }
        Ok(())
    }
}

/// Elements compare by SPO key, deletions before additions of the same triple.
fn compare_elements(a: &PatchElement, b: &PatchElement) -> Ordering {
    TripleOrder::Spo
        .compare(a.triple.as_array(), b.triple.as_array())
        .then(a.addition.cmp(&b.addition))
}

/// An unsorted patch. Adding a triple twice keeps the last element.
#[derive(Debug, Clone, Default)]
pub struct Patch {
    elements: Vec<PatchElement>,
    index: HashMap<Triple, usize>,
}

impl Patch {
    pub fn new() -> Self {
        Patch::default()
    }

    pub fn add(&mut self, element: PatchElement) {
        match self.index.get(&element.triple) {
            Some(&i) => self.elements[i] = element,
            None => {
                self.index.insert(element.triple, self.elements.len());
                self.elements.push(element);
            }
        }
    }

    pub fn add_all(&mut self, other: &Patch) {
        for e in other.iter() {
            self.add(*e);
        }
    }

    pub fn len(&self) -> usize {
        self.elements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &PatchElement> {
        self.elements.iter()
    }

    pub fn into_sorted(self) -> PatchSorted {
        let mut elements = self.elements;
        elements.sort_by(compare_elements);
        PatchSorted { elements }
    }
}

/// A patch kept in SPO order, the input shape of a patch tree append.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PatchSorted {
    elements: Vec<PatchElement>,
}

impl PatchSorted {
    pub fn new() -> Self {
        PatchSorted::default()
    }

    /// Insert in order. Re-adding a triple replaces the previous element;
    /// when the polarity flips, the local-change flag of the previous
    /// element is inverted.
    pub fn add(&mut self, element: PatchElement) {
        let pos = self.elements.partition_point(|e| {
            TripleOrder::Spo.compare(e.triple.as_array(), element.triple.as_array())
                == Ordering::Less
        });
        match self.elements.get_mut(pos) {
            Some(existing) if existing.triple == element.triple => {
                let flipped = existing.addition != element.addition;
                let was_local = existing.local_change;
                *existing = element;
                if flipped {
                    existing.local_change = !was_local;
                }
            }
            _ => self.elements.insert(pos, element),
        }
    }

    /// Append without keeping order; call [`PatchSorted::sort`] afterwards.
    pub fn add_unsorted(&mut self, element: PatchElement) {
        self.elements.push(element);
    }

    pub fn sort(&mut self) {
        self.elements.sort_by(compare_elements);
    }

    pub fn len(&self) -> usize {
        self.elements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    pub fn get(&self, i: usize) -> Option<&PatchElement> {
        self.elements.get(i)
    }

    pub fn elements(&self) -> &[PatchElement] {
        &self.elements
    }

    pub fn iter(&self) -> impl Iterator<Item = &PatchElement> {
        self.elements.iter()
    }

    /// Relative positions of `element` among the non-local deletions of this patch.
    pub fn positions(&self, element: &PatchElement) -> PatchPositions {
        let mut ctx = AppendContext::default();
        for e in &self.elements {
            if e.addition || e.local_change {
                continue;
            }
            if e.triple == element.triple {
                return ctx.positions(&e.triple);
            }
            ctx.record_deletion(&e.triple);
        }
        PatchPositions::none()
    }

    pub fn to_string_with(&self, dict: &DictionaryManager) -> String {
        self.elements
            .iter()
            .map(|e| e.to_string_with(dict) + "\n")
            .collect()
    }
}

impl fmt::Display for PatchSorted {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for e in &self.elements {
            writeln!(f, "{e}")?;
        }
        Ok(())
    }
}

impl FromIterator<PatchElement> for PatchSorted {
    fn from_iter<I: IntoIterator<Item = PatchElement>>(iter: I) -> Self {
        let mut patch = PatchSorted::new();
        for e in iter {
            patch.add(e);
        }
        patch
    }
}

impl<'a> IntoIterator for &'a PatchSorted {
    type Item = &'a PatchElement;
    type IntoIter = std::slice::Iter<'a, PatchElement>;

    fn into_iter(self) -> Self::IntoIter {
        self.elements.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t(s: u64, p: u64, o: u64) -> Triple {
        Triple::new(s, p, o)
    }

    #[test]
    fn sorted_insert_and_flip() {
        let mut patch = PatchSorted::new();
        patch.add(PatchElement::addition(t(3, 1, 1)));
        patch.add(PatchElement::deletion(t(1, 2, 3)));
        patch.add(PatchElement::addition(t(2, 1, 1)));
        let order: Vec<_> = patch.iter().map(|e| e.triple.subject).collect();
        assert_eq!(order, vec![1, 2, 3]);

        patch.add(PatchElement::addition(t(1, 2, 3)));
        assert_eq!(patch.len(), 3);
        let e = patch.get(0).unwrap();
        assert!(e.addition);
        assert!(e.local_change);
    }

    #[test]
    fn unsorted_patch_overwrites() {
        let mut patch = Patch::new();
        patch.add(PatchElement::addition(t(2, 2, 2)));
        patch.add(PatchElement::addition(t(1, 1, 1)));
        patch.add(PatchElement::deletion(t(2, 2, 2)));
        assert_eq!(patch.len(), 2);
        let sorted = patch.into_sorted();
        assert_eq!(sorted.get(0).unwrap().triple, t(1, 1, 1));
        assert!(!sorted.get(1).unwrap().addition);
    }

    #[test]
    fn positions_within_patch() {
        let patch: PatchSorted = [
            PatchElement::deletion(t(1, 1, 1)),
            PatchElement::deletion(t(1, 1, 2)),
            PatchElement::deletion(t(1, 2, 2)),
            PatchElement::addition(t(1, 1, 3)),
            PatchElement::deletion(t(2, 1, 2)),
        ]
        .into_iter()
        .collect();
        let pos = patch.positions(&PatchElement::deletion(t(2, 1, 2)));
        assert_eq!(pos.all, 3);
        assert_eq!(pos.s, 0);
        assert_eq!(pos.p, 2);
        assert_eq!(pos.o, 2);
        assert_eq!(pos.po, 1);
        let pos = patch.positions(&PatchElement::deletion(t(1, 2, 2)));
        assert_eq!(pos.s, 2);
        assert_eq!(pos.sp, 0);
        assert_eq!(pos.so, 1);
    }
}
