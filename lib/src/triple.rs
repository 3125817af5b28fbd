//! Triples of term ids, string triples, and the orderings used to compare them.

use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::dictionary::DictionaryManager;
pub use snapfile::TripleOrder;

/// A term id. `0` is the wildcard of a pattern.
pub type TermId = u64;

/// An ordered (subject, predicate, object) triple of term ids.
///
/// Used both for concrete triples and for patterns, where a `0` component
/// is unbound.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Triple {
    pub subject: TermId,
    pub predicate: TermId,
    pub object: TermId,
}

impl Triple {
    pub fn new(subject: TermId, predicate: TermId, object: TermId) -> Self {
        Triple {
            subject,
            predicate,
            object,
        }
    }

    /// The all-wildcard pattern.
    pub fn any() -> Self {
        Triple::default()
    }

    pub fn as_array(&self) -> [TermId; 3] {
        [self.subject, self.predicate, self.object]
    }

    pub fn from_array(a: [TermId; 3]) -> Self {
        Triple::new(a[0], a[1], a[2])
    }

    /// The key of this triple in the index of `order`.
    pub fn key(&self, order: TripleOrder) -> [TermId; 3] {
        order.permute(self.as_array())
    }

    pub fn from_key(order: TripleOrder, key: [TermId; 3]) -> Self {
        Triple::from_array(order.unpermute(key))
    }

    /// True when this triple matches `pattern` (0 components of the pattern match anything).
    pub fn matches(&self, pattern: &Triple) -> bool {
        snapfile::matches(pattern.as_array(), self.as_array())
    }

    /// Ordering in which the bound components of this pattern form a prefix.
    pub fn order(&self) -> TripleOrder {
        TripleOrder::for_pattern(self.as_array())
    }

    pub fn is_fully_bound(&self) -> bool {
        self.subject != 0 && self.predicate != 0 && self.object != 0
    }

    /// Render with the given dictionary, `?` for unknown ids.
    pub fn to_string_with(&self, dict: &DictionaryManager) -> String {
        let t = |id| {
            dict.id_to_string(id)
                .unwrap_or_else(|| "?".to_string())
        };
        format!("{} {} {}.", t(self.subject), t(self.predicate), t(self.object))
    }
}

impl fmt::Display for Triple {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}.", self.subject, self.predicate, self.object)
    }
}

/// A triple of term strings. An empty string (or a `?name` variable) is unbound.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StringTriple {
    pub subject: String,
    pub predicate: String,
    pub object: String,
}

impl StringTriple {
    pub fn new(
        subject: impl Into<String>,
        predicate: impl Into<String>,
        object: impl Into<String>,
    ) -> Self {
        StringTriple {
            subject: subject.into(),
            predicate: predicate.into(),
            object: object.into(),
        }
    }

    /// The all-variable pattern.
    pub fn any() -> Self {
        StringTriple::default()
    }

    pub fn components(&self) -> [&str; 3] {
        [&self.subject, &self.predicate, &self.object]
    }

    pub fn is_pattern(&self) -> bool {
        self.components().iter().any(|c| is_variable(c))
    }
}

impl fmt::Display for StringTriple {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}.", self.subject, self.predicate, self.object)
    }
}

/// True for pattern variables: the empty string or a `?name`.
pub fn is_variable(term: &str) -> bool {
    term.is_empty() || term.starts_with('?')
}

/// Compares triples that may come from different dictionaries.
///
/// Components are compared by id when both ids are snapshot ids of the same
/// dictionary (whose ids follow string order), and by their strings otherwise.
#[derive(Debug, Clone, Copy)]
pub struct TripleComparator {
    order: TripleOrder,
}

impl TripleComparator {
    pub fn new(order: TripleOrder) -> Self {
        TripleComparator { order }
    }

    pub fn order(&self) -> TripleOrder {
        self.order
    }

    pub fn compare(
        &self,
        a: &Triple,
        da: &DictionaryManager,
        b: &Triple,
        db: &DictionaryManager,
    ) -> Ordering {
        let ka = a.key(self.order);
        let kb = b.key(self.order);
        for i in 0..3 {
            let c = da.compare_component(ka[i], db, kb[i]);
            if c != Ordering::Equal {
                return c;
            }
        }
        Ordering::Equal
    }
}
