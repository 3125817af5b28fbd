//! Term dictionary of one snapshot and the patches stored against it.
//!
//! Snapshot terms keep the ids of the snapshot file (`1..=n`, sorted by
//! string). Terms that first appear in a patch get [`PATCH_BIT`]` | k`, with
//! `k` allocated in insertion order and persisted in a JSON sidecar.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};
use std::sync::{Arc, RwLock};

use log::{debug, error};
use serde::{Deserialize, Serialize};
use snapfile::SnapshotFile;

use crate::errors::{Error, Result};
use crate::triple::{is_variable, StringTriple, TermId, Triple};

/// High bit marking ids allocated for patch-only terms.
pub const PATCH_BIT: u64 = 1 << 63;

#[derive(Debug, Default, Serialize, Deserialize)]
struct PatchTerms {
    terms: Vec<String>,
    #[serde(skip)]
    index: HashMap<String, u64>,
}

impl PatchTerms {
    fn reindex(&mut self) {
        self.index = self
            .terms
            .iter()
            .enumerate()
            .map(|(k, t)| (t.clone(), PATCH_BIT | k as u64))
            .collect();
    }
}

#[derive(Debug)]
pub struct DictionaryManager {
    snapshot: Option<Arc<SnapshotFile>>,
    patch: RwLock<PatchTerms>,
    path: Option<PathBuf>,
    read_only: bool,
    dirty: AtomicBool,
}

impl DictionaryManager {
    /// Dictionary over `snapshot`, with patch terms loaded from `sidecar` when it exists.
    pub fn open(
        snapshot: Arc<SnapshotFile>,
        sidecar: Option<PathBuf>,
        read_only: bool,
    ) -> Result<Self> {
        let mut patch = match &sidecar {
            Some(p) if p.exists() => {
                let data = std::fs::read(p)?;
                serde_json::from_slice::<PatchTerms>(&data)?
            }
            _ => PatchTerms::default(),
        };
        patch.reindex();
        debug!(
            "dictionary: {} snapshot terms, {} patch terms",
            snapshot.n_terms(),
            patch.terms.len()
        );
        Ok(DictionaryManager {
            snapshot: Some(snapshot),
            patch: RwLock::new(patch),
            path: sidecar,
            read_only,
            dirty: AtomicBool::new(false),
        })
    }

    /// A dictionary without snapshot terms and without persistence.
    pub fn in_memory() -> Self {
        DictionaryManager {
            snapshot: None,
            patch: RwLock::new(PatchTerms::default()),
            path: None,
            read_only: false,
            dirty: AtomicBool::new(false),
        }
    }

    pub fn is_patch_id(id: TermId) -> bool {
        id & PATCH_BIT != 0
    }

    /// Look up a term. Variables map to `0`; unknown terms to `None`.
    pub fn string_to_id(&self, term: &str) -> Option<TermId> {
        if is_variable(term) {
            return Some(0);
        }
        if let Some(id) = self.snapshot.as_ref().and_then(|s| s.term_id(term)) {
            return Some(id);
        }
        self.patch.read().ok()?.index.get(term).copied()
    }

    pub fn id_to_string(&self, id: TermId) -> Option<String> {
        if id == 0 {
            return None;
        }
        if Self::is_patch_id(id) {
            let k = (id & !PATCH_BIT) as usize;
            return self.patch.read().ok()?.terms.get(k).cloned();
        }
        self.snapshot.as_ref()?.term(id).map(str::to_string)
    }

    /// Return the id of `term`, allocating a patch id if it is new.
    pub fn insert(&self, term: &str) -> Result<TermId> {
        if is_variable(term) {
            return Err(Error::Invalid(format!("cannot insert variable '{term}'")));
        }
        if let Some(id) = self.string_to_id(term) {
            return Ok(id);
        }
        if self.read_only {
            return Err(Error::ReadOnly);
        }
        let mut patch = self
            .patch
            .write()
            .map_err(|_| Error::Corrupt("dictionary lock poisoned".into()))?;
        // another writer may have inserted it meanwhile
        if let Some(id) = patch.index.get(term) {
            return Ok(*id);
        }
        let id = PATCH_BIT | patch.terms.len() as u64;
        patch.terms.push(term.to_string());
        patch.index.insert(term.to_string(), id);
        self.dirty.store(true, AtomicOrdering::Release);
        Ok(id)
    }

    /// Number of patch-only terms.
    pub fn patch_terms(&self) -> usize {
        self.patch.read().map(|p| p.terms.len()).unwrap_or(0)
    }

    pub fn snapshot_terms(&self) -> u64 {
        self.snapshot.as_ref().map(|s| s.n_terms()).unwrap_or(0)
    }

    /// Compare a component of this dictionary with one of `other`.
    pub fn compare_component(&self, a: TermId, other: &DictionaryManager, b: TermId) -> Ordering {
        let same = std::ptr::eq(self, other);
        if same && a == b {
            return Ordering::Equal;
        }
        if same && !Self::is_patch_id(a) && !Self::is_patch_id(b) {
            return a.cmp(&b);
        }
        if a == 0 || b == 0 {
            return a.cmp(&b);
        }
        self.id_to_string(a).cmp(&other.id_to_string(b))
    }

    /// Encode a pattern. `None` when a bound term is unknown, so nothing can match.
    pub fn encode_pattern(&self, pattern: &StringTriple) -> Option<Triple> {
        Some(Triple::new(
            self.string_to_id(&pattern.subject)?,
            self.string_to_id(&pattern.predicate)?,
            self.string_to_id(&pattern.object)?,
        ))
    }

    /// Encode a concrete triple, allocating ids for new terms.
    pub fn encode(&self, triple: &StringTriple) -> Result<Triple> {
        Ok(Triple::new(
            self.insert(&triple.subject)?,
            self.insert(&triple.predicate)?,
            self.insert(&triple.object)?,
        ))
    }

    pub fn decode(&self, triple: &Triple) -> StringTriple {
        let t = |id| self.id_to_string(id).unwrap_or_default();
        StringTriple::new(t(triple.subject), t(triple.predicate), t(triple.object))
    }

    pub fn sidecar(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Write pending patch terms to the sidecar.
    pub fn save(&self) -> Result<()> {
        if self.read_only || !self.dirty.load(AtomicOrdering::Acquire) {
            return Ok(());
        }
        let Some(path) = &self.path else {
            return Ok(());
        };
        let bytes = {
            let patch = self
                .patch
                .read()
                .map_err(|_| Error::Corrupt("dictionary lock poisoned".into()))?;
            serde_json::to_vec(&*patch)?
        };
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, bytes)?;
        std::fs::rename(&tmp, path)?;
        self.dirty.store(false, AtomicOrdering::Release);
        Ok(())
    }
}

impl Drop for DictionaryManager {
    fn drop(&mut self) {
        if let Err(err) = self.save() {
            error!("Failed to flush dictionary on drop: {err}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use snapfile::{write_file, SnapshotFile};

    fn snapshot(dir: &Path) -> Arc<SnapshotFile> {
        let path = dir.join("s.snap");
        let t = |s: &str, p: &str, o: &str| (s.to_string(), p.to_string(), o.to_string());
        write_file(&path, &[t("b", "p", "o"), t("a", "p", "o")]).unwrap();
        Arc::new(SnapshotFile::open(&path).unwrap())
    }

    #[test]
    fn snapshot_and_patch_ids() {
        let dir = tempfile::tempdir().unwrap();
        let dict = DictionaryManager::open(snapshot(dir.path()), None, false).unwrap();
        assert_eq!(dict.string_to_id("a"), Some(1));
        assert_eq!(dict.string_to_id(""), Some(0));
        assert_eq!(dict.string_to_id("c"), None);
        let c = dict.insert("c").unwrap();
        assert!(DictionaryManager::is_patch_id(c));
        assert_eq!(dict.insert("c").unwrap(), c);
        assert_eq!(dict.insert("a").unwrap(), 1);
        assert_eq!(dict.id_to_string(c).as_deref(), Some("c"));
        assert!(dict.insert("?x").is_err());
    }

    #[test]
    fn patch_terms_persist() {
        let dir = tempfile::tempdir().unwrap();
        let snap = snapshot(dir.path());
        let sidecar = dir.path().join("s.dict.json");
        let id = {
            let dict = DictionaryManager::open(Arc::clone(&snap), Some(sidecar.clone()), false)
                .unwrap();
            dict.insert("<http://ex/new>").unwrap()
        };
        let dict = DictionaryManager::open(snap, Some(sidecar), true).unwrap();
        assert_eq!(dict.string_to_id("<http://ex/new>"), Some(id));
        assert!(matches!(dict.insert("other"), Err(Error::ReadOnly)));
    }

    #[test]
    fn mixed_ids_compare_by_string() {
        let dir = tempfile::tempdir().unwrap();
        let dict = DictionaryManager::open(snapshot(dir.path()), None, false).unwrap();
        let a = dict.string_to_id("a").unwrap();
        let b = dict.string_to_id("b").unwrap();
        let aa = dict.insert("aa").unwrap();
        assert_eq!(dict.compare_component(a, &dict, b), Ordering::Less);
        assert_eq!(dict.compare_component(aa, &dict, b), Ordering::Less);
        assert_eq!(dict.compare_component(aa, &dict, a), Ordering::Greater);
    }
}
