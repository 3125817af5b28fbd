//! Routing of patch ids to patch trees, with a bounded set of resident trees.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use log::{debug, info};
use regex::Regex;

use crate::cache::{Resident, ResidentCache};
use crate::errors::{Error, Result};
use crate::options::{LocalChanges, Uniqueness};
use crate::patch::element::PatchSorted;
use crate::patch::tree::{PatchStream, PatchTree};
use crate::patch::value::PatchId;

impl Resident for PatchTree {
    fn unload(&self) -> Result<()> {
        self.flush()
    }
}

#[derive(Debug)]
pub struct PatchTreeManager {
    root: Option<PathBuf>,
    read_only: bool,
    min_addition_count: u64,
    cache: Mutex<ResidentCache<PatchTree>>,
}

impl PatchTreeManager {
    /// Manage the trees stored under `root`, discovering existing ones.
    pub fn new(
        root: &Path,
        read_only: bool,
        max_resident: usize,
        min_addition_count: u64,
    ) -> Result<Self> {
        if max_resident < 2 {
            return Err(Error::Invalid(format!(
                "at least 2 resident patch trees are required, got {max_resident}"
            )));
        }
        let manager = PatchTreeManager {
            root: Some(root.to_path_buf()),
            read_only,
            min_addition_count,
            cache: Mutex::new(ResidentCache::new(max_resident, "patch tree")),
        };
        let found = manager.detect_patch_trees()?;
        {
            let mut cache = manager.lock()?;
            for id in found {
                cache.register(id);
            }
        }
        Ok(manager)
    }

    /// A manager whose trees live only in memory.
    pub fn in_memory(min_addition_count: u64) -> Self {
        PatchTreeManager {
            root: None,
            read_only: false,
            min_addition_count,
            cache: Mutex::new(ResidentCache::new(usize::MAX, "patch tree")),
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, ResidentCache<PatchTree>>> {
        self.cache
            .lock()
            .map_err(|_| Error::Corrupt("patch tree cache lock poisoned".into()))
    }

    /// Ids of the trees stored on disk, from their metadata file names.
    pub fn detect_patch_trees(&self) -> Result<Vec<PatchId>> {
        let Some(root) = &self.root else {
            return Ok(Vec::new());
        };
        if !root.exists() {
            return Ok(Vec::new());
        }
        let re = Regex::new(r"^patchtree_(\d+)\.meta\.json$")
            .map_err(|e| Error::Invalid(e.to_string()))?;
        let mut ids = Vec::new();
        for entry in std::fs::read_dir(root)? {
            let name = entry?.file_name();
            let Some(name) = name.to_str() else {
                continue;
            };
            if let Some(id) = re
                .captures(name)
                .and_then(|c| c.get(1))
                .and_then(|m| m.as_str().parse::<PatchId>().ok())
            {
                ids.push(id);
            }
        }
        ids.sort_unstable();
        debug!("detected patch trees {ids:?}");
        Ok(ids)
    }

    /// Known tree ids, ascending.
    pub fn tree_ids(&self) -> Result<Vec<PatchId>> {
        Ok(self.lock()?.ids())
    }

    /// Id of the tree holding `patch_id`: the greatest tree id `<= patch_id`.
    pub fn get_patch_tree_id(&self, patch_id: PatchId) -> Result<Option<PatchId>> {
        Ok(self.lock()?.latest(patch_id))
    }

    /// Load (or return the resident) tree `id`. `None` if no such tree exists.
    pub fn get_patch_tree(&self, id: PatchId) -> Result<Option<Arc<PatchTree>>> {
        self.lock()?.get_or_load(id, || match &self.root {
            Some(root) => PatchTree::open(root, id, self.read_only, self.min_addition_count).map(Some),
            None => Ok(None),
        })
    }

    /// Tree holding `patch_id`, if any.
    pub fn get_patch_tree_for(&self, patch_id: PatchId) -> Result<Option<Arc<PatchTree>>> {
        match self.get_patch_tree_id(patch_id)? {
            Some(id) => self.get_patch_tree(id),
            None => Ok(None),
        }
    }

    /// Create the tree anchored at `id`, which must lie past every known tree.
    pub fn construct_next_patch_tree(&self, id: PatchId) -> Result<Arc<PatchTree>> {
        if self.read_only {
            return Err(Error::ReadOnly);
        }
        let mut cache = self.lock()?;
        if let Some(last) = cache.last_id() {
            if last >= id {
                return Err(Error::Invalid(format!(
                    "patch tree {id} does not follow tree {last}"
                )));
            }
        }
        let tree = Arc::new(match &self.root {
            Some(root) => {
                let tree = PatchTree::open(root, id, false, self.min_addition_count)?;
                tree.flush()?;
                tree
            }
            None => PatchTree::in_memory(id, self.min_addition_count),
        });
        cache.insert(id, Arc::clone(&tree))?;
        info!("constructed patch tree {id}");
        Ok(tree)
    }

    /// Append a patch to the tree that holds `patch_id`.
    pub fn append(&self, stream: &mut dyn PatchStream, patch_id: PatchId, uniqueness: Uniqueness) -> Result<bool> {
        let tree = self.get_patch_tree_for(patch_id)?.ok_or_else(|| {
            Error::Invalid(format!("no patch tree holds patch {patch_id}"))
        })?;
        if uniqueness.is_checked() {
            tree.append(stream, patch_id)
        } else {
            tree.append_unsafe(stream, patch_id)?;
            Ok(true)
        }
    }

    pub fn append_patch(&self, patch: &PatchSorted, patch_id: PatchId, uniqueness: Uniqueness) -> Result<bool> {
        let tree = self.get_patch_tree_for(patch_id)?.ok_or_else(|| {
            Error::Invalid(format!("no patch tree holds patch {patch_id}"))
        })?;
        tree.append_patch(patch, patch_id, uniqueness)
    }

    /// The cumulative changeset of `patch_id` relative to its snapshot.
    pub fn get_patch(&self, patch_id: PatchId, local_changes: LocalChanges) -> Result<PatchSorted> {
        Ok(match self.get_patch_tree_for(patch_id)? {
            Some(tree) => tree.reconstruct_patch(patch_id, local_changes),
            None => PatchSorted::new(),
        })
    }

    /// Highest patch id of any tree, `None` when no patch was appended.
    pub fn get_max_patch_id(&self) -> Result<Option<PatchId>> {
        let ids = self.tree_ids()?;
        for id in ids.into_iter().rev() {
            if let Some(tree) = self.get_patch_tree(id)? {
                if let Some(max) = tree.max_patch_id() {
                    return Ok(Some(max));
                }
            }
        }
        Ok(None)
    }

    /// Number of resident trees.
    pub fn resident(&self) -> Result<usize> {
        Ok(self.lock()?.resident())
    }

    pub fn flush(&self) -> Result<()> {
        let cache = self.lock()?;
        for tree in cache.values() {
            tree.flush()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::patch::element::PatchElement;
    use crate::triple::Triple;

    fn one(s: u64, addition: bool) -> PatchSorted {
        [PatchElement::new(Triple::new(s, 1, 1), addition)]
            .into_iter()
            .collect()
    }

    #[test]
    fn routes_patch_ids() {
        let m = PatchTreeManager::in_memory(200);
        assert_eq!(m.get_patch_tree_id(3).unwrap(), None);
        m.construct_next_patch_tree(0).unwrap();
        m.construct_next_patch_tree(5).unwrap();
        assert_eq!(m.get_patch_tree_id(0).unwrap(), Some(0));
        assert_eq!(m.get_patch_tree_id(4).unwrap(), Some(0));
        assert_eq!(m.get_patch_tree_id(5).unwrap(), Some(5));
        assert_eq!(m.get_patch_tree_id(99).unwrap(), Some(5));
        assert!(m.construct_next_patch_tree(3).is_err());
    }

    #[test]
    fn checked_append_and_get_patch() {
        let m = PatchTreeManager::in_memory(200);
        m.construct_next_patch_tree(0).unwrap();
        assert!(m.append_patch(&one(1, true), 1, Uniqueness::Check).unwrap());
        assert!(!m.append_patch(&one(1, true), 1, Uniqueness::Check).unwrap());
        assert!(m.append_patch(&one(2, false), 2, Uniqueness::Check).unwrap());
        let patch = m.get_patch(2, LocalChanges::Ignore).unwrap();
        assert_eq!(patch.len(), 2);
        assert_eq!(m.get_max_patch_id().unwrap(), Some(2));
        assert!(m.get_patch(7, LocalChanges::Ignore).unwrap().is_empty());
    }

    #[test]
    fn evicts_unreferenced_trees() {
        let dir = tempfile::tempdir().unwrap();
        let m = PatchTreeManager::new(dir.path(), false, 2, 200).unwrap();
        let first = m.construct_next_patch_tree(0).unwrap();
        drop(m.construct_next_patch_tree(1).unwrap());
        drop(m.construct_next_patch_tree(2).unwrap());
        // tree 0 is still held, so tree 1 goes
        assert_eq!(m.resident().unwrap(), 2);
        drop(first);
        assert!(m.get_patch_tree(1).unwrap().is_some());
        assert_eq!(m.resident().unwrap(), 2);

        let reopened = PatchTreeManager::new(dir.path(), true, 2, 200).unwrap();
        assert_eq!(reopened.tree_ids().unwrap(), vec![0, 1, 2]);
        assert_eq!(reopened.get_patch_tree_id(7).unwrap(), Some(2));
    }
}
