//! Snapshots: immutable triple sets written at chosen patch ids, each with
//! its own term dictionary.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use regex::Regex;
use serde::{Deserialize, Serialize};
use snapfile::{SnapshotFile, SnapshotWriter, TripleIter, WriterOptions};

use crate::cache::{Resident, ResidentCache};
use crate::dictionary::DictionaryManager;
use crate::errors::{Error, Result};
use crate::patch::PatchId;
use crate::triple::{StringTriple, Triple};

/// Metadata stored next to every snapshot file.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SnapshotMeta {
    pub id: PatchId,
    pub base_uri: String,
    /// The snapshot whose patch chain produced this one; `None` for a root.
    pub derived_from: Option<PatchId>,
    pub created: DateTime<Utc>,
    pub n_triples: u64,
}

pub fn snapshot_path(root: &Path, id: PatchId) -> PathBuf {
    root.join(format!("snapshot_{id}.snap"))
}

pub fn dictionary_path(root: &Path, id: PatchId) -> PathBuf {
    root.join(format!("snapshot_{id}.dict.json"))
}

pub fn snapshot_meta_path(root: &Path, id: PatchId) -> PathBuf {
    root.join(format!("snapshot_{id}.meta.json"))
}

/// A loaded snapshot.
#[derive(Debug)]
pub struct Snapshot {
    meta: SnapshotMeta,
    file: Arc<SnapshotFile>,
    dict: Arc<DictionaryManager>,
}

impl Snapshot {
    pub fn id(&self) -> PatchId {
        self.meta.id
    }

    pub fn meta(&self) -> &SnapshotMeta {
        &self.meta
    }

    pub fn file(&self) -> &Arc<SnapshotFile> {
        &self.file
    }

    pub fn dictionary(&self) -> &Arc<DictionaryManager> {
        &self.dict
    }

    pub fn len(&self) -> usize {
        self.file.len()
    }

    pub fn is_empty(&self) -> bool {
        self.file.is_empty()
    }

    /// Triples matching `pattern`, in the pattern's ordering.
    pub fn search(&self, pattern: &Triple) -> TripleIter {
        self.file.search(pattern.as_array())
    }

    /// Like [`Snapshot::search`], positioned at the `offset`-th match. The
    /// flag is `false` when the offset lies past the last match.
    pub fn search_with_offset(&self, pattern: &Triple, offset: usize) -> (TripleIter, bool) {
        let mut it = self.search(pattern);
        let more = it.goto(offset);
        (it, more)
    }

    pub fn exact_count(&self, pattern: &Triple) -> usize {
        self.file.exact_count(pattern.as_array())
    }

    pub fn estimated_count(&self, pattern: &Triple) -> usize {
        self.file.estimated_count(pattern.as_array())
    }

    /// True when the snapshot holds `triple` (which must be fully bound).
    pub fn contains(&self, triple: &Triple) -> bool {
        self.file.contains(triple.as_array())
    }
}

impl Resident for Snapshot {
    /// Also shared while a caller still holds its dictionary.
    fn is_shared(this: &Arc<Self>) -> bool {
        Arc::strong_count(this) > 1 || Arc::strong_count(&this.dict) > 1
    }

    fn unload(&self) -> Result<()> {
        self.dict.save()
    }
}

#[derive(Debug)]
pub struct SnapshotManager {
    root: PathBuf,
    read_only: bool,
    writer_options: WriterOptions,
    cache: Mutex<ResidentCache<Snapshot>>,
}

impl SnapshotManager {
    pub fn new(root: &Path, read_only: bool, max_resident: usize, zstd: bool) -> Result<Self> {
        if max_resident == 0 {
            return Err(Error::Invalid("at least 1 resident snapshot is required".into()));
        }
        let manager = SnapshotManager {
            root: root.to_path_buf(),
            read_only,
            writer_options: WriterOptions {
                zstd,
                with_crc: true,
            },
            cache: Mutex::new(ResidentCache::new(max_resident, "snapshot")),
        };
        let found = manager.detect_snapshots()?;
        {
            let mut cache = manager.lock()?;
            for id in found {
                cache.register(id);
            }
        }
        Ok(manager)
    }

    fn lock(&self) -> Result<MutexGuard<'_, ResidentCache<Snapshot>>> {
        self.cache
            .lock()
            .map_err(|_| Error::Corrupt("snapshot cache lock poisoned".into()))
    }

    /// Snapshot ids present on disk.
    pub fn detect_snapshots(&self) -> Result<Vec<PatchId>> {
        if !self.root.exists() {
            return Ok(Vec::new());
        }
        let re = Regex::new(r"^snapshot_(\d+)\.snap$").map_err(|e| Error::Invalid(e.to_string()))?;
        let mut ids = Vec::new();
        for entry in std::fs::read_dir(&self.root)? {
            let name = entry?.file_name();
            if let Some(id) = name
                .to_str()
                .and_then(|n| re.captures(n))
                .and_then(|c| c.get(1))
                .and_then(|m| m.as_str().parse::<PatchId>().ok())
            {
                ids.push(id);
            }
        }
        ids.sort_unstable();
        debug!("detected snapshots {ids:?}");
        Ok(ids)
    }

    /// Known snapshot ids, ascending.
    pub fn get_snapshots_ids(&self) -> Result<Vec<PatchId>> {
        Ok(self.lock()?.ids())
    }

    /// Id of the snapshot underlying `patch_id`: the greatest id `<= patch_id`.
    pub fn get_latest_snapshot(&self, patch_id: PatchId) -> Result<Option<PatchId>> {
        Ok(self.lock()?.latest(patch_id))
    }

    /// Write snapshot `id` from `triples` and load it.
    pub fn create_snapshot<I>(
        &self,
        id: PatchId,
        triples: I,
        base_uri: &str,
        derived_from: Option<PatchId>,
    ) -> Result<Arc<Snapshot>>
    where
        I: IntoIterator<Item = StringTriple>,
    {
        if self.read_only {
            return Err(Error::ReadOnly);
        }
        if self.lock()?.contains(id) {
            return Err(Error::Invalid(format!("snapshot {id} already exists")));
        }
        std::fs::create_dir_all(&self.root)?;
        let mut writer = SnapshotWriter::new(snapshot_path(&self.root, id), self.writer_options);
        for t in triples {
            if t.is_pattern() {
                return Err(Error::Invalid(format!("snapshot triple {t} is not concrete")));
            }
            writer.add(&t.subject, &t.predicate, &t.object)?;
        }
        writer.finalize()?;

        let file = SnapshotFile::open(&snapshot_path(&self.root, id))?;
        let meta = SnapshotMeta {
            id,
            base_uri: base_uri.to_string(),
            derived_from,
            created: Utc::now(),
            n_triples: file.len() as u64,
        };
        let meta_path = snapshot_meta_path(&self.root, id);
        std::fs::write(&meta_path, serde_json::to_vec_pretty(&meta)?)?;
        info!("created snapshot {id} with {} triples", meta.n_triples);

        let snapshot = Arc::new(self.assemble(id, Arc::new(file), meta)?);
        self.lock()?.insert(id, Arc::clone(&snapshot))?;
        Ok(snapshot)
    }

    fn assemble(&self, id: PatchId, file: Arc<SnapshotFile>, meta: SnapshotMeta) -> Result<Snapshot> {
        let dict = DictionaryManager::open(
            Arc::clone(&file),
            Some(dictionary_path(&self.root, id)),
            self.read_only,
        )?;
        Ok(Snapshot {
            meta,
            file,
            dict: Arc::new(dict),
        })
    }

    /// Read snapshot `id` from disk, bypassing the cache.
    pub fn load_snapshot(&self, id: PatchId) -> Result<Snapshot> {
        let path = snapshot_path(&self.root, id);
        let file = Arc::new(SnapshotFile::open(&path)?);
        let meta_path = snapshot_meta_path(&self.root, id);
        let meta = if meta_path.exists() {
            let meta: SnapshotMeta = serde_json::from_slice(&std::fs::read(&meta_path)?)?;
            if meta.id != id {
                return Err(Error::Corrupt(format!(
                    "{} describes snapshot {}",
                    meta_path.display(),
                    meta.id
                )));
            }
            meta
        } else {
            warn!("snapshot {id} has no metadata, treating it as a root snapshot");
            SnapshotMeta {
                id,
                base_uri: String::new(),
                derived_from: None,
                created: DateTime::from_timestamp(file.created_unix() as i64, 0)
                    .unwrap_or_else(Utc::now),
                n_triples: file.len() as u64,
            }
        };
        debug!("loaded snapshot {id} from {}", path.display());
        self.assemble(id, file, meta)
    }

    /// Snapshot `id`, loading it if needed. `None` when it does not exist.
    pub fn get_snapshot(&self, id: PatchId) -> Result<Option<Arc<Snapshot>>> {
        self.lock()?
            .get_or_load(id, || self.load_snapshot(id).map(Some))
    }

    /// Dictionary of snapshot `id`.
    pub fn get_dictionary(&self, id: PatchId) -> Result<Option<Arc<DictionaryManager>>> {
        Ok(self
            .get_snapshot(id)?
            .map(|s| Arc::clone(s.dictionary())))
    }

    /// Number of resident snapshots.
    pub fn resident(&self) -> Result<usize> {
        Ok(self.lock()?.resident())
    }

    /// Persist the patch terms of every resident dictionary.
    pub fn flush(&self) -> Result<()> {
        let cache = self.lock()?;
        for snapshot in cache.values() {
            snapshot.dict.save()?;
        }
        Ok(())
    }
}
