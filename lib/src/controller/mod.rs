//! The store controller: routes versions to snapshots and patch trees,
//! appends patches and decides when a patch becomes a snapshot.

pub mod builder;
pub mod delta;
mod diff;
pub mod materialize;
pub mod metadata;
pub mod strategy;
pub mod versions;

use std::fs::File;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use fs2::FileExt;
use log::{debug, error, info};

use crate::config::StoreConfig;
use crate::dictionary::DictionaryManager;
use crate::errors::{Error, Result};
use crate::options::{LocalChanges, Uniqueness};
use crate::patch::{PatchId, PatchSorted, PatchSortedStream, PatchStream, PatchTree, PatchTreeManager};
use crate::snapshot::{Snapshot, SnapshotManager};
use crate::stats;
use crate::triple::{StringTriple, Triple};

use metadata::{
    MetadataManager, AGGREGATED_CHANGE_RATIO, CHANGE_RATIO, DELTA_SIZE, INGESTION_TIME,
    LOCALLY_AGGREGATED_CHANGE_RATIO,
};
use strategy::{CreationStrategyMetadata, SnapshotCreationStrategy};

pub use builder::{PatchBuilder, PatchBuilderStreaming};
pub use delta::{DeltaIter, TripleDelta};
pub use materialize::VersionIterator;
pub use versions::TripleVersions;

pub const LOCK_FILE: &str = "store.lock";

pub struct Controller {
    config: StoreConfig,
    snapshots: SnapshotManager,
    trees: PatchTreeManager,
    metadata: MetadataManager,
    strategy: Box<dyn SnapshotCreationStrategy>,
    writer: Mutex<()>,
    // held for the lifetime of a writable controller
    _lock: Option<File>,
}

impl std::fmt::Debug for Controller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Controller")
            .field("root", &self.config.root)
            .field("read_only", &self.config.read_only)
            .field("strategy", &self.strategy)
            .finish()
    }
}

impl Controller {
    /// Open the store described by `config`. Writable stores are created if
    /// missing and locked exclusively; read-only stores take no lock.
    pub fn open(config: StoreConfig) -> Result<Self> {
        let root = config.root.clone();
        let lock = if config.read_only {
            if !root.is_dir() {
                return Err(Error::Invalid(format!(
                    "store {} does not exist",
                    root.display()
                )));
            }
            None
        } else {
            std::fs::create_dir_all(&root)?;
            let lock_path = root.join(LOCK_FILE);
            let lock_file = std::fs::OpenOptions::new()
                .create(true)
                .truncate(false)
                .read(true)
                .write(true)
                .open(&lock_path)?;
            if let Err(e) = lock_file.try_lock_exclusive() {
                return Err(Error::Locked(format!(
                    "could not lock {}: {e}. Another process has the store open for writing; open it read-only instead.",
                    lock_path.display()
                )));
            }
            if !config.config_path().exists() {
                config
                    .save_to_file(&config.config_path())
                    .map_err(|e| Error::Invalid(e.to_string()))?;
            }
            Some(lock_file)
        };
        let snapshots =
            SnapshotManager::new(&root, config.read_only, config.max_snapshots, config.zstd)?;
        let trees = PatchTreeManager::new(
            &root,
            config.read_only,
            config.max_patch_trees,
            config.min_addition_count,
        )?;
        let metadata = MetadataManager::open(&root, config.read_only)?;
        let strategy = config.strategy.build();
        info!(
            "opened store {} ({} snapshots, read-only: {})",
            root.display(),
            snapshots.get_snapshots_ids()?.len(),
            config.read_only
        );
        Ok(Controller {
            config,
            snapshots,
            trees,
            metadata,
            strategy,
            writer: Mutex::new(()),
            _lock: lock,
        })
    }

    /// Open the store at `root` with its saved configuration.
    pub fn open_path(root: &Path, read_only: bool) -> Result<Self> {
        let mut config =
            StoreConfig::load_or_default(root).map_err(|e| Error::Invalid(e.to_string()))?;
        config.read_only = read_only;
        Self::open(config)
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    pub fn is_read_only(&self) -> bool {
        self.config.read_only
    }

    pub fn snapshot_manager(&self) -> &SnapshotManager {
        &self.snapshots
    }

    pub fn patch_tree_manager(&self) -> &PatchTreeManager {
        &self.trees
    }

    pub fn metadata(&self) -> &MetadataManager {
        &self.metadata
    }

    /// The snapshot underlying `patch_id`.
    pub fn get_snapshot_for(&self, patch_id: PatchId) -> Result<Option<Arc<Snapshot>>> {
        match self.snapshots.get_latest_snapshot(patch_id)? {
            Some(id) => self.snapshots.get_snapshot(id),
            None => Ok(None),
        }
    }

    /// Dictionary used to encode patch `patch_id`.
    pub fn get_dictionary_manager(&self, patch_id: PatchId) -> Result<Option<Arc<DictionaryManager>>> {
        Ok(self
            .get_snapshot_for(patch_id)?
            .map(|s| Arc::clone(s.dictionary())))
    }

    /// The patch tree anchored at snapshot `snapshot_id`, if one was created.
    pub fn get_patch_tree(&self, snapshot_id: PatchId) -> Result<Option<Arc<PatchTree>>> {
        self.trees.get_patch_tree(snapshot_id)
    }

    /// Highest version stored, `None` for an empty store.
    pub fn get_max_patch_id(&self) -> Result<Option<PatchId>> {
        let tree_max = self.trees.get_max_patch_id()?;
        let snapshot_max = self.snapshots.get_snapshots_ids()?.last().copied();
        Ok(tree_max.max(snapshot_max))
    }

    /// Write snapshot `id` from `triples`. Snapshots created this way are
    /// roots: no patch chain leads to them.
    pub fn create_snapshot<I>(&self, id: PatchId, triples: I, base_uri: &str) -> Result<Arc<Snapshot>>
    where
        I: IntoIterator<Item = StringTriple>,
    {
        if self.is_read_only() {
            return Err(Error::ReadOnly);
        }
        let _writer = self.lock_writer()?;
        if let Some(max) = self.get_max_patch_id()? {
            if id <= max {
                return Err(Error::Invalid(format!(
                    "snapshot {id} does not follow version {max}"
                )));
            }
        }
        self.snapshots.create_snapshot(id, triples, base_uri, None)
    }

    fn lock_writer(&self) -> Result<std::sync::MutexGuard<'_, ()>> {
        self.writer
            .lock()
            .map_err(|_| Error::Corrupt("controller writer lock poisoned".into()))
    }

    fn tree_for_snapshot(&self, snapshot_id: PatchId) -> Result<Arc<PatchTree>> {
        match self.trees.get_patch_tree(snapshot_id)? {
            Some(tree) => Ok(tree),
            None => self.trees.construct_next_patch_tree(snapshot_id),
        }
    }

    /// Append an encoded, sorted patch as version `patch_id`.
    pub fn append(&self, patch: &PatchSorted, patch_id: PatchId, uniqueness: Uniqueness) -> Result<bool> {
        self.append_stream(&mut PatchSortedStream::new(patch), patch_id, uniqueness)
    }

    /// Append the elements of `stream` as version `patch_id`. Returns
    /// `false` when a checked append finds an element already recorded at
    /// `patch_id`; nothing is written in that case.
    pub fn append_stream(
        &self,
        stream: &mut dyn PatchStream,
        patch_id: PatchId,
        uniqueness: Uniqueness,
    ) -> Result<bool> {
        if self.is_read_only() {
            return Err(Error::ReadOnly);
        }
        let _writer = self.lock_writer()?;
        let Some(snapshot_id) = self.snapshots.get_latest_snapshot(patch_id)? else {
            return Err(Error::Invalid(format!(
                "no snapshot precedes patch {patch_id}; create the initial snapshot first"
            )));
        };
        self.tree_for_snapshot(snapshot_id)?;

        let create = patch_id > snapshot_id
            && self
                .strategy
                .do_create(&self.strategy_metadata(snapshot_id, patch_id)?);
        let started = Instant::now();
        if !self.trees.append(stream, patch_id, uniqueness)? {
            return Ok(false);
        }
        self.record_statistics(snapshot_id, patch_id, started.elapsed())?;
        if create {
            self.snapshot_version(snapshot_id, patch_id)?;
        }
        Ok(true)
    }

    /// Turn version `patch_id` into a snapshot and start a fresh tree on it.
    fn snapshot_version(&self, base: PatchId, patch_id: PatchId) -> Result<()> {
        let base_uri = self
            .snapshots
            .get_snapshot(base)?
            .map(|s| s.meta().base_uri.clone())
            .unwrap_or_default();
        let triples: Vec<StringTriple> = self
            .get_version_materialized(&StringTriple::any(), 0, patch_id)?
            .strings()
            .collect();
        info!(
            "creating snapshot {patch_id} from {} triples (derived from {base})",
            triples.len()
        );
        self.snapshots
            .create_snapshot(patch_id, triples, &base_uri, Some(base))?;
        self.trees.construct_next_patch_tree(patch_id)?;
        Ok(())
    }

    fn strategy_metadata(&self, snapshot_id: PatchId, patch_id: PatchId) -> Result<CreationStrategyMetadata> {
        let ids = || (snapshot_id + 1)..patch_id;
        let last_snapshot_size = self
            .snapshots
            .get_snapshot(snapshot_id)?
            .map(|s| s.len() as u64)
            .unwrap_or(0);
        Ok(CreationStrategyMetadata {
            num_version: patch_id,
            patch_id,
            change_ratios: self.metadata.f64_series(CHANGE_RATIO, ids()),
            aggregated_change_ratios: self.metadata.f64_series(AGGREGATED_CHANGE_RATIO, ids()),
            locally_aggregated_change_ratios: self
                .metadata
                .f64_series(LOCALLY_AGGREGATED_CHANGE_RATIO, ids()),
            delta_sizes: self.metadata.u64_series(DELTA_SIZE, ids()),
            ingestion_times: self.metadata.f64_series(INGESTION_TIME, ids()),
            last_snapshot_size,
        })
    }

    fn record_statistics(&self, snapshot_id: PatchId, patch_id: PatchId, elapsed: Duration) -> Result<()> {
        let delta_size = match self.trees.get_patch_tree(snapshot_id)? {
            Some(tree) => {
                tree.deletion_count(&Triple::any(), patch_id) + tree.addition_count(&Triple::any(), patch_id)
            }
            None => 0,
        };
        self.metadata.store_u64(DELTA_SIZE, patch_id, delta_size)?;
        self.metadata
            .store_f64(INGESTION_TIME, patch_id, elapsed.as_secs_f64())?;
        if !self.config.strategy.needs_change_ratios() || patch_id <= snapshot_id {
            return Ok(());
        }
        let aggregated = stats::change_ratio(self, snapshot_id, patch_id)?;
        let local = stats::change_ratio(self, patch_id - 1, patch_id)?;
        let previous = if patch_id - 1 > snapshot_id {
            self.metadata
                .get_f64(LOCALLY_AGGREGATED_CHANGE_RATIO, patch_id - 1)
                .unwrap_or(0.0)
        } else {
            0.0
        };
        debug!("patch {patch_id}: change ratio {local:.4}, aggregated {aggregated:.4}");
        self.metadata.store_f64(CHANGE_RATIO, patch_id, local)?;
        self.metadata
            .store_f64(AGGREGATED_CHANGE_RATIO, patch_id, aggregated)?;
        self.metadata
            .store_f64(LOCALLY_AGGREGATED_CHANGE_RATIO, patch_id, previous + local)?;
        Ok(())
    }

    /// The changeset of version `patch_id` relative to its snapshot.
    pub fn get_patch(&self, patch_id: PatchId, local_changes: LocalChanges) -> Result<PatchSorted> {
        let Some(snapshot_id) = self.snapshots.get_latest_snapshot(patch_id)? else {
            return Ok(PatchSorted::new());
        };
        Ok(match self.trees.get_patch_tree(snapshot_id)? {
            Some(tree) => tree.reconstruct_patch(patch_id, local_changes),
            None => PatchSorted::new(),
        })
    }

    /// Persist dictionaries and patch trees.
    pub fn flush(&self) -> Result<()> {
        if self.is_read_only() {
            return Ok(());
        }
        self.trees.flush()?;
        self.snapshots.flush()
    }
}

impl Drop for Controller {
    fn drop(&mut self) {
        if let Err(err) = self.flush() {
            error!("Failed to flush store on drop: {err}");
        }
    }
}
