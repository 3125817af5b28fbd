//! Per-patch ingestion measurements kept in `ingestion_metadata.json`.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use log::error;
use serde::{Deserialize, Serialize};

use crate::errors::{Error, Result};
use crate::patch::PatchId;

pub const METADATA_FILE: &str = "ingestion_metadata.json";

pub const DELTA_SIZE: &str = "delta_size_";
pub const INGESTION_TIME: &str = "ingestion_time_";
pub const CHANGE_RATIO: &str = "change_ratio_";
pub const AGGREGATED_CHANGE_RATIO: &str = "aggregated_change_ratio_";
pub const LOCALLY_AGGREGATED_CHANGE_RATIO: &str = "locally_aggregated_change_ratio_";

#[derive(Debug, Default, Serialize, Deserialize)]
struct Series {
    #[serde(default)]
    integers: BTreeMap<String, u64>,
    #[serde(default)]
    floats: BTreeMap<String, f64>,
}

/// Key-value store of numbers keyed by `prefix + patch id`.
#[derive(Debug)]
pub struct MetadataManager {
    path: Option<PathBuf>,
    read_only: bool,
    series: RwLock<Series>,
}

fn key(prefix: &str, id: PatchId) -> String {
    format!("{prefix}{id}")
}

impl MetadataManager {
    pub fn open(root: &Path, read_only: bool) -> Result<Self> {
        let path = root.join(METADATA_FILE);
        let series = if path.exists() {
            serde_json::from_slice(&std::fs::read(&path)?)?
        } else {
            Series::default()
        };
        Ok(MetadataManager {
            path: Some(path),
            read_only,
            series: RwLock::new(series),
        })
    }

    pub fn in_memory() -> Self {
        MetadataManager {
            path: None,
            read_only: false,
            series: RwLock::new(Series::default()),
        }
    }

    fn save(&self, series: &Series) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, serde_json::to_vec_pretty(series)?)?;
        std::fs::rename(&tmp, path)?;
        Ok(())
    }

    fn update(&self, f: impl FnOnce(&mut Series)) -> Result<()> {
        if self.read_only {
            return Err(Error::ReadOnly);
        }
        let mut series = self
            .series
            .write()
            .map_err(|_| Error::Corrupt("metadata lock poisoned".into()))?;
        f(&mut series);
        self.save(&series)
    }

    pub fn store_u64(&self, prefix: &str, id: PatchId, value: u64) -> Result<()> {
        self.update(|s| {
            s.integers.insert(key(prefix, id), value);
        })
    }

    pub fn store_f64(&self, prefix: &str, id: PatchId, value: f64) -> Result<()> {
        self.update(|s| {
            s.floats.insert(key(prefix, id), value);
        })
    }

    pub fn get_u64(&self, prefix: &str, id: PatchId) -> Option<u64> {
        match self.series.read() {
            Ok(s) => s.integers.get(&key(prefix, id)).copied(),
            Err(_) => {
                error!("metadata lock poisoned");
                None
            }
        }
    }

    pub fn get_f64(&self, prefix: &str, id: PatchId) -> Option<f64> {
        match self.series.read() {
            Ok(s) => s.floats.get(&key(prefix, id)).copied(),
            Err(_) => {
                error!("metadata lock poisoned");
                None
            }
        }
    }

    /// Values of `prefix` for the ids in `ids`, skipping missing ones.
    pub fn u64_series(&self, prefix: &str, ids: impl IntoIterator<Item = PatchId>) -> Vec<u64> {
        ids.into_iter()
            .filter_map(|id| self.get_u64(prefix, id))
            .collect()
    }

    pub fn f64_series(&self, prefix: &str, ids: impl IntoIterator<Item = PatchId>) -> Vec<f64> {
        ids.into_iter()
            .filter_map(|id| self.get_f64(prefix, id))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        {
            let m = MetadataManager::open(dir.path(), false).unwrap();
            m.store_u64(DELTA_SIZE, 1, 12).unwrap();
            m.store_u64(DELTA_SIZE, 2, 30).unwrap();
            m.store_f64(INGESTION_TIME, 1, 0.25).unwrap();
        }
        let m = MetadataManager::open(dir.path(), true).unwrap();
        assert_eq!(m.get_u64(DELTA_SIZE, 2), Some(30));
        assert_eq!(m.get_u64(DELTA_SIZE, 3), None);
        assert_eq!(m.get_f64(INGESTION_TIME, 1), Some(0.25));
        assert_eq!(m.u64_series(DELTA_SIZE, 1..=3), vec![12, 30]);
        assert!(matches!(m.store_u64(DELTA_SIZE, 3, 1), Err(Error::ReadOnly)));
    }
}
