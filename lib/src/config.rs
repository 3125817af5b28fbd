//! Configuration of a store directory.
//!
//! A `StoreConfig` is saved as `vtriples.json` in the store root so that a
//! store reopens with the same cache sizes and snapshot strategy.

use crate::controller::strategy::StrategyConfig;
use anyhow::Result;
use derive_builder::Builder;
use serde::{Deserialize, Serialize};
use std::io::{BufReader, Write};
use std::path::{Path, PathBuf};

/// Name of the configuration file inside the store root.
pub const CONFIG_FILE: &str = "vtriples.json";

fn default_max_patch_trees() -> usize {
    4
}

fn default_max_snapshots() -> usize {
    4
}

fn default_min_addition_count() -> u64 {
    200
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Builder)]
#[builder(setter(into), build_fn(validate = "Self::validate"))]
pub struct StoreConfig {
    /// Directory holding snapshots, patch trees and metadata.
    pub root: PathBuf,
    /// Open without taking the writer lock; every mutation fails.
    #[serde(default)]
    #[builder(default)]
    pub read_only: bool,
    /// Number of patch trees kept resident.
    #[serde(default = "default_max_patch_trees")]
    #[builder(default = "default_max_patch_trees()")]
    pub max_patch_trees: usize,
    /// Number of snapshots kept resident.
    #[serde(default = "default_max_snapshots")]
    #[builder(default = "default_max_snapshots()")]
    pub max_snapshots: usize,
    /// Patterns whose addition count at a patch reaches this value are indexed.
    #[serde(default = "default_min_addition_count")]
    #[builder(default = "default_min_addition_count()")]
    pub min_addition_count: u64,
    /// When to turn an incoming patch into a new snapshot.
    #[serde(default)]
    #[builder(default)]
    pub strategy: StrategyConfig,
    /// Compress the triple section of new snapshot files.
    #[serde(default)]
    #[builder(default)]
    pub zstd: bool,
}

impl StoreConfigBuilder {
    fn validate(&self) -> std::result::Result<(), String> {
        if let Some(n) = self.max_patch_trees {
            if n < 2 {
                return Err(format!("max_patch_trees must be at least 2, got {n}"));
            }
        }
        if let Some(0) = self.max_snapshots {
            return Err("max_snapshots must be at least 1".to_string());
        }
        if let Some(root) = &self.root {
            if root.as_os_str().is_empty() {
                return Err("root must not be empty".to_string());
            }
        }
        Ok(())
    }
}

impl StoreConfig {
    /// Default configuration rooted at `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        StoreConfig {
            root: root.into(),
            read_only: false,
            max_patch_trees: default_max_patch_trees(),
            max_snapshots: default_max_snapshots(),
            min_addition_count: default_min_addition_count(),
            strategy: StrategyConfig::default(),
            zstd: false,
        }
    }

    pub fn builder() -> StoreConfigBuilder {
        StoreConfigBuilder::default()
    }

    pub fn config_path(&self) -> PathBuf {
        self.root.join(CONFIG_FILE)
    }

    pub fn save_to_file(&self, file: &Path) -> Result<()> {
        let config_str = serde_json::to_string_pretty(&self)?;
        let mut file = std::fs::File::create(file)?;
        file.write_all(config_str.as_bytes())?;
        Ok(())
    }

    pub fn from_file(file: &Path) -> Result<Self> {
        let file = std::fs::File::open(file)?;
        let reader = BufReader::new(file);
        let config: StoreConfig = serde_json::from_reader(reader)?;
        if config.max_patch_trees < 2 {
            anyhow::bail!("max_patch_trees must be at least 2");
        }
        if config.max_snapshots == 0 {
            anyhow::bail!("max_snapshots must be at least 1");
        }
        Ok(config)
    }

    /// Load `vtriples.json` from `root` if present, keeping `root` as given.
    pub fn load_or_default(root: &Path) -> Result<Self> {
        let path = root.join(CONFIG_FILE);
        if path.exists() {
            let mut config = Self::from_file(&path)?;
            config.root = root.to_path_buf();
            Ok(config)
        } else {
            Ok(Self::new(root))
        }
    }

    /// Prints out the current StoreConfig in a clear and readable way for command line output.
    pub fn print(&self) {
        println!("Configuration:");
        println!("  Root: {}", self.root.display());
        println!("  Read Only: {}", self.read_only);
        println!("  Max Patch Trees: {}", self.max_patch_trees);
        println!("  Max Snapshots: {}", self.max_snapshots);
        println!("  Min Addition Count: {}", self.min_addition_count);
        println!("  Snapshot Strategy: {}", self.strategy);
        println!("  Zstd: {}", self.zstd);
    }
}
