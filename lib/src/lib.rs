//! A versioned triple store.
//!
//! Version 0 is stored as a snapshot; later versions are patches kept in a
//! patch tree anchored at the snapshot they change. The [`Controller`]
//! answers three kinds of queries over the stored versions:
//!
//! - version materialization: the triples of one version;
//! - delta materialization: the changes between two versions;
//! - version annotation: every triple with the versions containing it.
//!
//! ```no_run
//! use vtriples::{Controller, PatchBuilder, StoreConfig, StringTriple};
//!
//! # fn main() -> vtriples::Result<()> {
//! let controller = Controller::open(StoreConfig::new("store"))?;
//! let mut initial = PatchBuilder::new(&controller);
//! initial.addition("<g>", "<p>", "<o>");
//! initial.commit(None)?;
//!
//! let mut patch = PatchBuilder::new(&controller);
//! patch.deletion("<g>", "<p>", "<o>").addition("<a>", "<p>", "<o>");
//! patch.commit(None)?;
//!
//! for triple in controller.get_version_materialized(&StringTriple::any(), 0, 1)?.strings() {
//!     println!("{triple}");
//! }
//! # Ok(())
//! # }
//! ```

mod cache;
pub mod config;
pub mod controller;
pub mod dictionary;
pub mod errors;
pub mod ingest;
pub mod options;
pub mod patch;
pub mod snapshot;
pub mod stats;
pub mod storage;
pub mod triple;

pub use config::{StoreConfig, StoreConfigBuilder};
pub use controller::strategy::StrategyConfig;
pub use controller::{
    Controller, DeltaIter, PatchBuilder, PatchBuilderStreaming, TripleDelta, TripleVersions,
    VersionIterator,
};
pub use dictionary::DictionaryManager;
pub use errors::{Error, Result};
pub use options::{CountKind, DiffStrategy, LocalChanges, Uniqueness};
pub use patch::{Patch, PatchElement, PatchId, PatchSorted};
pub use triple::{StringTriple, Triple, TripleOrder};
