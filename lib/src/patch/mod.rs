//! Patches and the patch trees that store them.

pub mod element;
pub mod iterator;
pub mod manager;
pub mod positions;
pub mod tree;
pub mod value;

pub use element::{Patch, PatchElement, PatchSorted};
pub use iterator::{EqualKeys, IteratorFilter, PatchTreeIterator, Sides};
pub use manager::PatchTreeManager;
pub use positions::{AppendContext, PatchPositions};
pub use tree::{PatchSortedStream, PatchStream, PatchTree};
pub use value::{
    AdditionEntry, AdditionValue, DeletionEntry, DeletionValue, FullDeletion, HistoryEntry,
    PatchId, PatchTreeValue, ReducedDeletion,
};
