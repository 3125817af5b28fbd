//! Patch builders: collect string triples and commit them as one version.

use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;

use log::{debug, warn};

use crate::controller::Controller;
use crate::dictionary::DictionaryManager;
use crate::errors::{Error, Result};
use crate::options::Uniqueness;
use crate::patch::{Patch, PatchElement, PatchId, PatchTree};
use crate::snapshot::Snapshot;
use crate::triple::StringTriple;

/// Id the next commit gets when none is given: one past the newest version,
/// or 0 for an empty store.
fn next_patch_id(controller: &Controller, patch_id: Option<PatchId>) -> Result<PatchId> {
    match patch_id {
        Some(id) => Ok(id),
        None => Ok(controller.get_max_patch_id()?.map_or(0, |max| max + 1)),
    }
}

/// True when committing `patch_id` creates the initial snapshot.
fn is_initial(controller: &Controller, patch_id: PatchId) -> Result<bool> {
    Ok(patch_id == 0 && controller.snapshot_manager().get_snapshots_ids()?.is_empty())
}

fn initial_snapshot(
    controller: &Controller,
    changes: impl IntoIterator<Item = (StringTriple, bool)>,
) -> Result<bool> {
    let mut triples = Vec::new();
    for (triple, addition) in changes {
        if !addition {
            return Err(Error::Invalid(format!(
                "the initial snapshot cannot delete {triple}"
            )));
        }
        triples.push(triple);
    }
    controller.create_snapshot(0, triples, "")?;
    Ok(true)
}

fn encode_change(dict: &DictionaryManager, triple: &StringTriple, addition: bool) -> Result<PatchElement> {
    Ok(PatchElement::new(dict.encode(triple)?, addition))
}

/// Whether `element` leaves the preceding version unchanged: an addition of
/// a triple already present or a deletion of one already absent.
fn is_redundant(snapshot: &Snapshot, tree: Option<&PatchTree>, element: &PatchElement, id: PatchId) -> bool {
    let before = id.checked_sub(1).filter(|q| *q >= snapshot.id());
    let present = match (tree.and_then(|t| t.get(&element.triple)), before) {
        (Some(value), Some(q)) => value.is_present(q),
        _ => snapshot.contains(&element.triple),
    };
    present == element.addition
}

/// Collects additions and deletions, then commits them as one patch.
///
/// Adding the same triple twice keeps the last polarity.
pub struct PatchBuilder<'a> {
    controller: &'a Controller,
    changes: Vec<(StringTriple, bool)>,
}

impl<'a> PatchBuilder<'a> {
    pub fn new(controller: &'a Controller) -> Self {
        PatchBuilder {
            controller,
            changes: Vec::new(),
        }
    }

    pub fn addition(&mut self, s: &str, p: &str, o: &str) -> &mut Self {
        self.triple(StringTriple::new(s, p, o), true)
    }

    pub fn deletion(&mut self, s: &str, p: &str, o: &str) -> &mut Self {
        self.triple(StringTriple::new(s, p, o), false)
    }

    pub fn triple(&mut self, triple: StringTriple, addition: bool) -> &mut Self {
        self.changes.push((triple, addition));
        self
    }

    pub fn len(&self) -> usize {
        self.changes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    /// Commit as version `patch_id` (default: the next free id). Returns
    /// `false` when the store already records one of the changes at that id.
    ///
    /// Changes are not checked against the preceding version: adding a
    /// triple that is already present, or deleting one that is absent, is
    /// stored as given and only reported at debug level.
    pub fn commit(self, patch_id: Option<PatchId>) -> Result<bool> {
        let id = next_patch_id(self.controller, patch_id)?;
        if is_initial(self.controller, id)? {
            return initial_snapshot(self.controller, self.changes);
        }
        let Some(snapshot) = self.controller.get_snapshot_for(id)? else {
            return Err(Error::Invalid(format!(
                "no snapshot precedes patch {id}; commit version 0 first"
            )));
        };
        let dict = snapshot.dictionary();
        let mut patch = Patch::new();
        for (triple, addition) in &self.changes {
            patch.add(encode_change(dict, triple, *addition)?);
        }
        let patch = patch.into_sorted();
        if log::log_enabled!(log::Level::Debug) {
            let tree = self.controller.get_patch_tree(snapshot.id())?;
            let redundant = patch
                .iter()
                .filter(|e| is_redundant(&snapshot, tree.as_deref(), e, id))
                .count();
            if redundant > 0 {
                debug!("patch {id}: {redundant} changes do not alter version {}", id.saturating_sub(1));
            }
        }
        debug!("committing {} changes as patch {id}", patch.len());
        self.controller.append(&patch, id, Uniqueness::Check)
    }
}

#[derive(Default)]
struct Queue {
    items: VecDeque<(StringTriple, bool)>,
    shutdown: bool,
}

type Shared = Arc<(Mutex<Queue>, Condvar)>;

/// A patch builder fed from any thread while a background thread encodes
/// the changes. `close` waits for the background thread and commits.
pub struct PatchBuilderStreaming {
    queue: Shared,
    handle: Option<JoinHandle<Result<bool>>>,
    patch_id: PatchId,
}

impl PatchBuilderStreaming {
    pub fn new(controller: Arc<Controller>, patch_id: Option<PatchId>) -> Result<Self> {
        if controller.is_read_only() {
            return Err(Error::ReadOnly);
        }
        let id = next_patch_id(&controller, patch_id)?;
        let initial = is_initial(&controller, id)?;
        let dict = if initial {
            None
        } else {
            match controller.get_dictionary_manager(id)? {
                Some(dict) => Some(dict),
                None => {
                    return Err(Error::Invalid(format!(
                        "no snapshot precedes patch {id}; commit version 0 first"
                    )))
                }
            }
        };
        let queue: Shared = Arc::new((Mutex::new(Queue::default()), Condvar::new()));
        let consumer = Arc::clone(&queue);
        let handle = std::thread::Builder::new()
            .name(format!("patch-builder-{id}"))
            .spawn(move || consume(controller, consumer, id, dict))?;
        Ok(PatchBuilderStreaming {
            queue,
            handle: Some(handle),
            patch_id: id,
        })
    }

    pub fn patch_id(&self) -> PatchId {
        self.patch_id
    }

    pub fn addition(&self, s: &str, p: &str, o: &str) -> Result<()> {
        self.triple(StringTriple::new(s, p, o), true)
    }

    pub fn deletion(&self, s: &str, p: &str, o: &str) -> Result<()> {
        self.triple(StringTriple::new(s, p, o), false)
    }

    pub fn triple(&self, triple: StringTriple, addition: bool) -> Result<()> {
        let (lock, not_empty) = &*self.queue;
        let mut queue = lock
            .lock()
            .map_err(|_| Error::Corrupt("patch builder queue poisoned".into()))?;
        if queue.shutdown {
            return Err(Error::Invalid("patch builder is closed".into()));
        }
        queue.items.push_back((triple, addition));
        not_empty.notify_one();
        Ok(())
    }

    fn shutdown(&self) {
        let (lock, not_empty) = &*self.queue;
        if let Ok(mut queue) = lock.lock() {
            queue.shutdown = true;
        }
        not_empty.notify_all();
    }

    /// Stop accepting changes, wait for the consumer and commit.
    pub fn close(mut self) -> Result<bool> {
        self.shutdown();
        match self.handle.take() {
            Some(handle) => handle
                .join()
                .map_err(|_| Error::Corrupt("patch builder thread panicked".into()))?,
            None => Ok(false),
        }
    }
}

impl Drop for PatchBuilderStreaming {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            self.shutdown();
            match handle.join() {
                Ok(Ok(_)) => {}
                Ok(Err(err)) => warn!("patch {} was not committed: {err}", self.patch_id),
                Err(_) => warn!("patch builder thread for {} panicked", self.patch_id),
            }
        }
    }
}

fn consume(
    controller: Arc<Controller>,
    queue: Shared,
    patch_id: PatchId,
    dict: Option<Arc<DictionaryManager>>,
) -> Result<bool> {
    let (lock, not_empty) = &*queue;
    let mut patch = Patch::new();
    let mut initial = Vec::new();
    loop {
        let batch: Vec<(StringTriple, bool)> = {
            let mut q = lock
                .lock()
                .map_err(|_| Error::Corrupt("patch builder queue poisoned".into()))?;
            while q.items.is_empty() && !q.shutdown {
                q = not_empty
                    .wait(q)
                    .map_err(|_| Error::Corrupt("patch builder queue poisoned".into()))?;
            }
            if q.items.is_empty() {
                break;
            }
            q.items.drain(..).collect()
        };
        match &dict {
            Some(dict) => {
                for (triple, addition) in &batch {
                    patch.add(encode_change(dict, triple, *addition)?);
                }
            }
            None => initial.extend(batch),
        }
    }
    if dict.is_none() {
        return initial_snapshot(&controller, initial);
    }
    debug!("committing {} streamed changes as patch {patch_id}", patch.len());
    controller.append(&patch.into_sorted(), patch_id, Uniqueness::Check)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StoreConfig;

    #[test]
    fn redundant_changes_are_detected() {
        let dir = tempfile::tempdir().unwrap();
        let controller = Controller::open(StoreConfig::new(dir.path())).unwrap();
        let mut initial = PatchBuilder::new(&controller);
        initial.addition("<a>", "<p>", "<o>");
        assert!(initial.commit(None).unwrap());
        let mut patch = PatchBuilder::new(&controller);
        patch.deletion("<a>", "<p>", "<o>");
        assert!(patch.commit(None).unwrap());

        let snapshot = controller.get_snapshot_for(1).unwrap().unwrap();
        let tree = controller.get_patch_tree(0).unwrap();
        let dict = snapshot.dictionary();
        let change = |s: &str, addition: bool| {
            encode_change(dict, &StringTriple::new(s, "<p>", "<o>"), addition).unwrap()
        };
        let redundant = |e: &PatchElement, id| is_redundant(&snapshot, tree.as_deref(), e, id);

        // against the snapshot file
        assert!(redundant(&change("<a>", true), 0));
        assert!(!redundant(&change("<a>", false), 0));
        assert!(redundant(&change("<b>", false), 0));
        assert!(!redundant(&change("<b>", true), 0));
        // against version 1, where <a> is deleted
        assert!(redundant(&change("<a>", false), 2));
        assert!(!redundant(&change("<a>", true), 2));
    }
}
