#![allow(dead_code)]

use std::collections::BTreeSet;

use tempfile::TempDir;
use vtriples::{Controller, DiffStrategy, PatchBuilder, PatchId, StoreConfig, StringTriple};

pub fn t(s: &str, p: &str, o: &str) -> StringTriple {
    StringTriple::new(format!("<{s}>"), format!("<{p}>"), format!("<{o}>"))
}

pub fn any() -> StringTriple {
    StringTriple::any()
}

pub fn pattern(s: Option<&str>, p: Option<&str>, o: Option<&str>) -> StringTriple {
    let term = |x: Option<&str>| x.map(|x| format!("<{x}>")).unwrap_or_default();
    StringTriple::new(term(s), term(p), term(o))
}

pub fn store() -> (TempDir, Controller) {
    let dir = tempfile::tempdir().unwrap();
    let controller = Controller::open(StoreConfig::new(dir.path())).unwrap();
    (dir, controller)
}

pub fn store_with(config: impl FnOnce(&mut StoreConfig)) -> (TempDir, Controller) {
    let dir = tempfile::tempdir().unwrap();
    let mut c = StoreConfig::new(dir.path());
    config(&mut c);
    let controller = Controller::open(c).unwrap();
    (dir, controller)
}

/// Commit `changes` (`true` = addition) as the next version.
pub fn commit(controller: &Controller, changes: &[(StringTriple, bool)]) -> PatchId {
    let id = controller.get_max_patch_id().unwrap().map_or(0, |m| m + 1);
    let mut builder = PatchBuilder::new(controller);
    for (triple, addition) in changes {
        builder.triple(triple.clone(), *addition);
    }
    assert!(builder.commit(Some(id)).unwrap());
    id
}

pub fn version(controller: &Controller, pattern: &StringTriple, p: PatchId) -> Vec<StringTriple> {
    controller
        .get_version_materialized(pattern, 0, p)
        .unwrap()
        .strings()
        .collect()
}

pub fn version_set(controller: &Controller, p: PatchId) -> BTreeSet<StringTriple> {
    version(controller, &any(), p).into_iter().collect()
}

pub fn delta(
    controller: &Controller,
    pattern: &StringTriple,
    start: PatchId,
    end: PatchId,
    strategy: DiffStrategy,
) -> Vec<(StringTriple, bool)> {
    controller
        .get_delta_materialized(pattern, 0, start, end, strategy)
        .unwrap()
        .map(|d| (d.to_string_triple(), d.is_addition))
        .collect()
}

pub fn delta_set(
    controller: &Controller,
    start: PatchId,
    end: PatchId,
    strategy: DiffStrategy,
) -> BTreeSet<(StringTriple, bool)> {
    delta(controller, &any(), start, end, strategy)
        .into_iter()
        .collect()
}

/// Changes turning version `start` into version `end`, from the two
/// materialized versions.
pub fn version_diff(
    controller: &Controller,
    start: PatchId,
    end: PatchId,
) -> BTreeSet<(StringTriple, bool)> {
    let (before, after) = (version_set(controller, start), version_set(controller, end));
    let deleted = before.difference(&after).map(|t| (t.clone(), false));
    let added = after.difference(&before).map(|t| (t.clone(), true));
    deleted.chain(added).collect()
}

/// Every delta between two of the first `versions` versions matches the
/// difference of the materialized versions.
pub fn assert_deltas_match_versions(controller: &Controller, versions: PatchId, strategy: DiffStrategy) {
    for start in 0..versions {
        for end in start..versions {
            assert_eq!(
                delta_set(controller, start, end, strategy),
                version_diff(controller, start, end),
                "delta {start}..{end} ({strategy:?})"
            );
        }
    }
}

/// Commit `triple` as an addition at even versions and a deletion at odd
/// ones, for versions `0..versions`, on top of an empty snapshot 0.
pub fn alternate_on_empty_snapshot(controller: &Controller, triple: &StringTriple, versions: PatchId) {
    controller.create_snapshot(0, Vec::new(), "").unwrap();
    for p in 0..versions {
        let mut builder = PatchBuilder::new(controller);
        builder.triple(triple.clone(), p % 2 == 0);
        assert!(builder.commit(Some(p)).unwrap());
    }
}

/// Six versions over three snapshots (0, 2 and 4) when the store creates a
/// snapshot every second version.
///
/// ```text
/// v0 {A, B, C}
/// v1 {B, C, D}     - A + D
/// v2 {C, D, E}     - B + E
/// v3 {A, C, D, E}  + A
/// v4 {A, D, E, F}  - C + F
/// v5 {A, E, F}     - D
/// ```
pub fn six_versions(controller: &Controller) {
    let [a, b, c, d, e, f] = letters();
    commit(controller, &[(a.clone(), true), (b.clone(), true), (c.clone(), true)]);
    commit(controller, &[(a.clone(), false), (d.clone(), true)]);
    commit(controller, &[(b, false), (e, true)]);
    commit(controller, &[(a, true)]);
    commit(controller, &[(c, false), (f, true)]);
    commit(controller, &[(d, false)]);
}

pub fn letters() -> [StringTriple; 6] {
    [
        t("a", "p", "o"),
        t("b", "q", "o"),
        t("c", "p", "o2"),
        t("d", "q", "o"),
        t("e", "p", "o"),
        t("f", "q", "o2"),
    ]
}
