mod common;

use std::collections::{BTreeMap, BTreeSet};

use common::*;
use vtriples::controller::metadata::{CHANGE_RATIO, DELTA_SIZE};
use vtriples::{CountKind, DiffStrategy, Error, StrategyConfig, StringTriple};

fn every_second() -> (tempfile::TempDir, vtriples::Controller) {
    let (dir, controller) = store_with(|c| c.strategy = StrategyConfig::EveryN { n: 2 });
    six_versions(&controller);
    (dir, controller)
}

/// Net effect of applying `second` after `first`.
fn compose(
    first: BTreeSet<(StringTriple, bool)>,
    second: BTreeSet<(StringTriple, bool)>,
) -> BTreeSet<(StringTriple, bool)> {
    let mut net: BTreeMap<StringTriple, bool> = first.into_iter().collect();
    for (triple, addition) in second {
        match net.get(&triple) {
            Some(previous) if *previous != addition => {
                net.remove(&triple);
            }
            _ => {
                net.insert(triple, addition);
            }
        }
    }
    net.into_iter().collect()
}

#[test]
fn strategy_creates_derived_snapshots() {
    let (_dir, controller) = every_second();
    let snapshots = controller.snapshot_manager();
    assert_eq!(snapshots.get_snapshots_ids().unwrap(), vec![0, 2, 4]);
    let meta = |id| snapshots.get_snapshot(id).unwrap().unwrap().meta().clone();
    assert_eq!(meta(0).derived_from, None);
    assert_eq!(meta(2).derived_from, Some(0));
    assert_eq!(meta(4).derived_from, Some(2));
    assert_eq!(meta(4).n_triples, 4);
    assert_eq!(controller.get_max_patch_id().unwrap(), Some(5));
    assert_eq!(
        controller.patch_tree_manager().tree_ids().unwrap(),
        vec![0, 2, 4]
    );
}

#[test]
fn versions_survive_snapshot_creation() {
    let (_dir, plain) = store();
    six_versions(&plain);
    let (_dir2, snapshotted) = every_second();
    for p in 0..=5 {
        assert_eq!(version_set(&snapshotted, p), version_set(&plain, p), "version {p}");
        assert_eq!(
            snapshotted
                .get_version_materialized_count(&any(), p)
                .unwrap()
                .0,
            version_set(&plain, p).len() as u64
        );
    }
}

#[test]
fn cross_snapshot_delta() {
    let (_dir, controller) = every_second();
    let [a, b, c, d, e, f] = letters();
    let expected: BTreeSet<(StringTriple, bool)> = [
        (a, true),
        (b, false),
        (c, false),
        (d, false),
        (e, true),
        (f, true),
    ]
    .into();
    for strategy in [DiffStrategy::Auto, DiffStrategy::Iterative, DiffStrategy::Direct] {
        let deltas = delta(&controller, &any(), 1, 5, strategy);
        assert_eq!(deltas.len(), expected.len(), "{strategy:?}");
        assert_eq!(deltas.into_iter().collect::<BTreeSet<_>>(), expected);
    }
    let (count, kind) = controller
        .get_delta_materialized_count(&any(), 1, 5, DiffStrategy::Auto)
        .unwrap();
    assert_eq!(kind, CountKind::Estimate);
    assert!(count >= expected.len() as u64);
}

#[test]
fn cross_snapshot_delta_from_snapshot_with_changes() {
    let (_dir, controller) = store_with(|c| c.strategy = StrategyConfig::EveryN { n: 2 });
    let x = t("a", "a", "a");
    alternate_on_empty_snapshot(&controller, &x, 5);
    let snapshots = controller.snapshot_manager();
    assert_eq!(snapshots.get_snapshots_ids().unwrap(), vec![0, 2, 4]);
    assert_eq!(
        snapshots.get_snapshot(2).unwrap().unwrap().meta().derived_from,
        Some(0)
    );
    for strategy in [DiffStrategy::Auto, DiffStrategy::Iterative, DiffStrategy::Direct] {
        // the head starts at snapshot 0, whose tree holds an addition at 0
        assert_eq!(delta(&controller, &any(), 0, 3, strategy), vec![(x.clone(), false)]);
        assert!(delta(&controller, &any(), 0, 4, strategy).is_empty());
        assert!(delta(&controller, &any(), 1, 3, strategy).is_empty());
        assert_eq!(delta(&controller, &any(), 1, 4, strategy), vec![(x.clone(), true)]);
        assert_deltas_match_versions(&controller, 5, strategy);
    }
}

#[test]
fn auto_and_iterative_agree() {
    let (_dir, controller) = every_second();
    let patterns = [
        any(),
        pattern(None, Some("p"), None),
        pattern(None, Some("q"), Some("o")),
    ];
    for pat in &patterns {
        for i in 0..=5 {
            for j in i..=5 {
                let sorted = |s| {
                    let mut v = delta(&controller, pat, i, j, s);
                    v.sort();
                    v
                };
                let auto = sorted(DiffStrategy::Auto);
                assert_eq!(auto, sorted(DiffStrategy::Iterative), "{pat} {i}..{j}");
                assert_eq!(auto, sorted(DiffStrategy::Direct), "{pat} {i}..{j}");
            }
        }
    }
}

#[test]
fn deltas_compose_by_net_effect() {
    let (_dir, controller) = every_second();
    for (i, j, k) in [(1, 3, 5), (0, 2, 4), (1, 2, 3), (0, 1, 5), (3, 4, 5)] {
        let composed = compose(
            delta_set(&controller, i, j, DiffStrategy::Auto),
            delta_set(&controller, j, k, DiffStrategy::Auto),
        );
        assert_eq!(composed, delta_set(&controller, i, k, DiffStrategy::Auto), "{i} {j} {k}");
    }
}

#[test]
fn deltas_across_snapshots_transform_versions() {
    let (_dir, controller) = every_second();
    for i in 0..=5 {
        for j in i..=5 {
            let mut v = version_set(&controller, i);
            for (triple, addition) in delta_set(&controller, i, j, DiffStrategy::Auto) {
                if addition {
                    v.insert(triple);
                } else {
                    v.remove(&triple);
                }
            }
            assert_eq!(v, version_set(&controller, j), "delta {i}..{j}");
        }
    }
}

#[test]
fn version_annotation_across_snapshots() {
    let (_dir, controller) = every_second();
    let [a, b, c, d, e, f] = letters();
    let versions: BTreeMap<StringTriple, Vec<u64>> = controller
        .get_version(&any(), 0)
        .unwrap()
        .map(|tv| (tv.triple, tv.versions))
        .collect();
    let expected: BTreeMap<StringTriple, Vec<u64>> = [
        (a, vec![0, 3, 4, 5]),
        (b, vec![0, 1]),
        (c, vec![0, 1, 2, 3]),
        (d, vec![1, 2, 3, 4]),
        (e, vec![2, 3, 4, 5]),
        (f, vec![4, 5]),
    ]
    .into();
    assert_eq!(versions, expected);
    assert_eq!(
        controller.get_version_count(&pattern(None, Some("q"), None)).unwrap(),
        (3, CountKind::Exact)
    );
}

#[test]
fn manual_snapshots_are_roots() {
    let (_dir, controller) = store();
    commit(&controller, &[(t("a", "p", "o"), true)]);
    commit(&controller, &[(t("b", "p", "o"), true)]);
    controller
        .create_snapshot(2, vec![t("z", "p", "o")], "")
        .unwrap();
    commit(&controller, &[(t("y", "p", "o"), true)]);

    assert!(matches!(
        controller.get_delta_materialized(&any(), 0, 1, 3, DiffStrategy::Auto),
        Err(Error::Unsupported(_))
    ));
    assert!(matches!(
        controller.get_delta_materialized_count(&any(), 0, 3, DiffStrategy::Direct),
        Err(Error::Unsupported(_))
    ));
    assert_eq!(
        delta(&controller, &any(), 2, 3, DiffStrategy::Auto),
        vec![(t("y", "p", "o"), true)]
    );
    assert_eq!(
        delta(&controller, &any(), 0, 1, DiffStrategy::Auto),
        vec![(t("b", "p", "o"), true)]
    );
    assert_eq!(
        version_set(&controller, 3),
        [t("y", "p", "o"), t("z", "p", "o")].into()
    );
    assert!(matches!(
        controller.create_snapshot(3, Vec::new(), ""),
        Err(Error::Invalid(_))
    ));
}

#[test]
fn change_ratio_strategy_uses_previous_patches() {
    let (_dir, controller) =
        store_with(|c| c.strategy = StrategyConfig::ChangeRatio { threshold: 0.5 });
    commit(&controller, &[(t("a", "p", "o"), true), (t("b", "p", "o"), true)]);
    commit(
        &controller,
        &[
            (t("a", "p", "o"), false),
            (t("b", "p", "o"), false),
            (t("c", "p", "o"), true),
            (t("d", "p", "o"), true),
        ],
    );
    assert_eq!(controller.metadata().get_f64(CHANGE_RATIO, 1), Some(1.0));
    assert_eq!(controller.metadata().get_u64(DELTA_SIZE, 1), Some(4));
    assert_eq!(
        controller.snapshot_manager().get_snapshots_ids().unwrap(),
        vec![0]
    );

    commit(&controller, &[(t("e", "p", "o"), true)]);
    assert_eq!(
        controller.snapshot_manager().get_snapshots_ids().unwrap(),
        vec![0, 2]
    );
    assert_eq!(
        version_set(&controller, 2),
        [t("c", "p", "o"), t("d", "p", "o"), t("e", "p", "o")].into()
    );
}

#[test]
fn always_strategy_snapshots_every_patch() {
    let (_dir, controller) = store_with(|c| c.strategy = StrategyConfig::Always);
    six_versions(&controller);
    assert_eq!(
        controller.snapshot_manager().get_snapshots_ids().unwrap(),
        vec![0, 1, 2, 3, 4, 5]
    );
    let [a, _, _, _, e, f] = letters();
    assert_eq!(version_set(&controller, 5), [a, e, f].into());
    assert_eq!(delta_set(&controller, 0, 5, DiffStrategy::Iterative).len(), 4);
}

#[test]
fn statistics() {
    let (_dir, controller) = store();
    six_versions(&controller);
    // v0 {A, B, C} -> v1 {B, C, D}: two changes over four triples
    let ratio = vtriples::stats::change_ratio(&controller, 0, 1).unwrap();
    assert!((ratio - 0.5).abs() < 1e-9);
    let growth = vtriples::stats::growth_ratio(&controller, 4, 5).unwrap();
    assert!((growth - 0.75).abs() < 1e-9);
    let row = vtriples::stats::version_stats(&controller, 4).unwrap();
    assert_eq!((row.triples, row.additions, row.deletions), (4, 1, 1));
}
