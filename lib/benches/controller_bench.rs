use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use rand::{rngs::StdRng, Rng, SeedableRng};
use tempfile::TempDir;
use vtriples::{Controller, DiffStrategy, PatchBuilder, StoreConfig, StringTriple};

const VERSIONS: u64 = 10;

fn term(kind: &str, i: usize) -> String {
    format!("<http://example.org/{kind}/{i}>")
}

/// A store with `n` initial triples and `VERSIONS - 1` patches, each deleting
/// and adding about 5% of the triples.
fn build_store(n: usize) -> (TempDir, Controller) {
    let dir = tempfile::tempdir().unwrap();
    let controller = Controller::open(StoreConfig::new(dir.path())).unwrap();
    let mut rng = StdRng::seed_from_u64(42);
    let mut live: Vec<StringTriple> = (0..n)
        .map(|t| {
            StringTriple::new(
                term("s", rng.random_range(0..(n / 4).max(1))),
                term("p", t % 20),
                term("o", t),
            )
        })
        .collect();
    let mut builder = PatchBuilder::new(&controller);
    for triple in &live {
        builder.triple(triple.clone(), true);
    }
    builder.commit(Some(0)).unwrap();

    let mut next = n;
    for p in 1..VERSIONS {
        let mut builder = PatchBuilder::new(&controller);
        for _ in 0..(n / 20).max(1) {
            if live.is_empty() {
                break;
            }
            let removed = live.swap_remove(rng.random_range(0..live.len()));
            builder.triple(removed, false);
            let added = StringTriple::new(term("s", next), term("p", next % 20), term("o", next));
            next += 1;
            builder.triple(added.clone(), true);
            live.push(added);
        }
        builder.commit(Some(p)).unwrap();
    }
    (dir, controller)
}

fn bench_version_materialized(c: &mut Criterion) {
    let mut group = c.benchmark_group("version_materialized");
    for n in [1_000, 10_000] {
        let (_dir, controller) = build_store(n);
        let predicate = StringTriple::new("", term("p", 3), "");
        group.throughput(Throughput::Elements(n as u64));
        group.bench_with_input(BenchmarkId::new("all", n), &controller, |b, c| {
            b.iter(|| {
                c.get_version_materialized(&StringTriple::any(), 0, VERSIONS - 1)
                    .unwrap()
                    .count()
            })
        });
        group.bench_with_input(BenchmarkId::new("offset", n), &controller, |b, c| {
            b.iter(|| {
                c.get_version_materialized(&StringTriple::any(), n / 2, VERSIONS - 1)
                    .unwrap()
                    .take(10)
                    .count()
            })
        });
        group.bench_with_input(BenchmarkId::new("predicate", n), &controller, |b, c| {
            b.iter(|| c.get_version_materialized(&predicate, 0, 5).unwrap().count())
        });
    }
    group.finish();
}

fn bench_delta_materialized(c: &mut Criterion) {
    let mut group = c.benchmark_group("delta_materialized");
    for n in [1_000, 10_000] {
        let (_dir, controller) = build_store(n);
        for (start, end) in [(0, VERSIONS - 1), (3, VERSIONS - 1)] {
            let id = format!("{n}/{start}-{end}");
            group.bench_with_input(BenchmarkId::new("delta", id), &controller, |b, c| {
                b.iter(|| {
                    c.get_delta_materialized(&StringTriple::any(), 0, start, end, DiffStrategy::Auto)
                        .unwrap()
                        .count()
                })
            });
        }
    }
    group.finish();
}

fn bench_version(c: &mut Criterion) {
    let (_dir, controller) = build_store(1_000);
    c.bench_function("version/1000", |b| {
        b.iter(|| controller.get_version(&StringTriple::any(), 0).unwrap().count())
    });
}

fn bench_append(c: &mut Criterion) {
    let mut group = c.benchmark_group("append");
    group.sample_size(10);
    for n in [1_000, 5_000] {
        group.throughput(Throughput::Elements(n as u64));
        group.bench_function(BenchmarkId::new("build", n), |b| b.iter(|| build_store(n)));
    }
    group.finish();
}

criterion_group!(
    benches,
    bench_version_materialized,
    bench_delta_materialized,
    bench_version,
    bench_append
);
criterion_main!(benches);
