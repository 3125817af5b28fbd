use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use rand::{Rng, SeedableRng, rngs::StdRng};
use snapfile::{SnapshotFile, SnapshotWriter, WriterOptions};
use std::sync::Arc;
use tempfile::NamedTempFile;

/// Generate `n` triples over a skewed vocabulary: few predicates, many subjects.
fn generate_triples(n: usize) -> Vec<(String, String, String)> {
    let mut rng = StdRng::seed_from_u64(42);
    (0..n)
        .map(|t| {
            let s = format!("<http://example.org/s/{}>", rng.random_range(0..(n / 4).max(1)));
            let p = format!("<http://example.org/p/{}>", t % 20);
            let o = if t % 3 == 0 {
                format!("<http://example.org/o/{}>", rng.random_range(0..n))
            } else {
                format!("\"value {t}\"")
            };
            (s, p, o)
        })
        .collect()
}

fn opts(zstd: bool) -> WriterOptions {
    WriterOptions {
        zstd,
        with_crc: true,
    }
}

fn write(path: &std::path::Path, triples: &[(String, String, String)], zstd: bool) {
    let mut w = SnapshotWriter::new(path, opts(zstd));
    for (s, p, o) in triples {
        w.add(s, p, o).unwrap();
    }
    w.finalize().unwrap();
}

fn bench_write(c: &mut Criterion) {
    let mut group = c.benchmark_group("write");
    for n in [100, 1_000, 10_000] {
        let triples = generate_triples(n);
        group.throughput(Throughput::Elements(n as u64));
        for zstd in [false, true] {
            let name = if zstd { "zstd" } else { "plain" };
            group.bench_with_input(BenchmarkId::new(name, n), &triples, |b, triples| {
                b.iter(|| {
                    let f = NamedTempFile::new().unwrap();
                    write(f.path(), triples, zstd);
                });
            });
        }
    }
    group.finish();
}

fn bench_open(c: &mut Criterion) {
    let mut group = c.benchmark_group("open");
    for n in [100, 1_000, 10_000] {
        let f = NamedTempFile::new().unwrap();
        write(f.path(), &generate_triples(n), false);
        group.throughput(Throughput::Elements(n as u64));
        group.bench_with_input(BenchmarkId::from_parameter(n), &f, |b, f| {
            b.iter(|| {
                SnapshotFile::open(f.path()).unwrap();
            });
        });
    }
    group.finish();
}

fn bench_search(c: &mut Criterion) {
    let mut group = c.benchmark_group("search");
    let n = 10_000;
    let f = NamedTempFile::new().unwrap();
    write(f.path(), &generate_triples(n), false);
    let file = Arc::new(SnapshotFile::open(f.path()).unwrap());
    let p = file.term_id("<http://example.org/p/3>").unwrap();
    // build the secondary orderings outside the timed loop
    for order in snapfile::TripleOrder::ALL {
        file.index(order);
    }
    group.bench_function("scan_all", |b| b.iter(|| file.search([0, 0, 0]).count()));
    group.bench_function("by_predicate", |b| b.iter(|| file.search([0, p, 0]).count()));
    group.bench_function("offset_half", |b| {
        b.iter(|| {
            let mut it = file.search([0, 0, 0]);
            it.goto(n / 2);
            it.next()
        })
    });
    group.finish();
}

criterion_group!(benches, bench_write, bench_open, bench_search);
criterion_main!(benches);
