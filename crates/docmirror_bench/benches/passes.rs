//! Sync pass benchmarks: full reconciliation against incremental scans.

use criterion::{
    black_box, criterion_group, criterion_main, BatchSize, BenchmarkId, Criterion, Throughput,
};
use docmirror_bench::{mutate_random, rename_random, STORE_SIZES};
use docmirror_core::FieldSet;
use docmirror_engine::{MemoryStateStore, SyncConfig, SyncEngine};
use docmirror_targets::{MemoryIndexTarget, SqliteTarget, SqliteTargetConfig};
use docmirror_testkit::{l_predicate, person_predicate, PeopleFixture};

fn engine() -> SyncEngine<MemoryStateStore> {
    SyncEngine::new(SyncConfig::new(), MemoryStateStore::new()).unwrap()
}

fn projection() -> FieldSet {
    FieldSet::named(["Firstname", "Lastname", "City"])
}

/// Benchmark a first pass into an empty in-memory target.
fn bench_full_pass(c: &mut Criterion) {
    let mut group = c.benchmark_group("full_pass");
    group.sample_size(10);

    for size in STORE_SIZES.iter() {
        let fixture = PeopleFixture::populate(*size, size / 10);
        group.throughput(Throughput::Elements(*size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, _| {
            b.iter_batched(
                || (engine(), MemoryIndexTarget::new("people", projection())),
                |(engine, target)| {
                    let result = engine
                        .sync(&fixture.store, &person_predicate(), &target)
                        .unwrap();
                    black_box(result.added)
                },
                BatchSize::LargeInput,
            );
        });
    }
    group.finish();
}

/// Benchmark incremental passes that pick up 1% of the store.
fn bench_incremental_pass(c: &mut Criterion) {
    let mut group = c.benchmark_group("incremental_pass");

    for size in STORE_SIZES.iter() {
        let fixture = PeopleFixture::populate(*size, size / 10);
        let target = MemoryIndexTarget::new("people", projection());
        let engine = engine();
        engine
            .sync(&fixture.store, &person_predicate(), &target)
            .unwrap();
        let changes = (size / 100).max(1);

        group.throughput(Throughput::Elements(changes as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, _| {
            b.iter_batched(
                || mutate_random(&fixture.store, &fixture.people, changes),
                |()| {
                    let result = engine
                        .sync(&fixture.store, &person_predicate(), &target)
                        .unwrap();
                    black_box(result.updated)
                },
                BatchSize::PerIteration,
            );
        });
    }
    group.finish();
}

/// Benchmark incremental passes where changes move documents in and
/// out of a narrow predicate.
fn bench_membership_churn(c: &mut Criterion) {
    let mut group = c.benchmark_group("membership_churn");
    let size = 10_000;
    let fixture = PeopleFixture::populate(size, 0);
    let target = MemoryIndexTarget::new("l_people", projection());
    let engine = engine();
    engine.sync(&fixture.store, &l_predicate(), &target).unwrap();

    for changes in [10usize, 100, 1_000].iter() {
        group.throughput(Throughput::Elements(*changes as u64));
        group.bench_with_input(
            BenchmarkId::from_parameter(changes),
            changes,
            |b, &changes| {
                b.iter_batched(
                    || rename_random(&fixture.store, &fixture.people, changes),
                    |()| {
                        let result = engine
                            .sync(&fixture.store, &l_predicate(), &target)
                            .unwrap();
                        black_box(result.applied())
                    },
                    BatchSize::PerIteration,
                );
            },
        );
    }
    group.finish();
}

/// Benchmark predicate flips, each forcing a full reconciliation.
fn bench_predicate_flip(c: &mut Criterion) {
    let mut group = c.benchmark_group("predicate_flip");
    group.sample_size(10);
    let fixture = PeopleFixture::populate(10_000, 0);
    let target = MemoryIndexTarget::new("people", projection());
    let engine = engine();
    let predicates = [person_predicate(), l_predicate()];
    let mut turn = 0usize;

    group.bench_function("narrow_widen", |b| {
        b.iter(|| {
            turn += 1;
            let result = engine
                .sync(&fixture.store, &predicates[turn % 2], &target)
                .unwrap();
            black_box(result.applied())
        });
    });
    group.finish();
}

/// Benchmark a first pass into an in-memory SQLite table (one transaction).
fn bench_sqlite_full_pass(c: &mut Criterion) {
    let mut group = c.benchmark_group("sqlite_full_pass");
    group.sample_size(10);

    for size in [1_000usize, 10_000].iter() {
        let fixture = PeopleFixture::populate(*size, 0);
        group.throughput(Throughput::Elements(*size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, _| {
            b.iter_batched(
                || {
                    let config =
                        SqliteTargetConfig::in_memory("people").with_projection(projection());
                    (engine(), SqliteTarget::open(config).unwrap())
                },
                |(engine, target)| {
                    let result = engine
                        .sync(&fixture.store, &person_predicate(), &target)
                        .unwrap();
                    black_box(result.added)
                },
                BatchSize::LargeInput,
            );
        });
    }
    group.finish();
}

criterion_group!(
    benches,
    bench_full_pass,
    bench_incremental_pass,
    bench_membership_churn,
    bench_predicate_flip,
    bench_sqlite_full_pass,
);
criterion_main!(benches);
