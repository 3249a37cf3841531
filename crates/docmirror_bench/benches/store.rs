//! Document store benchmarks: predicate evaluation and change scans.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use docmirror_bench::{mutate_random, STORE_SIZES};
use docmirror_core::{DocumentStore, FieldSet, Predicate};
use docmirror_store::Formula;
use docmirror_testkit::{l_predicate, person_predicate, PeopleFixture};

/// Benchmark formula compilation.
fn bench_compile(c: &mut Criterion) {
    let mut group = c.benchmark_group("formula_compile");
    let formulas = [
        ("simple", r#"Form = "Person""#),
        ("prefix", r#"Form = "Person" & StartsWith(Lastname; "L")"#),
        (
            "nested",
            r#"Form = "Person" & !(City = "Paris" | City = "Zurich") & Lastname = "Hopper" : "Turing""#,
        ),
    ];
    for (name, text) in formulas {
        group.bench_function(name, |b| {
            b.iter(|| Formula::compile(black_box(text)).unwrap());
        });
    }
    group.finish();
}

/// Benchmark `evaluate_all` across store sizes.
fn bench_evaluate_all(c: &mut Criterion) {
    let mut group = c.benchmark_group("evaluate_all");

    for size in STORE_SIZES.iter() {
        let fixture = PeopleFixture::populate(*size, size / 10);
        group.throughput(Throughput::Elements(*size as u64));
        group.bench_with_input(BenchmarkId::new("person", size), size, |b, _| {
            b.iter(|| fixture.store.evaluate_all(&person_predicate()).unwrap().len());
        });
        group.bench_with_input(BenchmarkId::new("l_prefix", size), size, |b, _| {
            b.iter(|| fixture.store.evaluate_all(&l_predicate()).unwrap().len());
        });
    }
    group.finish();
}

/// Benchmark `scan_since` with 1% of the store changed.
fn bench_scan_since(c: &mut Criterion) {
    let mut group = c.benchmark_group("scan_since");

    for size in STORE_SIZES.iter() {
        let fixture = PeopleFixture::populate(*size, 0);
        let since = fixture.store.current_watermark().unwrap();
        mutate_random(&fixture.store, &fixture.people, size / 100);
        let predicate = Predicate::new("@All");

        group.throughput(Throughput::Elements(*size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, _| {
            b.iter(|| {
                fixture
                    .store
                    .scan_since(&predicate, black_box(since))
                    .unwrap()
                    .entries
                    .len()
            });
        });
    }
    group.finish();
}

/// Benchmark projected fetches.
fn bench_fetch(c: &mut Criterion) {
    let fixture = PeopleFixture::populate(1_000, 0);
    let all = FieldSet::All;
    let narrow = FieldSet::named(["Lastname"]);
    let id = fixture.people[500];

    c.bench_function("fetch_all_fields", |b| {
        b.iter(|| fixture.store.fetch(black_box(id), &all).unwrap());
    });
    c.bench_function("fetch_one_field", |b| {
        b.iter(|| fixture.store.fetch(black_box(id), &narrow).unwrap());
    });
}

criterion_group!(
    benches,
    bench_compile,
    bench_evaluate_all,
    bench_scan_since,
    bench_fetch
);
criterion_main!(benches);
