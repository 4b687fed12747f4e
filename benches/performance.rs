//! Performance benchmarks for the revision store.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use serde_json::json;
use strata::{Document, Metadata, PurgeMode, Query, RevisionStore, StoreConfig};
use tempfile::TempDir;

fn concept(id: usize, version: usize) -> Document {
    Document::new("concept", id.to_string())
        .with_field("term", format!("term {}", version))
        .with_field("rank", json!(id))
}

fn commit(store: &RevisionStore, branch: &str, docs: impl IntoIterator<Item = Document>) {
    let mut staging = store.prepare_commit();
    for doc in docs {
        staging.stage_change(doc);
    }
    staging
        .commit("", branch, store.current_time(), "bench", "")
        .unwrap();
}

/// Benchmark committing batches of varying size
fn bench_commit(c: &mut Criterion) {
    let mut group = c.benchmark_group("commit");

    for batch in [1, 10, 100] {
        group.bench_with_input(BenchmarkId::new("batch", batch), &batch, |b, &batch| {
            let store = RevisionStore::in_memory();
            let mut version = 0;
            b.iter(|| {
                version += 1;
                commit(&store, "MAIN", (0..batch).map(|id| concept(id, version)));
            });
        });
    }

    group.finish();
}

/// Benchmark point reads with a growing number of superseded revisions
fn bench_read_with_history(c: &mut Criterion) {
    let mut group = c.benchmark_group("read_with_history");

    for versions in [10, 100, 1000] {
        group.bench_with_input(
            BenchmarkId::new("versions", versions),
            &versions,
            |b, &versions| {
                let store = RevisionStore::in_memory();
                for version in 0..versions {
                    commit(&store, "MAIN", [concept(1, version)]);
                }

                b.iter(|| {
                    black_box(store.read("MAIN", |s| Ok(s.get("concept", "1"))).unwrap());
                });
            },
        );
    }

    group.finish();
}

/// Benchmark reads on nested branches (more segments per view)
fn bench_read_nested_branch(c: &mut Criterion) {
    let mut group = c.benchmark_group("read_nested_branch");

    for depth in [1, 5, 20] {
        group.bench_with_input(BenchmarkId::new("depth", depth), &depth, |b, &depth| {
            let store = RevisionStore::in_memory();
            commit(&store, "MAIN", (0..100).map(|id| concept(id, 0)));

            let mut path = "MAIN".to_string();
            for level in 0..depth {
                path = store
                    .create_branch(&path, &format!("level-{}", level), Metadata::new())
                    .unwrap();
                commit(&store, &path, [concept(level, level + 1)]);
            }

            b.iter(|| {
                black_box(
                    store
                        .read(&path, |s| Ok(s.search(&Query::select("concept")).total))
                        .unwrap(),
                );
            });
        });
    }

    group.finish();
}

/// Benchmark squash merges of a branch with varying change counts
fn bench_squash_merge(c: &mut Criterion) {
    let mut group = c.benchmark_group("squash_merge");

    for changes in [10, 100] {
        group.bench_with_input(
            BenchmarkId::new("changes", changes),
            &changes,
            |b, &changes| {
                let store = RevisionStore::in_memory();
                commit(&store, "MAIN", (0..changes).map(|id| concept(id, 0)));
                let mut version = 0;

                b.iter(|| {
                    version += 1;
                    let name = format!("feature-{}", version);
                    let path = store.create_branch("MAIN", &name, Metadata::new()).unwrap();
                    commit(&store, &path, (0..changes).map(|id| concept(id, version)));
                    black_box(store.merge(&path, "MAIN", "", true).unwrap());
                });
            },
        );
    }

    group.finish();
}

/// Benchmark snapshot sync and purge on a persistent store
fn bench_sync_and_purge(c: &mut Criterion) {
    let dir = TempDir::new().unwrap();
    let store = RevisionStore::open_or_create(StoreConfig::at(dir.path().join("store"))).unwrap();
    for version in 0..200 {
        commit(&store, "MAIN", (0..10).map(|id| concept(id, version)));
    }

    c.bench_function("sync_2000_revisions", |b| {
        b.iter(|| store.sync().unwrap());
    });

    c.bench_function("purge_latest", |b| {
        let mut version = 200;
        b.iter(|| {
            version += 1;
            commit(&store, "MAIN", (0..10).map(|id| concept(id, version)));
            black_box(store.purge("MAIN", PurgeMode::Latest).unwrap());
        });
    });
}

criterion_group!(
    benches,
    bench_commit,
    bench_read_with_history,
    bench_read_nested_branch,
    bench_squash_merge,
    bench_sync_and_purge,
);

criterion_main!(benches);
