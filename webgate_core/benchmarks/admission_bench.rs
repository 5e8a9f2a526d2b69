use std::sync::Arc;
use std::thread;
use std::time::Duration;

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use webgate_core::{AuthorizationStore, ManualClock};

fn populated_store(dir: &tempfile::TempDir, entries: u32) -> Arc<AuthorizationStore> {
    let store = Arc::new(AuthorizationStore::open(
        dir.path().join("auth_config.txt"),
        Arc::new(ManualClock::new(1_700_000_000_000)),
    ));
    for n in 0..entries {
        store.authorize(
            &format!("10.{}.{}.{}", (n >> 16) & 0xff, (n >> 8) & 0xff, n & 0xff),
            Duration::from_secs(86_400),
        );
    }
    store
}

fn bench_admission(c: &mut Criterion) {
    let mut group = c.benchmark_group("admission");

    for entries in [16u32, 256, 1024] {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = populated_store(&dir, entries);
        group.bench_with_input(
            BenchmarkId::new("is_authorized", entries),
            &store,
            |b, store| {
                b.iter(|| {
                    store.is_authorized("10.0.0.1") && !store.is_authorized("192.0.2.1")
                })
            },
        );
    }

    let dir = tempfile::tempdir().expect("tempdir");
    let store = populated_store(&dir, 256);
    group.bench_function("is_authorized_contended", |b| {
        b.iter(|| {
            let handles: Vec<_> = (0..4)
                .map(|_| {
                    let store = Arc::clone(&store);
                    thread::spawn(move || {
                        (0..64)
                            .filter(|_| store.is_authorized("10.0.0.1"))
                            .count()
                    })
                })
                .collect();
            handles
                .into_iter()
                .map(|h| h.join().expect("bench worker"))
                .sum::<usize>()
        })
    });

    group.finish();
}

criterion_group!(admission_benches, bench_admission);
criterion_main!(admission_benches);
