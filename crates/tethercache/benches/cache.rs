use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use tempfile::TempDir;
use tethercache::{CacheConfig, Category, FileCache};

fn open_cache(dir: &TempDir) -> FileCache {
    FileCache::open(CacheConfig {
        root: dir.path().to_path_buf(),
        ..CacheConfig::default()
    })
    .unwrap()
}

fn bench_set(c: &mut Criterion) {
    let mut group = c.benchmark_group("cache_set");
    group.sample_size(50);
    group.throughput(Throughput::Elements(1));

    group.bench_function("set_1kb", |b| {
        let dir = TempDir::new().unwrap();
        let cache = open_cache(&dir);
        let payload = vec![b'x'; 1024];

        let mut counter = 0usize;
        b.iter(|| {
            // Rotate over a small key set so renames hit existing files too.
            let key = format!("bench-{}", counter % 16);
            black_box(cache.set(&key, &payload, None, Category::General));
            counter += 1;
        });
    });

    group.finish();
}

fn bench_get_hit(c: &mut Criterion) {
    let mut group = c.benchmark_group("cache_get");
    group.sample_size(50);
    group.throughput(Throughput::Elements(1));

    group.bench_function("get_1kb_hit", |b| {
        let dir = TempDir::new().unwrap();
        let cache = open_cache(&dir);
        let payload = vec![b'x'; 1024];

        let keys: Vec<String> = (0..100).map(|i| format!("bench-{}", i)).collect();
        for key in &keys {
            cache.set(key, &payload, None, Category::General);
        }

        let mut counter = 0usize;
        b.iter(|| {
            black_box(cache.get(&keys[counter % 100], Category::General));
            counter += 1;
        });
    });

    group.finish();
}

fn bench_get_miss(c: &mut Criterion) {
    let mut group = c.benchmark_group("cache_miss");
    group.sample_size(50);
    group.throughput(Throughput::Elements(1));

    group.bench_function("get_absent", |b| {
        let dir = TempDir::new().unwrap();
        let cache = open_cache(&dir);

        let mut counter = 0usize;
        b.iter(|| {
            let key = format!("absent-{}", counter % 100);
            black_box(cache.get(&key, Category::General));
            counter += 1;
        });
    });

    group.finish();
}

criterion_group!(benches, bench_set, bench_get_hit, bench_get_miss);
criterion_main!(benches);
