use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use rand::prelude::*;

use std::sync::Arc;

use karstdb::common::types::PageId;
use karstdb::storage::buffer::BufferPoolManager;

// Create temporary db for benchmarking
fn create_test_buffer_pool(pool_size: usize) -> Arc<BufferPoolManager> {
    let temp_file = tempfile::NamedTempFile::new().unwrap();
    let path = temp_file.path().to_str().unwrap().to_string();
    let buffer_pool = Arc::new(BufferPoolManager::new(pool_size, 2, path).unwrap());

    // Keep the temp file alive
    std::mem::forget(temp_file);

    buffer_pool
}

fn seed_pages(buffer_pool: &BufferPoolManager, count: usize) -> Vec<PageId> {
    let mut page_ids = Vec::with_capacity(count);
    for i in 0..count {
        let mut guard = buffer_pool.new_page().unwrap();
        guard.write()[0] = (i % 256) as u8;
        page_ids.push(guard.page_id());
    }
    page_ids
}

fn buffer_pool_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("BufferPool");

    for size in [10, 100, 1000].iter() {
        group.bench_with_input(BenchmarkId::new("sequential_access", size), size, |b, &size| {
            let buffer_pool = create_test_buffer_pool(size);
            let page_ids = seed_pages(&buffer_pool, size);

            b.iter(|| {
                for &page_id in &page_ids {
                    let guard = buffer_pool.fetch_page_read(page_id).unwrap();
                    criterion::black_box(guard[0]);
                }
            });
        });

        group.bench_with_input(BenchmarkId::new("random_access", size), size, |b, &size| {
            let buffer_pool = create_test_buffer_pool(size);
            let page_ids = seed_pages(&buffer_pool, size);

            let mut rng = rand::thread_rng();
            let random_indices: Vec<usize> =
                (0..size).map(|_| rng.gen_range(0..size)).collect();

            b.iter(|| {
                for &idx in &random_indices {
                    let guard = buffer_pool.fetch_page_read(page_ids[idx]).unwrap();
                    criterion::black_box(guard[0]);
                }
            });
        });

        // Working set twice the pool size, so the replacer has to evict.
        group.bench_with_input(BenchmarkId::new("evicting_access", size), size, |b, &size| {
            let buffer_pool = create_test_buffer_pool(size);
            let page_ids = seed_pages(&buffer_pool, size * 2);

            b.iter(|| {
                for &page_id in &page_ids {
                    let guard = buffer_pool.fetch_page_read(page_id).unwrap();
                    criterion::black_box(guard[0]);
                }
            });
        });
    }

    group.finish();
}

criterion_group!(benches, buffer_pool_benchmark);
criterion_main!(benches);
