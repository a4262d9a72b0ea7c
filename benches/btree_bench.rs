use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use rand::prelude::*;

use std::sync::Arc;

use karstdb::common::types::Rid;
use karstdb::index::btree::BPlusTree;
use karstdb::storage::buffer::BufferPoolManager;
use karstdb::storage::page::GenericKey;

fn create_test_tree(pool_size: usize) -> BPlusTree<8> {
    let temp_file = tempfile::NamedTempFile::new().unwrap();
    let path = temp_file.path().to_str().unwrap().to_string();
    let buffer_pool = Arc::new(BufferPoolManager::new(pool_size, 2, path).unwrap());

    // Keep the temp file alive
    std::mem::forget(temp_file);

    BPlusTree::new(buffer_pool, 64, 64).unwrap()
}

fn btree_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("BPlusTree");

    for count in [100i64, 1000, 10000].iter() {
        group.bench_with_input(BenchmarkId::new("insert", count), count, |b, &count| {
            b.iter_with_setup(
                || create_test_tree(256),
                |tree| {
                    for v in 0..count {
                        tree.insert(&GenericKey::from_i64(v), Rid::new(v as i32, 0)).unwrap();
                    }
                },
            );
        });

        group.bench_with_input(BenchmarkId::new("point_lookup", count), count, |b, &count| {
            let tree = create_test_tree(256);
            for v in 0..count {
                tree.insert(&GenericKey::from_i64(v), Rid::new(v as i32, 0)).unwrap();
            }
            let mut rng = rand::thread_rng();
            let probes: Vec<i64> = (0..1000).map(|_| rng.gen_range(0..count)).collect();

            b.iter(|| {
                for &v in &probes {
                    criterion::black_box(tree.get(&GenericKey::from_i64(v)).unwrap());
                }
            });
        });

        group.bench_with_input(BenchmarkId::new("full_scan", count), count, |b, &count| {
            let tree = create_test_tree(256);
            for v in 0..count {
                tree.insert(&GenericKey::from_i64(v), Rid::new(v as i32, 0)).unwrap();
            }

            b.iter(|| {
                let mut seen = 0usize;
                for item in tree.iter().unwrap() {
                    item.unwrap();
                    seen += 1;
                }
                assert_eq!(seen, count as usize);
            });
        });
    }

    group.finish();
}

criterion_group!(benches, btree_benchmark);
criterion_main!(benches);
