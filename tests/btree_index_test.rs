use std::sync::Arc;
use std::thread;

use anyhow::Result;

use karstdb::common::types::Rid;
use karstdb::index::btree::BPlusTree;
use karstdb::storage::page::GenericKey;

mod common;
use common::create_test_buffer_pool;

type Key = GenericKey<8>;

fn key(v: i64) -> Key {
    Key::from_i64(v)
}

fn rid(v: i64) -> Rid {
    Rid::new(v as i32, v as u32)
}

/// Collect every key in leaf-chain order.
fn scan_keys(tree: &BPlusTree<8>) -> Result<Vec<i64>> {
    let mut keys = Vec::new();
    for item in tree.iter()? {
        let (k, _) = item?;
        keys.push(k.to_i64());
    }
    Ok(keys)
}

#[test]
fn test_insert_and_get() -> Result<()> {
    let (buffer_pool, _temp_file) = create_test_buffer_pool(50, 2)?;
    let tree = BPlusTree::<8>::new(buffer_pool, 4, 4)?;

    assert!(tree.is_empty()?);
    assert!(tree.insert(&key(42), rid(42))?);
    assert!(!tree.is_empty()?);
    assert_eq!(tree.get(&key(42))?, Some(rid(42)));
    assert_eq!(tree.get(&key(7))?, None);

    // Unique keys: the first insert wins.
    assert!(!tree.insert(&key(42), rid(999))?);
    assert_eq!(tree.get(&key(42))?, Some(rid(42)));

    Ok(())
}

#[test]
fn test_sequential_insert_and_scan() -> Result<()> {
    let (buffer_pool, _temp_file) = create_test_buffer_pool(100, 2)?;
    let tree = BPlusTree::<8>::new(buffer_pool, 4, 4)?;

    for v in 1..=99i64 {
        assert!(tree.insert(&key(v), rid(v))?, "insert {} failed", v);
    }
    for v in 1..=99i64 {
        assert_eq!(tree.get(&key(v))?, Some(rid(v)), "lookup {} failed", v);
    }

    let keys = scan_keys(&tree)?;
    assert_eq!(keys, (1..=99).collect::<Vec<i64>>());
    tree.check_integrity()?;

    Ok(())
}

#[test]
fn test_reverse_and_shuffled_inserts() -> Result<()> {
    let (buffer_pool, _temp_file) = create_test_buffer_pool(100, 2)?;
    let tree = BPlusTree::<8>::new(buffer_pool, 4, 4)?;

    // A deterministic shuffle: multiples of a coprime step modulo 101.
    for i in 0..101i64 {
        let v = (i * 37) % 101;
        assert!(tree.insert(&key(v), rid(v))?);
    }
    let keys = scan_keys(&tree)?;
    assert_eq!(keys, (0..=100).collect::<Vec<i64>>());
    tree.check_integrity()?;

    Ok(())
}

#[test]
fn test_iter_from_key() -> Result<()> {
    let (buffer_pool, _temp_file) = create_test_buffer_pool(100, 2)?;
    let tree = BPlusTree::<8>::new(buffer_pool, 4, 4)?;

    for v in (2..=40i64).step_by(2) {
        tree.insert(&key(v), rid(v))?;
    }

    // Start between keys: the iterator begins at the next present key.
    let mut iter = tree.iter_from(&key(11))?;
    let (first, _) = iter.next().unwrap()?;
    assert_eq!(first.to_i64(), 12);

    let rest: Vec<i64> = iter.map(|item| item.map(|(k, _)| k.to_i64()).unwrap()).collect();
    assert_eq!(rest, (14..=40).step_by(2).collect::<Vec<i64>>());

    Ok(())
}

#[test]
fn test_range_scan() -> Result<()> {
    let (buffer_pool, _temp_file) = create_test_buffer_pool(100, 2)?;
    let tree = BPlusTree::<8>::new(buffer_pool, 4, 4)?;

    for v in 1..=50i64 {
        tree.insert(&key(v), rid(v))?;
    }

    let rids = tree.range_scan(&key(10), &key(20))?;
    assert_eq!(rids, (10..=20).map(rid).collect::<Vec<Rid>>());

    // Inverted bounds yield nothing.
    assert!(tree.range_scan(&key(20), &key(10))?.is_empty());

    Ok(())
}

#[test]
fn test_remove_and_silent_missing() -> Result<()> {
    let (buffer_pool, _temp_file) = create_test_buffer_pool(100, 2)?;
    let tree = BPlusTree::<8>::new(buffer_pool, 4, 4)?;

    for v in 1..=20i64 {
        tree.insert(&key(v), rid(v))?;
    }

    tree.remove(&key(10))?;
    assert_eq!(tree.get(&key(10))?, None);

    // Removing an absent key is a silent no-op.
    tree.remove(&key(10))?;
    tree.remove(&key(1000))?;

    let keys = scan_keys(&tree)?;
    assert_eq!(keys, (1..=20).filter(|&v| v != 10).collect::<Vec<i64>>());

    Ok(())
}

#[test]
fn test_delete_everything_leaves_empty_root_leaf() -> Result<()> {
    let (buffer_pool, _temp_file) = create_test_buffer_pool(100, 2)?;
    let tree = BPlusTree::<8>::new(buffer_pool, 4, 4)?;

    for v in 1..=60i64 {
        tree.insert(&key(v), rid(v))?;
    }
    // Delete in an order that exercises merges from both ends.
    for v in (1..=30i64).rev() {
        tree.remove(&key(v))?;
    }
    for v in 31..=60i64 {
        tree.remove(&key(v))?;
    }

    assert!(tree.is_empty()?);
    assert!(scan_keys(&tree)?.is_empty());

    // The tree still works after being emptied.
    assert!(tree.insert(&key(5), rid(5))?);
    assert_eq!(tree.get(&key(5))?, Some(rid(5)));

    Ok(())
}

#[test]
fn test_interleaved_insert_remove() -> Result<()> {
    let (buffer_pool, _temp_file) = create_test_buffer_pool(100, 2)?;
    let tree = BPlusTree::<8>::new(buffer_pool, 5, 5)?;

    for v in 1..=100i64 {
        tree.insert(&key(v), rid(v))?;
    }
    for v in (1..=100i64).filter(|v| v % 3 == 0) {
        tree.remove(&key(v))?;
    }
    for v in 101..=120i64 {
        tree.insert(&key(v), rid(v))?;
    }

    let expected: Vec<i64> = (1..=100)
        .filter(|v| v % 3 != 0)
        .chain(101..=120)
        .collect();
    assert_eq!(scan_keys(&tree)?, expected);
    tree.check_integrity()?;
    for &v in &expected {
        assert_eq!(tree.get(&key(v))?, Some(rid(v)));
    }

    Ok(())
}

#[test]
fn test_concurrent_disjoint_inserts() -> Result<()> {
    let (buffer_pool, _temp_file) = create_test_buffer_pool(200, 2)?;
    let tree = Arc::new(BPlusTree::<8>::new(buffer_pool, 4, 4)?);

    let mut handles = Vec::new();
    for t in 0..2i64 {
        let tree = tree.clone();
        handles.push(thread::spawn(move || -> anyhow::Result<()> {
            // Thread 0 inserts odds, thread 1 inserts evens.
            for v in (1..=99i64).filter(|v| v % 2 == t) {
                assert!(tree.insert(&key(v), rid(v))?);
            }
            Ok(())
        }));
    }
    for handle in handles {
        handle.join().unwrap()?;
    }

    let keys = scan_keys(&tree)?;
    assert_eq!(keys, (1..=99).collect::<Vec<i64>>());
    tree.check_integrity()?;

    Ok(())
}

#[test]
fn test_concurrent_readers_and_writer() -> Result<()> {
    let (buffer_pool, _temp_file) = create_test_buffer_pool(200, 2)?;
    let tree = Arc::new(BPlusTree::<8>::new(buffer_pool, 6, 6)?);

    for v in 1..=200i64 {
        tree.insert(&key(v), rid(v))?;
    }

    let writer = {
        let tree = tree.clone();
        thread::spawn(move || -> anyhow::Result<()> {
            for v in 201..=300i64 {
                tree.insert(&key(v), rid(v))?;
            }
            Ok(())
        })
    };
    let reader = {
        let tree = tree.clone();
        thread::spawn(move || -> anyhow::Result<()> {
            for v in 1..=200i64 {
                assert_eq!(tree.get(&key(v))?, Some(rid(v)));
            }
            Ok(())
        })
    };
    writer.join().unwrap()?;
    reader.join().unwrap()?;

    assert_eq!(scan_keys(&tree)?, (1..=300).collect::<Vec<i64>>());
    tree.check_integrity()?;

    Ok(())
}
