//! Literal end-to-end scenarios driving `BTree` through small page sizes
//! chosen to force the splits/merges/overflow paths the scenarios describe.

use prefix_btree::btree::BTree;
use prefix_btree::error::QSError;
use prefix_btree::record::UniqueStats;
use prefix_btree::types::{Domain, Key, Oid, RangeKind};
use tempfile::TempDir;

fn key(n: u32) -> Key {
    Key(vec![Some(n.to_be_bytes().to_vec())])
}

fn oid(slot: i16) -> Oid {
    Oid { volid: 0, pageid: 1, slotid: slot }
}

#[test]
fn s1_unique_index_three_inserts_find_and_stats() {
    let dir = TempDir::new().unwrap();
    let bt = BTree::create(dir.path(), Domain::ascending(1), true, 4096).unwrap();
    let txn = bt.begin();
    bt.insert(&txn, key(1), oid(1)).unwrap();
    bt.insert(&txn, key(2), oid(2)).unwrap();
    bt.insert(&txn, key(3), oid(3)).unwrap();
    bt.commit(&txn).unwrap();

    let txn = bt.begin();
    assert_eq!(bt.find_unique(&txn, key(2)).unwrap(), Some(oid(2)));
    let stats = bt.get_stats().unwrap();
    assert_eq!(stats, UniqueStats { num_oids: 3, num_nulls: 0, num_keys: 3 });
}

#[test]
fn s2_duplicate_key_in_unique_index_rejected_and_tree_unchanged() {
    let dir = TempDir::new().unwrap();
    let bt = BTree::create(dir.path(), Domain::ascending(1), true, 4096).unwrap();
    let txn = bt.begin();
    bt.insert(&txn, key(1), oid(1)).unwrap();
    bt.insert(&txn, key(2), oid(2)).unwrap();
    bt.insert(&txn, key(3), oid(3)).unwrap();

    let err = bt.insert(&txn, key(2), oid(4));
    assert!(matches!(err, Err(QSError::UniqueViolation(_))));

    let stats = bt.get_stats().unwrap();
    assert_eq!(stats, UniqueStats { num_oids: 3, num_nulls: 0, num_keys: 3 });
    assert_eq!(bt.find_unique(&txn, key(2)).unwrap(), Some(oid(2)));
}

#[test]
fn s3_range_search_on_a_split_non_unique_index() {
    let dir = TempDir::new().unwrap();
    // Small pages force a split well before 10 keys land.
    let bt = BTree::create(dir.path(), Domain::ascending(1), false, 1024).unwrap();
    let txn = bt.begin();
    for i in 1..=10u32 {
        bt.insert(&txn, key(i), oid(i as i16)).unwrap();
    }
    bt.commit(&txn).unwrap();

    let txn = bt.begin();
    let oids = bt.range_search(&txn, RangeKind::GeLe, Some(key(3)), Some(key(7)), None).unwrap();
    assert_eq!(oids, vec![oid(3), oid(4), oid(5), oid(6), oid(7)]);
    assert!(bt.check_tree().unwrap());
}

#[test]
fn s4_delete_then_range_search_reflects_removal() {
    let dir = TempDir::new().unwrap();
    let bt = BTree::create(dir.path(), Domain::ascending(1), false, 1024).unwrap();
    let txn = bt.begin();
    for i in 1..=10u32 {
        bt.insert(&txn, key(i), oid(i as i16)).unwrap();
    }
    bt.delete(&txn, key(5), oid(5)).unwrap();
    bt.commit(&txn).unwrap();

    let txn = bt.begin();
    let oids = bt.range_search(&txn, RangeKind::GeLe, Some(key(3)), Some(key(7)), None).unwrap();
    assert_eq!(oids, vec![oid(3), oid(4), oid(6), oid(7)]);
}

#[test]
fn s5_oversized_key_routes_through_the_overflow_key_file() {
    let dir = TempDir::new().unwrap();
    let bt = BTree::create(dir.path(), Domain::ascending(1), true, 16 * 1024).unwrap();
    let big_key = Key(vec![Some(vec![0x42u8; 12_000])]);
    let target = oid(1);

    let txn = bt.begin();
    bt.insert(&txn, big_key.clone(), target).unwrap();
    bt.commit(&txn).unwrap();

    let txn = bt.begin();
    assert_eq!(bt.find_unique(&txn, big_key).unwrap(), Some(target));
}

#[test]
fn s6_wide_oid_list_under_one_key_returns_every_oid_exactly_once() {
    let dir = TempDir::new().unwrap();
    let bt = BTree::create(dir.path(), Domain::ascending(1), false, 4096).unwrap();
    let k = key(1);

    let txn = bt.begin();
    for i in 0..1000u32 {
        let oid = Oid { volid: 0, pageid: (i / 30_000) as i32, slotid: (i % 30_000) as i16 };
        bt.insert(&txn, k.clone(), oid).unwrap();
    }
    bt.commit(&txn).unwrap();

    let txn = bt.begin();
    let oids = bt.keyval_search(&txn, k).unwrap();
    assert_eq!(oids.len(), 1000);
    let mut distinct = oids.clone();
    distinct.sort();
    distinct.dedup();
    assert_eq!(distinct.len(), 1000, "every oid must be returned exactly once");
}
