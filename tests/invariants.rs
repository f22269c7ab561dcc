//! Structural invariants that must hold regardless of insert/delete order:
//! ordering within and across leaves, balance, and the insert/delete inverse.

use prefix_btree::btree::BTree;
use prefix_btree::types::{Domain, Key, Oid, RangeKind};
use tempfile::TempDir;

fn key(n: u32) -> Key {
    Key(vec![Some(n.to_be_bytes().to_vec())])
}

fn oid(n: u32) -> Oid {
    Oid { volid: 0, pageid: (n / 30_000) as i32, slotid: (n % 30_000) as i16 }
}

#[test]
fn order_invariant_holds_after_many_out_of_order_inserts() {
    let dir = TempDir::new().unwrap();
    let bt = BTree::create(dir.path(), Domain::ascending(1), false, 1024).unwrap();
    let txn = bt.begin();
    // A scrambled insertion order (odd-then-even) stresses the split point
    // logic differently than monotonically increasing keys would.
    let order: Vec<u32> = (0..300).step_by(2).chain((1..300).step_by(2)).collect();
    for &i in &order {
        bt.insert(&txn, key(i), oid(i)).unwrap();
    }
    bt.commit(&txn).unwrap();
    assert!(bt.check_tree().unwrap());

    let txn = bt.begin();
    let oids = bt.range_search(&txn, RangeKind::GeInf, Some(key(0)), None, None).unwrap();
    let expected: Vec<Oid> = (0..300u32).map(oid).collect();
    assert_eq!(oids, expected, "leaf chain must yield keys in ascending order");
}

#[test]
fn insert_delete_inverse_leaves_tree_structurally_empty() {
    let dir = TempDir::new().unwrap();
    let bt = BTree::create(dir.path(), Domain::ascending(1), true, 1024).unwrap();
    let txn = bt.begin();
    for i in 0..200u32 {
        bt.insert(&txn, key(i), oid(i)).unwrap();
    }
    for i in 0..200u32 {
        bt.delete(&txn, key(i), oid(i)).unwrap();
    }
    bt.commit(&txn).unwrap();

    assert!(bt.check_tree().unwrap());
    let stats = bt.get_stats().unwrap();
    assert_eq!(stats.num_oids, 0);
    assert_eq!(stats.num_nulls, 0);
    assert_eq!(stats.num_keys, 0);

    let txn = bt.begin();
    let remaining = bt.range_search(&txn, RangeKind::InfInf, None, None, None).unwrap();
    assert!(remaining.is_empty());
}

#[test]
fn split_then_merge_conserves_the_key_oid_set() {
    let dir = TempDir::new().unwrap();
    let bt = BTree::create(dir.path(), Domain::ascending(1), false, 1024).unwrap();
    let txn = bt.begin();
    for i in 0..200u32 {
        bt.insert(&txn, key(i), oid(i)).unwrap();
    }
    // Delete every other key to drive preemptive merges on the way back down.
    for i in (0..200u32).step_by(2) {
        bt.delete(&txn, key(i), oid(i)).unwrap();
    }
    bt.commit(&txn).unwrap();
    assert!(bt.check_tree().unwrap());

    let txn = bt.begin();
    let oids = bt.range_search(&txn, RangeKind::InfInf, None, None, None).unwrap();
    let expected: Vec<Oid> = (0..200u32).filter(|i| i % 2 == 1).map(oid).collect();
    assert_eq!(oids, expected);
}

#[test]
fn descending_column_reverses_scan_order() {
    let dir = TempDir::new().unwrap();
    let domain = Domain { descending: vec![true], reverse: false };
    let bt = BTree::create(dir.path(), domain, false, 4096).unwrap();
    let txn = bt.begin();
    for i in 0..20u32 {
        bt.insert(&txn, key(i), oid(i)).unwrap();
    }
    bt.commit(&txn).unwrap();

    let txn = bt.begin();
    let oids = bt.range_search(&txn, RangeKind::InfInf, None, None, None).unwrap();
    let expected: Vec<Oid> = (0..20u32).rev().map(oid).collect();
    assert_eq!(oids, expected, "descending column should yield a high-to-low scan");
}
