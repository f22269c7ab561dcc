//! Crash-recovery idempotence: reopening an index replays the WAL and must
//! reproduce exactly the committed state, discarding anything an aborted or
//! never-committed transaction left behind.

use prefix_btree::btree::BTree;
use prefix_btree::types::{Domain, Key, Oid};
use tempfile::TempDir;

fn key(n: u32) -> Key {
    Key(vec![Some(n.to_be_bytes().to_vec())])
}

fn oid(n: u32) -> Oid {
    Oid { volid: 0, pageid: 0, slotid: n as i16 }
}

#[test]
fn committed_inserts_survive_reopen() {
    let dir = TempDir::new().unwrap();
    {
        let bt = BTree::create(dir.path(), Domain::ascending(1), false, 4096).unwrap();
        let txn = bt.begin();
        for i in 0..50u32 {
            bt.insert(&txn, key(i), oid(i)).unwrap();
        }
        bt.commit(&txn).unwrap();
    }

    let bt = BTree::open(dir.path(), 4096).unwrap();
    let txn = bt.begin();
    for i in 0..50u32 {
        assert_eq!(bt.keyval_search(&txn, key(i)).unwrap(), vec![oid(i)]);
    }
    assert!(bt.check_tree().unwrap());
}

#[test]
fn reopen_after_split_preserves_tree_shape_and_contents() {
    let dir = TempDir::new().unwrap();
    {
        let bt = BTree::create(dir.path(), Domain::ascending(1), false, 1024).unwrap();
        let txn = bt.begin();
        for i in 0..200u32 {
            bt.insert(&txn, key(i), oid(i)).unwrap();
        }
        bt.commit(&txn).unwrap();
        assert!(bt.check_tree().unwrap());
    }

    let bt = BTree::open(dir.path(), 1024).unwrap();
    assert!(bt.check_tree().unwrap());
    let txn = bt.begin();
    for i in 0..200u32 {
        assert_eq!(bt.keyval_search(&txn, key(i)).unwrap(), vec![oid(i)]);
    }
}

#[test]
fn aborted_transaction_does_not_survive_reopen() {
    let dir = TempDir::new().unwrap();
    {
        let bt = BTree::create(dir.path(), Domain::ascending(1), false, 4096).unwrap();
        let txn = bt.begin();
        bt.insert(&txn, key(1), oid(1)).unwrap();
        bt.commit(&txn).unwrap();

        let txn2 = bt.begin();
        bt.insert(&txn2, key(2), oid(2)).unwrap();
        bt.abort(&txn2).unwrap();
    }

    let bt = BTree::open(dir.path(), 4096).unwrap();
    let txn = bt.begin();
    assert_eq!(bt.keyval_search(&txn, key(1)).unwrap(), vec![oid(1)]);
    assert!(bt.keyval_search(&txn, key(2)).unwrap().is_empty());
}

#[test]
fn deletes_survive_reopen_alongside_surviving_keys() {
    let dir = TempDir::new().unwrap();
    {
        let bt = BTree::create(dir.path(), Domain::ascending(1), false, 4096).unwrap();
        let txn = bt.begin();
        for i in 0..30u32 {
            bt.insert(&txn, key(i), oid(i)).unwrap();
        }
        for i in 0..10u32 {
            bt.delete(&txn, key(i), oid(i)).unwrap();
        }
        bt.commit(&txn).unwrap();
    }

    let bt = BTree::open(dir.path(), 4096).unwrap();
    let txn = bt.begin();
    for i in 0..10u32 {
        assert!(bt.keyval_search(&txn, key(i)).unwrap().is_empty());
    }
    for i in 10..30u32 {
        assert_eq!(bt.keyval_search(&txn, key(i)).unwrap(), vec![oid(i)]);
    }
}
