//! Concurrent readers and writers against one index: distinct transactions may
//! run from separate threads because `BTree` pins pages per-call rather than
//! holding them across the whole transaction.

use std::sync::Arc;
use std::thread;

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
fn concurrent_inserts_from_multiple_threads_are_all_visible() {
    let dir = TempDir::new().unwrap();
    let bt = Arc::new(BTree::create(dir.path(), Domain::ascending(1), false, 4096).unwrap());

    let handles: Vec<_> = (0..4)
        .map(|t| {
            let bt = Arc::clone(&bt);
            thread::spawn(move || {
                let txn = bt.begin();
                for i in 0..50u32 {
                    let k = t * 50 + i;
                    bt.insert(&txn, key(k), oid(k)).unwrap();
                }
                bt.commit(&txn).unwrap();
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }

    assert!(bt.check_tree().unwrap());
    let txn = bt.begin();
    for k in 0..200u32 {
        assert_eq!(bt.keyval_search(&txn, key(k)).unwrap(), vec![oid(k)]);
    }
}

#[test]
fn reader_sees_a_consistent_snapshot_while_writer_inserts_disjoint_keys() {
    let dir = TempDir::new().unwrap();
    let bt = Arc::new(BTree::create(dir.path(), Domain::ascending(1), false, 4096).unwrap());
    {
        let txn = bt.begin();
        for i in 0..100u32 {
            bt.insert(&txn, key(i), oid(i)).unwrap();
        }
        bt.commit(&txn).unwrap();
    }

    let writer = {
        let bt = Arc::clone(&bt);
        thread::spawn(move || {
            let txn = bt.begin();
            for i in 100..200u32 {
                bt.insert(&txn, key(i), oid(i)).unwrap();
            }
            bt.commit(&txn).unwrap();
        })
    };
    let reader = {
        let bt = Arc::clone(&bt);
        thread::spawn(move || {
            let txn = bt.begin();
            for i in 0..100u32 {
                assert_eq!(bt.keyval_search(&txn, key(i)).unwrap(), vec![oid(i)]);
            }
        })
    };
    writer.join().unwrap();
    reader.join().unwrap();

    assert!(bt.check_tree().unwrap());
}
