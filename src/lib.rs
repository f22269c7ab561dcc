//! A recoverable, transactional prefix B+-tree index storage engine: ordered,
//! composite-key indexes over object identifiers, with top-down preemptive
//! split/merge, write-ahead undo/redo logging, next-key locking for scans, and
//! crash recovery by log replay.
//!
//! [`btree::BTree`] is the main entry point: create or open an index directory,
//! begin a [`btree::Txn`], and insert/delete/search keys against it.

use crate::btree::{BTree, Txn};
use crate::error::Result;
use crate::types::{Domain, Key, Oid, RangeKind};

pub mod btree;
pub mod buffer;
pub mod debug;
pub mod error;
pub mod io_engine;
pub mod lock_manager;
pub mod map_table;
pub mod node;
pub mod overflow;
pub mod page;
pub mod page_op;
pub mod rand;
pub mod record;
pub mod scan;
pub mod types;
pub mod utils;
pub mod wal;

/// A single-statement convenience wrapper around [`BTree`]: opens or creates an
/// index directory and runs one insert/delete/search as its own transaction.
/// Callers that need several operations in one transaction should use
/// [`BTree::begin`] directly instead.
pub struct Index {
    tree: BTree,
}

impl Index {
    pub fn create(dir: &std::path::Path, domain: Domain, unique: bool, page_size: usize) -> Result<Index> {
        Ok(Index {
            tree: BTree::create(dir, domain, unique, page_size)?,
        })
    }

    pub fn open(dir: &std::path::Path, page_size: usize) -> Result<Index> {
        Ok(Index { tree: BTree::open(dir, page_size)? })
    }

    pub fn insert(&self, key: Key, oid: Oid) -> Result<()> {
        let txn = self.tree.begin();
        self.tree.insert(&txn, key, oid)?;
        self.tree.commit(&txn)
    }

    pub fn delete(&self, key: Key, oid: Oid) -> Result<()> {
        let txn = self.tree.begin();
        self.tree.delete(&txn, key, oid)?;
        self.tree.commit(&txn)
    }

    pub fn find_unique(&self, key: Key) -> Result<Option<Oid>> {
        let txn = self.tree.begin();
        let found = self.tree.find_unique(&txn, key)?;
        self.tree.commit(&txn)?;
        Ok(found)
    }

    pub fn range_search(&self, kind: RangeKind, lower: Option<Key>, upper: Option<Key>) -> Result<Vec<Oid>> {
        let txn = self.tree.begin();
        let oids = self.tree.range_search(&txn, kind, lower, upper, None)?;
        self.tree.commit(&txn)?;
        Ok(oids)
    }

    /// Exposes the underlying tree for callers that need multi-statement
    /// transactions via [`BTree::begin`]/[`BTree::commit`]/[`BTree::abort`].
    pub fn tree(&self) -> &BTree {
        &self.tree
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn index_insert_and_find_roundtrips() {
        let dir = TempDir::new().unwrap();
        let idx = Index::create(dir.path(), Domain::ascending(1), true, 4096).unwrap();
        let key = Key(vec![Some(b"a".to_vec())]);
        let oid = Oid { volid: 0, pageid: 1, slotid: 1 };
        idx.insert(key.clone(), oid).unwrap();
        assert_eq!(idx.find_unique(key).unwrap(), Some(oid));
    }

    #[test]
    fn multi_statement_transaction_uses_the_underlying_tree() {
        let dir = TempDir::new().unwrap();
        let idx = Index::create(dir.path(), Domain::ascending(1), false, 4096).unwrap();
        let txn = idx.tree().begin();
        idx.tree().insert(&txn, Key(vec![Some(b"a".to_vec())]), Oid { volid: 0, pageid: 1, slotid: 1 }).unwrap();
        idx.tree().insert(&txn, Key(vec![Some(b"b".to_vec())]), Oid { volid: 0, pageid: 1, slotid: 2 }).unwrap();
        idx.tree().commit(&txn).unwrap();
        assert_eq!(idx.find_unique(Key(vec![Some(b"a".to_vec())])).unwrap().unwrap().slotid, 1);
    }
}
