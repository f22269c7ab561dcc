//! The top-down insert/delete drivers (§4.7, §4.8) and the read-side entry points
//! (§4.9, §4.10) tying together the page buffer, lock manager, log manager and
//! overflow-key file into one index handle.

use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use log::{debug, info, warn};

use crate::buffer::{Access, BufferPool, FreeHint, PinMode};
use crate::debug as dbg;
use crate::error::{QSError, Result};
use crate::io_engine::{FileNewOld, IoEngine};
use crate::lock_manager::{LockManager, LockMode};
use crate::node::{LeafPage, NonLeafPage};
use crate::overflow::OverflowKeyFile;
use crate::page::SlottedPage;
use crate::record::{
    oversized, KeyPayload, LeafRecord, NodeHeader, NonLeafRecord, OidPayload, RootHeader,
    UniqueStats, MAX_INLINE_OIDS,
};
use crate::page_op::{LeafMergePlan, LeafSplitPlan, NonLeafMergePlan, NonLeafSplitPlan};
use crate::scan::{keyval_bounds, lock_with_revalidation, Bounds, LockOutcome};
use crate::types::{Domain, Key, NodeType, Oid, RangeKind, Vpid, OID_BYTE_LEN};
use crate::utils::{read_u32, write_u32};
use crate::wal::{LogKind, LogRecord, Lsa, SysOpEnd, WalManager};

const OID_CHAIN_CAPACITY: usize = 256;

/// Reads a node's header, accounting for the root page carrying a `RootHeader`
/// (which embeds a `NodeHeader` as its first 15 bytes) rather than a bare one.
fn read_node_header(is_root: bool, page: &SlottedPage) -> NodeHeader {
    if is_root {
        RootHeader::decode(page.get_record(0)).header
    } else {
        NodeHeader::decode(page.get_record(0))
    }
}

/// Writes a node's header back, preserving the surrounding `RootHeader` fields
/// (domain, uniqueness, statistics, overflow file pointer) when this is the root.
fn write_node_header(is_root: bool, page: &mut SlottedPage, header: NodeHeader) {
    if is_root {
        let mut root = RootHeader::decode(page.get_record(0));
        root.header = header;
        page.update(0, &root.encode()).expect("root header update must always fit");
    } else {
        page.update(0, &header.encode()).expect("header update must always fit");
    }
}

/// An open transaction against one index: the lock manager's holder id, plus an
/// in-memory before-image log used to undo an abort without having to scan the
/// WAL file back to front.
pub struct Txn {
    tx_id: u64,
    undo: Mutex<Vec<(Vpid, Vec<u8>)>>,
    held: Mutex<Vec<Oid>>,
}

impl Txn {
    fn record_undo(&self, vpid: Vpid, before: Vec<u8>) {
        self.undo.lock().expect("undo log mutex poisoned").push((vpid, before));
    }

    fn record_held(&self, oid: Oid) {
        self.held.lock().expect("held-locks mutex poisoned").push(oid);
    }
}

pub struct BTree {
    buffer: BufferPool,
    wal: WalManager,
    locks: LockManager,
    overflow: OverflowKeyFile,
    root_vpid: Vpid,
    domain: Domain,
    ncols: usize,
    unique: bool,
    tx_seq: AtomicU64,
}

impl BTree {
    pub fn create(dir: &Path, domain: Domain, unique: bool, page_size: usize) -> Result<BTree> {
        fs::create_dir_all(dir)?;
        let io = IoEngine::open(&dir.join("data.db"), page_size)?;
        let buffer = BufferPool::new(io, 64);
        let root_vpid = buffer.io().create(1);
        let ncols = domain.arity();
        {
            let mut guard = buffer.pin(root_vpid, PinMode::New, Access::Write)?;
            let header = RootHeader {
                header: NodeHeader {
                    node_type: NodeType::Leaf,
                    key_cnt: 0,
                    max_key_len: 0,
                    next_vpid: Vpid::NULL,
                },
                ncols: ncols as u32,
                domain: domain.clone(),
                unique,
                stats: if unique {
                    UniqueStats {
                        num_oids: 0,
                        num_nulls: 0,
                        num_keys: 0,
                    }
                } else {
                    UniqueStats::UNTRACKED
                },
                overflow_file_vpid: Vpid::NULL,
            };
            guard.page_mut().insert_at(0, &header.encode())?;
            guard.mark_dirty(FreeHint::DontFree);
        }
        buffer.flush_all()?;
        buffer.io().mark_committed();
        info!("created index at {:?}, root={:?}, unique={}", dir, root_vpid, unique);
        Ok(BTree {
            buffer,
            wal: WalManager::open(&dir.join("wal.log"))?,
            locks: LockManager::new(),
            overflow: OverflowKeyFile::open(&dir.join("overflow.keys"))?,
            root_vpid,
            domain,
            ncols,
            unique,
            tx_seq: AtomicU64::new(1),
        })
    }

    pub fn open(dir: &Path, page_size: usize) -> Result<BTree> {
        let io = IoEngine::open(&dir.join("data.db"), page_size)?;
        let buffer = BufferPool::new(io, 64);
        let root_vpid = Vpid {
            volid: crate::io_engine::VOLID,
            pageid: 0,
        };
        let root = {
            let guard = buffer.pin(root_vpid, PinMode::Old, Access::Read)?;
            RootHeader::decode(guard.page().get_record(0))
        };
        let wal = WalManager::open(&dir.join("wal.log"))?;
        let bt = BTree {
            buffer,
            wal,
            locks: LockManager::new(),
            overflow: OverflowKeyFile::open(&dir.join("overflow.keys"))?,
            root_vpid,
            domain: root.domain,
            ncols: root.ncols as usize,
            unique: root.unique,
            tx_seq: AtomicU64::new(1),
        };
        bt.recover()?;
        Ok(bt)
    }

    pub fn destroy(dir: &Path) -> Result<()> {
        fs::remove_dir_all(dir)?;
        Ok(())
    }

    /// Replays every logged page image onto disk; idempotent because every
    /// physical record carries the whole post-image rather than a delta. The two
    /// logical kinds (`KeyvalIns`/`KeyvalDel`, used only while a file is still
    /// "new" per §6) are skipped: a crash before that file ever committed means
    /// the whole file is discarded rather than replayed.
    fn recover(&self) -> Result<()> {
        let mut count = 0;
        self.wal.replay(|record| {
            if record.kind == LogKind::KeyvalIns || record.kind == LogKind::KeyvalDel {
                return;
            }
            let page = SlottedPage::from_bytes(&record.data);
            self.buffer
                .io()
                .write_page(record.vpid, &page)
                .expect("recovery write failed");
            count += 1;
        });
        if count > 0 {
            info!("recovered {} page images from the log", count);
        }
        Ok(())
    }

    pub fn begin(&self) -> Txn {
        Txn {
            tx_id: self.tx_seq.fetch_add(1, Ordering::AcqRel),
            undo: Mutex::new(Vec::new()),
            held: Mutex::new(Vec::new()),
        }
    }

    pub fn commit(&self, txn: &Txn) -> Result<()> {
        self.wal.end_system_op(txn.tx_id, SysOpEnd::Commit);
        self.buffer.flush_all()?;
        self.buffer.io().mark_committed();
        let held = txn.held.lock().expect("held-locks mutex poisoned").clone();
        self.locks.release_all(txn.tx_id, &held, &[]);
        Ok(())
    }

    pub fn abort(&self, txn: &Txn) -> Result<()> {
        let undo = txn.undo.lock().expect("undo log mutex poisoned");
        for (vpid, before) in undo.iter().rev() {
            let mut guard = self.buffer.pin(*vpid, PinMode::Old, Access::Write)?;
            *guard.page_mut() = SlottedPage::from_bytes(before);
            guard.mark_dirty(FreeHint::DontFree);
        }
        drop(undo);
        self.wal.end_system_op(txn.tx_id, SysOpEnd::Abort);
        let held = txn.held.lock().expect("held-locks mutex poisoned").clone();
        self.locks.release_all(txn.tx_id, &held, &[]);
        Ok(())
    }

    fn resolve_key(&self, payload: &KeyPayload) -> Result<Key> {
        match payload {
            KeyPayload::Inline(k) => Ok(k.clone()),
            KeyPayload::Overflow(id) => {
                let bytes = self.overflow.get(*id)?;
                Ok(Key::decode(&bytes, self.ncols))
            }
        }
    }

    fn to_key_payload(&self, key: &Key) -> Result<KeyPayload> {
        if oversized(key) {
            let id = self.overflow.put(&key.encode())?;
            Ok(KeyPayload::Overflow(id))
        } else {
            Ok(KeyPayload::Inline(key.clone()))
        }
    }

    fn decode_leaf(&self, page: &SlottedPage) -> LeafPage {
        let n = page.number_of_records() - 1;
        let records = (0..n).map(|i| LeafRecord::decode(page.get_record(i + 1), self.ncols)).collect();
        LeafPage { records }
    }

    fn decode_nonleaf(&self, page: &SlottedPage) -> NonLeafPage {
        let n = page.number_of_records() - 1;
        let mut records: Vec<NonLeafRecord> =
            (0..n).map(|i| NonLeafRecord::decode(page.get_record(i + 1), self.ncols)).collect();
        let leftmost_child = if records.is_empty() {
            Vpid::NULL
        } else {
            records.remove(0).child
        };
        NonLeafPage { leftmost_child, records }
    }

    fn node_type(&self, page: &SlottedPage) -> NodeType {
        NodeHeader::decode(page.get_record(0)).node_type
    }

    fn rewrite_leaf(&self, vpid: Vpid, page: &mut SlottedPage, records: &[LeafRecord], next_vpid: Vpid) {
        let is_root = vpid == self.root_vpid;
        while page.number_of_records() > 1 {
            page.delete(1);
        }
        for (i, rec) in records.iter().enumerate() {
            page.insert_at(i + 1, &rec.encode()).expect("leaf page overflowed during rewrite");
        }
        let header = NodeHeader {
            node_type: NodeType::Leaf,
            key_cnt: records.len() as u32,
            max_key_len: 0,
            next_vpid,
        };
        write_node_header(is_root, page, header);
    }

    fn rewrite_nonleaf(&self, vpid: Vpid, page: &mut SlottedPage, leftmost: Vpid, records: &[NonLeafRecord]) {
        let is_root = vpid == self.root_vpid;
        while page.number_of_records() > 1 {
            page.delete(1);
        }
        let leftmost_record = NonLeafRecord {
            key: KeyPayload::Inline(Key(vec![])),
            child: leftmost,
        };
        page.insert_at(1, &leftmost_record.encode()).expect("non-leaf page overflowed during rewrite");
        for (i, rec) in records.iter().enumerate() {
            page.insert_at(i + 2, &rec.encode()).expect("non-leaf page overflowed during rewrite");
        }
        let header = NodeHeader {
            node_type: NodeType::NonLeaf,
            key_cnt: records.len() as u32,
            max_key_len: 0,
            next_vpid: Vpid::NULL,
        };
        write_node_header(is_root, page, header);
    }

    fn needs_split(page: &SlottedPage) -> bool {
        page.number_of_records() >= 4 && page.free_space() < page.page_size() / 4
    }

    fn underflowing(page: &SlottedPage) -> bool {
        page.number_of_records() <= 2 || page.free_space() > page.page_size() * 3 / 4
    }

    /// Pins `vpid` for write, runs `mutate`, and logs the whole before/after page
    /// image as a single undo/redo pair. Used for every structural change (splits,
    /// merges, header bookkeeping) — operations with no purely-logical equivalent,
    /// so they always get page-physical logging regardless of the new-file/old-file
    /// switch.
    fn physical_update(&self, txn: &Txn, vpid: Vpid, kind: LogKind, mutate: impl FnOnce(&mut SlottedPage)) -> Result<()> {
        let mut guard = self.buffer.pin(vpid, PinMode::Old, Access::Write)?;
        let before = guard.page().to_bytes();
        mutate(guard.page_mut());
        let after = guard.page().to_bytes();
        guard.mark_dirty(FreeHint::DontFree);
        let lsa = self.wal.append_undoredo(
            txn.tx_id,
            LogRecord::new(kind, vpid, before.clone()),
            LogRecord::new(kind, vpid, after),
        );
        guard.set_lsa(lsa);
        txn.record_undo(vpid, before);
        Ok(())
    }

    /// Logs a leaf key/OID mutation, choosing page-physical (with an undo image) or
    /// purely logical logging depending on whether the backing file has committed
    /// yet (§6's new-file/old-file switch): a file that never committed is simply
    /// discarded wholesale on crash, so its inserts/deletes need no undo image, only
    /// enough of a redo record to replay them if they *do* reach disk before a
    /// clean shutdown.
    fn apply_leaf_mutation(
        &self,
        txn: &Txn,
        vpid: Vpid,
        physical_kind: LogKind,
        logical_kind: LogKind,
        key: &Key,
        oid: Oid,
        mutate: impl FnOnce(&mut SlottedPage),
    ) -> Result<()> {
        let mut guard = self.buffer.pin(vpid, PinMode::Old, Access::Write)?;
        match self.buffer.io().new_isvalid() {
            FileNewOld::New => {
                mutate(guard.page_mut());
                guard.mark_dirty(FreeHint::DontFree);
                let mut data = key.encode();
                data.extend_from_slice(&oid.to_bytes());
                let lsa = self.wal.append_redo(txn.tx_id, LogRecord::new(logical_kind, vpid, data));
                guard.set_lsa(lsa);
            }
            FileNewOld::Old => {
                let before = guard.page().to_bytes();
                mutate(guard.page_mut());
                let after = guard.page().to_bytes();
                guard.mark_dirty(FreeHint::DontFree);
                let lsa = self.wal.append_undoredo(
                    txn.tx_id,
                    LogRecord::new(physical_kind, vpid, before.clone()),
                    LogRecord::new(physical_kind, vpid, after),
                );
                guard.set_lsa(lsa);
                txn.record_undo(vpid, before);
            }
        }
        Ok(())
    }

    fn write_new_page(&self, txn: &Txn, vpid: Vpid, kind: LogKind, build: impl FnOnce(&mut SlottedPage)) -> Result<()> {
        let mut guard = self.buffer.pin(vpid, PinMode::New, Access::Write)?;
        build(guard.page_mut());
        let after = guard.page().to_bytes();
        guard.mark_dirty(FreeHint::DontFree);
        let lsa = self.wal.append_redo(txn.tx_id, LogRecord::new(kind, vpid, after));
        guard.set_lsa(lsa);
        Ok(())
    }

    fn write_oid_chain(&self, txn: &Txn, oids: &[Oid]) -> Result<Vpid> {
        let mut next = Vpid::NULL;
        for chunk in oids.chunks(OID_CHAIN_CAPACITY).rev() {
            let vpid = self.buffer.io().create(1);
            let mut body = Vec::new();
            write_u32(&mut body, chunk.len() as u32);
            for oid in chunk {
                body.extend_from_slice(&oid.to_bytes());
            }
            let link = next;
            self.write_new_page(txn, vpid, LogKind::InsPgRecords, |page| {
                page.insert_at(0, &link.to_bytes()).expect("fresh page always has room");
                page.insert_at(1, &body).expect("fresh page always has room");
            })?;
            next = vpid;
        }
        Ok(next)
    }

    fn read_oid_chain(&self, head: Vpid) -> Result<Vec<Oid>> {
        let mut out = Vec::new();
        let mut cur = head;
        while !cur.is_null() {
            let guard = self.buffer.pin(cur, PinMode::Old, Access::Read)?;
            let page = guard.page();
            let next = Vpid::from_bytes(page.get_record(0));
            let body = page.get_record(1);
            let count = read_u32(body, 0) as usize;
            let mut cursor = 4;
            for _ in 0..count {
                out.push(Oid::from_bytes(&body[cursor..cursor + OID_BYTE_LEN]));
                cursor += OID_BYTE_LEN;
            }
            cur = next;
        }
        Ok(out)
    }

    /// Removes one OID from an overflow chain in place: shrinks the chunk that
    /// holds it, or unlinks and deallocates that chunk's page if removing the
    /// OID empties it. Returns the chain's head, which only changes if the head
    /// page itself was the one unlinked.
    fn remove_from_oid_chain(&self, txn: &Txn, head: Vpid, oid: Oid) -> Result<Vpid> {
        let mut prev: Option<Vpid> = None;
        let mut cur = head;
        loop {
            let (next, mut chunk) = {
                let guard = self.buffer.pin(cur, PinMode::Old, Access::Read)?;
                let page = guard.page();
                let next = Vpid::from_bytes(page.get_record(0));
                let body = page.get_record(1);
                let count = read_u32(body, 0) as usize;
                let mut chunk = Vec::with_capacity(count);
                let mut cursor = 4;
                for _ in 0..count {
                    chunk.push(Oid::from_bytes(&body[cursor..cursor + OID_BYTE_LEN]));
                    cursor += OID_BYTE_LEN;
                }
                (next, chunk)
            };
            match chunk.iter().position(|&o| o == oid) {
                Some(pos) => {
                    chunk.remove(pos);
                    if chunk.is_empty() {
                        if let Some(prev_vpid) = prev {
                            self.physical_update(txn, prev_vpid, LogKind::OidTruncate, |page| {
                                page.update(0, &next.to_bytes()).expect("link update always fits");
                            })?;
                        }
                        self.buffer.io().dealloc_page(cur);
                        return Ok(if prev.is_none() { next } else { head });
                    }
                    self.physical_update(txn, cur, LogKind::OidTruncate, |page| {
                        let mut body = Vec::new();
                        write_u32(&mut body, chunk.len() as u32);
                        for o in &chunk {
                            body.extend_from_slice(&o.to_bytes());
                        }
                        page.update(1, &body).expect("shrinking a chain page always fits");
                    })?;
                    return Ok(head);
                }
                None => {
                    prev = Some(cur);
                    cur = next;
                }
            }
        }
    }

    /// Frees every page in an overflow chain, used once its OID count drops to
    /// or below the inline threshold and its contents fold back into the leaf record.
    fn dealloc_oid_chain(&self, head: Vpid) -> Result<()> {
        let mut cur = head;
        while !cur.is_null() {
            let next = {
                let guard = self.buffer.pin(cur, PinMode::Old, Access::Read)?;
                Vpid::from_bytes(guard.page().get_record(0))
            };
            self.buffer.io().dealloc_page(cur);
            cur = next;
        }
        Ok(())
    }

    // ---- insert (§4.7) ----

    pub fn insert(&self, txn: &Txn, key: Key, oid: Oid) -> Result<()> {
        self.maybe_split_root(txn)?;
        let mut cur = self.root_vpid;
        loop {
            let kind = {
                let guard = self.buffer.pin(cur, PinMode::Old, Access::Read)?;
                self.node_type(guard.page())
            };
            if kind == NodeType::Leaf {
                return self.insert_into_leaf(txn, cur, key, oid);
            }
            let child = {
                let guard = self.buffer.pin(cur, PinMode::Old, Access::Read)?;
                let nonleaf = self.decode_nonleaf(guard.page());
                nonleaf.search(&self.domain, &key, |r| self.resolve_key(&r.key).unwrap()).0
            };
            if self.maybe_split_child(txn, cur, child)? {
                continue;
            }
            cur = child;
        }
    }

    fn maybe_split_root(&self, txn: &Txn) -> Result<()> {
        let needs = {
            let guard = self.buffer.pin(self.root_vpid, PinMode::Old, Access::Read)?;
            Self::needs_split(guard.page())
        };
        if !needs {
            return Ok(());
        }
        let (left_vpid, right_vpid) = (self.buffer.io().create(1), self.buffer.io().create(1));
        let root_kind = {
            let guard = self.buffer.pin(self.root_vpid, PinMode::Old, Access::Read)?;
            self.node_type(guard.page())
        };

        enum Halves {
            Leaf { left: Vec<LeafRecord>, right: Vec<LeafRecord>, next_leaf: Vpid },
            NonLeaf { left_leftmost: Vpid, left: Vec<NonLeafRecord>, right_leftmost: Vpid, right: Vec<NonLeafRecord> },
        }

        let (separator, halves) = match root_kind {
            NodeType::Leaf => {
                let (records, next_leaf) = {
                    let guard = self.buffer.pin(self.root_vpid, PinMode::Old, Access::Read)?;
                    (self.decode_leaf(guard.page()).records, NodeHeader::decode(guard.page().get_record(0)).next_vpid)
                };
                let sizes: Vec<usize> = records.iter().map(|r| r.encode().len()).collect();
                let plan = LeafSplitPlan::build(&self.domain, records, &sizes, |r| self.resolve_key(&r.key).unwrap());
                (plan.separator, Halves::Leaf { left: plan.left, right: plan.right, next_leaf })
            }
            NodeType::NonLeaf => {
                let (leftmost, records) = {
                    let guard = self.buffer.pin(self.root_vpid, PinMode::Old, Access::Read)?;
                    let nl = self.decode_nonleaf(guard.page());
                    (nl.leftmost_child, nl.records)
                };
                let sizes: Vec<usize> = records.iter().map(|r| r.encode().len()).collect();
                let plan = NonLeafSplitPlan::build(leftmost, records, &sizes, |r| self.resolve_key(&r.key).unwrap());
                (
                    plan.separator,
                    Halves::NonLeaf {
                        left_leftmost: plan.left_leftmost,
                        left: plan.left,
                        right_leftmost: plan.right_leftmost,
                        right: plan.right,
                    },
                )
            }
        };

        match halves {
            Halves::Leaf { left, right, next_leaf } => {
                self.write_new_page(txn, left_vpid, LogKind::CopyPage, |page| {
                    page.insert_at(0, &NodeHeader { node_type: NodeType::Leaf, key_cnt: left.len() as u32, max_key_len: 0, next_vpid: right_vpid }.encode()).unwrap();
                    for (i, r) in left.iter().enumerate() {
                        page.insert_at(i + 1, &r.encode()).unwrap();
                    }
                })?;
                self.write_new_page(txn, right_vpid, LogKind::CopyPage, |page| {
                    page.insert_at(0, &NodeHeader { node_type: NodeType::Leaf, key_cnt: right.len() as u32, max_key_len: 0, next_vpid: next_leaf }.encode()).unwrap();
                    for (i, r) in right.iter().enumerate() {
                        page.insert_at(i + 1, &r.encode()).unwrap();
                    }
                })?;
            }
            Halves::NonLeaf { left_leftmost, left, right_leftmost, right } => {
                self.write_new_page(txn, left_vpid, LogKind::CopyPage, |page| {
                    page.insert_at(0, &NodeHeader { node_type: NodeType::NonLeaf, key_cnt: left.len() as u32, max_key_len: 0, next_vpid: Vpid::NULL }.encode()).unwrap();
                    page.insert_at(1, &NonLeafRecord { key: KeyPayload::Inline(Key(vec![])), child: left_leftmost }.encode()).unwrap();
                    for (i, r) in left.iter().enumerate() {
                        page.insert_at(i + 2, &r.encode()).unwrap();
                    }
                })?;
                self.write_new_page(txn, right_vpid, LogKind::CopyPage, |page| {
                    page.insert_at(0, &NodeHeader { node_type: NodeType::NonLeaf, key_cnt: right.len() as u32, max_key_len: 0, next_vpid: Vpid::NULL }.encode()).unwrap();
                    page.insert_at(1, &NonLeafRecord { key: KeyPayload::Inline(Key(vec![])), child: right_leftmost }.encode()).unwrap();
                    for (i, r) in right.iter().enumerate() {
                        page.insert_at(i + 2, &r.encode()).unwrap();
                    }
                })?;
            }
        }

        // Replace the root's own content in place: the root page identity (vpid)
        // never moves, only what it contains does.
        let page_size = self.buffer.page_size();
        let root_before = {
            let guard = self.buffer.pin(self.root_vpid, PinMode::Old, Access::Read)?;
            RootHeader::decode(guard.page().get_record(0))
        };
        let new_root = RootHeader {
            header: NodeHeader {
                node_type: NodeType::NonLeaf,
                key_cnt: 1,
                max_key_len: 0,
                next_vpid: Vpid::NULL,
            },
            ..root_before
        };
        self.physical_update(txn, self.root_vpid, LogKind::RootHeaderUpd, move |page| {
            *page = SlottedPage::new(page_size);
            page.insert_at(0, &new_root.encode()).expect("fresh page always has room");
            page.insert_at(1, &NonLeafRecord { key: KeyPayload::Inline(Key(vec![])), child: left_vpid }.encode()).expect("fresh page always has room");
            page.insert_at(2, &NonLeafRecord { key: KeyPayload::Inline(separator), child: right_vpid }.encode()).expect("fresh page always has room");
        })?;
        dbg::record_split_request();
        info!("root {:?} split, new height grown by one level", self.root_vpid);
        Ok(())
    }

    /// Splits `child` preemptively if it is full enough that descending into it
    /// risks not having room for the eventual insert. Returns whether a split
    /// happened (the caller must redo its search at `parent`, which now holds an
    /// extra separator).
    fn maybe_split_child(&self, txn: &Txn, parent: Vpid, child: Vpid) -> Result<bool> {
        let (needs, kind) = {
            let guard = self.buffer.pin(child, PinMode::Old, Access::Read)?;
            (Self::needs_split(guard.page()), self.node_type(guard.page()))
        };
        if !needs {
            return Ok(false);
        }
        let new_vpid = self.buffer.io().create(1);
        let separator = match kind {
            NodeType::Leaf => {
                let (records, next) = {
                    let guard = self.buffer.pin(child, PinMode::Old, Access::Read)?;
                    (self.decode_leaf(guard.page()).records, NodeHeader::decode(guard.page().get_record(0)).next_vpid)
                };
                let sizes: Vec<usize> = records.iter().map(|r| r.encode().len()).collect();
                let plan = LeafSplitPlan::build(&self.domain, records, &sizes, |r| self.resolve_key(&r.key).unwrap());
                self.write_new_page(txn, new_vpid, LogKind::CopyPage, |page| {
                    page.insert_at(0, &NodeHeader { node_type: NodeType::Leaf, key_cnt: plan.right.len() as u32, max_key_len: 0, next_vpid: next }.encode()).unwrap();
                    for (i, r) in plan.right.iter().enumerate() {
                        page.insert_at(i + 1, &r.encode()).unwrap();
                    }
                })?;
                self.physical_update(txn, child, LogKind::NodeHeaderUpd, |page| {
                    self.rewrite_leaf(child, page, &plan.left, new_vpid);
                })?;
                plan.separator
            }
            NodeType::NonLeaf => {
                let (leftmost, records) = {
                    let guard = self.buffer.pin(child, PinMode::Old, Access::Read)?;
                    let nl = self.decode_nonleaf(guard.page());
                    (nl.leftmost_child, nl.records)
                };
                let sizes: Vec<usize> = records.iter().map(|r| r.encode().len()).collect();
                let plan = NonLeafSplitPlan::build(leftmost, records, &sizes, |r| self.resolve_key(&r.key).unwrap());
                self.write_new_page(txn, new_vpid, LogKind::CopyPage, |page| {
                    page.insert_at(0, &NodeHeader { node_type: NodeType::NonLeaf, key_cnt: plan.right.len() as u32, max_key_len: 0, next_vpid: Vpid::NULL }.encode()).unwrap();
                    page.insert_at(1, &NonLeafRecord { key: KeyPayload::Inline(Key(vec![])), child: plan.right_leftmost }.encode()).unwrap();
                    for (i, r) in plan.right.iter().enumerate() {
                        page.insert_at(i + 2, &r.encode()).unwrap();
                    }
                })?;
                self.physical_update(txn, child, LogKind::NodeHeaderUpd, |page| {
                    self.rewrite_nonleaf(child, page, plan.left_leftmost, &plan.left);
                })?;
                plan.separator
            }
        };

        // Insert the new separator + right-child pointer into the parent.
        self.physical_update(txn, parent, LogKind::NodeRecordIns, |page| {
            let nonleaf = self.decode_nonleaf(page);
            let insert_at = match nonleaf.search(&self.domain, &separator, |r| self.resolve_key(&r.key).unwrap()) {
                (_, Some(i)) => i + 1,
                (_, None) => 0,
            };
            let mut records = nonleaf.records;
            records.insert(
                insert_at,
                NonLeafRecord {
                    key: KeyPayload::Inline(separator.clone()),
                    child: new_vpid,
                },
            );
            self.rewrite_nonleaf(parent, page, nonleaf.leftmost_child, &records);
        })?;
        dbg::record_split_request();
        Ok(true)
    }

    fn insert_into_leaf(&self, txn: &Txn, leaf_vpid: Vpid, key: Key, oid: Oid) -> Result<()> {
        let is_root = leaf_vpid == self.root_vpid;
        let is_null = key.0.iter().any(|c| c.is_none());
        let records = {
            let guard = self.buffer.pin(leaf_vpid, PinMode::Old, Access::Read)?;
            self.decode_leaf(guard.page()).records
        };
        let page_ro = LeafPage { records };
        let found = page_ro.search(&self.domain, &key, |r| self.resolve_key(&r.key).unwrap());

        let mut is_new_key = false;
        match found {
            Ok(idx) => {
                let existing = &page_ro.records[idx];
                if self.unique && !is_null {
                    return Err(QSError::UniqueViolation(key.encode()));
                }
                let mut oids = match &existing.oids {
                    OidPayload::Inline(oids) => oids.clone(),
                    OidPayload::Overflow { head, .. } => self.read_oid_chain(*head)?,
                };
                if oids.contains(&oid) {
                    if self.wal.is_in_crash_recovery() {
                        warn!("duplicate oid {:?} for an existing key during recovery replay, ignoring", oid);
                        return Ok(());
                    }
                    return Err(QSError::DuplicateOid { during_recovery: false });
                }
                oids.push(oid);
                let new_payload = if oids.len() > MAX_INLINE_OIDS {
                    let head = self.write_oid_chain(txn, &oids)?;
                    OidPayload::Overflow { head, count: oids.len() as u32 }
                } else {
                    OidPayload::Inline(oids)
                };
                let key_payload = existing.key.clone();
                self.apply_leaf_mutation(txn, leaf_vpid, LogKind::LeafRecordOidIns, LogKind::KeyvalIns, &key, oid, move |page| {
                    page.update(idx + 1, &LeafRecord { key: key_payload, oids: new_payload }.encode()).unwrap();
                })?;
            }
            Err(idx) => {
                is_new_key = true;
                let key_payload = self.to_key_payload(&key)?;
                let record = LeafRecord {
                    key: key_payload,
                    oids: OidPayload::Inline(vec![oid]),
                };
                self.apply_leaf_mutation(txn, leaf_vpid, LogKind::LeafRecordKeyIns, LogKind::KeyvalIns, &key, oid, move |page| {
                    page.insert_at(idx + 1, &record.encode()).expect("preemptive split should have guaranteed room");
                    let mut header = read_node_header(is_root, page);
                    header.key_cnt += 1;
                    write_node_header(is_root, page, header);
                })?;
            }
        }

        if self.unique {
            self.bump_stats(txn, 1, if is_null { 1 } else { 0 }, if is_new_key { 1 } else { 0 })?;
        }
        debug!("inserted oid {:?} under key in leaf {:?}", oid, leaf_vpid);
        Ok(())
    }

    fn bump_stats(&self, txn: &Txn, doids: i64, dnulls: i64, dkeys: i64) -> Result<()> {
        self.physical_update(txn, self.root_vpid, LogKind::RootHeaderUpd, |page| {
            let mut header = RootHeader::decode(page.get_record(0));
            header.stats.num_oids += doids;
            header.stats.num_nulls += dnulls;
            header.stats.num_keys += dkeys;
            page.update(0, &header.encode()).expect("root header update must always fit");
        })
    }

    // ---- delete (§4.8) ----

    pub fn delete(&self, txn: &Txn, key: Key, oid: Oid) -> Result<()> {
        let mut cur = self.root_vpid;
        loop {
            let kind = {
                let guard = self.buffer.pin(cur, PinMode::Old, Access::Read)?;
                self.node_type(guard.page())
            };
            if kind == NodeType::Leaf {
                return self.delete_from_leaf(txn, cur, key, oid);
            }
            let child = {
                let guard = self.buffer.pin(cur, PinMode::Old, Access::Read)?;
                let nonleaf = self.decode_nonleaf(guard.page());
                nonleaf.search(&self.domain, &key, |r| self.resolve_key(&r.key).unwrap()).0
            };
            if self.maybe_merge_child(txn, cur, child)? {
                continue;
            }
            cur = child;
        }
    }

    fn delete_from_leaf(&self, txn: &Txn, leaf_vpid: Vpid, key: Key, oid: Oid) -> Result<()> {
        let is_root = leaf_vpid == self.root_vpid;
        let is_null = key.0.iter().any(|c| c.is_none());
        let records = {
            let guard = self.buffer.pin(leaf_vpid, PinMode::Old, Access::Read)?;
            self.decode_leaf(guard.page()).records
        };
        let page_ro = LeafPage { records };
        let found = page_ro.search(&self.domain, &key, |r| self.resolve_key(&r.key).unwrap());
        let idx = match found {
            Ok(idx) => idx,
            Err(_) => {
                if self.wal.is_in_crash_recovery() {
                    warn!("key not found during recovery replay, ignoring");
                    return Ok(());
                }
                return Err(QSError::KeyNotFound { during_recovery: false });
            }
        };
        let existing = page_ro.records[idx].clone();
        let key_payload = existing.key.clone();

        let (key_was_removed, new_payload) = match &existing.oids {
            OidPayload::Inline(oids) => {
                let mut oids = oids.clone();
                let pos = match oids.iter().position(|&o| o == oid) {
                    Some(p) => p,
                    None => {
                        if self.wal.is_in_crash_recovery() {
                            warn!("oid not found under key during recovery replay, ignoring");
                            return Ok(());
                        }
                        return Err(QSError::KeyNotFound { during_recovery: false });
                    }
                };
                // O(1) removal: swap the removed OID with the last one instead of shifting.
                let last = oids.len() - 1;
                oids.swap(pos, last);
                oids.truncate(last);
                let removed = oids.is_empty();
                (removed, if removed { None } else { Some(OidPayload::Inline(oids)) })
            }
            OidPayload::Overflow { head, count } => {
                let chain = self.read_oid_chain(*head)?;
                if !chain.contains(&oid) {
                    if self.wal.is_in_crash_recovery() {
                        warn!("oid not found under key during recovery replay, ignoring");
                        return Ok(());
                    }
                    return Err(QSError::KeyNotFound { during_recovery: false });
                }
                let new_count = *count as usize - 1;
                if new_count > MAX_INLINE_OIDS {
                    let new_head = self.remove_from_oid_chain(txn, *head, oid)?;
                    (false, Some(OidPayload::Overflow { head: new_head, count: new_count as u32 }))
                } else {
                    // Drops at or below the inline threshold: fold the remaining OIDs
                    // back inline and free every page the chain held.
                    let mut remaining = chain;
                    let pos = remaining.iter().position(|&o| o == oid).expect("checked above");
                    remaining.swap_remove(pos);
                    self.dealloc_oid_chain(*head)?;
                    (false, Some(OidPayload::Inline(remaining)))
                }
            }
        };

        self.apply_leaf_mutation(txn, leaf_vpid, LogKind::LeafRecordDel, LogKind::KeyvalDel, &key, oid, move |page| {
            match new_payload {
                None => {
                    page.delete(idx + 1);
                    let mut header = read_node_header(is_root, page);
                    header.key_cnt -= 1;
                    write_node_header(is_root, page, header);
                }
                Some(payload) => {
                    page.update(idx + 1, &LeafRecord { key: key_payload, oids: payload }.encode()).unwrap();
                }
            }
        })?;

        if self.unique {
            self.bump_stats(txn, -1, if is_null { -1 } else { 0 }, if key_was_removed { -1 } else { 0 })?;
        }
        debug!("deleted oid {:?} from leaf {:?}", oid, leaf_vpid);
        Ok(())
    }

    /// Merges `child` into a sibling preemptively if it is thin enough that one
    /// more deletion could force an on-the-way-back-up merge. Returns whether a
    /// merge happened (the caller must redo its search at `parent`).
    fn maybe_merge_child(&self, txn: &Txn, parent: Vpid, child: Vpid) -> Result<bool> {
        let (underflow, kind) = {
            let guard = self.buffer.pin(child, PinMode::Old, Access::Read)?;
            (Self::underflowing(guard.page()), self.node_type(guard.page()))
        };
        if !underflow {
            return Ok(false);
        }
        let (leftmost, records) = {
            let guard = self.buffer.pin(parent, PinMode::Old, Access::Read)?;
            let nl = self.decode_nonleaf(guard.page());
            (nl.leftmost_child, nl.records)
        };
        if records.is_empty() {
            return Ok(false);
        }
        // Locate child's separator-adjacent sibling: if child is the leftmost
        // pointer, pair it with records[0]'s subtree; otherwise pair it with the
        // next record if one exists, else the previous one.
        let (left_vpid, right_vpid, separator_idx) = if leftmost == child {
            (child, records[0].child, 0usize)
        } else {
            let idx = match records.iter().position(|r| r.child == child) {
                Some(i) => i,
                None => return Ok(false),
            };
            if idx + 1 < records.len() {
                (child, records[idx + 1].child, idx + 1)
            } else {
                (records[idx - 1].child, child, idx)
            }
        };

        match kind {
            NodeType::Leaf => {
                let left_records = {
                    let guard = self.buffer.pin(left_vpid, PinMode::Old, Access::Read)?;
                    self.decode_leaf(guard.page()).records
                };
                let right_records = {
                    let guard = self.buffer.pin(right_vpid, PinMode::Old, Access::Read)?;
                    self.decode_leaf(guard.page()).records
                };
                let next_vpid = {
                    let guard = self.buffer.pin(right_vpid, PinMode::Old, Access::Read)?;
                    NodeHeader::decode(guard.page().get_record(0)).next_vpid
                };
                let plan = LeafMergePlan::build(left_records, right_records);
                self.physical_update(txn, left_vpid, LogKind::NodeHeaderUpd, |page| {
                    self.rewrite_leaf(left_vpid, page, &plan.merged, next_vpid);
                })?;
                self.buffer.io().dealloc_page(right_vpid);
            }
            NodeType::NonLeaf => {
                let (left_leftmost, left_records) = {
                    let guard = self.buffer.pin(left_vpid, PinMode::Old, Access::Read)?;
                    let nl = self.decode_nonleaf(guard.page());
                    (nl.leftmost_child, nl.records)
                };
                let (right_leftmost, right_records) = {
                    let guard = self.buffer.pin(right_vpid, PinMode::Old, Access::Read)?;
                    let nl = self.decode_nonleaf(guard.page());
                    (nl.leftmost_child, nl.records)
                };
                let demoted = self.resolve_key(&records[separator_idx].key)?;
                let plan = NonLeafMergePlan::build(left_leftmost, left_records, demoted, right_leftmost, right_records);
                self.physical_update(txn, left_vpid, LogKind::NodeHeaderUpd, |page| {
                    self.rewrite_nonleaf(left_vpid, page, plan.leftmost_child, &plan.merged);
                })?;
                self.buffer.io().dealloc_page(right_vpid);
            }
        }

        // Remove the separator from the parent; if that empties a root parent down
        // to zero records, collapse the root by one level.
        let mut new_records = records.clone();
        new_records.remove(separator_idx);
        self.physical_update(txn, parent, LogKind::NodeRecordDel, |page| {
            self.rewrite_nonleaf(parent, page, leftmost, &new_records);
        })?;

        if parent == self.root_vpid && new_records.is_empty() {
            self.collapse_root(txn, leftmost)?;
        }
        dbg::record_merge_request();
        Ok(true)
    }

    /// A non-leaf root left with a single child (the degenerate case flagged in
    /// the design notes) collapses immediately: its one child's content is copied
    /// up into the root page and the child page is freed, shrinking the tree by
    /// one level rather than tolerating a single-child internal node.
    fn collapse_root(&self, txn: &Txn, only_child: Vpid) -> Result<()> {
        let child_bytes = {
            let guard = self.buffer.pin(only_child, PinMode::Old, Access::Read)?;
            guard.page().to_bytes()
        };
        let child_page = SlottedPage::from_bytes(&child_bytes);
        let root_before = {
            let guard = self.buffer.pin(self.root_vpid, PinMode::Old, Access::Read)?;
            RootHeader::decode(guard.page().get_record(0))
        };
        let child_header = NodeHeader::decode(child_page.get_record(0));
        let new_root = RootHeader {
            header: child_header,
            ..root_before
        };
        let page_size = self.buffer.page_size();
        self.physical_update(txn, self.root_vpid, LogKind::RootHeaderUpd, move |page| {
            let mut new_page = SlottedPage::new(page_size);
            new_page.insert_at(0, &new_root.encode()).expect("fresh page always has room");
            for i in 1..child_page.number_of_records() {
                new_page.insert_at(i, child_page.get_record(i)).expect("fresh page always has room");
            }
            *page = new_page;
        })?;
        self.buffer.io().dealloc_page(only_child);
        info!("root {:?} collapsed by one level after merge", self.root_vpid);
        Ok(())
    }

    // ---- reads (§4.9, §4.10) ----

    fn find_leftmost_leaf_covering(&self, key: &Key) -> Result<Vpid> {
        let mut cur = self.root_vpid;
        loop {
            let (kind, child) = {
                let guard = self.buffer.pin(cur, PinMode::Old, Access::Read)?;
                let kind = self.node_type(guard.page());
                if kind == NodeType::Leaf {
                    (kind, Vpid::NULL)
                } else {
                    let nonleaf = self.decode_nonleaf(guard.page());
                    (kind, nonleaf.search(&self.domain, key, |r| self.resolve_key(&r.key).unwrap()).0)
                }
            };
            if kind == NodeType::Leaf {
                return Ok(cur);
            }
            cur = child;
        }
    }

    pub fn find_unique(&self, txn: &Txn, key: Key) -> Result<Option<Oid>> {
        let oids = self.keyval_search(txn, key)?;
        Ok(oids.into_iter().next())
    }

    pub fn keyval_search(&self, txn: &Txn, key: Key) -> Result<Vec<Oid>> {
        let bounds = keyval_bounds(key);
        self.scan_with_bounds(txn, &bounds, None)
    }

    pub fn range_search(
        &self,
        txn: &Txn,
        kind: RangeKind,
        lower: Option<Key>,
        upper: Option<Key>,
        limit: Option<usize>,
    ) -> Result<Vec<Oid>> {
        let bounds = Bounds::build(&self.domain, kind, lower.as_ref(), upper.as_ref());
        self.scan_with_bounds(txn, &bounds, limit)
    }

    /// Walks the leaf chain from the first leaf that could contain `bounds.lower`,
    /// collecting every OID within range and share-locking each under a next-key
    /// discipline: the key immediately past the returned range is locked too, so a
    /// concurrent insert of a new lowest key past the scan's end is blocked until
    /// this reader's transaction ends. Each lock is tried conditionally first and
    /// only falls back to a blocking wait on contention; a blocking wait that finds
    /// the scanned page's LSA moved means the scan may now be stale, so the whole
    /// scan restarts from `bounds.lower` rather than trusting in-hand slot indices.
    fn scan_with_bounds(&self, txn: &Txn, bounds: &Bounds, limit: Option<usize>) -> Result<Vec<Oid>> {
        loop {
            match self.scan_once(txn, bounds, limit)? {
                Some(out) => return Ok(out),
                None => continue,
            }
        }
    }

    /// One attempt at `scan_with_bounds`; returns `None` if a next-key lock wait
    /// observed a structural change and the caller should retry from scratch.
    fn scan_once(&self, txn: &Txn, bounds: &Bounds, limit: Option<usize>) -> Result<Option<Vec<Oid>>> {
        let mut out = Vec::new();
        let mut cur = self.find_leftmost_leaf_covering(&bounds.lower)?;
        'outer: loop {
            let (records, next, lsa_before) = {
                let guard = self.buffer.pin(cur, PinMode::Old, Access::Read)?;
                (
                    self.decode_leaf(guard.page()).records,
                    NodeHeader::decode(guard.page().get_record(0)).next_vpid,
                    guard.lsa(),
                )
            };
            for (ri, rec) in records.iter().enumerate() {
                let key = self.resolve_key(&rec.key)?;
                if !bounds.satisfies_lower(&self.domain, &key) {
                    continue;
                }
                if !bounds.satisfies_upper(&self.domain, &key) {
                    if let Some(&boundary) = self.record_oid_list(rec)?.first() {
                        if !self.lock_for_scan(txn, cur, lsa_before, boundary)? {
                            return Ok(None);
                        }
                    }
                    return Ok(Some(out));
                }
                let oids = self.record_oid_list(rec)?;
                for (oi, &oid) in oids.iter().enumerate() {
                    if !self.lock_for_scan(txn, cur, lsa_before, oid)? {
                        return Ok(None);
                    }
                    out.push(oid);
                    if let Some(limit) = limit {
                        if out.len() >= limit {
                            let boundary = self.next_oid_after(&records, ri, &oids, oi, next)?;
                            if let Some(boundary) = boundary {
                                if !self.lock_for_scan(txn, cur, lsa_before, boundary)? {
                                    return Ok(None);
                                }
                            }
                            return Ok(Some(out));
                        }
                    }
                }
            }
            if next.is_null() {
                return Ok(Some(out));
            }
            cur = next;
        }
    }

    fn record_oid_list(&self, rec: &LeafRecord) -> Result<Vec<Oid>> {
        match &rec.oids {
            OidPayload::Inline(oids) => Ok(oids.clone()),
            OidPayload::Overflow { head, .. } => self.read_oid_chain(*head),
        }
    }

    /// The OID that would be scanned immediately after `(ri, oi)`: the next OID
    /// under the same key, else the first OID of the following record in this
    /// leaf, else the first OID of the next leaf's first record, else `None` at
    /// the end of the index.
    fn next_oid_after(&self, records: &[LeafRecord], ri: usize, oids: &[Oid], oi: usize, next_leaf: Vpid) -> Result<Option<Oid>> {
        if let Some(&oid) = oids.get(oi + 1) {
            return Ok(Some(oid));
        }
        if let Some(rec) = records.get(ri + 1) {
            return Ok(self.record_oid_list(rec)?.first().copied());
        }
        if !next_leaf.is_null() {
            let records = {
                let guard = self.buffer.pin(next_leaf, PinMode::Old, Access::Read)?;
                self.decode_leaf(guard.page()).records
            };
            if let Some(rec) = records.first() {
                return Ok(self.record_oid_list(rec)?.first().copied());
            }
        }
        Ok(None)
    }

    /// Acquires a share lock on `oid` for a scan, conditionally first and falling
    /// back to a blocking wait. Returns `false` if the blocking wait found the
    /// scanned leaf's LSA had moved, signalling the scan must restart.
    fn lock_for_scan(&self, txn: &Txn, leaf_vpid: Vpid, lsa_before: Lsa, oid: Oid) -> Result<bool> {
        let outcome = lock_with_revalidation(&self.locks, txn.tx_id, oid, LockMode::Share, lsa_before, || {
            self.buffer
                .pin(leaf_vpid, PinMode::Old, Access::Read)
                .map(|g| g.lsa())
                .unwrap_or(Lsa(u64::MAX))
        })?;
        txn.record_held(oid);
        Ok(outcome == LockOutcome::Granted)
    }

    pub fn reflect_unique_statistics(&self) -> Result<UniqueStats> {
        let guard = self.buffer.pin(self.root_vpid, PinMode::Old, Access::Read)?;
        Ok(RootHeader::decode(guard.page().get_record(0)).stats)
    }

    pub fn get_stats(&self) -> Result<UniqueStats> {
        self.reflect_unique_statistics()
    }

    pub fn find_key(&self, txn: &Txn, key: Key) -> Result<Vec<Oid>> {
        self.keyval_search(txn, key)
    }

    /// Verifies the order invariant (every key in a leaf, across the whole leaf
    /// chain, compares in index order) and the unique-index statistics invariant.
    pub fn check_tree(&self) -> Result<bool> {
        let root = {
            let guard = self.buffer.pin(self.root_vpid, PinMode::Old, Access::Read)?;
            RootHeader::decode(guard.page().get_record(0))
        };
        if !root.stats.check_invariant() {
            return Ok(false);
        }
        let mut cur = self.root_vpid;
        loop {
            let (kind, child) = {
                let guard = self.buffer.pin(cur, PinMode::Old, Access::Read)?;
                let kind = self.node_type(guard.page());
                let child = if kind == NodeType::NonLeaf {
                    self.decode_nonleaf(guard.page()).leftmost_child
                } else {
                    Vpid::NULL
                };
                (kind, child)
            };
            if kind == NodeType::Leaf {
                break;
            }
            cur = child;
        }
        let mut prev: Option<Key> = None;
        loop {
            let (records, next) = {
                let guard = self.buffer.pin(cur, PinMode::Old, Access::Read)?;
                (self.decode_leaf(guard.page()).records, NodeHeader::decode(guard.page().get_record(0)).next_vpid)
            };
            for rec in &records {
                let key = self.resolve_key(&rec.key)?;
                if let Some(p) = &prev {
                    if self.domain.cmp(p, &key).is_gt() {
                        return Ok(false);
                    }
                }
                prev = Some(key);
            }
            if next.is_null() {
                break;
            }
            cur = next;
        }
        Ok(true)
    }

    pub fn check_all(&self) -> Result<bool> {
        self.check_tree()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn tree(unique: bool) -> (TempDir, BTree) {
        let dir = TempDir::new().unwrap();
        let bt = BTree::create(dir.path(), Domain::ascending(1), unique, 4096).unwrap();
        (dir, bt)
    }

    fn key(b: &[u8]) -> Key {
        Key(vec![Some(b.to_vec())])
    }

    fn oid(slot: i16) -> Oid {
        Oid { volid: 0, pageid: 1, slotid: slot }
    }

    #[test]
    fn insert_then_find_roundtrips() {
        let (_dir, bt) = tree(true);
        let txn = bt.begin();
        bt.insert(&txn, key(b"a"), oid(1)).unwrap();
        bt.commit(&txn).unwrap();

        let txn = bt.begin();
        assert_eq!(bt.find_unique(&txn, key(b"a")).unwrap(), Some(oid(1)));
        assert_eq!(bt.find_unique(&txn, key(b"z")).unwrap(), None);
    }

    #[test]
    fn unique_index_rejects_duplicate_non_null_key() {
        let (_dir, bt) = tree(true);
        let txn = bt.begin();
        bt.insert(&txn, key(b"a"), oid(1)).unwrap();
        let err = bt.insert(&txn, key(b"a"), oid(2));
        assert!(matches!(err, Err(QSError::UniqueViolation(_))));
    }

    #[test]
    fn non_unique_index_allows_multiple_oids_per_key() {
        let (_dir, bt) = tree(false);
        let txn = bt.begin();
        bt.insert(&txn, key(b"a"), oid(1)).unwrap();
        bt.insert(&txn, key(b"a"), oid(2)).unwrap();
        let mut oids = bt.keyval_search(&txn, key(b"a")).unwrap();
        oids.sort();
        assert_eq!(oids, vec![oid(1), oid(2)]);
    }

    #[test]
    fn delete_removes_key_entirely_once_last_oid_goes() {
        let (_dir, bt) = tree(false);
        let txn = bt.begin();
        bt.insert(&txn, key(b"a"), oid(1)).unwrap();
        bt.delete(&txn, key(b"a"), oid(1)).unwrap();
        assert!(bt.keyval_search(&txn, key(b"a")).unwrap().is_empty());
    }

    #[test]
    fn many_inserts_force_a_root_split_and_stay_ordered() {
        let (_dir, bt) = tree(false);
        let txn = bt.begin();
        for i in 0..200u16 {
            let k = key(&i.to_be_bytes());
            bt.insert(&txn, k, oid(i as i16)).unwrap();
        }
        assert!(bt.check_tree().unwrap());
        for i in 0..200u16 {
            let k = key(&i.to_be_bytes());
            assert_eq!(bt.keyval_search(&txn, k).unwrap(), vec![oid(i as i16)]);
        }
    }

    #[test]
    fn range_search_returns_keys_in_order() {
        let (_dir, bt) = tree(false);
        let txn = bt.begin();
        for b in [b'a', b'b', b'c', b'd', b'e'] {
            bt.insert(&txn, key(&[b]), oid(b as i16)).unwrap();
        }
        let oids = bt
            .range_search(&txn, RangeKind::GeLe, Some(key(b"b")), Some(key(b"d")), None)
            .unwrap();
        assert_eq!(oids, vec![oid(b'b' as i16), oid(b'c' as i16), oid(b'd' as i16)]);
    }

    #[test]
    fn insert_many_then_delete_many_keeps_tree_ordered() {
        let (_dir, bt) = tree(false);
        let txn = bt.begin();
        for i in 0..150u16 {
            bt.insert(&txn, key(&i.to_be_bytes()), oid(1)).unwrap();
        }
        for i in 0..100u16 {
            bt.delete(&txn, key(&i.to_be_bytes()), oid(1)).unwrap();
        }
        assert!(bt.check_tree().unwrap());
        for i in 100..150u16 {
            assert_eq!(bt.keyval_search(&txn, key(&i.to_be_bytes())).unwrap(), vec![oid(1)]);
        }
    }

    #[test]
    fn abort_undoes_inserted_keys() {
        let (_dir, bt) = tree(false);
        let txn = bt.begin();
        bt.insert(&txn, key(b"a"), oid(1)).unwrap();
        bt.abort(&txn).unwrap();

        let txn2 = bt.begin();
        assert!(bt.keyval_search(&txn2, key(b"a")).unwrap().is_empty());
    }

    #[test]
    fn reopening_recovers_committed_state() {
        let dir = TempDir::new().unwrap();
        {
            let bt = BTree::create(dir.path(), Domain::ascending(1), false, 4096).unwrap();
            let txn = bt.begin();
            bt.insert(&txn, key(b"a"), oid(1)).unwrap();
            bt.commit(&txn).unwrap();
        }
        let bt = BTree::open(dir.path(), 4096).unwrap();
        let txn = bt.begin();
        assert_eq!(bt.keyval_search(&txn, key(b"a")).unwrap(), vec![oid(1)]);
    }
}
