//! The page buffer pool: pin/unpin, dirty marking, and LSA bookkeeping over frames
//! backed by the file manager (`io_engine`). Frame residency is tracked in
//! `map_table`; eviction here is a clock ("second-chance") sweep over unpinned
//! frames.

use std::sync::atomic::{AtomicBool, AtomicI32, AtomicU64, AtomicUsize, Ordering};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::error::{QSError, Result};
use crate::io_engine::IoEngine;
use crate::map_table::MapTable;
use crate::page::SlottedPage;
use crate::types::Vpid;
use crate::wal::Lsa;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PinMode {
    /// The page is being created fresh; skip the disk read and hand back a blank page.
    New,
    /// The page already exists on disk and must be read in.
    Old,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    Read,
    Write,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FreeHint {
    Free,
    DontFree,
}

struct FrameContent {
    vpid: Vpid,
    page: SlottedPage,
}

struct FrameBook {
    pin_count: AtomicI32,
    dirty: AtomicBool,
    ref_bit: AtomicBool,
    resident: AtomicBool,
    lsa: AtomicU64,
}

impl FrameBook {
    fn blank() -> FrameBook {
        FrameBook {
            pin_count: AtomicI32::new(0),
            dirty: AtomicBool::new(false),
            ref_bit: AtomicBool::new(false),
            resident: AtomicBool::new(false),
            lsa: AtomicU64::new(0),
        }
    }
}

pub struct BufferPool {
    io: IoEngine,
    page_size: usize,
    contents: Vec<RwLock<FrameContent>>,
    books: Vec<FrameBook>,
    directory: MapTable,
    clock_hand: AtomicUsize,
}

impl BufferPool {
    pub fn new(io: IoEngine, capacity: usize) -> BufferPool {
        let page_size = io.page_size();
        let contents = (0..capacity)
            .map(|_| {
                RwLock::new(FrameContent {
                    vpid: Vpid::NULL,
                    page: SlottedPage::new(page_size),
                })
            })
            .collect();
        let books = (0..capacity).map(|_| FrameBook::blank()).collect();
        BufferPool {
            io,
            page_size,
            contents,
            books,
            directory: MapTable::new(capacity),
            clock_hand: AtomicUsize::new(0),
        }
    }

    pub fn io(&self) -> &IoEngine {
        &self.io
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    pub fn pin(&self, vpid: Vpid, mode: PinMode, access: Access) -> Result<PageGuard<'_>> {
        let frame_idx = loop {
            if let Some(idx) = self.directory.lookup(vpid) {
                self.books[idx].pin_count.fetch_add(1, Ordering::AcqRel);
                // The vpid might have been evicted between lookup and pin bump; the
                // directory and frame residency are kept in lock-step by `evict_victim`
                // and `insert_resident`, both called under `self.directory`'s guard, so
                // re-check once under the same guard.
                if self.books[idx].resident.load(Ordering::Acquire)
                    && self.contents[idx].read().expect("frame lock poisoned").vpid == vpid
                {
                    break idx;
                }
                self.books[idx].pin_count.fetch_sub(1, Ordering::AcqRel);
                continue;
            }

            let idx = self.find_victim()?;
            let loaded = match mode {
                PinMode::New => SlottedPage::new(self.page_size),
                PinMode::Old => self.io.read_page(vpid)?,
            };
            {
                let mut content = self.contents[idx].write().expect("frame lock poisoned");
                content.vpid = vpid;
                content.page = loaded;
            }
            self.books[idx].dirty.store(mode == PinMode::New, Ordering::Release);
            self.books[idx].ref_bit.store(true, Ordering::Release);
            self.books[idx].resident.store(true, Ordering::Release);
            self.books[idx].pin_count.store(1, Ordering::Release);
            self.directory.bind(vpid, idx);
            break idx;
        };

        self.books[frame_idx].ref_bit.store(true, Ordering::Release);
        let inner = match access {
            Access::Read => GuardInner::Read(self.contents[frame_idx].read().expect("frame lock poisoned")),
            Access::Write => {
                GuardInner::Write(self.contents[frame_idx].write().expect("frame lock poisoned"))
            }
        };
        Ok(PageGuard {
            pool: self,
            frame_idx,
            inner,
        })
    }

    /// Finds an unpinned frame to reuse, flushing it first if dirty. Runs a
    /// second-chance clock sweep: a frame whose ref bit is set is spared once (and the
    /// bit cleared) before becoming eligible.
    fn find_victim(&self) -> Result<usize> {
        let n = self.contents.len();
        for _ in 0..(2 * n + 1) {
            let idx = self.clock_hand.fetch_add(1, Ordering::AcqRel) % n;
            let book = &self.books[idx];
            if book.pin_count.load(Ordering::Acquire) != 0 {
                continue;
            }
            if !book.resident.load(Ordering::Acquire) {
                return Ok(idx);
            }
            if book.ref_bit.swap(false, Ordering::AcqRel) {
                continue;
            }
            self.flush_frame(idx)?;
            self.directory.unbind(self.contents[idx].read().expect("frame lock poisoned").vpid);
            book.resident.store(false, Ordering::Release);
            return Ok(idx);
        }
        Err(QSError::Oom)
    }

    fn flush_frame(&self, idx: usize) -> Result<()> {
        let book = &self.books[idx];
        if book.dirty.swap(false, Ordering::AcqRel) {
            let content = self.contents[idx].read().expect("frame lock poisoned");
            self.io.write_page(content.vpid, &content.page)?;
        }
        Ok(())
    }

    /// Flushes every resident dirty frame; used by checkpointing and by tests that
    /// want to assert on-disk state without an explicit per-page flush.
    pub fn flush_all(&self) -> Result<()> {
        for idx in 0..self.contents.len() {
            if self.books[idx].resident.load(Ordering::Acquire) {
                self.flush_frame(idx)?;
            }
        }
        Ok(())
    }
}

enum GuardInner<'a> {
    Read(RwLockReadGuard<'a, FrameContent>),
    Write(RwLockWriteGuard<'a, FrameContent>),
}

/// A pinned page, released (unpinned) on drop. Playing the role of the external
/// buffer pool's `pin`/`unpin` pair plus `mark_dirty`/`lsa`/`set_lsa`.
pub struct PageGuard<'a> {
    pool: &'a BufferPool,
    frame_idx: usize,
    inner: GuardInner<'a>,
}

impl<'a> PageGuard<'a> {
    pub fn vpid(&self) -> Vpid {
        match &self.inner {
            GuardInner::Read(g) => g.vpid,
            GuardInner::Write(g) => g.vpid,
        }
    }

    pub fn page(&self) -> &SlottedPage {
        match &self.inner {
            GuardInner::Read(g) => &g.page,
            GuardInner::Write(g) => &g.page,
        }
    }

    pub fn page_mut(&mut self) -> &mut SlottedPage {
        match &mut self.inner {
            GuardInner::Read(_) => panic!("page_mut called on a read-pinned page"),
            GuardInner::Write(g) => &mut g.page,
        }
    }

    pub fn mark_dirty(&self, hint: FreeHint) {
        self.pool.books[self.frame_idx]
            .dirty
            .store(true, Ordering::Release);
        if hint == FreeHint::Free {
            self.pool.books[self.frame_idx]
                .ref_bit
                .store(false, Ordering::Release);
        }
    }

    pub fn lsa(&self) -> Lsa {
        Lsa(self.pool.books[self.frame_idx].lsa.load(Ordering::Acquire))
    }

    pub fn set_lsa(&self, lsa: Lsa) {
        self.pool.books[self.frame_idx]
            .lsa
            .store(lsa.0, Ordering::Release);
    }
}

impl<'a> Drop for PageGuard<'a> {
    fn drop(&mut self) {
        self.pool.books[self.frame_idx]
            .pin_count
            .fetch_sub(1, Ordering::AcqRel);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io_engine::IoEngine;
    use tempfile::NamedTempFile;

    fn pool(capacity: usize) -> BufferPool {
        let tmp = NamedTempFile::new().unwrap();
        let io = IoEngine::open(tmp.path(), 4096).unwrap();
        BufferPool::new(io, capacity)
    }

    #[test]
    fn pin_new_then_reload_after_eviction() {
        let pool = pool(1);
        let vpid = pool.io().create(1);
        {
            let mut guard = pool.pin(vpid, PinMode::New, Access::Write).unwrap();
            guard.page_mut().insert_at(0, b"hello").unwrap();
            guard.mark_dirty(FreeHint::DontFree);
        }
        // Force eviction of the only frame by pinning a second page.
        let other = Vpid {
            volid: vpid.volid,
            pageid: vpid.pageid + 1,
        };
        {
            let _g = pool.pin(other, PinMode::New, Access::Write).unwrap();
        }
        let guard = pool.pin(vpid, PinMode::Old, Access::Read).unwrap();
        assert_eq!(guard.page().get_record(0), b"hello");
    }

    #[test]
    fn lsa_roundtrips() {
        let pool = pool(2);
        let vpid = pool.io().create(1);
        let guard = pool.pin(vpid, PinMode::New, Access::Write).unwrap();
        guard.set_lsa(Lsa(42));
        assert_eq!(guard.lsa(), Lsa(42));
    }
}
