//! File / extent manager: page allocation, deallocation, and the raw page I/O the
//! buffer pool flushes through. Also the keeper of the new-vs-old file classification
//! the logging policy switches on.

use std::fs::{File, OpenOptions};
use std::os::unix::fs::FileExt;
use std::path::Path;
use std::sync::atomic::{AtomicI32, AtomicU64, Ordering};
use std::sync::Mutex;

use crate::error::Result;
use crate::page::SlottedPage;
use crate::types::Vpid;

/// This crate models a single-volume store: every `Vpid` produced carries this volid.
pub const VOLID: i16 = 0;

pub struct IoEngine {
    file: File,
    page_size: usize,
    next_page: AtomicI32,
    free_list: Mutex<Vec<i32>>,
    /// Monotonically bumped every time a page is allocated or freed, used to decide
    /// `new_isvalid`: a file is "new" until the creating transaction commits.
    creation_epoch: AtomicU64,
    committed_epoch: AtomicU64,
}

impl IoEngine {
    pub fn open(path: &Path, page_size: usize) -> std::io::Result<IoEngine> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(path)?;
        Ok(IoEngine {
            file,
            page_size,
            next_page: AtomicI32::new(0),
            free_list: Mutex::new(Vec::new()),
            creation_epoch: AtomicU64::new(0),
            committed_epoch: AtomicU64::new(0),
        })
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    fn offset_of(&self, vpid: Vpid) -> u64 {
        vpid.pageid as u64 * self.page_size as u64
    }

    /// Allocates `count` fresh pages, reusing deallocated page ids where possible.
    pub fn alloc_pages(&self, count: usize) -> Vec<Vpid> {
        let mut out = Vec::with_capacity(count);
        let mut free = self.free_list.lock().expect("io engine mutex poisoned");
        for _ in 0..count {
            let pageid = match free.pop() {
                Some(p) => p,
                None => self.next_page.fetch_add(1, Ordering::AcqRel),
            };
            out.push(Vpid {
                volid: VOLID,
                pageid,
            });
        }
        drop(free);
        self.creation_epoch.fetch_add(1, Ordering::AcqRel);
        out
    }

    pub fn dealloc_page(&self, vpid: Vpid) {
        self.free_list
            .lock()
            .expect("io engine mutex poisoned")
            .push(vpid.pageid);
        self.creation_epoch.fetch_add(1, Ordering::AcqRel);
    }

    /// Creates a file's first page(s), returning the first allocated vpid. Mirrors the
    /// "file create(vfid, num_pages, ...) -> first_vpid" interface.
    pub fn create(&self, num_pages: usize) -> Vpid {
        self.alloc_pages(num_pages)[0]
    }

    pub fn read_page(&self, vpid: Vpid) -> Result<SlottedPage> {
        let mut buf = vec![0u8; self.page_size];
        match self.file.read_exact_at(&mut buf, self.offset_of(vpid)) {
            Ok(()) => Ok(SlottedPage::from_bytes(&buf)),
            // A page that was allocated but never flushed reads as a blank page.
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                Ok(SlottedPage::new(self.page_size))
            }
            Err(e) => Err(e.into()),
        }
    }

    pub fn write_page(&self, vpid: Vpid, page: &SlottedPage) -> Result<()> {
        let bytes = page.to_bytes();
        self.file.write_all_at(&bytes, self.offset_of(vpid))?;
        Ok(())
    }

    pub fn sync(&self) -> Result<()> {
        self.file.sync_data()?;
        Ok(())
    }

    /// `NEW` while the creating transaction has not yet committed past this file's
    /// most recent structural change, `OLD` afterwards.
    pub fn new_isvalid(&self) -> FileNewOld {
        if self.committed_epoch.load(Ordering::Acquire) >= self.creation_epoch.load(Ordering::Acquire)
        {
            FileNewOld::Old
        } else {
            FileNewOld::New
        }
    }

    /// Called when the transaction that created/last-restructured this file commits.
    pub fn mark_committed(&self) {
        let epoch = self.creation_epoch.load(Ordering::Acquire);
        self.committed_epoch.fetch_max(epoch, Ordering::AcqRel);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileNewOld {
    New,
    Old,
}
