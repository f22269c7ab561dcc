//! The slotted page manager: an in-crate stand-in for the surrounding database's
//! record placement layer, since there is no external one to supply it here.
//!
//! Pages are kept in memory as a logical vector of variable-length records (slot id
//! is simply the vector index) rather than as a byte-exact slot directory; slot order
//! is the node's key order, and `to_bytes`/`from_bytes` give the on-disk, byte-exact
//! representation used by the file manager and by page-physical WAL logging.

use crate::error::{QSError, Result};

/// Default page size in bytes: 16 KiB, a valid choice (power of two, 1 KiB..=16 KiB).
pub const DEFAULT_PAGE_SIZE: usize = 16 * 1024;

/// Fixed overhead SlottedPage reserves per record for its directory entry (a
/// `[u32 offset][u32 len]` pair in the on-disk layout) plus a small page trailer.
const SLOT_DIR_ENTRY: usize = 8;
const PAGE_TRAILER: usize = 8;

pub fn is_valid_page_size(size: usize) -> bool {
    (1024..=16 * 1024).contains(&size) && size.is_power_of_two()
}

#[derive(Debug, Clone)]
pub struct SlottedPage {
    records: Vec<Vec<u8>>,
    page_size: usize,
}

impl SlottedPage {
    pub fn new(page_size: usize) -> SlottedPage {
        debug_assert!(is_valid_page_size(page_size));
        SlottedPage {
            records: Vec::new(),
            page_size,
        }
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    pub fn number_of_records(&self) -> usize {
        self.records.len()
    }

    pub fn get_record(&self, slot: usize) -> &[u8] {
        &self.records[slot]
    }

    pub fn free_space(&self) -> usize {
        let used: usize = self
            .records
            .iter()
            .map(|r| r.len() + SLOT_DIR_ENTRY)
            .sum();
        self.page_size
            .saturating_sub(used)
            .saturating_sub(PAGE_TRAILER)
    }

    /// Upper bound on the size of a new record that could be inserted right now.
    pub fn max_space_for_new_record(&self) -> usize {
        self.free_space().saturating_sub(SLOT_DIR_ENTRY)
    }

    pub fn insert_at(&mut self, slot: usize, rec: &[u8]) -> Result<()> {
        if rec.len() + SLOT_DIR_ENTRY > self.free_space() {
            return Err(QSError::Oom);
        }
        self.records.insert(slot, rec.to_vec());
        Ok(())
    }

    pub fn update(&mut self, slot: usize, rec: &[u8]) -> Result<()> {
        let old_len = self.records[slot].len();
        if rec.len() > old_len && rec.len() - old_len > self.free_space() {
            return Err(QSError::Oom);
        }
        self.records[slot] = rec.to_vec();
        Ok(())
    }

    pub fn delete(&mut self, slot: usize) {
        self.records.remove(slot);
    }

    pub fn initialize(&mut self) {
        self.records.clear();
    }

    /// Serializes to the byte-exact on-disk layout: `[u32 count]` then, per record,
    /// `[u32 len][bytes]`. Used for page flushes and page-physical WAL logging.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.page_size);
        out.extend_from_slice(&(self.records.len() as u32).to_be_bytes());
        for rec in &self.records {
            out.extend_from_slice(&(rec.len() as u32).to_be_bytes());
            out.extend_from_slice(rec);
        }
        out.resize(self.page_size, 0);
        out
    }

    pub fn from_bytes(bytes: &[u8]) -> SlottedPage {
        let page_size = bytes.len();
        let count = u32::from_be_bytes(bytes[0..4].try_into().unwrap()) as usize;
        let mut cursor = 4;
        let mut records = Vec::with_capacity(count);
        for _ in 0..count {
            let len = u32::from_be_bytes(bytes[cursor..cursor + 4].try_into().unwrap()) as usize;
            cursor += 4;
            records.push(bytes[cursor..cursor + len].to_vec());
            cursor += len;
        }
        SlottedPage {
            records,
            page_size,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_get_delete_preserve_order() {
        let mut page = SlottedPage::new(DEFAULT_PAGE_SIZE);
        page.insert_at(0, b"header").unwrap();
        page.insert_at(1, b"one").unwrap();
        page.insert_at(2, b"two").unwrap();
        assert_eq!(page.get_record(1), b"one");
        page.delete(1);
        assert_eq!(page.number_of_records(), 2);
        assert_eq!(page.get_record(1), b"two");
    }

    #[test]
    fn roundtrips_through_bytes() {
        let mut page = SlottedPage::new(4096);
        page.insert_at(0, b"header").unwrap();
        page.insert_at(1, b"hello world").unwrap();
        let bytes = page.to_bytes();
        assert_eq!(bytes.len(), 4096);
        let restored = SlottedPage::from_bytes(&bytes);
        assert_eq!(restored.number_of_records(), 2);
        assert_eq!(restored.get_record(1), b"hello world");
    }

    #[test]
    fn insert_fails_when_full() {
        let mut page = SlottedPage::new(1024);
        let big = vec![0u8; 2000];
        assert!(page.insert_at(0, &big).is_err());
    }
}
