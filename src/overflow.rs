//! Overflow-key file: a content-addressed blob store for keys exceeding
//! `record::BTREE_MAX_KEYLEN_INPAGE`. Grounded on the pack's overflow-chain file
//! managers (append-only blob storage addressed by a stable id rather than an
//! in-place page offset, since a key's encoded length never changes after insert).

use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::Path;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Mutex;

use std::collections::HashMap;

use crate::error::{QSError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OverflowKeyId(pub i64);

struct Slot {
    offset: u64,
    len: u32,
}

pub struct OverflowKeyFile {
    file: Mutex<File>,
    index: Mutex<HashMap<OverflowKeyId, Slot>>,
    next_id: AtomicI64,
}

impl OverflowKeyFile {
    pub fn open(path: &Path) -> io::Result<OverflowKeyFile> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(path)?;
        let index = scan(&mut file)?;
        let next_id = index.keys().map(|id| id.0).max().map(|m| m + 1).unwrap_or(0);
        file.seek(SeekFrom::End(0))?;
        Ok(OverflowKeyFile {
            file: Mutex::new(file),
            index: Mutex::new(index),
            next_id: AtomicI64::new(next_id),
        })
    }

    pub fn put(&self, bytes: &[u8]) -> Result<OverflowKeyId> {
        let id = OverflowKeyId(self.next_id.fetch_add(1, Ordering::AcqRel));
        let mut file = self.file.lock().expect("overflow file mutex poisoned");
        let offset = file.seek(SeekFrom::End(0))?;
        file.write_all(&id.0.to_le_bytes())?;
        file.write_all(&(bytes.len() as u32).to_le_bytes())?;
        file.write_all(bytes)?;
        file.sync_data()?;
        drop(file);
        self.index.lock().expect("overflow index mutex poisoned").insert(
            id,
            Slot {
                offset,
                len: bytes.len() as u32,
            },
        );
        Ok(id)
    }

    pub fn get(&self, id: OverflowKeyId) -> Result<Vec<u8>> {
        let (offset, len) = {
            let index = self.index.lock().expect("overflow index mutex poisoned");
            let slot = index
                .get(&id)
                .ok_or_else(|| QSError::PageCorruption(format!("unknown overflow key id {:?}", id)))?;
            (slot.offset, slot.len)
        };
        let mut file = self.file.lock().expect("overflow file mutex poisoned");
        file.seek(SeekFrom::Start(offset + 8 + 4))?;
        let mut buf = vec![0u8; len as usize];
        file.read_exact(&mut buf)?;
        Ok(buf)
    }

    /// Overflow keys are write-once: deletion only ever happens because the whole
    /// leaf record referencing it was deleted, so there is no in-place update path
    /// to support (§4.1's oversized-key note).
    pub fn delete(&self, id: OverflowKeyId) {
        self.index.lock().expect("overflow index mutex poisoned").remove(&id);
    }
}

fn scan(file: &mut File) -> io::Result<HashMap<OverflowKeyId, Slot>> {
    file.seek(SeekFrom::Start(0))?;
    let mut bytes = Vec::new();
    file.read_to_end(&mut bytes)?;
    let mut idx = 0usize;
    let mut map = HashMap::new();
    while idx < bytes.len() {
        if bytes.len() - idx < 12 {
            break;
        }
        let id = i64::from_le_bytes(bytes[idx..idx + 8].try_into().unwrap());
        let len = u32::from_le_bytes(bytes[idx + 8..idx + 12].try_into().unwrap());
        let offset = idx as u64;
        idx += 12;
        if bytes.len() - idx < len as usize {
            break;
        }
        idx += len as usize;
        map.insert(OverflowKeyId(id), Slot { offset, len });
    }
    Ok(map)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    #[test]
    fn put_then_get_roundtrips() {
        let tmp = NamedTempFile::new().unwrap();
        let ovf = OverflowKeyFile::open(tmp.path()).unwrap();
        let id = ovf.put(b"a very long key that does not fit inline").unwrap();
        assert_eq!(ovf.get(id).unwrap(), b"a very long key that does not fit inline");
    }

    #[test]
    fn reopen_rebuilds_index() {
        let tmp = NamedTempFile::new().unwrap();
        let id = {
            let ovf = OverflowKeyFile::open(tmp.path()).unwrap();
            ovf.put(b"persisted-key").unwrap()
        };
        let reopened = OverflowKeyFile::open(tmp.path()).unwrap();
        assert_eq!(reopened.get(id).unwrap(), b"persisted-key");
    }
}
