//! Log manager: LSA assignment, undo/redo/undoredo log records, system
//! sub-operations, and crash replay, persisted as an append-only,
//! rewrite-on-checkpoint file.

use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;

use crate::types::Vpid;

/// Log sequence address: a monotonically increasing position in the log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Lsa(pub u64);

impl Lsa {
    pub const NULL: Lsa = Lsa(0);
}

/// The log record families. Each carries an opaque payload; undo records carry
/// the before-image, redo records the after-image, and `KeyvalIns`/`KeyvalDel`
/// carry the encoded `(Key, Oid)` pair for logical logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogKind {
    NodeHeaderUpd,
    NodeHeaderIns,
    NodeRecordUpd,
    NodeRecordIns,
    NodeRecordDel,
    LeafRecordKeyIns,
    LeafRecordOidIns,
    LeafRecordDel,
    OidTruncate,
    KeyvalIns,
    KeyvalDel,
    RootHeaderUpd,
    UpdateOvfid,
    InsPgRecords,
    DelPgRecords,
    CopyPage,
    NewPgAlloc,
    GetNewPage,
    Noop,
}

impl LogKind {
    fn tag(self) -> u8 {
        match self {
            LogKind::NodeHeaderUpd => 0,
            LogKind::NodeHeaderIns => 1,
            LogKind::NodeRecordUpd => 2,
            LogKind::NodeRecordIns => 3,
            LogKind::NodeRecordDel => 4,
            LogKind::LeafRecordKeyIns => 5,
            LogKind::LeafRecordOidIns => 6,
            LogKind::LeafRecordDel => 7,
            LogKind::OidTruncate => 8,
            LogKind::KeyvalIns => 9,
            LogKind::KeyvalDel => 10,
            LogKind::RootHeaderUpd => 11,
            LogKind::UpdateOvfid => 12,
            LogKind::InsPgRecords => 13,
            LogKind::DelPgRecords => 14,
            LogKind::CopyPage => 15,
            LogKind::NewPgAlloc => 16,
            LogKind::GetNewPage => 17,
            LogKind::Noop => 18,
        }
    }

    fn from_tag(tag: u8) -> LogKind {
        match tag {
            0 => LogKind::NodeHeaderUpd,
            1 => LogKind::NodeHeaderIns,
            2 => LogKind::NodeRecordUpd,
            3 => LogKind::NodeRecordIns,
            4 => LogKind::NodeRecordDel,
            5 => LogKind::LeafRecordKeyIns,
            6 => LogKind::LeafRecordOidIns,
            7 => LogKind::LeafRecordDel,
            8 => LogKind::OidTruncate,
            9 => LogKind::KeyvalIns,
            10 => LogKind::KeyvalDel,
            11 => LogKind::RootHeaderUpd,
            12 => LogKind::UpdateOvfid,
            13 => LogKind::InsPgRecords,
            14 => LogKind::DelPgRecords,
            15 => LogKind::CopyPage,
            16 => LogKind::NewPgAlloc,
            17 => LogKind::GetNewPage,
            _ => LogKind::Noop,
        }
    }
}

#[derive(Debug, Clone)]
pub struct LogRecord {
    pub kind: LogKind,
    pub vpid: Vpid,
    pub data: Vec<u8>,
}

impl LogRecord {
    pub fn new(kind: LogKind, vpid: Vpid, data: Vec<u8>) -> LogRecord {
        LogRecord { kind, vpid, data }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SysOpEnd {
    Commit,
    Abort,
    /// The sub-operation's effects become permanent as part of the parent
    /// operation rather than being independently committed.
    AttachToOuter,
}

#[derive(Debug, Clone)]
enum Body {
    Undo(LogRecord),
    Redo(LogRecord),
    UndoRedo { undo: LogRecord, redo: LogRecord },
    Compensating(LogRecord),
    SysOpStart,
    SysOpEnd(SysOpEnd),
}

#[derive(Debug, Clone)]
struct LogEntry {
    lsa: Lsa,
    tx_id: u64,
    body: Body,
}

struct WalState {
    file: File,
    entries: Vec<LogEntry>,
}

pub struct WalManager {
    state: Mutex<WalState>,
    next_lsa: AtomicU64,
    in_crash_recovery: AtomicBool,
}

impl WalManager {
    pub fn open(path: &Path) -> io::Result<WalManager> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(path)?;
        let entries = read_entries(&mut file)?;
        file.seek(SeekFrom::End(0))?;
        let next_lsa = entries.last().map(|e| e.lsa.0 + 1).unwrap_or(1);
        Ok(WalManager {
            state: Mutex::new(WalState { file, entries }),
            next_lsa: AtomicU64::new(next_lsa),
            in_crash_recovery: AtomicBool::new(false),
        })
    }

    fn assign_lsa(&self) -> Lsa {
        Lsa(self.next_lsa.fetch_add(1, Ordering::AcqRel))
    }

    fn push(&self, tx_id: u64, body: Body) -> Lsa {
        let lsa = self.assign_lsa();
        let entry = LogEntry { lsa, tx_id, body };
        let mut state = self.state.lock().expect("wal mutex poisoned");
        write_entry(&mut state.file, &entry).expect("wal append failed");
        state.file.sync_data().expect("wal sync failed");
        state.entries.push(entry);
        lsa
    }

    pub fn append_undo(&self, tx_id: u64, record: LogRecord) -> Lsa {
        self.push(tx_id, Body::Undo(record))
    }

    pub fn append_redo(&self, tx_id: u64, record: LogRecord) -> Lsa {
        self.push(tx_id, Body::Redo(record))
    }

    pub fn append_undoredo(&self, tx_id: u64, undo: LogRecord, redo: LogRecord) -> Lsa {
        self.push(tx_id, Body::UndoRedo { undo, redo })
    }

    /// Appends a compensating log record during undo, so recovery never re-applies
    /// the same undo twice.
    pub fn append_compensating(&self, tx_id: u64, record: LogRecord) -> Lsa {
        self.push(tx_id, Body::Compensating(record))
    }

    pub fn start_system_op(&self, tx_id: u64) -> Lsa {
        self.push(tx_id, Body::SysOpStart)
    }

    pub fn end_system_op(&self, tx_id: u64, outcome: SysOpEnd) -> Lsa {
        self.push(tx_id, Body::SysOpEnd(outcome))
    }

    pub fn is_in_crash_recovery(&self) -> bool {
        self.in_crash_recovery.load(Ordering::Acquire)
    }

    /// Replays every redo record (and undo-driven compensating records) in LSA
    /// order, invoking `apply` for each. Marks the manager as "in crash recovery"
    /// for the duration so callers can downgrade the two documented logging-hole
    /// errors to warnings.
    pub fn replay(&self, mut apply: impl FnMut(&LogRecord)) {
        self.in_crash_recovery.store(true, Ordering::Release);
        let state = self.state.lock().expect("wal mutex poisoned");
        for entry in &state.entries {
            match &entry.body {
                Body::Redo(r) | Body::UndoRedo { redo: r, .. } | Body::Compensating(r) => {
                    apply(r)
                }
                Body::Undo(_) | Body::SysOpStart | Body::SysOpEnd(_) => {}
            }
        }
        drop(state);
        self.in_crash_recovery.store(false, Ordering::Release);
    }

    /// Truncates the log once every entry is known to be durable on the data
    /// pages (i.e. after a checkpoint).
    pub fn truncate(&self) -> io::Result<()> {
        let mut state = self.state.lock().expect("wal mutex poisoned");
        state.entries.clear();
        state.file.set_len(0)?;
        state.file.sync_data()?;
        state.file.seek(SeekFrom::Start(0))?;
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.state.lock().expect("wal mutex poisoned").entries.len()
    }
}

fn write_entry(file: &mut File, entry: &LogEntry) -> io::Result<()> {
    file.write_all(&entry.lsa.0.to_le_bytes())?;
    file.write_all(&entry.tx_id.to_le_bytes())?;
    match &entry.body {
        Body::Undo(r) => {
            file.write_all(&[0])?;
            write_record(file, r)?;
        }
        Body::Redo(r) => {
            file.write_all(&[1])?;
            write_record(file, r)?;
        }
        Body::UndoRedo { undo, redo } => {
            file.write_all(&[2])?;
            write_record(file, undo)?;
            write_record(file, redo)?;
        }
        Body::Compensating(r) => {
            file.write_all(&[3])?;
            write_record(file, r)?;
        }
        Body::SysOpStart => {
            file.write_all(&[4])?;
        }
        Body::SysOpEnd(outcome) => {
            file.write_all(&[5])?;
            let byte = match outcome {
                SysOpEnd::Commit => 0u8,
                SysOpEnd::Abort => 1u8,
                SysOpEnd::AttachToOuter => 2u8,
            };
            file.write_all(&[byte])?;
        }
    }
    Ok(())
}

fn write_record(file: &mut File, record: &LogRecord) -> io::Result<()> {
    file.write_all(&[record.kind.tag()])?;
    file.write_all(&record.vpid.pageid.to_le_bytes())?;
    file.write_all(&(record.vpid.volid as i32).to_le_bytes())?;
    file.write_all(&(record.data.len() as u32).to_le_bytes())?;
    file.write_all(&record.data)?;
    Ok(())
}

fn read_entries(file: &mut File) -> io::Result<Vec<LogEntry>> {
    file.seek(SeekFrom::Start(0))?;
    let mut bytes = Vec::new();
    file.read_to_end(&mut bytes)?;
    let mut idx = 0usize;
    let mut entries = Vec::new();
    while idx < bytes.len() {
        let start = idx;
        if bytes.len() - idx < 8 + 8 + 1 {
            break;
        }
        let lsa = u64::from_le_bytes(bytes[idx..idx + 8].try_into().unwrap());
        idx += 8;
        let tx_id = u64::from_le_bytes(bytes[idx..idx + 8].try_into().unwrap());
        idx += 8;
        let tag = bytes[idx];
        idx += 1;
        let body = match tag {
            0 => match read_record(&bytes, &mut idx) {
                Some(r) => Body::Undo(r),
                None => {
                    idx = start;
                    break;
                }
            },
            1 => match read_record(&bytes, &mut idx) {
                Some(r) => Body::Redo(r),
                None => {
                    idx = start;
                    break;
                }
            },
            2 => {
                let undo = read_record(&bytes, &mut idx);
                let redo = undo.as_ref().and_then(|_| read_record(&bytes, &mut idx));
                match (undo, redo) {
                    (Some(undo), Some(redo)) => Body::UndoRedo { undo, redo },
                    _ => {
                        idx = start;
                        break;
                    }
                }
            }
            3 => match read_record(&bytes, &mut idx) {
                Some(r) => Body::Compensating(r),
                None => {
                    idx = start;
                    break;
                }
            },
            4 => Body::SysOpStart,
            5 => {
                if idx >= bytes.len() {
                    idx = start;
                    break;
                }
                let outcome = match bytes[idx] {
                    0 => SysOpEnd::Commit,
                    1 => SysOpEnd::Abort,
                    _ => SysOpEnd::AttachToOuter,
                };
                idx += 1;
                Body::SysOpEnd(outcome)
            }
            _ => {
                idx = start;
                break;
            }
        };
        entries.push(LogEntry {
            lsa: Lsa(lsa),
            tx_id,
            body,
        });
    }
    Ok(entries)
}

fn read_record(bytes: &[u8], idx: &mut usize) -> Option<LogRecord> {
    if bytes.len() - *idx < 1 + 4 + 4 + 4 {
        return None;
    }
    let kind = LogKind::from_tag(bytes[*idx]);
    *idx += 1;
    let pageid = i32::from_le_bytes(bytes[*idx..*idx + 4].try_into().unwrap());
    *idx += 4;
    let volid = i32::from_le_bytes(bytes[*idx..*idx + 4].try_into().unwrap()) as i16;
    *idx += 4;
    let len = u32::from_le_bytes(bytes[*idx..*idx + 4].try_into().unwrap()) as usize;
    *idx += 4;
    if bytes.len() - *idx < len {
        return None;
    }
    let data = bytes[*idx..*idx + len].to_vec();
    *idx += len;
    Some(LogRecord {
        kind,
        vpid: Vpid { volid, pageid },
        data,
    })
}

/// Groups per-transaction undo chains for recovery's undo pass; not yet used by the
/// forward replay path but kept for the rollback direction (`btree::rollback`).
pub fn undo_chain(entries: &[LogRecord], tx_id: u64, by_tx: &HashMap<u64, Vec<usize>>) -> Vec<usize> {
    by_tx.get(&tx_id).cloned().unwrap_or_default().into_iter().filter(|&i| i < entries.len()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    #[test]
    fn entries_round_trip_through_reopen() {
        let tmp = NamedTempFile::new().unwrap();
        {
            let wal = WalManager::open(tmp.path()).unwrap();
            let vpid = Vpid { volid: 0, pageid: 3 };
            wal.append_redo(1, LogRecord::new(LogKind::LeafRecordKeyIns, vpid, b"hello".to_vec()));
            wal.append_undoredo(
                1,
                LogRecord::new(LogKind::LeafRecordDel, vpid, b"before".to_vec()),
                LogRecord::new(LogKind::LeafRecordKeyIns, vpid, b"after".to_vec()),
            );
            wal.end_system_op(1, SysOpEnd::Commit);
            assert_eq!(wal.len(), 3);
        }
        let reopened = WalManager::open(tmp.path()).unwrap();
        assert_eq!(reopened.len(), 3);
    }

    #[test]
    fn replay_applies_redo_records_in_order() {
        let tmp = NamedTempFile::new().unwrap();
        let wal = WalManager::open(tmp.path()).unwrap();
        let vpid = Vpid { volid: 0, pageid: 1 };
        wal.append_redo(7, LogRecord::new(LogKind::NodeRecordIns, vpid, vec![1]));
        wal.append_redo(7, LogRecord::new(LogKind::NodeRecordIns, vpid, vec![2]));
        let mut seen = Vec::new();
        wal.replay(|r| seen.push(r.data.clone()));
        assert_eq!(seen, vec![vec![1], vec![2]]);
        assert!(!wal.is_in_crash_recovery());
    }

    #[test]
    fn truncate_clears_the_log() {
        let tmp = NamedTempFile::new().unwrap();
        let wal = WalManager::open(tmp.path()).unwrap();
        let vpid = Vpid { volid: 0, pageid: 1 };
        wal.append_redo(1, LogRecord::new(LogKind::Noop, vpid, vec![]));
        wal.truncate().unwrap();
        assert_eq!(wal.len(), 0);
    }
}
