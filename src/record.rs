//! The record codec (§4.1): leaf, non-leaf, root-header and overflow-key-header
//! records. A node's slot 0 always holds its header record; slots 1.. hold key
//! records in key order.

use crate::overflow::OverflowKeyId;
use crate::types::{Domain, Key, NodeType, Oid, Vpid, OID_BYTE_LEN};
use crate::utils::{read_i64, read_u16, read_u32, write_u16, write_u32};

pub const BTREE_MAX_KEYLEN_INPAGE: usize = 180;
/// Below this many OIDs, the list is kept inline in the leaf record; at or beyond,
/// the tail spills into an OID-overflow page chain.
pub const MAX_INLINE_OIDS: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeHeader {
    pub node_type: NodeType,
    pub key_cnt: u32,
    pub max_key_len: u32,
    /// Leaf right-sibling chain pointer; `Vpid::NULL` for non-leaf nodes and for
    /// the rightmost leaf.
    pub next_vpid: Vpid,
}

impl NodeHeader {
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(17);
        out.push(match self.node_type {
            NodeType::Leaf => 0,
            NodeType::NonLeaf => 1,
        });
        write_u32(&mut out, self.key_cnt);
        write_u32(&mut out, self.max_key_len);
        out.extend_from_slice(&self.next_vpid.to_bytes());
        out
    }

    pub fn decode(bytes: &[u8]) -> NodeHeader {
        let node_type = if bytes[0] == 0 {
            NodeType::Leaf
        } else {
            NodeType::NonLeaf
        };
        let key_cnt = read_u32(bytes, 1);
        let max_key_len = read_u32(bytes, 5);
        let next_vpid = Vpid::from_bytes(&bytes[9..15]);
        NodeHeader {
            node_type,
            key_cnt,
            max_key_len,
            next_vpid,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UniqueStats {
    pub num_oids: i64,
    pub num_nulls: i64,
    pub num_keys: i64,
}

impl UniqueStats {
    /// Non-unique indexes carry all-`-1` statistics (§3).
    pub const UNTRACKED: UniqueStats = UniqueStats {
        num_oids: -1,
        num_nulls: -1,
        num_keys: -1,
    };

    pub fn is_tracked(&self) -> bool {
        self.num_oids >= 0
    }

    /// The invariant every unique index must satisfy (§3, testable property 5).
    pub fn check_invariant(&self) -> bool {
        !self.is_tracked() || self.num_nulls + self.num_keys == self.num_oids
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RootHeader {
    pub header: NodeHeader,
    pub ncols: u32,
    pub domain: Domain,
    pub unique: bool,
    pub stats: UniqueStats,
    pub overflow_file_vpid: Vpid,
}

impl RootHeader {
    pub fn encode(&self) -> Vec<u8> {
        let mut out = self.header.encode();
        write_u32(&mut out, self.ncols);
        out.push(self.unique as u8);
        out.extend_from_slice(&self.overflow_file_vpid.to_bytes());
        out.push(self.domain.reverse as u8);
        for &d in &self.domain.descending {
            out.push(d as u8);
        }
        out.extend_from_slice(&self.stats.num_oids.to_be_bytes());
        out.extend_from_slice(&self.stats.num_nulls.to_be_bytes());
        out.extend_from_slice(&self.stats.num_keys.to_be_bytes());
        out
    }

    pub fn decode(bytes: &[u8]) -> RootHeader {
        let header = NodeHeader::decode(bytes);
        let mut cursor = 15;
        let ncols = read_u32(bytes, cursor);
        cursor += 4;
        let unique = bytes[cursor] != 0;
        cursor += 1;
        let overflow_file_vpid = Vpid::from_bytes(&bytes[cursor..cursor + 6]);
        cursor += 6;
        let reverse = bytes[cursor] != 0;
        cursor += 1;
        let mut descending = Vec::with_capacity(ncols as usize);
        for _ in 0..ncols {
            descending.push(bytes[cursor] != 0);
            cursor += 1;
        }
        let num_oids = read_i64(bytes, cursor);
        cursor += 8;
        let num_nulls = read_i64(bytes, cursor);
        cursor += 8;
        let num_keys = read_i64(bytes, cursor);
        RootHeader {
            header,
            ncols,
            domain: Domain { descending, reverse },
            unique,
            stats: UniqueStats {
                num_oids,
                num_nulls,
                num_keys,
            },
            overflow_file_vpid,
        }
    }
}

/// Where a leaf record's OID payload lives: inline in the record, or spilled into
/// an OID-overflow chain once it grows past `MAX_INLINE_OIDS`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OidPayload {
    Inline(Vec<Oid>),
    Overflow { head: Vpid, count: u32 },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyPayload {
    Inline(Key),
    /// Oversized key: the in-page record carries only the overflow id, the actual
    /// column bytes live in the overflow-key file.
    Overflow(OverflowKeyId),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeafRecord {
    pub key: KeyPayload,
    pub oids: OidPayload,
}

impl LeafRecord {
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::new();
        match &self.key {
            KeyPayload::Inline(key) => {
                out.push(0);
                let enc = key.encode();
                write_u32(&mut out, enc.len() as u32);
                out.extend_from_slice(&enc);
            }
            KeyPayload::Overflow(id) => {
                out.push(1);
                out.extend_from_slice(&id.0.to_be_bytes());
            }
        }
        match &self.oids {
            OidPayload::Inline(oids) => {
                out.push(0);
                write_u32(&mut out, oids.len() as u32);
                for oid in oids {
                    out.extend_from_slice(&oid.to_bytes());
                }
            }
            OidPayload::Overflow { head, count } => {
                out.push(1);
                out.extend_from_slice(&head.to_bytes());
                write_u32(&mut out, *count);
            }
        }
        out
    }

    pub fn decode(bytes: &[u8], ncols: usize) -> LeafRecord {
        let mut cursor = 0;
        let key = if bytes[cursor] == 0 {
            cursor += 1;
            let len = read_u32(bytes, cursor) as usize;
            cursor += 4;
            let key = Key::decode(&bytes[cursor..cursor + len], ncols);
            cursor += len;
            KeyPayload::Inline(key)
        } else {
            cursor += 1;
            let id = read_i64(bytes, cursor);
            cursor += 8;
            KeyPayload::Overflow(OverflowKeyId(id))
        };
        let oids = if bytes[cursor] == 0 {
            cursor += 1;
            let count = read_u32(bytes, cursor) as usize;
            cursor += 4;
            let mut oids = Vec::with_capacity(count);
            for _ in 0..count {
                oids.push(Oid::from_bytes(&bytes[cursor..cursor + OID_BYTE_LEN]));
                cursor += OID_BYTE_LEN;
            }
            OidPayload::Inline(oids)
        } else {
            cursor += 1;
            let head = Vpid::from_bytes(&bytes[cursor..cursor + 6]);
            cursor += 6;
            let count = read_u32(bytes, cursor);
            OidPayload::Overflow { head, count }
        };
        LeafRecord { key, oids }
    }

    pub fn oid_count(&self) -> usize {
        match &self.oids {
            OidPayload::Inline(oids) => oids.len(),
            OidPayload::Overflow { count, .. } => *count as usize,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NonLeafRecord {
    pub key: KeyPayload,
    pub child: Vpid,
}

impl NonLeafRecord {
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::new();
        match &self.key {
            KeyPayload::Inline(key) => {
                out.push(0);
                let enc = key.encode();
                write_u16(&mut out, enc.len() as u16);
                out.extend_from_slice(&enc);
            }
            KeyPayload::Overflow(id) => {
                out.push(1);
                out.extend_from_slice(&id.0.to_be_bytes());
            }
        }
        out.extend_from_slice(&self.child.to_bytes());
        out
    }

    pub fn decode(bytes: &[u8], ncols: usize) -> NonLeafRecord {
        let mut cursor = 0;
        let key = if bytes[cursor] == 0 {
            cursor += 1;
            let len = read_u16(bytes, cursor) as usize;
            cursor += 2;
            let key = Key::decode(&bytes[cursor..cursor + len], ncols);
            cursor += len;
            KeyPayload::Inline(key)
        } else {
            cursor += 1;
            let id = read_i64(bytes, cursor);
            cursor += 8;
            KeyPayload::Overflow(OverflowKeyId(id))
        };
        let child = Vpid::from_bytes(&bytes[cursor..cursor + 6]);
        NonLeafRecord { key, child }
    }
}

pub fn estimate_key_size(key: &Key) -> usize {
    if key.encoded_len() > BTREE_MAX_KEYLEN_INPAGE {
        9
    } else {
        key.encoded_len() + 5
    }
}

pub fn oversized(key: &Key) -> bool {
    key.encoded_len() > BTREE_MAX_KEYLEN_INPAGE
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Key;

    #[test]
    fn leaf_record_roundtrips_with_inline_oids() {
        let rec = LeafRecord {
            key: KeyPayload::Inline(Key(vec![Some(b"abc".to_vec())])),
            oids: OidPayload::Inline(vec![Oid {
                volid: 0,
                pageid: 1,
                slotid: 2,
            }]),
        };
        let bytes = rec.encode();
        assert_eq!(LeafRecord::decode(&bytes, 1), rec);
    }

    #[test]
    fn leaf_record_roundtrips_with_overflow_oids() {
        let rec = LeafRecord {
            key: KeyPayload::Inline(Key(vec![Some(b"abc".to_vec())])),
            oids: OidPayload::Overflow {
                head: Vpid { volid: 0, pageid: 9 },
                count: 500,
            },
        };
        let bytes = rec.encode();
        assert_eq!(LeafRecord::decode(&bytes, 1), rec);
    }

    #[test]
    fn non_leaf_record_roundtrips() {
        let rec = NonLeafRecord {
            key: KeyPayload::Inline(Key(vec![Some(b"z".to_vec())])),
            child: Vpid { volid: 0, pageid: 77 },
        };
        let bytes = rec.encode();
        assert_eq!(NonLeafRecord::decode(&bytes, 1), rec);
    }

    #[test]
    fn unique_stats_invariant_holds() {
        let stats = UniqueStats {
            num_oids: 10,
            num_nulls: 2,
            num_keys: 8,
        };
        assert!(stats.check_invariant());
    }
}
