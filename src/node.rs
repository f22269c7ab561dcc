//! Node-level search (§4.2): binary search over a decoded page's records using the
//! incremental prefix-matching optimisation — each comparison's divergence column
//! becomes a hint bounding how much of the next candidate's prefix is already known
//! to match the search key, so repeated columns are never re-compared.

use std::cmp::Ordering;

use crate::record::{LeafRecord, NonLeafRecord};
use crate::types::{Domain, Key, Vpid};

/// Binary searches `n` keys produced by `key_at`, returning `Ok(i)` on an exact
/// match or `Err(i)` for the insertion point that keeps the sequence ordered.
pub fn binary_search_keys(
    domain: &Domain,
    target: &Key,
    n: usize,
    key_at: impl Fn(usize) -> Key,
) -> Result<usize, usize> {
    let mut lo = 0usize;
    let mut hi = n;
    let mut lo_match = 0usize;
    let mut hi_match = 0usize;
    while lo < hi {
        let mid = lo + (hi - lo) / 2;
        let hint = lo_match.min(hi_match);
        let mid_key = key_at(mid);
        let (ord, matched) = domain.cmp_from(target, &mid_key, hint);
        match ord {
            Ordering::Equal => return Ok(mid),
            Ordering::Less => {
                hi = mid;
                hi_match = matched;
            }
            Ordering::Greater => {
                lo = mid + 1;
                lo_match = matched;
            }
        }
    }
    Err(lo)
}

/// A non-leaf node's logical content: the child covering keys below the first
/// separator, then one (separator key, right child) pair per remaining record.
pub struct NonLeafPage {
    pub leftmost_child: Vpid,
    pub records: Vec<NonLeafRecord>,
}

impl NonLeafPage {
    /// Finds the child pointer to descend into for `target`, plus the index of the
    /// separator record that bounded the choice (`None` for the leftmost child).
    pub fn search(
        &self,
        domain: &Domain,
        target: &Key,
        resolve: impl Fn(&NonLeafRecord) -> Key,
    ) -> (Vpid, Option<usize>) {
        let n = self.records.len();
        match binary_search_keys(domain, target, n, |i| resolve(&self.records[i])) {
            Ok(i) => (self.records[i].child, Some(i)),
            Err(0) => (self.leftmost_child, None),
            Err(i) => (self.records[i - 1].child, Some(i - 1)),
        }
    }
}

/// A leaf node's logical content, in key order.
pub struct LeafPage {
    pub records: Vec<LeafRecord>,
}

impl LeafPage {
    pub fn search(
        &self,
        domain: &Domain,
        target: &Key,
        resolve: impl Fn(&LeafRecord) -> Key,
    ) -> Result<usize, usize> {
        binary_search_keys(domain, target, self.records.len(), |i| resolve(&self.records[i]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{KeyPayload, OidPayload};
    use crate::types::Oid;

    fn key(b: &[u8]) -> Key {
        Key(vec![Some(b.to_vec())])
    }

    fn leaf_rec(b: &[u8]) -> LeafRecord {
        LeafRecord {
            key: KeyPayload::Inline(key(b)),
            oids: OidPayload::Inline(vec![Oid {
                volid: 0,
                pageid: 1,
                slotid: 0,
            }]),
        }
    }

    fn resolve_leaf(r: &LeafRecord) -> Key {
        match &r.key {
            KeyPayload::Inline(k) => k.clone(),
            KeyPayload::Overflow(_) => panic!("no overflow keys in this test"),
        }
    }

    #[test]
    fn finds_exact_match() {
        let page = LeafPage {
            records: vec![leaf_rec(b"a"), leaf_rec(b"m"), leaf_rec(b"z")],
        };
        let domain = Domain::ascending(1);
        assert_eq!(page.search(&domain, &key(b"m"), resolve_leaf), Ok(1));
    }

    #[test]
    fn finds_insertion_point_when_absent() {
        let page = LeafPage {
            records: vec![leaf_rec(b"a"), leaf_rec(b"m"), leaf_rec(b"z")],
        };
        let domain = Domain::ascending(1);
        assert_eq!(page.search(&domain, &key(b"g"), resolve_leaf), Err(1));
        assert_eq!(page.search(&domain, &key(b"zz"), resolve_leaf), Err(3));
        assert_eq!(page.search(&domain, &key(b"0"), resolve_leaf), Err(0));
    }

    fn nonleaf_rec(b: &[u8], child: i32) -> NonLeafRecord {
        NonLeafRecord {
            key: KeyPayload::Inline(key(b)),
            child: Vpid {
                volid: 0,
                pageid: child,
            },
        }
    }

    #[test]
    fn nonleaf_search_picks_covering_child() {
        let page = NonLeafPage {
            leftmost_child: Vpid { volid: 0, pageid: 0 },
            records: vec![nonleaf_rec(b"m", 1), nonleaf_rec(b"z", 2)],
        };
        let domain = Domain::ascending(1);
        let resolve = |r: &NonLeafRecord| match &r.key {
            KeyPayload::Inline(k) => k.clone(),
            KeyPayload::Overflow(_) => panic!("no overflow keys in this test"),
        };
        assert_eq!(page.search(&domain, &key(b"a"), resolve).0.pageid, 0);
        assert_eq!(page.search(&domain, &key(b"m"), resolve).0.pageid, 1);
        assert_eq!(page.search(&domain, &key(b"q"), resolve).0.pageid, 1);
        assert_eq!(page.search(&domain, &key(b"zz"), resolve).0.pageid, 2);
    }
}
