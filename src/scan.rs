//! Range and keyval scan (§4.9, §4.10): building full-arity bounds out of a
//! partial-prefix range request, testing candidate keys against those bounds, and
//! the next-key locking state machine that revalidates a scan position after an
//! unconditional (blocking) lock acquisition may have let the tree change
//! underneath it.

use crate::error::{QSError, Result};
use crate::lock_manager::{LockManager, LockMode};
use crate::types::{Domain, Key, RangeKind};
use crate::wal::Lsa;

/// A fully padded range: both endpoints are full-arity keys (built from whatever
/// prefix the caller supplied via `Domain::pad_bound`), each independently
/// inclusive or exclusive.
pub struct Bounds {
    pub lower: Key,
    pub lower_inclusive: bool,
    pub upper: Key,
    pub upper_inclusive: bool,
}

impl Bounds {
    pub fn build(domain: &Domain, kind: RangeKind, lower_prefix: Option<&Key>, upper_prefix: Option<&Key>) -> Bounds {
        let lower = if kind.has_lower() {
            domain.pad_bound(lower_prefix.expect("range kind requires a lower bound"), true, kind.lower_inclusive())
        } else {
            domain.pad_bound(&Key(Vec::new()), true, true)
        };
        let upper = if kind.has_upper() {
            domain.pad_bound(upper_prefix.expect("range kind requires an upper bound"), false, kind.upper_inclusive())
        } else {
            domain.pad_bound(&Key(Vec::new()), false, true)
        };
        Bounds {
            lower,
            lower_inclusive: kind.lower_inclusive() || !kind.has_lower(),
            upper,
            upper_inclusive: kind.upper_inclusive() || !kind.has_upper(),
        }
    }

    /// `true` if `candidate` satisfies the lower bound; distinguishing this from
    /// the upper-bound check lets a forward scan stop as soon as the upper bound
    /// is exceeded, rather than filtering the whole remaining leaf chain.
    pub fn satisfies_lower(&self, domain: &Domain, candidate: &Key) -> bool {
        let ord = domain.cmp(candidate, &self.lower);
        if self.lower_inclusive {
            ord.is_ge()
        } else {
            ord.is_gt()
        }
    }

    pub fn satisfies_upper(&self, domain: &Domain, candidate: &Key) -> bool {
        let ord = domain.cmp(candidate, &self.upper);
        if self.upper_inclusive {
            ord.is_le()
        } else {
            ord.is_lt()
        }
    }

    pub fn contains(&self, domain: &Domain, candidate: &Key) -> bool {
        self.satisfies_lower(domain, candidate) && self.satisfies_upper(domain, candidate)
    }
}

/// Builds the degenerate range used by a keyval lookup: both endpoints equal the
/// looked-up key, inclusive on both sides.
pub fn keyval_bounds(key: Key) -> Bounds {
    Bounds {
        lower: key.clone(),
        lower_inclusive: true,
        upper: key,
        upper_inclusive: true,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockOutcome {
    /// Lock granted without the scan needing to re-check its position.
    Granted,
    /// The unconditional wait blocked long enough that the page's LSA moved;
    /// the caller must re-descend from the scan key rather than trust its
    /// in-hand slot index.
    RetryFromKey,
}

/// Conditional-then-unconditional acquisition with LSA-based revalidation
/// (§4.9's "search_again" / "getoid_again_with_check" dance): try the lock without
/// blocking first; if that fails, drop down to a blocking wait, and on return
/// check whether the page the caller is scanning changed while it waited.
pub fn lock_with_revalidation(
    lock_mgr: &LockManager,
    tx_id: u64,
    oid: crate::types::Oid,
    mode: LockMode,
    lsa_before: Lsa,
    current_lsa: impl FnOnce() -> Lsa,
) -> Result<LockOutcome> {
    match lock_mgr.lock_object(tx_id, oid, mode, true) {
        Ok(()) => Ok(LockOutcome::Granted),
        Err(QSError::LockNotGranted(crate::error::LockFailure::Timeout)) => {
            lock_mgr.lock_object(tx_id, oid, mode, false)?;
            if current_lsa() == lsa_before {
                Ok(LockOutcome::Granted)
            } else {
                Ok(LockOutcome::RetryFromKey)
            }
        }
        Err(e) => Err(e),
    }
}
