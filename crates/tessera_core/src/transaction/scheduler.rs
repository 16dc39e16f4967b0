//! Deciding which transactions may start.
//!
//! Transactions of one database start in creation order, except that a
//! transaction may overtake earlier ones it does not conflict with. Two
//! transactions conflict when either is an upgrade, or when their scopes
//! overlap and at least one of them writes.

use crate::types::{TransactionId, TransactionMode};

/// What the scheduler needs to know about an unfinished transaction.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Claim<'a> {
    pub id: TransactionId,
    pub mode: TransactionMode,
    /// Sorted store names.
    pub scope: &'a [String],
    pub started: bool,
}

/// Returns true if `a` and `b` may not run at the same time.
pub(crate) fn conflicts(a: &Claim<'_>, b: &Claim<'_>) -> bool {
    if a.mode == TransactionMode::VersionChange || b.mode == TransactionMode::VersionChange {
        return true;
    }
    if !a.mode.can_write() && !b.mode.can_write() {
        return false;
    }
    a.scope.iter().any(|name| b.scope.binary_search(name).is_ok())
}

/// Returns the transactions that may start now.
///
/// `claims` lists every unfinished transaction of one database in
/// creation order. A transaction starts once no earlier unfinished
/// transaction conflicts with it.
pub(crate) fn startable(claims: &[Claim<'_>]) -> Vec<TransactionId> {
    claims
        .iter()
        .enumerate()
        .filter(|(_, claim)| !claim.started)
        .filter(|(i, claim)| claims[..*i].iter().all(|earlier| !conflicts(earlier, claim)))
        .map(|(_, claim)| claim.id)
        .collect()
}
