//! Membership set reconciliation
//!
//! Computes a new reference set from a current set plus requested
//! add/remove deltas. The same algorithm drives both role/permission and
//! user/role updates; only the backing store consulted for existence
//! differs. All functions here are pure (no IO, no panics); persistence
//! of the result is the caller's responsibility.

use std::collections::HashSet;
use thiserror::Error;
use uuid::Uuid;

use crate::models::UserStatus;

/// Reconciliation failure
///
/// Validation is exhaustive: one bad candidate anywhere in either delta
/// list aborts the whole operation before anything is applied.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ReconcileError {
    /// Candidate is not a well-formed identity
    #[error("invalid id: {0}")]
    InvalidId(String),

    /// Candidate is well-formed but names no existing record
    #[error("unknown id: {0}")]
    UnknownId(Uuid),
}

/// Parse raw candidate ids into identities
///
/// Candidates are trimmed before parsing; the first malformed entry
/// aborts the whole batch.
pub fn parse_candidates(raw: &[String]) -> Result<Vec<Uuid>, ReconcileError> {
    raw.iter()
        .map(|candidate| {
            let trimmed = candidate.trim();
            Uuid::parse_str(trimmed).map_err(|_| ReconcileError::InvalidId(trimmed.to_string()))
        })
        .collect()
}

/// Reconcile a membership set against validated add/remove deltas
///
/// `known` is the set of ids confirmed to exist in the target store.
/// Every candidate in `adds` and then `removes` must be known, otherwise
/// the first offender is reported and `current` is left untouched by the
/// caller. On success the result is `(current ∪ adds) \ removes`:
/// additions are applied before removals, so an id present in both lists
/// nets to removed. The result is deduplicated and keeps the order of
/// `current` with fresh additions appended.
pub fn reconcile(
    current: &[Uuid],
    adds: &[Uuid],
    removes: &[Uuid],
    known: &HashSet<Uuid>,
) -> Result<Vec<Uuid>, ReconcileError> {
    for candidate in adds.iter().chain(removes.iter()) {
        if !known.contains(candidate) {
            return Err(ReconcileError::UnknownId(*candidate));
        }
    }

    Ok(apply_delta(current, adds, removes))
}

fn apply_delta(current: &[Uuid], adds: &[Uuid], removes: &[Uuid]) -> Vec<Uuid> {
    let removals: HashSet<Uuid> = removes.iter().copied().collect();

    let mut seen: HashSet<Uuid> = HashSet::new();
    let mut result = Vec::with_capacity(current.len() + adds.len());

    for id in current.iter().chain(adds.iter()) {
        if removals.contains(id) || !seen.insert(*id) {
            continue;
        }
        result.push(*id);
    }

    result
}

/// Derive a user's status from its role set
///
/// Empty set means Inactive, non-empty means Active. The derivation is
/// unconditional: a manually Suspended user is overwritten by the next
/// role mutation.
pub fn derive_status(roles: &[Uuid]) -> UserStatus {
    if roles.is_empty() {
        UserStatus::Inactive
    } else {
        UserStatus::Active
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(n: usize) -> Vec<Uuid> {
        (0..n).map(|_| Uuid::new_v4()).collect()
    }

    fn known_of(sets: &[&[Uuid]]) -> HashSet<Uuid> {
        sets.iter().flat_map(|s| s.iter().copied()).collect()
    }

    #[test]
    fn test_result_is_union_minus_removals() {
        let current = ids(3);
        let adds = ids(2);
        let removes = vec![current[1]];
        let known = known_of(&[&adds, &removes]);

        let result = reconcile(&current, &adds, &removes, &known).unwrap();

        assert_eq!(result, vec![current[0], current[2], adds[0], adds[1]]);
    }

    #[test]
    fn test_result_contains_no_duplicates() {
        let current = ids(2);
        // One candidate already held, one listed twice
        let fresh = Uuid::new_v4();
        let adds = vec![current[0], fresh, fresh];
        let known = known_of(&[&adds]);

        let result = reconcile(&current, &adds, &[], &known).unwrap();

        assert_eq!(result, vec![current[0], current[1], fresh]);
    }

    #[test]
    fn test_add_order_does_not_change_membership() {
        let current = ids(2);
        let adds = ids(3);
        let mut reversed = adds.clone();
        reversed.reverse();
        let known = known_of(&[&adds]);

        let a: HashSet<Uuid> = reconcile(&current, &adds, &[], &known)
            .unwrap()
            .into_iter()
            .collect();
        let b: HashSet<Uuid> = reconcile(&current, &reversed, &[], &known)
            .unwrap()
            .into_iter()
            .collect();

        assert_eq!(a, b);
    }

    #[test]
    fn test_id_in_both_lists_nets_to_removed() {
        let current = ids(1);
        let both = Uuid::new_v4();
        let known = known_of(&[&[both]]);

        let result = reconcile(&current, &[both], &[both], &known).unwrap();

        assert_eq!(result, current);
    }

    #[test]
    fn test_applying_same_adds_twice_is_idempotent() {
        let current = ids(2);
        let adds = ids(2);
        let known = known_of(&[&adds]);

        let once = reconcile(&current, &adds, &[], &known).unwrap();
        let twice = reconcile(&once, &adds, &[], &known).unwrap();

        assert_eq!(once, twice);
    }

    #[test]
    fn test_unknown_id_aborts_whole_operation() {
        let current = ids(2);
        let valid = Uuid::new_v4();
        let missing = Uuid::new_v4();
        let adds = vec![valid, missing];
        let known = known_of(&[&[valid]]);

        let err = reconcile(&current, &adds, &[], &known).unwrap_err();

        assert_eq!(err, ReconcileError::UnknownId(missing));
    }

    #[test]
    fn test_unknown_removal_reported_after_adds() {
        let valid = Uuid::new_v4();
        let missing = Uuid::new_v4();
        let known = known_of(&[&[valid]]);

        let err = reconcile(&[], &[valid], &[missing], &known).unwrap_err();

        assert_eq!(err, ReconcileError::UnknownId(missing));
    }

    #[test]
    fn test_parse_candidates_trims_and_parses() {
        let id = Uuid::new_v4();
        let raw = vec![format!("  {} ", id)];

        assert_eq!(parse_candidates(&raw).unwrap(), vec![id]);
    }

    #[test]
    fn test_parse_candidates_rejects_malformed() {
        let raw = vec![Uuid::new_v4().to_string(), "not-a-uuid".to_string()];

        let err = parse_candidates(&raw).unwrap_err();

        assert_eq!(err, ReconcileError::InvalidId("not-a-uuid".to_string()));
    }

    #[test]
    fn test_empty_deltas_leave_set_unchanged() {
        let current = ids(3);
        let known = HashSet::new();

        let result = reconcile(&current, &[], &[], &known).unwrap();

        assert_eq!(result, current);
    }

    #[test]
    fn test_status_inactive_iff_role_set_empty() {
        assert_eq!(derive_status(&[]), UserStatus::Inactive);
        assert_eq!(derive_status(&ids(1)), UserStatus::Active);
        assert_eq!(derive_status(&ids(4)), UserStatus::Active);
    }
}
