//! Reconciliation of loaded units against the ledger
//!
//! Pure functions: nothing here touches the database.

use crate::error::{MigrationError, MigrationResult};
use crate::ledger::{AppliedMigrationRecord, Ledger};
use crate::unit::MigrationUnit;

/// A unit together with its ledger record, if it has one
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationStatus {
    pub unit: MigrationUnit,
    pub applied: Option<AppliedMigrationRecord>,
}

impl MigrationStatus {
    pub fn is_applied(&self) -> bool {
        self.applied.is_some()
    }
}

/// Check ordering, then integrity against the ledger
///
/// The first id out of place aborts immediately. Hash mismatches are
/// collected across the whole set and reported together.
pub fn validate(units: &[MigrationUnit], applied: &Ledger) -> MigrationResult<()> {
    validate_order(units)?;

    let mismatched: Vec<String> = units
        .iter()
        .filter(|unit| {
            applied
                .get(&unit.id)
                .map_or(false, |record| record.hash != unit.hash)
        })
        .map(|unit| unit.name.clone())
        .collect();

    if !mismatched.is_empty() {
        return Err(MigrationError::HashMismatch { names: mismatched });
    }

    Ok(())
}

/// Every unit's id must equal its position
pub fn validate_order(units: &[MigrationUnit]) -> MigrationResult<()> {
    for (position, unit) in units.iter().enumerate() {
        if usize::try_from(unit.id).ok() != Some(position) {
            return Err(MigrationError::NonConsecutiveId {
                name: unit.name.clone(),
                expected: position as u32,
                found: unit.id,
            });
        }
    }
    Ok(())
}

/// Validate, then return the units the ledger has no record of, in id order
pub fn pending(units: &[MigrationUnit], applied: &Ledger) -> MigrationResult<Vec<MigrationUnit>> {
    validate(units, applied)?;

    Ok(units
        .iter()
        .filter(|unit| !applied.contains_key(&unit.id))
        .cloned()
        .collect())
}

/// Pair every unit with its ledger record
pub fn status(units: &[MigrationUnit], applied: &Ledger) -> Vec<MigrationStatus> {
    units
        .iter()
        .map(|unit| MigrationStatus {
            unit: unit.clone(),
            applied: applied.get(&unit.id).cloned(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn units() -> Vec<MigrationUnit> {
        vec![
            MigrationUnit::raw(0, "create-migrations-table", "CREATE TABLE migrations ();"),
            MigrationUnit::raw(1, "create_users", "CREATE TABLE users ();"),
            MigrationUnit::raw(2, "add_email_index", "CREATE INDEX ON users (email);"),
            MigrationUnit::raw(3, "create_orders", "CREATE TABLE orders ();"),
        ]
    }

    fn record_of(unit: &MigrationUnit) -> AppliedMigrationRecord {
        AppliedMigrationRecord {
            id: unit.id,
            name: unit.name.clone(),
            hash: unit.hash.clone(),
            executed_at: NaiveDate::from_ymd_opt(2024, 1, 1)
                .and_then(|d| d.and_hms_opt(0, 0, 0))
                .unwrap(),
        }
    }

    fn ledger_of(units: &[MigrationUnit]) -> Ledger {
        units.iter().map(|u| (u.id, record_of(u))).collect()
    }

    #[test]
    fn test_pending_is_complement_of_ledger() {
        let units = units();
        let applied = ledger_of(&units[..2]);

        let pending = pending(&units, &applied).unwrap();
        let ids: Vec<_> = pending.iter().map(|u| u.id).collect();
        assert_eq!(ids, vec![2, 3]);
    }

    #[test]
    fn test_fully_applied_set_has_nothing_pending() {
        let units = units();
        let applied = ledger_of(&units);
        assert!(pending(&units, &applied).unwrap().is_empty());
    }

    #[test]
    fn test_gap_is_reported_with_offending_name() {
        let mut units = units();
        units.remove(2);

        match pending(&units, &Ledger::new()) {
            Err(MigrationError::NonConsecutiveId { name, expected, found }) => {
                assert_eq!(name, "create_orders");
                assert_eq!(expected, 2);
                assert_eq!(found, 3);
            }
            other => panic!("Expected non-consecutive id error, got {:?}", other),
        }
    }

    #[test]
    fn test_duplicate_id_is_non_consecutive() {
        let mut units = units();
        units.insert(2, MigrationUnit::raw(1, "create_accounts", "CREATE TABLE accounts ();"));

        assert!(matches!(
            validate(&units, &Ledger::new()),
            Err(MigrationError::NonConsecutiveId { expected: 2, found: 1, .. })
        ));
    }

    #[test]
    fn test_ordering_checked_before_hashes() {
        let mut units = units();
        let mut applied = ledger_of(&units);
        applied.get_mut(&1).unwrap().hash = "0".repeat(40);
        units.swap(2, 3);

        assert!(matches!(
            validate(&units, &applied),
            Err(MigrationError::NonConsecutiveId { .. })
        ));
    }

    #[test]
    fn test_all_hash_mismatches_are_collected() {
        let units = units();
        let mut applied = ledger_of(&units[..3]);
        applied.get_mut(&1).unwrap().hash = "0".repeat(40);
        applied.get_mut(&2).unwrap().hash = "1".repeat(40);

        match pending(&units, &applied) {
            Err(MigrationError::HashMismatch { names }) => {
                assert_eq!(names, vec!["create_users".to_string(), "add_email_index".to_string()]);
            }
            other => panic!("Expected hash mismatch, got {:?}", other),
        }
    }

    #[test]
    fn test_edited_body_after_apply_is_detected() {
        let units = units();
        let applied = ledger_of(&units);

        let mut edited = units.clone();
        edited[1] = MigrationUnit::raw(1, "create_users", "CREATE TABLE users (id int);");

        assert!(validate(&units, &applied).is_ok());
        assert!(matches!(
            validate(&edited, &applied),
            Err(MigrationError::HashMismatch { names }) if names == vec!["create_users".to_string()]
        ));
    }

    #[test]
    fn test_status_pairs_records() {
        let units = units();
        let applied = ledger_of(&units[..1]);

        let status = status(&units, &applied);
        assert_eq!(status.len(), 4);
        assert!(status[0].is_applied());
        assert!(status[1..].iter().all(|s| !s.is_applied()));
    }
}
