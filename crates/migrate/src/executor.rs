//! Applying a single migration
//!
//! The body runs as one batch, then the unit is recorded in the ledger. With
//! [`TransactionMode::PerMigration`] both happen inside one transaction.

use crate::backends::{DatabaseConnection, DatabaseValue};
use crate::config::TransactionMode;
use crate::error::{DatabaseError, DatabaseResult, MigrationError, MigrationResult};
use crate::ledger::LedgerTable;
use crate::unit::MigrationUnit;

/// Run one unit's body and record it; returns the unit on success
pub async fn apply(
    conn: &mut dyn DatabaseConnection,
    table: &LedgerTable,
    unit: &MigrationUnit,
    mode: TransactionMode,
) -> MigrationResult<MigrationUnit> {
    tracing::debug!(id = unit.id, name = %unit.name, "Applying migration");

    let outcome = match mode {
        TransactionMode::PerStatement => run_and_record(conn, table, unit).await,
        TransactionMode::PerMigration => run_in_transaction(conn, table, unit).await,
    };

    outcome.map_err(|cause| MigrationError::MigrationApply {
        id: unit.id,
        name: unit.name.clone(),
        cause,
    })?;

    tracing::info!(id = unit.id, name = %unit.name, "Applied migration");
    Ok(unit.clone())
}

async fn run_and_record(conn: &mut dyn DatabaseConnection, table: &LedgerTable, unit: &MigrationUnit) -> DatabaseResult<()> {
    conn.batch_execute(&unit.body).await?;

    let id = i32::try_from(unit.id)
        .map_err(|_| DatabaseError::new(format!("Migration id {} does not fit the ledger id column", unit.id)))?;
    let params = [
        DatabaseValue::from(id),
        DatabaseValue::from(unit.name.as_str()),
        DatabaseValue::from(unit.hash.as_str()),
    ];
    conn.execute(&table.record_sql(), &params).await?;

    Ok(())
}

async fn run_in_transaction(conn: &mut dyn DatabaseConnection, table: &LedgerTable, unit: &MigrationUnit) -> DatabaseResult<()> {
    conn.batch_execute("BEGIN").await?;

    match run_and_record(conn, table, unit).await {
        Ok(()) => conn.batch_execute("COMMIT").await,
        Err(err) => {
            if let Err(rollback_err) = conn.batch_execute("ROLLBACK").await {
                tracing::warn!(id = unit.id, error = %rollback_err, "Rollback after failed migration also failed");
            }
            Err(err)
        }
    }
}
