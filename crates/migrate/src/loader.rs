//! Migration set loading
//!
//! Turns source candidates into the full ordered set of units, bootstrap
//! ledger migration included.

use std::path::Path;

use crate::error::{MigrationError, MigrationResult, SourceError};
use crate::ledger::LedgerTable;
use crate::progress::Progress;
use crate::source::MigrationSource;
use crate::unit::MigrationUnit;

/// Name of the id 0 migration that creates the ledger table
pub const BOOTSTRAP_NAME: &str = "create-migrations-table";

/// File extension of recognized migrations
pub const SQL_EXTENSION: &str = "sql";

/// The id 0 unit that creates the ledger table
pub fn bootstrap_unit(table: &LedgerTable) -> MigrationUnit {
    MigrationUnit::raw(0, BOOTSTRAP_NAME, table.create_table_sql())
}

/// Load, parse and order every migration the source offers
///
/// A source that cannot be listed at all counts as empty; a migration file
/// that cannot be read fails the load. The bootstrap unit is always part of
/// the result.
pub fn load_migration_set(source: &dyn MigrationSource, table: &LedgerTable) -> MigrationResult<Vec<MigrationUnit>> {
    load_with_progress(source, table, &Progress::default())
}

pub(crate) fn load_with_progress(
    source: &dyn MigrationSource,
    table: &LedgerTable,
    progress: &Progress,
) -> MigrationResult<Vec<MigrationUnit>> {
    progress.report(&format!("Loading migrations from: {}", source.describe()));

    let candidates = match source.candidates() {
        Ok(candidates) => candidates,
        Err(err @ SourceError::Unavailable { .. }) => {
            tracing::warn!(source = %source.describe(), error = %err, "Migration source unavailable, treating as empty");
            Vec::new()
        }
        Err(SourceError::Unreadable { file, source: err }) => {
            return Err(MigrationError::UnreadableUnit {
                file,
                reason: err.to_string(),
            });
        }
    };

    let mut units = Vec::with_capacity(candidates.len() + 1);
    for candidate in &candidates {
        let Some(stem) = sql_stem(&candidate.file_name) else {
            tracing::debug!(file = %candidate.file_name, "Ignoring file that is not a SQL migration");
            continue;
        };
        units.push(MigrationUnit::parse(stem, candidate.body.as_str())?);
    }

    progress.report(&format!("Found migration files: {}", describe_files(&units)));

    units.push(bootstrap_unit(table));
    units.sort_by_key(|unit| unit.id);

    Ok(units)
}

/// File stem when the name carries the SQL extension, in any case
pub(crate) fn sql_stem(file_name: &str) -> Option<&str> {
    let path = Path::new(file_name);
    let is_sql = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map_or(false, |ext| ext.eq_ignore_ascii_case(SQL_EXTENSION));

    if is_sql {
        path.file_stem().and_then(|stem| stem.to_str())
    } else {
        None
    }
}

fn describe_files(units: &[MigrationUnit]) -> String {
    if units.is_empty() {
        return "none".to_string();
    }

    let mut names: Vec<_> = units.iter().map(|u| format!("{}_{}", u.id, u.name)).collect();
    names.sort();
    names.join(", ")
}

/// File name for a new migration placed after every existing one
pub fn next_migration_file_name(units: &[MigrationUnit], name: &str) -> String {
    let next_id = units.iter().map(|u| u.id).max().map_or(1, |max| max + 1);
    let slug: String = name
        .trim()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_lowercase() } else { '_' })
        .collect();

    format!("{}_{}.{}", next_id, slug, SQL_EXTENSION)
}
