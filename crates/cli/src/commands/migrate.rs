use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use chrono::Utc;
use tally_migrate::{
    load_migration_set, next_migration_file_name, reconcile, DirectorySource, LedgerTable, MigrationStatus,
    MigrationUnit, Migrator, PostgresBackend, DEFAULT_TABLE_NAME,
};

use crate::args::{RunArgs, SourceArgs};

pub async fn run(args: &RunArgs) -> anyhow::Result<()> {
    let migrator = Migrator::new(args.migration_config()?, Arc::new(PostgresBackend::new()))?;
    let applied = migrator.run().await?;

    if applied.is_empty() {
        println!("Database is up to date");
    } else {
        println!("Applied {} migration(s):", applied.len());
        for unit in &applied {
            println!("  {}", describe(unit));
        }
    }
    Ok(())
}

pub async fn status(args: &RunArgs) -> anyhow::Result<()> {
    let migrator = Migrator::new(args.migration_config()?, Arc::new(PostgresBackend::new()))?;
    let report = migrator.status().await?;

    println!("Migration status for {}:", migrator.table().qualified());
    for line in status_lines(&report) {
        println!("  {}", line);
    }

    let pending = report.iter().filter(|s| !s.is_applied()).count();
    println!("{} applied, {} pending", report.len() - pending, pending);
    Ok(())
}

/// Offline check of the migrations directory
pub fn validate(args: &SourceArgs) -> anyhow::Result<()> {
    let units = load_local(args)?;
    reconcile::validate_order(&units)?;

    println!("{} migration(s) valid in {}", units.len(), args.migrations_dir.display());
    Ok(())
}

pub fn create(args: &SourceArgs, name: &str) -> anyhow::Result<PathBuf> {
    if name.trim().is_empty() {
        anyhow::bail!("Migration name must not be empty");
    }

    fs::create_dir_all(&args.migrations_dir)
        .with_context(|| format!("Failed to create {}", args.migrations_dir.display()))?;

    let units = load_local(args)?;
    let path = args.migrations_dir.join(next_migration_file_name(&units, name));

    let template = format!(
        "-- Migration: {}\n-- Created: {}\n--\n-- Applied once, in order. Editing this file after it has been\n-- applied makes every later run fail.\n\n",
        name.trim(),
        Utc::now().format("%Y-%m-%d %H:%M:%S UTC")
    );

    let mut file = OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(&path)
        .with_context(|| format!("Failed to create {}", path.display()))?;
    file.write_all(template.as_bytes())?;

    println!("Created migration: {}", path.display());
    Ok(path)
}

fn load_local(args: &SourceArgs) -> anyhow::Result<Vec<MigrationUnit>> {
    let table_name = args.table.clone().unwrap_or_else(|| DEFAULT_TABLE_NAME.to_string());
    let table = LedgerTable::new(table_name, args.schema.clone())?;
    let source = DirectorySource::new(args.migrations_dir.clone());
    Ok(load_migration_set(&source, &table)?)
}

fn describe(unit: &MigrationUnit) -> String {
    format!("{}_{}", unit.id, unit.name)
}

fn status_lines(report: &[MigrationStatus]) -> Vec<String> {
    report
        .iter()
        .map(|entry| match &entry.applied {
            Some(record) => format!(
                "[applied {}] {}",
                record.executed_at.format("%Y-%m-%d %H:%M:%S"),
                describe(&entry.unit)
            ),
            None => format!("[pending] {}", describe(&entry.unit)),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use tally_migrate::{AppliedMigrationRecord, MigrationError};

    fn source_args(dir: &std::path::Path) -> SourceArgs {
        SourceArgs {
            migrations_dir: dir.to_path_buf(),
            table: None,
            schema: None,
        }
    }

    #[test]
    fn test_create_numbers_after_existing() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("1_create_users.sql"), "CREATE TABLE users (id int);").unwrap();
        fs::write(dir.path().join("2_add_email.sql"), "ALTER TABLE users ADD COLUMN email text;").unwrap();

        let path = create(&source_args(dir.path()), "Add orders table").unwrap();
        assert_eq!(path.file_name().unwrap(), "3_add_orders_table.sql");

        let body = fs::read_to_string(&path).unwrap();
        assert!(body.starts_with("-- Migration: Add orders table\n"));
        validate(&source_args(dir.path())).unwrap();
    }

    #[test]
    fn test_create_in_missing_directory() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("db").join("migrations");

        let path = create(&source_args(&nested), "init").unwrap();
        assert_eq!(path.file_name().unwrap(), "1_init.sql");
        assert!(create(&source_args(&nested), "  ").is_err());
    }

    #[test]
    fn test_validate_reports_gap() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("1_create_users.sql"), "SELECT 1;").unwrap();
        fs::write(dir.path().join("3_add_email.sql"), "SELECT 3;").unwrap();

        let err = validate(&source_args(dir.path())).unwrap_err();
        match err.downcast_ref::<MigrationError>() {
            Some(MigrationError::NonConsecutiveId { expected, found, .. }) => {
                assert_eq!((*expected, *found), (2, 3));
            }
            other => panic!("Expected ordering error, got {:?}", other),
        }
    }

    #[test]
    fn test_status_lines() {
        let users = MigrationUnit::raw(1, "create_users", "SELECT 1;");
        let email = MigrationUnit::raw(2, "add_email", "SELECT 2;");
        let executed_at = NaiveDate::from_ymd_opt(2024, 3, 1)
            .and_then(|d| d.and_hms_opt(12, 30, 0))
            .unwrap();

        let report = vec![
            MigrationStatus {
                applied: Some(AppliedMigrationRecord {
                    id: 1,
                    name: users.name.clone(),
                    hash: users.hash.clone(),
                    executed_at,
                }),
                unit: users,
            },
            MigrationStatus {
                unit: email,
                applied: None,
            },
        ];

        assert_eq!(
            status_lines(&report),
            vec![
                "[applied 2024-03-01 12:30:00] 1_create_users".to_string(),
                "[pending] 2_add_email".to_string(),
            ]
        );
    }
}
