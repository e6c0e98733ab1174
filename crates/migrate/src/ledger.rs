//! The server-side ledger of applied migrations
//!
//! [`LedgerTable`] owns every piece of SQL that touches the ledger, so the
//! table name is validated once and quoted the same way everywhere.

use std::collections::BTreeMap;

use chrono::NaiveDateTime;
use once_cell::sync::Lazy;
use regex::Regex;
use sha1::{Digest, Sha1};

use crate::backends::{DatabaseConnection, DatabaseRow, DatabaseRowExt, DatabaseValue};
use crate::config::DEFAULT_TABLE_NAME;
use crate::error::{ConfigError, DatabaseResult, MigrationError, MigrationResult};
use crate::progress::Progress;

static IDENTIFIER: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("valid regex"));

/// PostgreSQL truncates identifiers beyond this many bytes
const MAX_IDENTIFIER_LEN: usize = 63;

/// One row of the ledger
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppliedMigrationRecord {
    pub id: u32,
    pub name: String,
    pub hash: String,
    pub executed_at: NaiveDateTime,
}

impl AppliedMigrationRecord {
    fn from_row(row: &dyn DatabaseRow) -> DatabaseResult<Self> {
        Ok(Self {
            id: row.get("id")?,
            name: row.get("name")?,
            hash: row.get("hash")?,
            executed_at: row.get("executed_at")?,
        })
    }
}

/// Applied records keyed by migration id
pub type Ledger = BTreeMap<u32, AppliedMigrationRecord>;

/// Validated name of the ledger table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerTable {
    schema: Option<String>,
    table: String,
}

impl LedgerTable {
    pub fn new(table: impl Into<String>, schema: Option<String>) -> Result<Self, ConfigError> {
        let table = table.into();
        validate_identifier("table_name", &table)?;
        if let Some(schema) = &schema {
            validate_identifier("schema", schema)?;
        }

        Ok(Self { schema, table })
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn schema(&self) -> Option<&str> {
        self.schema.as_deref()
    }

    /// Quoted, schema-qualified name for use in statements
    pub fn qualified(&self) -> String {
        match &self.schema {
            Some(schema) => format!("\"{}\".\"{}\"", schema, self.table),
            None => format!("\"{}\"", self.table),
        }
    }

    /// Body of the bootstrap migration that creates this table
    pub fn create_table_sql(&self) -> String {
        format!(
            "CREATE TABLE IF NOT EXISTS {} (\n  \
                id integer PRIMARY KEY,\n  \
                name varchar(100) UNIQUE NOT NULL,\n  \
                hash varchar(40) NOT NULL,\n  \
                executed_at timestamp DEFAULT current_timestamp\n\
            );",
            self.qualified()
        )
    }

    /// Catalog lookup for an ordinary table with this name
    pub fn exists_sql(&self) -> (String, Vec<DatabaseValue>) {
        (
            "SELECT EXISTS (\n  \
                SELECT 1 FROM pg_catalog.pg_class c\n  \
                JOIN pg_catalog.pg_namespace n ON n.oid = c.relnamespace\n  \
                WHERE n.nspname = COALESCE($1::text, current_schema())\n    \
                AND c.relname = $2\n    \
                AND c.relkind = 'r'\n\
            ) AS \"exists\""
                .to_string(),
            vec![self.schema.clone().into(), self.table.clone().into()],
        )
    }

    pub fn select_applied_sql(&self) -> String {
        format!(
            "SELECT id, name, hash, executed_at FROM {} ORDER BY id",
            self.qualified()
        )
    }

    pub fn record_sql(&self) -> String {
        format!(
            "INSERT INTO {} (id, name, hash) VALUES ($1, $2, $3)",
            self.qualified()
        )
    }

    /// Advisory lock key: first 8 bytes of SHA-1 over the qualified name
    pub fn lock_key(&self) -> i64 {
        let digest = Sha1::digest(self.qualified().as_bytes());
        let mut key = [0u8; 8];
        key.copy_from_slice(&digest[..8]);
        i64::from_be_bytes(key)
    }
}

impl Default for LedgerTable {
    fn default() -> Self {
        Self {
            schema: None,
            table: DEFAULT_TABLE_NAME.to_string(),
        }
    }
}

fn validate_identifier(field: &str, value: &str) -> Result<(), ConfigError> {
    if value.len() > MAX_IDENTIFIER_LEN || !IDENTIFIER.is_match(value) {
        return Err(ConfigError::InvalidValue {
            field: field.to_string(),
            value: value.to_string(),
            expected: format!(
                "an identifier of letters, digits and underscores, at most {} bytes",
                MAX_IDENTIFIER_LEN
            ),
        });
    }
    Ok(())
}

/// Read every recorded migration, or nothing if the ledger table is absent
pub async fn read_ledger(conn: &mut dyn DatabaseConnection, table: &LedgerTable) -> MigrationResult<Ledger> {
    read_with_progress(conn, table, &Progress::default()).await
}

pub(crate) async fn read_with_progress(
    conn: &mut dyn DatabaseConnection,
    table: &LedgerTable,
    progress: &Progress,
) -> MigrationResult<Ledger> {
    read_ledger_rows(conn, table, progress)
        .await
        .map_err(MigrationError::LedgerRead)
}

async fn read_ledger_rows(
    conn: &mut dyn DatabaseConnection,
    table: &LedgerTable,
    progress: &Progress,
) -> DatabaseResult<Ledger> {
    let exists = ledger_exists(conn, table).await?;
    progress.report(&format!(
        "Migrations table with name {} {}",
        table.qualified(),
        if exists { "exists" } else { "does not exist yet" }
    ));
    if !exists {
        return Ok(Ledger::new());
    }

    let rows = conn.fetch_all(&table.select_applied_sql(), &[]).await?;
    let mut ledger = Ledger::new();
    for row in rows {
        let record = AppliedMigrationRecord::from_row(row.as_ref())?;
        ledger.insert(record.id, record);
    }
    Ok(ledger)
}

/// Whether the ledger table exists
pub async fn ledger_exists(conn: &mut dyn DatabaseConnection, table: &LedgerTable) -> DatabaseResult<bool> {
    let (sql, params) = table.exists_sql();
    let rows = conn.fetch_all(&sql, &params).await?;

    match rows.first() {
        Some(row) => row.get("exists"),
        None => Ok(false),
    }
}
