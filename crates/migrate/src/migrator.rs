//! Migration run orchestration
//!
//! A run moves through [`RunState`]s in order:
//! connect, load files and ledger, reconcile, apply pending units one by
//! one, then close the session. Once a session is open it is closed on every
//! exit path, and a close failure never replaces the run's own outcome.

use std::fmt;
use std::sync::Arc;

use crate::backends::{DatabaseBackend, DatabaseConnection, DatabaseValue};
use crate::config::{ConnectionConfig, MigrationConfig, TransactionMode, DEFAULT_TABLE_NAME};
use crate::error::{ConfigError, DatabaseResult, MigrationError, MigrationResult, MigrationRunError};
use crate::executor;
use crate::ledger::{self, Ledger, LedgerTable};
use crate::loader;
use crate::progress::Progress;
use crate::reconcile::{self, MigrationStatus};
use crate::source::{DirectorySource, MigrationSource};
use crate::unit::MigrationUnit;

/// Stages of a migration run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Idle,
    Connecting,
    Loading,
    Reconciling,
    Applying,
    Closing,
    Done,
    Failed,
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RunState::Idle => "idle",
            RunState::Connecting => "connecting",
            RunState::Loading => "loading",
            RunState::Reconciling => "reconciling",
            RunState::Applying => "applying",
            RunState::Closing => "closing",
            RunState::Done => "done",
            RunState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Applies a migration set to one database
pub struct Migrator {
    connection: ConnectionConfig,
    table: LedgerTable,
    transaction_mode: TransactionMode,
    advisory_lock: bool,
    progress: Progress,
    backend: Arc<dyn DatabaseBackend>,
    source: Box<dyn MigrationSource>,
}

impl Migrator {
    /// Build a migrator reading files from `config.migrations_dir`
    pub fn new(config: MigrationConfig, backend: Arc<dyn DatabaseBackend>) -> Result<Self, ConfigError> {
        let source = Box::new(DirectorySource::new(config.migrations_dir.clone()));
        Self::with_source(config, backend, source)
    }

    /// Build a migrator over an arbitrary source
    ///
    /// This is where optional settings get their defaults; nothing else in
    /// the crate falls back to a default ledger name.
    pub fn with_source(
        config: MigrationConfig,
        backend: Arc<dyn DatabaseBackend>,
        source: Box<dyn MigrationSource>,
    ) -> Result<Self, ConfigError> {
        validate_connection(&config.connection)?;

        let table_name = config.table_name.unwrap_or_else(|| DEFAULT_TABLE_NAME.to_string());
        let table = LedgerTable::new(table_name, config.schema)?;

        Ok(Self {
            connection: config.connection,
            table,
            transaction_mode: config.transaction_mode,
            advisory_lock: config.advisory_lock,
            progress: Progress::new(config.logger),
            backend,
            source,
        })
    }

    pub fn table(&self) -> &LedgerTable {
        &self.table
    }

    /// Apply every pending migration; returns the units applied by this run
    pub async fn run(&self) -> Result<Vec<MigrationUnit>, MigrationRunError> {
        self.enter(RunState::Idle);
        let result = self.run_session().await;
        self.finish(&result);
        result
    }

    /// Report every unit with its ledger record, without applying anything
    pub async fn status(&self) -> Result<Vec<MigrationStatus>, MigrationRunError> {
        self.enter(RunState::Idle);
        let result = self.status_session().await;
        self.finish(&result);
        result
    }

    /// Load the source and check ordering, without touching any database
    pub fn validate_source(&self) -> MigrationResult<Vec<MigrationUnit>> {
        let units = loader::load_with_progress(self.source.as_ref(), &self.table, &self.progress)?;
        reconcile::validate_order(&units)?;
        Ok(units)
    }

    async fn run_session(&self) -> Result<Vec<MigrationUnit>, MigrationRunError> {
        let mut conn = self.open().await?;
        let outcome = self.migrate(conn.as_mut()).await;
        self.release(conn).await;

        let applied = outcome?;
        self.report_summary(&applied);
        Ok(applied)
    }

    async fn status_session(&self) -> Result<Vec<MigrationStatus>, MigrationRunError> {
        let mut conn = self.open().await?;
        let outcome = self.load(conn.as_mut()).await;
        self.release(conn).await;

        let (units, applied) = outcome?;
        self.enter(RunState::Reconciling);
        reconcile::validate(&units, &applied)?;
        Ok(reconcile::status(&units, &applied))
    }

    async fn migrate(&self, conn: &mut dyn DatabaseConnection) -> MigrationResult<Vec<MigrationUnit>> {
        let (units, applied) = self.load(conn).await?;

        self.enter(RunState::Reconciling);
        let pending = reconcile::pending(&units, &applied)?;

        self.enter(RunState::Applying);
        let mut completed = Vec::with_capacity(pending.len());
        for unit in &pending {
            completed.push(executor::apply(conn, &self.table, unit, self.transaction_mode).await?);
        }
        Ok(completed)
    }

    async fn load(&self, conn: &mut dyn DatabaseConnection) -> MigrationResult<(Vec<MigrationUnit>, Ledger)> {
        self.enter(RunState::Loading);
        let units = loader::load_with_progress(self.source.as_ref(), &self.table, &self.progress)?;
        let applied = ledger::read_with_progress(conn, &self.table, &self.progress).await?;
        Ok((units, applied))
    }

    /// Connect, and take the advisory lock when configured
    async fn open(&self) -> MigrationResult<Box<dyn DatabaseConnection>> {
        self.enter(RunState::Connecting);
        let mut conn = self
            .backend
            .connect(&self.connection)
            .await
            .map_err(MigrationError::Connection)?;

        if self.advisory_lock {
            if let Err(err) = self.lock_sql(conn.as_mut(), "pg_advisory_lock").await {
                self.close_quietly(conn).await;
                return Err(MigrationError::Lock(err));
            }
            tracing::debug!(table = %self.table.qualified(), "Acquired advisory lock");
        }

        Ok(conn)
    }

    /// Release the lock and end the session; failures are only logged
    async fn release(&self, mut conn: Box<dyn DatabaseConnection>) {
        self.enter(RunState::Closing);

        if self.advisory_lock {
            if let Err(err) = self.lock_sql(conn.as_mut(), "pg_advisory_unlock").await {
                tracing::warn!(error = %err, "Failed to release advisory lock");
            }
        }

        self.close_quietly(conn).await;
    }

    async fn close_quietly(&self, conn: Box<dyn DatabaseConnection>) {
        if let Err(err) = conn.close().await {
            tracing::warn!(error = %err, "Error closing the database connection");
        }
    }

    async fn lock_sql(&self, conn: &mut dyn DatabaseConnection, function: &str) -> DatabaseResult<()> {
        let sql = format!("SELECT {}($1)", function);
        conn.fetch_all(&sql, &[DatabaseValue::Int64(self.table.lock_key())]).await?;
        Ok(())
    }

    fn report_summary(&self, applied: &[MigrationUnit]) {
        if applied.is_empty() {
            self.progress.report("No migrations applied");
        } else {
            let names: Vec<_> = applied.iter().map(|u| u.name.as_str()).collect();
            self.progress
                .report(&format!("Successfully applied migrations: {}", names.join(", ")));
        }
    }

    fn finish<T>(&self, result: &Result<T, MigrationRunError>) {
        match result {
            Ok(_) => self.enter(RunState::Done),
            Err(err) => {
                self.enter(RunState::Failed);
                tracing::error!(error = %err, "Migration run failed");
            }
        }
    }

    fn enter(&self, state: RunState) {
        tracing::debug!(state = %state, table = %self.table.qualified(), "Migration run state");
    }
}

fn validate_connection(connection: &ConnectionConfig) -> Result<(), ConfigError> {
    for (field, value) in [
        ("host", &connection.host),
        ("user", &connection.user),
        ("database", &connection.database),
    ] {
        if value.trim().is_empty() {
            return Err(ConfigError::Missing {
                field: field.to_string(),
            });
        }
    }

    if connection.port == 0 {
        return Err(ConfigError::InvalidValue {
            field: "port".to_string(),
            value: "0".to_string(),
            expected: "a port between 1 and 65535".to_string(),
        });
    }

    Ok(())
}
