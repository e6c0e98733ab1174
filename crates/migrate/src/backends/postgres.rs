//! PostgreSQL Backend Implementation
//!
//! Implements the backend traits on a single `sqlx` [`PgConnection`]. No pool
//! is involved: a migration run owns one session from connect to close.

use async_trait::async_trait;
use sqlx::postgres::{PgArguments, PgConnectOptions, PgRow};
use sqlx::{Column, Connection, Executor, PgConnection, Postgres, Row, TypeInfo, ValueRef};

use super::core::*;
use crate::config::ConnectionConfig;
use crate::error::{DatabaseError, DatabaseResult};

/// PostgreSQL database backend implementation
#[derive(Debug, Default)]
pub struct PostgresBackend;

impl PostgresBackend {
    pub fn new() -> Self {
        Self
    }

    fn connect_options(config: &ConnectionConfig) -> PgConnectOptions {
        PgConnectOptions::new()
            .host(&config.host)
            .port(config.port)
            .username(&config.user)
            .password(&config.password)
            .database(&config.database)
    }
}

#[async_trait]
impl DatabaseBackend for PostgresBackend {
    async fn connect(&self, config: &ConnectionConfig) -> DatabaseResult<Box<dyn DatabaseConnection>> {
        let conn = PgConnection::connect_with(&Self::connect_options(config)).await?;

        tracing::debug!(
            host = %config.host,
            port = config.port,
            database = %config.database,
            "Connected to PostgreSQL"
        );

        Ok(Box::new(PostgresConnection::new(conn)))
    }
}

/// PostgreSQL session implementation
pub struct PostgresConnection {
    conn: PgConnection,
}

impl PostgresConnection {
    pub fn new(conn: PgConnection) -> Self {
        Self { conn }
    }
}

#[async_trait]
impl DatabaseConnection for PostgresConnection {
    async fn execute(&mut self, sql: &str, params: &[DatabaseValue]) -> DatabaseResult<u64> {
        let mut query = sqlx::query(sql);

        for param in params {
            query = bind_database_value(query, param);
        }

        let result = query.execute(&mut self.conn).await?;
        Ok(result.rows_affected())
    }

    async fn fetch_all(&mut self, sql: &str, params: &[DatabaseValue]) -> DatabaseResult<Vec<Box<dyn DatabaseRow>>> {
        let mut query = sqlx::query(sql);

        for param in params {
            query = bind_database_value(query, param);
        }

        let rows = query.fetch_all(&mut self.conn).await?;
        Ok(rows
            .into_iter()
            .map(|row| Box::new(PostgresRow::new(row)) as Box<dyn DatabaseRow>)
            .collect())
    }

    async fn batch_execute(&mut self, sql: &str) -> DatabaseResult<()> {
        // No arguments means the simple query protocol, which accepts
        // several statements in one message.
        (&mut self.conn).execute(sql).await?;
        Ok(())
    }

    async fn close(self: Box<Self>) -> DatabaseResult<()> {
        self.conn.close().await?;
        Ok(())
    }
}

/// PostgreSQL row implementation
pub struct PostgresRow {
    row: PgRow,
}

impl PostgresRow {
    pub fn new(row: PgRow) -> Self {
        Self { row }
    }
}

impl DatabaseRow for PostgresRow {
    fn get_by_name(&self, name: &str) -> DatabaseResult<DatabaseValue> {
        let index = self
            .row
            .columns()
            .iter()
            .position(|col| col.name() == name)
            .ok_or_else(|| DatabaseError::new(format!("Column '{}' not found", name)))?;

        postgres_value_to_database_value(&self.row, index)
    }
}

/// Bind a DatabaseValue to a sqlx query
fn bind_database_value<'a>(
    query: sqlx::query::Query<'a, Postgres, PgArguments>,
    value: &DatabaseValue,
) -> sqlx::query::Query<'a, Postgres, PgArguments> {
    match value {
        DatabaseValue::Null => query.bind(Option::<String>::None),
        DatabaseValue::Bool(b) => query.bind(*b),
        DatabaseValue::Int32(i) => query.bind(*i),
        DatabaseValue::Int64(i) => query.bind(*i),
        DatabaseValue::String(s) => query.bind(s.clone()),
        DatabaseValue::DateTime(dt) => query.bind(*dt),
    }
}

/// Convert a PostgreSQL column value to DatabaseValue
fn postgres_value_to_database_value(row: &PgRow, index: usize) -> DatabaseResult<DatabaseValue> {
    if row.try_get_raw(index)?.is_null() {
        return Ok(DatabaseValue::Null);
    }

    let type_name = row.columns()[index].type_info().name().to_string();

    let value = match type_name.as_str() {
        "BOOL" => DatabaseValue::Bool(row.try_get(index)?),
        "INT2" => DatabaseValue::Int32(row.try_get::<i16, _>(index)?.into()),
        "INT4" => DatabaseValue::Int32(row.try_get(index)?),
        "INT8" => DatabaseValue::Int64(row.try_get(index)?),
        "TIMESTAMP" => DatabaseValue::DateTime(row.try_get(index)?),
        "TIMESTAMPTZ" => {
            let value: chrono::DateTime<chrono::Utc> = row.try_get(index)?;
            DatabaseValue::DateTime(value.naive_utc())
        }
        "TEXT" | "VARCHAR" | "NAME" | "BPCHAR" => DatabaseValue::String(row.try_get(index)?),
        _ => {
            let value: String = row.try_get(index).map_err(|e| {
                DatabaseError::new(format!(
                    "Failed to get value as string for unsupported type '{}': {}",
                    type_name, e
                ))
            })?;
            DatabaseValue::String(value)
        }
    };

    Ok(value)
}
