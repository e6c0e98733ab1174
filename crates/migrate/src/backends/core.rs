//! Core Database Backend Traits
//!
//! The engine talks to the target database only through these traits. A
//! backend opens exactly one [`DatabaseConnection`] per run; the engine owns
//! it for the whole run and hands it back through [`DatabaseConnection::close`].

use async_trait::async_trait;
use serde_json::Value as JsonValue;

use crate::config::ConnectionConfig;
use crate::error::{DatabaseError, DatabaseResult};

/// Opens database sessions
#[async_trait]
pub trait DatabaseBackend: Send + Sync {
    /// Open a new session with the given connection parameters
    async fn connect(&self, config: &ConnectionConfig) -> DatabaseResult<Box<dyn DatabaseConnection>>;
}

/// One exclusively-owned database session
#[async_trait]
pub trait DatabaseConnection: Send {
    /// Execute a single parameterized statement and return affected rows count
    async fn execute(&mut self, sql: &str, params: &[DatabaseValue]) -> DatabaseResult<u64>;

    /// Execute a single parameterized query and return the result rows
    async fn fetch_all(&mut self, sql: &str, params: &[DatabaseValue]) -> DatabaseResult<Vec<Box<dyn DatabaseRow>>>;

    /// Execute an unparameterized batch that may hold several statements
    async fn batch_execute(&mut self, sql: &str) -> DatabaseResult<()>;

    /// End the session
    async fn close(self: Box<Self>) -> DatabaseResult<()>;
}

/// Abstract database row trait
pub trait DatabaseRow: Send + Sync {
    /// Get a column value by name
    fn get_by_name(&self, name: &str) -> DatabaseResult<DatabaseValue>;
}

/// Typed column access on top of [`DatabaseRow`]
pub trait DatabaseRowExt {
    /// Get a typed value from a column
    fn get<T>(&self, column: &str) -> DatabaseResult<T>
    where
        T: for<'de> serde::Deserialize<'de>;
}

impl<R: DatabaseRow + ?Sized> DatabaseRowExt for R {
    fn get<T>(&self, column: &str) -> DatabaseResult<T>
    where
        T: for<'de> serde::Deserialize<'de>,
    {
        let value = self.get_by_name(column)?;
        serde_json::from_value(value.to_json()).map_err(|e| {
            DatabaseError::new(format!("Failed to deserialize column '{}': {}", column, e))
        })
    }
}

/// Database value enumeration for type-safe parameter binding
#[derive(Debug, Clone, PartialEq)]
pub enum DatabaseValue {
    Null,
    Bool(bool),
    Int32(i32),
    Int64(i64),
    String(String),
    DateTime(chrono::NaiveDateTime),
}

impl DatabaseValue {
    /// Convert to JSON value
    pub fn to_json(&self) -> JsonValue {
        match self {
            DatabaseValue::Null => JsonValue::Null,
            DatabaseValue::Bool(b) => JsonValue::Bool(*b),
            DatabaseValue::Int32(i) => JsonValue::from(*i),
            DatabaseValue::Int64(i) => JsonValue::from(*i),
            DatabaseValue::String(s) => JsonValue::String(s.clone()),
            // Same shape chrono's serde impl reads back
            DatabaseValue::DateTime(dt) => {
                JsonValue::String(dt.format("%Y-%m-%dT%H:%M:%S%.f").to_string())
            }
        }
    }
}

impl From<bool> for DatabaseValue {
    fn from(value: bool) -> Self {
        DatabaseValue::Bool(value)
    }
}

impl From<i32> for DatabaseValue {
    fn from(value: i32) -> Self {
        DatabaseValue::Int32(value)
    }
}

impl From<i64> for DatabaseValue {
    fn from(value: i64) -> Self {
        DatabaseValue::Int64(value)
    }
}

impl From<String> for DatabaseValue {
    fn from(value: String) -> Self {
        DatabaseValue::String(value)
    }
}

impl From<&str> for DatabaseValue {
    fn from(value: &str) -> Self {
        DatabaseValue::String(value.to_string())
    }
}

impl From<chrono::NaiveDateTime> for DatabaseValue {
    fn from(value: chrono::NaiveDateTime) -> Self {
        DatabaseValue::DateTime(value)
    }
}

impl<T> From<Option<T>> for DatabaseValue
where
    T: Into<DatabaseValue>,
{
    fn from(value: Option<T>) -> Self {
        match value {
            Some(v) => v.into(),
            None => DatabaseValue::Null,
        }
    }
}
