//! Database Backend Abstractions
//!
//! The narrow session interface the engine consumes, and its PostgreSQL
//! implementation.

pub mod core;
pub mod postgres;

pub use self::core::*;
pub use self::postgres::PostgresBackend;
