use super::mock::{MockBackend, MockRecord};
use crate::backends::{DatabaseBackend, DatabaseConnection};
use crate::config::{ConnectionConfig, TransactionMode};
use crate::error::MigrationError;
use crate::executor::apply;
use crate::ledger::LedgerTable;
use crate::loader::bootstrap_unit;
use crate::unit::MigrationUnit;

fn connection() -> ConnectionConfig {
    ConnectionConfig {
        host: "localhost".to_string(),
        port: 5432,
        user: "app".to_string(),
        password: String::new(),
        database: "app".to_string(),
    }
}

async fn session(backend: &MockBackend) -> Box<dyn DatabaseConnection> {
    backend.connect(&connection()).await.expect("mock connects")
}

#[tokio::test]
async fn test_apply_runs_body_then_records() {
    let backend = MockBackend::new();
    let table = LedgerTable::default();
    let mut conn = session(&backend).await;

    let bootstrap = bootstrap_unit(&table);
    let users = MigrationUnit::raw(1, "create_users", "CREATE TABLE users (id int);");

    let applied = apply(conn.as_mut(), &table, &bootstrap, TransactionMode::PerStatement).await.unwrap();
    assert_eq!(applied, bootstrap);
    apply(conn.as_mut(), &table, &users, TransactionMode::PerStatement).await.unwrap();

    let state = backend.state();
    assert_eq!(state.executed, vec![bootstrap.body.clone(), users.body.clone()]);
    assert_eq!(
        state.ledger[1],
        MockRecord {
            id: 1,
            name: "create_users".to_string(),
            hash: users.hash.clone(),
        }
    );
}

#[tokio::test]
async fn test_body_failure_reports_unit_and_skips_insert() {
    let backend = MockBackend::new();
    let table = LedgerTable::default();
    backend.state().seed(&[bootstrap_unit(&table)]);
    backend.state().fail_on_body = Some("TABLEE".to_string());
    let mut conn = session(&backend).await;

    let broken = MigrationUnit::raw(1, "create_users", "CREATE TABLEE users ();");
    match apply(conn.as_mut(), &table, &broken, TransactionMode::PerStatement).await {
        Err(MigrationError::MigrationApply { id, name, cause }) => {
            assert_eq!(id, 1);
            assert_eq!(name, "create_users");
            assert_eq!(cause.code.as_deref(), Some("42601"));
        }
        other => panic!("Expected apply error, got {:?}", other),
    }

    assert_eq!(backend.state().ledger_ids(), vec![0]);
}

#[tokio::test]
async fn test_insert_failure_keeps_body_effects_without_transaction() {
    let backend = MockBackend::new();
    let table = LedgerTable::default();
    backend.state().seed(&[bootstrap_unit(&table)]);
    backend.state().fail_on_insert_id = Some(1);
    let mut conn = session(&backend).await;

    let users = MigrationUnit::raw(1, "create_users", "CREATE TABLE users (id int);");
    let result = apply(conn.as_mut(), &table, &users, TransactionMode::PerStatement).await;
    assert!(matches!(result, Err(MigrationError::MigrationApply { id: 1, .. })));

    let state = backend.state();
    assert_eq!(state.effects, vec![users.body.clone()]);
    assert_eq!(state.ledger_ids(), vec![0]);
}

#[tokio::test]
async fn test_per_migration_transaction_rolls_back_body() {
    let backend = MockBackend::new();
    let table = LedgerTable::default();
    backend.state().seed(&[bootstrap_unit(&table)]);
    backend.state().fail_on_insert_id = Some(2);
    let mut conn = session(&backend).await;

    let users = MigrationUnit::raw(1, "create_users", "CREATE TABLE users (id int);");
    let index = MigrationUnit::raw(2, "add_email_index", "CREATE INDEX users_email ON users (email);");

    apply(conn.as_mut(), &table, &users, TransactionMode::PerMigration).await.unwrap();
    let result = apply(conn.as_mut(), &table, &index, TransactionMode::PerMigration).await;
    assert!(matches!(result, Err(MigrationError::MigrationApply { id: 2, .. })));

    let state = backend.state();
    assert_eq!(
        state.executed,
        vec![
            "BEGIN".to_string(),
            users.body.clone(),
            "COMMIT".to_string(),
            "BEGIN".to_string(),
            index.body.clone(),
            "ROLLBACK".to_string(),
        ]
    );
    assert_eq!(state.effects, vec![users.body.clone()]);
    assert_eq!(state.ledger_ids(), vec![0, 1]);
}
