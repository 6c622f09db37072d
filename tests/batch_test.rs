//! Integration tests for atomic write batches.

use metamapper::config::DatabaseConfig;
use metamapper::db::{CrudEngine, DbPool, QueryExecutor};
use metamapper::models::{
    BatchOp, Entity, EntityMetadata, QueryParam, Row, TableMetadata, TransactionBatch,
};
use metamapper::DbError;
use serde_json::json;
use std::sync::Arc;
use tempfile::NamedTempFile;

fn accounts() -> Arc<dyn EntityMetadata> {
    Arc::new(
        TableMetadata::new("accounts", "id")
            .with_insertable(["id", "owner", "balance"])
            .with_updatable(["owner", "balance"]),
    )
}

fn account(id: i64, owner: &str, balance: i64) -> Arc<dyn Entity> {
    let row: Row = json!({"id": id, "owner": owner, "balance": balance})
        .as_object()
        .unwrap()
        .clone();
    Arc::new(row)
}

async fn setup() -> (CrudEngine, NamedTempFile) {
    let file = NamedTempFile::new().unwrap();
    let url = format!("sqlite:{}", file.path().display());
    let config = DatabaseConfig::parse(&url).unwrap();
    let pool = DbPool::connect(&config).await.unwrap();
    let engine = CrudEngine::new(pool, QueryExecutor::with_defaults(10, true));

    engine
        .query_execute(
            "CREATE TABLE accounts (id INTEGER PRIMARY KEY, owner TEXT NOT NULL, balance INTEGER NOT NULL)",
            &[],
        )
        .await
        .unwrap();
    engine
        .add(accounts().as_ref(), &account(1, "ann", 100), None)
        .await
        .unwrap();

    (engine, file)
}

async fn balances(engine: &CrudEngine) -> Vec<(i64, i64)> {
    engine
        .query("SELECT id, balance FROM accounts ORDER BY id", &[])
        .await
        .unwrap()
        .iter()
        .map(|r| (r["id"].as_i64().unwrap(), r["balance"].as_i64().unwrap()))
        .collect()
}

#[tokio::test]
async fn test_batch_commits_all_operations() {
    let (engine, _file) = setup().await;
    let meta = accounts();

    let mut batch = TransactionBatch::new();
    batch.enqueue(BatchOp::add(meta.clone(), account(2, "bob", 50)));
    batch.enqueue(BatchOp::update(meta.clone(), account(1, "ann", 75)));
    batch.enqueue(BatchOp::add(meta.clone(), account(3, "cid", 25)));

    let affected = engine.execute_transaction(&batch).await.unwrap();
    assert_eq!(affected, 3);
    assert_eq!(balances(&engine).await, vec![(1, 75), (2, 50), (3, 25)]);
}

#[tokio::test]
async fn test_batch_is_left_intact_after_execution() {
    let (engine, _file) = setup().await;
    let meta = accounts();

    let mut batch = TransactionBatch::new();
    batch.enqueue(BatchOp::update(meta.clone(), account(1, "ann", 10)));
    batch.enqueue(BatchOp::delete(meta, account(1, "ann", 10)));

    assert_eq!(engine.execute_transaction(&batch).await.unwrap(), 2);
    assert_eq!(batch.size(), 2);
    assert!(balances(&engine).await.is_empty());
}

#[tokio::test]
async fn test_failing_operation_rolls_back_whole_batch() {
    let (engine, _file) = setup().await;
    let meta = accounts();
    let before = balances(&engine).await;

    let mut batch = TransactionBatch::new();
    batch.enqueue(BatchOp::add(meta.clone(), account(2, "bob", 50)));
    // Duplicate primary key
    batch.enqueue(BatchOp::add(meta.clone(), account(1, "dup", 0)));
    batch.enqueue(BatchOp::update(meta, account(1, "ann", 0)));

    let err = engine.execute_transaction(&batch).await.unwrap_err();
    assert!(matches!(err, DbError::Query { .. }), "unexpected error: {:?}", err);

    assert_eq!(balances(&engine).await, before);
    let bob = engine
        .get_entity_by_id(accounts().as_ref(), 2)
        .await
        .unwrap();
    assert!(bob.is_none());
}

#[tokio::test]
async fn test_invalid_operation_rolls_back_earlier_writes() {
    let (engine, _file) = setup().await;
    let meta = accounts();
    let no_id: Row = json!({"owner": "ghost", "balance": 1})
        .as_object()
        .unwrap()
        .clone();

    let mut batch = TransactionBatch::new();
    batch.enqueue(BatchOp::update(meta.clone(), account(1, "ann", 0)));
    batch.enqueue(BatchOp::delete(meta, Arc::new(no_id)));

    let err = engine.execute_transaction(&batch).await.unwrap_err();
    assert!(matches!(err, DbError::InvalidInput { .. }));
    assert_eq!(balances(&engine).await, vec![(1, 100)]);
}

#[tokio::test]
async fn test_empty_batch_affects_nothing() {
    let (engine, _file) = setup().await;
    let batch = TransactionBatch::new();
    assert_eq!(engine.execute_transaction(&batch).await.unwrap(), 0);
    assert_eq!(balances(&engine).await, vec![(1, 100)]);
}

#[tokio::test]
async fn test_writes_inside_caller_transaction() {
    let (engine, _file) = setup().await;
    let meta = accounts();

    let mut tx = engine.pool().begin().await.unwrap();
    engine
        .add(meta.as_ref(), &account(2, "bob", 5), Some(&mut tx))
        .await
        .unwrap();
    engine
        .update(meta.as_ref(), &account(1, "ann", 1), Some(&mut tx))
        .await
        .unwrap();
    tx.rollback().await.unwrap();

    assert_eq!(balances(&engine).await, vec![(1, 100)]);

    let mut tx = engine.pool().begin().await.unwrap();
    engine
        .delete(meta.as_ref(), &account(1, "ann", 1), Some(&mut tx))
        .await
        .unwrap();
    tx.commit().await.unwrap();

    assert!(balances(&engine).await.is_empty());
    let remaining = engine
        .get_entities_count(meta.as_ref(), &[("owner", QueryParam::from("ann"))])
        .await
        .unwrap();
    assert_eq!(remaining, 0);
}

#[tokio::test]
async fn test_commit_failure_is_transaction_error() {
    let (engine, _file) = setup().await;
    engine
        .query_execute("CREATE TABLE parents (id INTEGER PRIMARY KEY)", &[])
        .await
        .unwrap();
    engine
        .query_execute(
            "CREATE TABLE children (id INTEGER PRIMARY KEY, parent_id INTEGER NOT NULL \
             REFERENCES parents(id) DEFERRABLE INITIALLY DEFERRED)",
            &[],
        )
        .await
        .unwrap();

    let parents: Arc<dyn EntityMetadata> =
        Arc::new(TableMetadata::new("parents", "id").with_insertable(["id"]));
    let children: Arc<dyn EntityMetadata> = Arc::new(
        TableMetadata::new("children", "id").with_insertable(["id", "parent_id"]),
    );
    let row = |value: serde_json::Value| -> Arc<dyn Entity> {
        Arc::new(value.as_object().unwrap().clone())
    };

    // The deferred foreign key is only checked at COMMIT
    let mut batch = TransactionBatch::new();
    batch.enqueue(BatchOp::add(
        children.clone(),
        row(json!({"id": 1, "parent_id": 99})),
    ));

    let err = engine.execute_transaction(&batch).await.unwrap_err();
    match &err {
        DbError::Transaction { message, batch_id } => {
            assert!(batch_id.starts_with("batch_"));
            assert!(message.contains("COMMIT"), "unexpected message: {}", message);
        }
        other => panic!("expected a transaction error, got {:?}", other),
    }
    assert!(!err.is_retryable());
    assert_eq!(
        engine.get_entities_count(children.as_ref(), &[]).await.unwrap(),
        0
    );

    // The single pooled connection was released
    let mut batch = TransactionBatch::new();
    batch.enqueue(BatchOp::add(parents, row(json!({"id": 99}))));
    batch.enqueue(BatchOp::add(
        children.clone(),
        row(json!({"id": 1, "parent_id": 99})),
    ));
    assert_eq!(engine.execute_transaction(&batch).await.unwrap(), 2);
    assert_eq!(
        engine.get_entities_count(children.as_ref(), &[]).await.unwrap(),
        1
    );
}
