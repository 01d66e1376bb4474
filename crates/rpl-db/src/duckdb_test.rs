use super::*;
use tempfile::TempDir;

#[tokio::test]
async fn test_in_memory() {
    let db = DuckDbBackend::new(":memory:").unwrap();
    assert_eq!(db.db_type(), "duckdb");
}

#[tokio::test]
async fn test_execute_batch_and_exists() {
    let db = DuckDbBackend::in_memory().unwrap();
    db.execute_batch(
        "CREATE TABLE \"Companies\" (\"Id\" INTEGER); CREATE TABLE \"Currencies\" (\"Id\" INTEGER);",
    )
    .await
    .unwrap();

    assert!(db.relation_exists("Companies").await.unwrap());
    assert!(db.relation_exists("main.Currencies").await.unwrap());
    assert!(!db.relation_exists("Polizas").await.unwrap());
}

#[tokio::test]
async fn test_execute_returns_affected_rows() {
    let db = DuckDbBackend::in_memory().unwrap();
    db.execute_batch("CREATE TABLE t (id INTEGER)").await.unwrap();
    let n = db
        .execute("INSERT INTO t VALUES (1), (2), (3)")
        .await
        .unwrap();
    assert_eq!(n, 3);
    assert_eq!(db.query_count("SELECT * FROM t").await.unwrap(), 3);
}

#[tokio::test]
async fn test_query_rows_reads_text_numbers_and_nulls() {
    let db = DuckDbBackend::in_memory().unwrap();
    db.execute_batch(
        "CREATE TABLE c (id INTEGER, codigo VARCHAR, activa BOOLEAN);
         INSERT INTO c VALUES (1, 'BSE', true), (2, NULL, false);",
    )
    .await
    .unwrap();

    let rows = db
        .query_rows("SELECT id, codigo, CAST(activa AS VARCHAR) FROM c ORDER BY id")
        .await
        .unwrap();
    assert_eq!(
        rows,
        vec![
            vec![Some("1".to_string()), Some("BSE".to_string()), Some("true".to_string())],
            vec![Some("2".to_string()), None, Some("false".to_string())],
        ]
    );
}

#[tokio::test]
async fn test_rollback_discards_changes() {
    let db = DuckDbBackend::in_memory().unwrap();
    db.execute_batch("CREATE TABLE t (id INTEGER)").await.unwrap();

    db.begin().await.unwrap();
    db.execute("INSERT INTO t VALUES (1)").await.unwrap();
    db.execute_batch("CREATE TABLE u (id INTEGER)").await.unwrap();
    db.rollback().await.unwrap();

    assert_eq!(db.query_count("SELECT * FROM t").await.unwrap(), 0);
    assert!(!db.relation_exists("u").await.unwrap());

    db.begin().await.unwrap();
    db.execute("INSERT INTO t VALUES (1)").await.unwrap();
    db.commit().await.unwrap();
    assert_eq!(db.query_count("SELECT * FROM t").await.unwrap(), 1);
}

#[tokio::test]
async fn test_commit_without_transaction_fails() {
    let db = DuckDbBackend::in_memory().unwrap();
    let err = db.commit().await.unwrap_err();
    assert!(matches!(err, DbError::TransactionError(_)), "{err}");
}

#[tokio::test]
async fn test_execution_error_includes_sql() {
    let db = DuckDbBackend::in_memory().unwrap();
    let err = db.execute("SELEC 1").await.unwrap_err();
    assert!(err.to_string().contains("SELEC 1"), "{err}");
}

#[tokio::test]
async fn test_file_database_persists() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("polizas.duckdb");
    {
        let db = DuckDbBackend::from_path(&path).unwrap();
        db.execute_batch("CREATE TABLE t (id INTEGER); INSERT INTO t VALUES (7);")
            .await
            .unwrap();
    }
    let db = DuckDbBackend::new(path.to_str().unwrap()).unwrap();
    let rows = db.query_rows("SELECT id FROM t").await.unwrap();
    assert_eq!(rows, vec![vec![Some("7".to_string())]]);
}
