use inkdraft_core::db::migrations::latest_version;
use inkdraft_core::db::{open_db, open_db_in_memory, DbError};
use rusqlite::Connection;

#[test]
fn open_db_in_memory_applies_all_migrations() {
    let conn = open_db_in_memory().unwrap();

    assert_eq!(schema_version(&conn), latest_version());
    assert_table_exists(&conn, "documents");
    assert_table_exists(&conn, "document_revisions");
}

#[test]
fn opening_same_database_twice_is_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("inkdraft.db");

    let conn_first = open_db(&path).unwrap();
    assert_eq!(schema_version(&conn_first), latest_version());
    drop(conn_first);

    let conn_second = open_db(&path).unwrap();
    assert_eq!(schema_version(&conn_second), latest_version());
    assert_table_exists(&conn_second, "documents");
}

#[test]
fn opening_database_with_newer_schema_version_returns_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("future.db");

    let conn = Connection::open(&path).unwrap();
    conn.execute_batch("PRAGMA user_version = 999;").unwrap();
    drop(conn);

    let err = open_db(&path).unwrap_err();
    match err {
        DbError::UnsupportedSchemaVersion {
            db_version,
            latest_supported,
        } => {
            assert_eq!(db_version, 999);
            assert_eq!(latest_supported, latest_version());
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn revisions_are_deleted_with_their_document() {
    let conn = open_db_in_memory().unwrap();
    conn.execute_batch(
        "INSERT INTO documents (id, title, body_json, created_at, updated_at)
         VALUES ('post', 'Post', '{\"blocks\":[]}', 1, 1);
         INSERT INTO document_revisions (document_id, revision, reason, body_json, recorded_at)
         VALUES ('post', 1, 'save', '{\"blocks\":[]}', 2);",
    )
    .unwrap();

    conn.execute("DELETE FROM documents WHERE id = 'post';", [])
        .unwrap();

    let remaining: i64 = conn
        .query_row("SELECT COUNT(*) FROM document_revisions;", [], |row| {
            row.get(0)
        })
        .unwrap();
    assert_eq!(remaining, 0);
}

#[test]
fn revision_reason_is_constrained() {
    let conn = open_db_in_memory().unwrap();
    conn.execute_batch(
        "INSERT INTO documents (id, title, body_json, created_at, updated_at)
         VALUES ('post', 'Post', '{}', 1, 1);",
    )
    .unwrap();

    let result = conn.execute(
        "INSERT INTO document_revisions (document_id, revision, reason, body_json, recorded_at)
         VALUES ('post', 1, 'publish', '{}', 2);",
        [],
    );
    assert!(result.is_err());
}

fn schema_version(conn: &Connection) -> u32 {
    conn.query_row("PRAGMA user_version;", [], |row| row.get(0))
        .unwrap()
}

fn assert_table_exists(conn: &Connection, table_name: &str) {
    let exists: i64 = conn
        .query_row(
            "SELECT EXISTS(
                SELECT 1
                FROM sqlite_master
                WHERE type = 'table' AND name = ?1
            );",
            [table_name],
            |row| row.get(0),
        )
        .unwrap();
    assert_eq!(exists, 1, "table {table_name} does not exist");
}
