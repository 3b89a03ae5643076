//! Integration tests for database initialization and migrations

use crewledger_common::db::init::{create_schema, init_database, seed_sample_projects};
use crewledger_common::db::migrations::get_schema_version;
use sqlx::{Row, SqlitePool};
use tempfile::TempDir;

async fn table_names(pool: &SqlitePool) -> Vec<String> {
    sqlx::query("SELECT name FROM sqlite_master WHERE type='table' ORDER BY name")
        .fetch_all(pool)
        .await
        .unwrap()
        .iter()
        .map(|r| r.get::<String, _>("name"))
        .collect()
}

async fn column_names(pool: &SqlitePool, table: &str) -> Vec<String> {
    sqlx::query("SELECT name FROM pragma_table_info(?)")
        .bind(table)
        .fetch_all(pool)
        .await
        .unwrap()
        .iter()
        .map(|r| r.get::<String, _>("name"))
        .collect()
}

#[tokio::test]
async fn test_database_creation_when_missing() {
    let dir = TempDir::new().unwrap();
    let db_path = dir.path().join("nested").join("crewledger.db");

    let result = init_database(&db_path).await;

    assert!(result.is_ok(), "Database initialization failed: {:?}", result.err());
    assert!(db_path.exists(), "Database file was not created");
}

#[tokio::test]
async fn test_database_opens_existing() {
    let dir = TempDir::new().unwrap();
    let db_path = dir.path().join("crewledger.db");

    let pool1 = init_database(&db_path).await.unwrap();
    pool1.close().await;

    let pool2 = init_database(&db_path).await;
    assert!(pool2.is_ok(), "Failed to open existing database: {:?}", pool2.err());
}

#[tokio::test]
async fn test_all_tables_created() {
    let dir = TempDir::new().unwrap();
    let pool = init_database(&dir.path().join("t.db")).await.unwrap();

    let tables = table_names(&pool).await;
    for expected in [
        "employees",
        "projects",
        "categories",
        "receipts",
        "line_items",
        "conversation_state",
        "unknown_contacts",
        "invoices",
        "invoice_line_items",
        "packing_slips",
        "packing_slip_items",
        "purchase_orders",
        "authorized_users",
        "user_permissions",
        "sessions",
        "oauth_states",
        "vehicles",
        "vehicle_maintenance",
        "certification_types",
        "certifications",
        "cert_alerts",
    ] {
        assert!(tables.contains(&expected.to_string()), "missing table {}", expected);
    }
}

#[tokio::test]
async fn test_schema_is_idempotent_and_versioned() {
    let dir = TempDir::new().unwrap();
    let pool = init_database(&dir.path().join("t.db")).await.unwrap();

    create_schema(&pool).await.unwrap();
    create_schema(&pool).await.unwrap();

    assert_eq!(get_schema_version(&pool).await.unwrap(), 4);

    let categories: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM categories")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(categories, 8, "seeding must not duplicate categories");
}

#[tokio::test]
async fn test_language_preference_accepts_null_en_es() {
    let dir = TempDir::new().unwrap();
    let pool = init_database(&dir.path().join("t.db")).await.unwrap();

    sqlx::query("INSERT INTO employees (phone_number, first_name) VALUES ('+14075551111', 'Test')")
        .execute(&pool)
        .await
        .unwrap();
    let pref: Option<String> = sqlx::query_scalar(
        "SELECT language_preference FROM employees WHERE phone_number = '+14075551111'",
    )
    .fetch_one(&pool)
    .await
    .unwrap();
    assert!(pref.is_none());

    for lang in ["en", "es"] {
        sqlx::query("UPDATE employees SET language_preference = ?")
            .bind(lang)
            .execute(&pool)
            .await
            .unwrap();
    }

    let bad = sqlx::query("UPDATE employees SET language_preference = 'fr'")
        .execute(&pool)
        .await;
    assert!(bad.is_err(), "CHECK constraint should reject unsupported languages");
}

#[tokio::test]
async fn test_conversation_state_accepts_new_steps() {
    let dir = TempDir::new().unwrap();
    let pool = init_database(&dir.path().join("t.db")).await.unwrap();

    sqlx::query("INSERT INTO employees (id, phone_number, first_name) VALUES (1, '+14075551111', 'Test')")
        .execute(&pool)
        .await
        .unwrap();

    for state in ["awaiting_language", "awaiting_doc_confirm"] {
        sqlx::query("INSERT INTO conversation_state (employee_id, state) VALUES (1, ?)")
            .bind(state)
            .execute(&pool)
            .await
            .unwrap();
    }

    let bad = sqlx::query("INSERT INTO conversation_state (employee_id, state) VALUES (1, 'dancing')")
        .execute(&pool)
        .await;
    assert!(bad.is_err());
}

#[tokio::test]
async fn test_invoice_items_cascade_delete() {
    let dir = TempDir::new().unwrap();
    let pool = init_database(&dir.path().join("t.db")).await.unwrap();

    sqlx::query("INSERT INTO employees (id, phone_number, first_name) VALUES (1, '+14075551111', 'Test')")
        .execute(&pool)
        .await
        .unwrap();
    sqlx::query("INSERT INTO invoices (id, employee_id, vendor_name) VALUES (1, 1, 'ABC Supply')")
        .execute(&pool)
        .await
        .unwrap();
    sqlx::query("INSERT INTO invoice_line_items (invoice_id, item_name) VALUES (1, 'Shingles')")
        .execute(&pool)
        .await
        .unwrap();

    sqlx::query("DELETE FROM invoices WHERE id = 1")
        .execute(&pool)
        .await
        .unwrap();

    let remaining: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM invoice_line_items")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(remaining, 0, "foreign keys must be enforced on every pooled connection");
}

#[tokio::test]
async fn test_migrations_upgrade_legacy_tables() {
    let dir = TempDir::new().unwrap();
    let db_path = dir.path().join("legacy.db");
    let url = format!("sqlite://{}?mode=rwc", db_path.display());
    let legacy = SqlitePool::connect(&url).await.unwrap();

    // Shape of a database from before language and role support
    sqlx::query(
        "CREATE TABLE employees (id INTEGER PRIMARY KEY AUTOINCREMENT, phone_number TEXT NOT NULL UNIQUE, \
         first_name TEXT NOT NULL, full_name TEXT, email TEXT, crew TEXT, is_active INTEGER NOT NULL DEFAULT 1, \
         created_at TEXT NOT NULL DEFAULT (datetime('now')), updated_at TEXT NOT NULL DEFAULT (datetime('now')))",
    )
    .execute(&legacy)
    .await
    .unwrap();
    sqlx::query(
        "CREATE TABLE authorized_users (id INTEGER PRIMARY KEY AUTOINCREMENT, email TEXT NOT NULL UNIQUE, \
         name TEXT, role TEXT, is_active INTEGER NOT NULL DEFAULT 1, last_login TEXT, \
         created_at TEXT NOT NULL DEFAULT (datetime('now')))",
    )
    .execute(&legacy)
    .await
    .unwrap();
    sqlx::query("INSERT INTO authorized_users (email, role) VALUES ('boss@example.com', 'admin')")
        .execute(&legacy)
        .await
        .unwrap();
    legacy.close().await;

    let pool = init_database(&db_path).await.unwrap();

    assert!(column_names(&pool, "employees").await.contains(&"language_preference".to_string()));
    let role: String = sqlx::query_scalar(
        "SELECT system_role FROM authorized_users WHERE email = 'boss@example.com'",
    )
    .fetch_one(&pool)
    .await
    .unwrap();
    assert_eq!(role, "company_admin");
}

#[tokio::test]
async fn test_seed_sample_projects_once() {
    let dir = TempDir::new().unwrap();
    let pool = init_database(&dir.path().join("t.db")).await.unwrap();

    assert_eq!(seed_sample_projects(&pool).await.unwrap(), 5);
    assert_eq!(seed_sample_projects(&pool).await.unwrap(), 0);
}
