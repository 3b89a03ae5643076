//! Database schema migrations
//!
//! Fresh databases get the current schema from `init.rs`. Databases created by
//! earlier releases are missing columns that `CREATE TABLE IF NOT EXISTS` will
//! not add, so each migration checks `pragma_table_info` before altering.
//!
//! # Migration Guidelines
//!
//! 1. **Never modify existing migrations**; add a new one
//! 2. **Keep migrations idempotent**; they also run against fresh databases
//! 3. **Prefer ALTER TABLE** over DROP/CREATE to preserve data

use crate::Result;
use sqlx::SqlitePool;
use tracing::{info, warn};

/// Current schema version
///
/// **IMPORTANT:** Increment this when adding new migrations
const CURRENT_SCHEMA_VERSION: i32 = 4;

/// Get current schema version from database (0 when never migrated)
pub async fn get_schema_version(pool: &SqlitePool) -> Result<i32> {
    let table_exists: bool = sqlx::query_scalar(
        r#"
        SELECT EXISTS(
            SELECT 1 FROM sqlite_master
            WHERE type='table' AND name='schema_version'
        )
        "#,
    )
    .fetch_one(pool)
    .await?;

    if !table_exists {
        return Ok(0);
    }

    let version: Option<i32> =
        sqlx::query_scalar("SELECT version FROM schema_version ORDER BY version DESC LIMIT 1")
            .fetch_optional(pool)
            .await?;

    Ok(version.unwrap_or(0))
}

async fn set_schema_version(pool: &SqlitePool, version: i32) -> Result<()> {
    sqlx::query("INSERT OR REPLACE INTO schema_version (version) VALUES (?)")
        .bind(version)
        .execute(pool)
        .await?;

    Ok(())
}

/// Run all pending migrations
pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    let current_version = get_schema_version(pool).await?;

    if current_version == CURRENT_SCHEMA_VERSION {
        info!("Database schema is up to date (v{})", current_version);
        return Ok(());
    }

    if current_version > CURRENT_SCHEMA_VERSION {
        warn!(
            "Database schema version ({}) is newer than code version ({})",
            current_version, CURRENT_SCHEMA_VERSION
        );
        return Ok(());
    }

    info!(
        "Running database migrations: v{} -> v{}",
        current_version, CURRENT_SCHEMA_VERSION
    );

    if current_version < 1 {
        migrate_v1(pool).await?;
        set_schema_version(pool, 1).await?;
        info!("✓ Migration v1 completed");
    }

    if current_version < 2 {
        migrate_v2(pool).await?;
        set_schema_version(pool, 2).await?;
        info!("✓ Migration v2 completed");
    }

    if current_version < 3 {
        migrate_v3(pool).await?;
        set_schema_version(pool, 3).await?;
        info!("✓ Migration v3 completed");
    }

    if current_version < 4 {
        migrate_v4(pool).await?;
        set_schema_version(pool, 4).await?;
        info!("✓ Migration v4 completed");
    }

    Ok(())
}

async fn has_column(pool: &SqlitePool, table: &str, column: &str) -> Result<bool> {
    let count: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM pragma_table_info(?) WHERE name = ?",
    )
    .bind(table)
    .bind(column)
    .fetch_one(pool)
    .await?;

    Ok(count > 0)
}

async fn add_column_if_missing(
    pool: &SqlitePool,
    table: &str,
    column: &str,
    definition: &str,
) -> Result<()> {
    if has_column(pool, table, column).await? {
        return Ok(());
    }

    let sql = format!("ALTER TABLE {} ADD COLUMN {} {}", table, column, definition);
    sqlx::query(&sql).execute(pool).await?;
    info!("Added column {}.{}", table, column);
    Ok(())
}

/// Migration v1: SMS language preference
async fn migrate_v1(pool: &SqlitePool) -> Result<()> {
    add_column_if_missing(pool, "employees", "language_preference", "TEXT DEFAULT NULL").await
}

/// Migration v2: free-text notes on receipts (manual entry, missed receipt details)
///
/// Older databases kept this text in `conversation_state.context_json`; copy the
/// most recent value across so the review queue can show it.
async fn migrate_v2(pool: &SqlitePool) -> Result<()> {
    add_column_if_missing(pool, "receipts", "notes", "TEXT").await?;

    let copied = sqlx::query(
        r#"
        UPDATE receipts
        SET notes = (
            SELECT COALESCE(
                json_extract(cs.context_json, '$.manual_entry_text'),
                json_extract(cs.context_json, '$.missed_details_text')
            )
            FROM conversation_state cs
            WHERE cs.receipt_id = receipts.id
              AND cs.context_json IS NOT NULL
              AND json_valid(cs.context_json)
            ORDER BY cs.updated_at DESC
            LIMIT 1
        )
        WHERE notes IS NULL
        "#,
    )
    .execute(pool)
    .await?
    .rows_affected();

    if copied > 0 {
        info!("Migration v2: copied {} conversation notes onto receipts", copied);
    }
    Ok(())
}

/// Migration v3: conversation state can point at invoices and packing slips
async fn migrate_v3(pool: &SqlitePool) -> Result<()> {
    add_column_if_missing(pool, "conversation_state", "document_kind", "TEXT").await?;
    add_column_if_missing(pool, "conversation_state", "document_id", "INTEGER").await
}

/// Migration v4: role-based dashboard access
async fn migrate_v4(pool: &SqlitePool) -> Result<()> {
    add_column_if_missing(
        pool,
        "authorized_users",
        "system_role",
        "TEXT NOT NULL DEFAULT 'employee'",
    )
    .await?;
    add_column_if_missing(pool, "authorized_users", "employee_id", "INTEGER").await?;

    // Legacy `role` column: admin → company_admin, manager → manager
    if has_column(pool, "authorized_users", "role").await? {
        sqlx::query(
            r#"
            UPDATE authorized_users
            SET system_role = CASE role
                WHEN 'admin' THEN 'company_admin'
                WHEN 'manager' THEN 'manager'
                ELSE 'employee'
            END
            WHERE system_role = 'employee'
            "#,
        )
        .execute(pool)
        .await?;
    }

    Ok(())
}
