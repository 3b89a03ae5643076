//! Database initialization
//!
//! Opens (or creates) the SQLite file, creates every table that does not yet
//! exist, runs versioned migrations and seeds the expense categories.

use crate::Result;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::path::Path;
use std::time::Duration;
use tracing::info;

/// Expense categories seeded on first run
pub const DEFAULT_CATEGORIES: &[&str] = &[
    "Materials",
    "Fuel",
    "Food & Drinks",
    "Tools & Equipment",
    "Safety Gear",
    "Lodging",
    "Office & Admin",
    "Other",
];

/// Certification types seeded on first run (name, slug)
pub const DEFAULT_CERT_TYPES: &[(&str, &str)] = &[
    ("OSHA 10", "osha-10"),
    ("OSHA 30", "osha-30"),
    ("First Aid / CPR", "first-aid-cpr"),
    ("Fall Protection", "fall-protection"),
    ("Forklift", "forklift"),
    ("Aerial Lift", "aerial-lift"),
];

/// Initialize database connection and create tables if needed
pub async fn init_database(db_path: &Path) -> Result<SqlitePool> {
    let newly_created = !db_path.exists();

    if let Some(parent) = db_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    // Pragmas go on the connect options so every pooled connection gets them
    let options = SqliteConnectOptions::new()
        .filename(db_path)
        .create_if_missing(true)
        .foreign_keys(true)
        .journal_mode(SqliteJournalMode::Wal)
        .busy_timeout(Duration::from_millis(5000));

    let pool = SqlitePoolOptions::new()
        .max_connections(10)
        .connect_with(options)
        .await?;

    if newly_created {
        info!("Initialized new database: {}", db_path.display());
    } else {
        info!("Opened existing database: {}", db_path.display());
    }

    create_schema(&pool).await?;

    Ok(pool)
}

/// Create all tables, run migrations and seed reference data
///
/// Idempotent; safe on an existing database.
pub async fn create_schema(pool: &SqlitePool) -> Result<()> {
    create_schema_version_table(pool).await?;

    // Core ledger tables
    create_employees_table(pool).await?;
    create_projects_table(pool).await?;
    create_categories_table(pool).await?;
    create_receipts_table(pool).await?;
    create_line_items_table(pool).await?;
    create_conversation_state_table(pool).await?;
    create_unknown_contacts_table(pool).await?;

    // Non-receipt documents
    create_invoice_tables(pool).await?;
    create_packing_slip_tables(pool).await?;
    create_purchase_orders_table(pool).await?;

    // Dashboard access
    create_authorized_users_table(pool).await?;
    create_user_permissions_table(pool).await?;
    create_sessions_tables(pool).await?;

    // Fleet and certifications
    create_vehicle_tables(pool).await?;
    create_certification_tables(pool).await?;

    crate::db::migrations::run_migrations(pool).await?;

    seed_reference_data(pool).await?;

    Ok(())
}

async fn create_schema_version_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_employees_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS employees (
            id                  INTEGER PRIMARY KEY AUTOINCREMENT,
            phone_number        TEXT    NOT NULL UNIQUE,
            first_name          TEXT    NOT NULL,
            full_name           TEXT,
            email               TEXT,
            crew                TEXT,
            is_active           INTEGER NOT NULL DEFAULT 1,
            language_preference TEXT    DEFAULT NULL
                                        CHECK(language_preference IN ('en', 'es')),
            created_at          TEXT    NOT NULL DEFAULT (datetime('now')),
            updated_at          TEXT    NOT NULL DEFAULT (datetime('now'))
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_employees_phone ON employees(phone_number)")
        .execute(pool)
        .await?;

    Ok(())
}

async fn create_projects_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS projects (
            id          INTEGER PRIMARY KEY AUTOINCREMENT,
            name        TEXT    NOT NULL UNIQUE,
            address     TEXT,
            city        TEXT,
            state       TEXT,
            status      TEXT    NOT NULL DEFAULT 'active'
                                CHECK(status IN ('active', 'completed', 'on_hold')),
            created_at  TEXT    NOT NULL DEFAULT (datetime('now'))
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_categories_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS categories (
            id          INTEGER PRIMARY KEY AUTOINCREMENT,
            name        TEXT    NOT NULL UNIQUE,
            is_active   INTEGER NOT NULL DEFAULT 1
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_receipts_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS receipts (
            id                   INTEGER PRIMARY KEY AUTOINCREMENT,
            employee_id          INTEGER NOT NULL REFERENCES employees(id),
            image_path           TEXT,
            vendor_name          TEXT,
            vendor_city          TEXT,
            vendor_state         TEXT,
            purchase_date        TEXT,
            subtotal             REAL,
            tax                  REAL,
            total                REAL,
            payment_method       TEXT,
            project_id           INTEGER REFERENCES projects(id),
            matched_project_name TEXT,
            category_id          INTEGER REFERENCES categories(id),
            raw_ocr_json         TEXT,
            status               TEXT    NOT NULL DEFAULT 'pending'
                                         CHECK(status IN ('pending', 'confirmed', 'flagged', 'rejected', 'deleted', 'duplicate')),
            flag_reason          TEXT,
            notes                TEXT,
            is_return            INTEGER NOT NULL DEFAULT 0,
            is_missed_receipt    INTEGER NOT NULL DEFAULT 0,
            created_at           TEXT    NOT NULL DEFAULT (datetime('now')),
            confirmed_at         TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    for ddl in [
        "CREATE INDEX IF NOT EXISTS idx_receipts_employee ON receipts(employee_id)",
        "CREATE INDEX IF NOT EXISTS idx_receipts_status ON receipts(status)",
        "CREATE INDEX IF NOT EXISTS idx_receipts_purchase_date ON receipts(purchase_date)",
        "CREATE INDEX IF NOT EXISTS idx_receipts_created ON receipts(created_at)",
    ] {
        sqlx::query(ddl).execute(pool).await?;
    }

    Ok(())
}

async fn create_line_items_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS line_items (
            id              INTEGER PRIMARY KEY AUTOINCREMENT,
            receipt_id      INTEGER NOT NULL REFERENCES receipts(id) ON DELETE CASCADE,
            item_name       TEXT,
            quantity        REAL    DEFAULT 1,
            unit_price      REAL,
            extended_price  REAL,
            category_id     INTEGER REFERENCES categories(id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_line_items_receipt ON line_items(receipt_id)")
        .execute(pool)
        .await?;

    Ok(())
}

async fn create_conversation_state_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS conversation_state (
            id              INTEGER PRIMARY KEY AUTOINCREMENT,
            employee_id     INTEGER NOT NULL REFERENCES employees(id),
            receipt_id      INTEGER,
            document_kind   TEXT,
            document_id     INTEGER,
            state           TEXT    NOT NULL
                                    CHECK(state IN (
                                        'idle',
                                        'awaiting_confirmation',
                                        'awaiting_manual_entry',
                                        'awaiting_missed_details',
                                        'awaiting_language',
                                        'awaiting_doc_confirm'
                                    )),
            context_json    TEXT,
            created_at      TEXT    NOT NULL DEFAULT (datetime('now')),
            updated_at      TEXT    NOT NULL DEFAULT (datetime('now'))
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_conversation_employee ON conversation_state(employee_id, updated_at)",
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_unknown_contacts_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS unknown_contacts (
            id              INTEGER PRIMARY KEY AUTOINCREMENT,
            phone_number    TEXT    NOT NULL,
            message_body    TEXT,
            has_media       INTEGER NOT NULL DEFAULT 0,
            created_at      TEXT    NOT NULL DEFAULT (datetime('now'))
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_invoice_tables(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS invoices (
            id              INTEGER PRIMARY KEY AUTOINCREMENT,
            employee_id     INTEGER NOT NULL REFERENCES employees(id),
            vendor_name     TEXT,
            vendor_address  TEXT,
            invoice_number  TEXT,
            date            TEXT,
            project_id      INTEGER REFERENCES projects(id),
            subtotal        REAL,
            tax             REAL,
            total           REAL,
            payment_method  TEXT,
            status          TEXT    NOT NULL DEFAULT 'pending'
                                    CHECK(status IN ('pending', 'confirmed', 'flagged', 'rejected', 'deleted', 'duplicate')),
            flag_reason     TEXT,
            image_path      TEXT,
            raw_ocr_json    TEXT,
            language        TEXT,
            created_at      TEXT    NOT NULL DEFAULT (datetime('now'))
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS invoice_line_items (
            id              INTEGER PRIMARY KEY AUTOINCREMENT,
            invoice_id      INTEGER NOT NULL REFERENCES invoices(id) ON DELETE CASCADE,
            item_name       TEXT,
            quantity        REAL    DEFAULT 1,
            unit_price      REAL,
            total_price     REAL
        )
        "#,
    )
    .execute(pool)
    .await?;

    for ddl in [
        "CREATE INDEX IF NOT EXISTS idx_invoices_employee ON invoices(employee_id)",
        "CREATE INDEX IF NOT EXISTS idx_invoices_status ON invoices(status)",
        "CREATE INDEX IF NOT EXISTS idx_inv_li_invoice ON invoice_line_items(invoice_id)",
    ] {
        sqlx::query(ddl).execute(pool).await?;
    }

    Ok(())
}

async fn create_packing_slip_tables(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS packing_slips (
            id              INTEGER PRIMARY KEY AUTOINCREMENT,
            employee_id     INTEGER NOT NULL REFERENCES employees(id),
            vendor_name     TEXT,
            vendor_address  TEXT,
            po_number       TEXT,
            date            TEXT,
            project_id      INTEGER REFERENCES projects(id),
            ship_to_site    TEXT,
            item_count      INTEGER NOT NULL DEFAULT 0,
            status          TEXT    NOT NULL DEFAULT 'pending'
                                    CHECK(status IN ('pending', 'confirmed', 'flagged', 'rejected', 'deleted', 'duplicate')),
            flag_reason     TEXT,
            image_path      TEXT,
            raw_ocr_json    TEXT,
            language        TEXT,
            created_at      TEXT    NOT NULL DEFAULT (datetime('now'))
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS packing_slip_items (
            id              INTEGER PRIMARY KEY AUTOINCREMENT,
            packing_slip_id INTEGER NOT NULL REFERENCES packing_slips(id) ON DELETE CASCADE,
            item_name       TEXT,
            quantity        REAL    DEFAULT 1,
            unit            TEXT,
            notes           TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    for ddl in [
        "CREATE INDEX IF NOT EXISTS idx_packing_slips_employee ON packing_slips(employee_id)",
        "CREATE INDEX IF NOT EXISTS idx_packing_slips_status ON packing_slips(status)",
        "CREATE INDEX IF NOT EXISTS idx_ps_items_slip ON packing_slip_items(packing_slip_id)",
    ] {
        sqlx::query(ddl).execute(pool).await?;
    }

    Ok(())
}

async fn create_purchase_orders_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS purchase_orders (
            id              INTEGER PRIMARY KEY AUTOINCREMENT,
            employee_id     INTEGER NOT NULL REFERENCES employees(id),
            vendor_name     TEXT,
            vendor_address  TEXT,
            po_number       TEXT,
            date            TEXT,
            project_id      INTEGER REFERENCES projects(id),
            subtotal        REAL,
            tax             REAL,
            total           REAL,
            status          TEXT    NOT NULL DEFAULT 'pending'
                                    CHECK(status IN ('pending', 'confirmed', 'flagged', 'rejected', 'deleted', 'duplicate')),
            flag_reason     TEXT,
            image_path      TEXT,
            raw_ocr_json    TEXT,
            language        TEXT,
            created_at      TEXT    NOT NULL DEFAULT (datetime('now'))
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_purchase_orders_employee ON purchase_orders(employee_id)",
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_authorized_users_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS authorized_users (
            id              INTEGER PRIMARY KEY AUTOINCREMENT,
            email           TEXT    NOT NULL UNIQUE,
            name            TEXT,
            system_role     TEXT    NOT NULL DEFAULT 'employee'
                                    CHECK(system_role IN ('super_admin', 'company_admin', 'manager', 'employee')),
            employee_id     INTEGER REFERENCES employees(id),
            is_active       INTEGER NOT NULL DEFAULT 1,
            last_login      TEXT,
            created_at      TEXT    NOT NULL DEFAULT (datetime('now'))
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_user_permissions_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS user_permissions (
            id              INTEGER PRIMARY KEY AUTOINCREMENT,
            user_id         INTEGER NOT NULL REFERENCES authorized_users(id) ON DELETE CASCADE,
            module          TEXT    NOT NULL,
            access_level    TEXT    NOT NULL
                                    CHECK(access_level IN ('none', 'view', 'edit', 'admin')),
            UNIQUE(user_id, module)
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_sessions_tables(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS sessions (
            token           TEXT    PRIMARY KEY,
            user_id         INTEGER NOT NULL REFERENCES authorized_users(id) ON DELETE CASCADE,
            picture         TEXT,
            created_at      TEXT    NOT NULL DEFAULT (datetime('now')),
            expires_at      TEXT    NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS oauth_states (
            state           TEXT    PRIMARY KEY,
            next_url        TEXT    NOT NULL DEFAULT '/',
            created_at      TEXT    NOT NULL DEFAULT (datetime('now'))
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_vehicle_tables(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS vehicles (
            id              INTEGER PRIMARY KEY AUTOINCREMENT,
            year            INTEGER,
            make            TEXT,
            model           TEXT,
            color           TEXT,
            tire_size       TEXT,
            plate_number    TEXT,
            vin             TEXT    UNIQUE,
            nickname        TEXT,
            assigned_to     TEXT,
            status          TEXT    NOT NULL DEFAULT 'active'
                                    CHECK(status IN ('active', 'sold', 'out_of_service')),
            created_at      TEXT    NOT NULL DEFAULT (datetime('now')),
            updated_at      TEXT    NOT NULL DEFAULT (datetime('now'))
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS vehicle_maintenance (
            id              INTEGER PRIMARY KEY AUTOINCREMENT,
            vehicle_id      INTEGER NOT NULL REFERENCES vehicles(id) ON DELETE CASCADE,
            service_date    TEXT,
            description     TEXT,
            cost            REAL,
            mileage         INTEGER,
            vendor          TEXT,
            created_at      TEXT    NOT NULL DEFAULT (datetime('now'))
        )
        "#,
    )
    .execute(pool)
    .await?;

    for ddl in [
        "CREATE INDEX IF NOT EXISTS idx_vehicles_status ON vehicles(status)",
        "CREATE INDEX IF NOT EXISTS idx_veh_maint_vehicle ON vehicle_maintenance(vehicle_id)",
        "CREATE INDEX IF NOT EXISTS idx_veh_maint_date ON vehicle_maintenance(service_date)",
    ] {
        sqlx::query(ddl).execute(pool).await?;
    }

    Ok(())
}

async fn create_certification_tables(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS certification_types (
            id              INTEGER PRIMARY KEY AUTOINCREMENT,
            name            TEXT    NOT NULL,
            slug            TEXT    NOT NULL UNIQUE,
            sort_order      INTEGER NOT NULL DEFAULT 0,
            is_active       INTEGER NOT NULL DEFAULT 1
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS certifications (
            id              INTEGER PRIMARY KEY AUTOINCREMENT,
            employee_id     INTEGER NOT NULL REFERENCES employees(id),
            cert_type_id    INTEGER NOT NULL REFERENCES certification_types(id),
            issued_at       TEXT,
            expires_at      TEXT,
            document_path   TEXT,
            notes           TEXT,
            is_active       INTEGER NOT NULL DEFAULT 1,
            created_at      TEXT    NOT NULL DEFAULT (datetime('now')),
            updated_at      TEXT    NOT NULL DEFAULT (datetime('now'))
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS cert_alerts (
            id                INTEGER PRIMARY KEY AUTOINCREMENT,
            employee_id       INTEGER NOT NULL REFERENCES employees(id),
            cert_id           INTEGER NOT NULL REFERENCES certifications(id),
            alert_type        TEXT    NOT NULL,
            previous_status   TEXT,
            new_status        TEXT,
            days_until_expiry INTEGER,
            acknowledged      INTEGER NOT NULL DEFAULT 0,
            acknowledged_by   TEXT,
            acknowledged_at   TEXT,
            created_at        TEXT    NOT NULL DEFAULT (datetime('now'))
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_cert_alerts_cert ON cert_alerts(cert_id)")
        .execute(pool)
        .await?;

    Ok(())
}

/// Seed categories and certification types; existing rows are left untouched
async fn seed_reference_data(pool: &SqlitePool) -> Result<()> {
    for name in DEFAULT_CATEGORIES {
        sqlx::query("INSERT OR IGNORE INTO categories (name) VALUES (?)")
            .bind(name)
            .execute(pool)
            .await?;
    }

    for (order, (name, slug)) in DEFAULT_CERT_TYPES.iter().enumerate() {
        sqlx::query(
            "INSERT OR IGNORE INTO certification_types (name, slug, sort_order) VALUES (?, ?, ?)",
        )
        .bind(name)
        .bind(slug)
        .bind(order as i64)
        .execute(pool)
        .await?;
    }

    Ok(())
}

/// Sample projects for `init-db --seed`
pub const SAMPLE_PROJECTS: &[(&str, &str, &str, &str)] = &[
    ("Sparrow", "123 Main St", "Kissimmee", "FL"),
    ("Falcon", "456 Oak Ave", "Orlando", "FL"),
    ("Hawk", "789 Pine Rd", "Sanford", "FL"),
    ("Eagle", "321 Elm Blvd", "Winter Park", "FL"),
    ("Osprey", "654 Cedar Ln", "St Cloud", "FL"),
];

/// Insert the sample projects; returns how many were new
pub async fn seed_sample_projects(pool: &SqlitePool) -> Result<u64> {
    let mut inserted = 0;
    for (name, address, city, state) in SAMPLE_PROJECTS {
        let result = sqlx::query(
            "INSERT OR IGNORE INTO projects (name, address, city, state) VALUES (?, ?, ?, ?)",
        )
        .bind(name)
        .bind(address)
        .bind(city)
        .bind(state)
        .execute(pool)
        .await?;
        inserted += result.rows_affected();
    }
    Ok(inserted)
}
