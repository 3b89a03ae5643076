//! Dashboard users, sessions and pending OAuth states

use chrono::{Duration, Utc};
use crewledger_common::db::AuthorizedUser;
use crewledger_common::Result;
use serde::Serialize;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use crate::services::permissions::is_own_data_only;

/// Minutes an OAuth state stays redeemable
const OAUTH_STATE_TTL_MINUTES: i64 = 10;

/// Signed-in dashboard user, attached to each protected request
#[derive(Debug, Clone, Serialize)]
pub struct CurrentUser {
    pub user_id: i64,
    pub email: String,
    pub name: Option<String>,
    pub role: String,
    pub employee_id: Option<i64>,
    pub picture: Option<String>,
}

impl CurrentUser {
    /// Employee the user is restricted to, if their role only sees their own data
    ///
    /// An employee-role user with no linked employee gets `Some(0)`, which
    /// matches no rows.
    pub fn visible_employee(&self) -> Option<i64> {
        if is_own_data_only(&self.role) {
            Some(self.employee_id.unwrap_or(0))
        } else {
            None
        }
    }

    /// Whether this user may see records belonging to `employee_id`
    pub fn can_see_employee(&self, employee_id: i64) -> bool {
        self.visible_employee().map_or(true, |own| own == employee_id)
    }
}

const USER_COLUMNS: &str = "id, email, name, system_role, employee_id, is_active, last_login";

pub async fn find_active_by_email(pool: &SqlitePool, email: &str) -> Result<Option<AuthorizedUser>> {
    let user = sqlx::query_as::<_, AuthorizedUser>(&format!(
        "SELECT {} FROM authorized_users WHERE lower(email) = lower(?) AND is_active = 1",
        USER_COLUMNS
    ))
    .bind(email.trim())
    .fetch_optional(pool)
    .await?;
    Ok(user)
}

pub async fn get_user(pool: &SqlitePool, id: i64) -> Result<Option<AuthorizedUser>> {
    let user = sqlx::query_as::<_, AuthorizedUser>(&format!(
        "SELECT {} FROM authorized_users WHERE id = ?",
        USER_COLUMNS
    ))
    .bind(id)
    .fetch_optional(pool)
    .await?;
    Ok(user)
}

pub async fn list_users(pool: &SqlitePool) -> Result<Vec<AuthorizedUser>> {
    let users = sqlx::query_as::<_, AuthorizedUser>(&format!(
        "SELECT {} FROM authorized_users ORDER BY email",
        USER_COLUMNS
    ))
    .fetch_all(pool)
    .await?;
    Ok(users)
}

/// Record a successful login; the provider's display name replaces a missing one
pub async fn record_login(pool: &SqlitePool, user_id: i64, name: Option<&str>) -> Result<()> {
    sqlx::query(
        "UPDATE authorized_users SET last_login = datetime('now'), name = COALESCE(?, name) WHERE id = ?",
    )
    .bind(name)
    .bind(user_id)
    .execute(pool)
    .await?;
    Ok(())
}

/// Create a session and return its token
pub async fn create_session(
    pool: &SqlitePool,
    user_id: i64,
    picture: Option<&str>,
    hours: i64,
) -> Result<String> {
    let token = Uuid::new_v4().to_string();
    let expires_at = (Utc::now() + Duration::hours(hours))
        .format("%Y-%m-%d %H:%M:%S")
        .to_string();

    sqlx::query("INSERT INTO sessions (token, user_id, picture, expires_at) VALUES (?, ?, ?, ?)")
        .bind(&token)
        .bind(user_id)
        .bind(picture)
        .bind(&expires_at)
        .execute(pool)
        .await?;

    Ok(token)
}

/// Resolve a session token into its user
///
/// Expired sessions and deactivated users resolve to `None`.
pub async fn session_user(pool: &SqlitePool, token: &str) -> Result<Option<CurrentUser>> {
    let row = sqlx::query(
        r#"
        SELECT u.id, u.email, u.name, u.system_role, u.employee_id, s.picture
        FROM sessions s
        JOIN authorized_users u ON u.id = s.user_id
        WHERE s.token = ?
          AND s.expires_at > datetime('now')
          AND u.is_active = 1
        "#,
    )
    .bind(token)
    .fetch_optional(pool)
    .await?;

    Ok(row.map(|row| CurrentUser {
        user_id: row.get("id"),
        email: row.get("email"),
        name: row.get("name"),
        role: row.get("system_role"),
        employee_id: row.get("employee_id"),
        picture: row.get("picture"),
    }))
}

pub async fn delete_session(pool: &SqlitePool, token: &str) -> Result<()> {
    sqlx::query("DELETE FROM sessions WHERE token = ?")
        .bind(token)
        .execute(pool)
        .await?;
    Ok(())
}

/// Remember an OAuth state and where to send the user afterwards
pub async fn store_oauth_state(pool: &SqlitePool, state: &str, next_url: &str) -> Result<()> {
    sqlx::query("DELETE FROM oauth_states WHERE created_at < datetime('now', ?)")
        .bind(format!("-{} minutes", OAUTH_STATE_TTL_MINUTES))
        .execute(pool)
        .await?;
    sqlx::query("INSERT INTO oauth_states (state, next_url) VALUES (?, ?)")
        .bind(state)
        .bind(next_url)
        .execute(pool)
        .await?;
    Ok(())
}

/// Redeem an OAuth state once, returning its next URL
pub async fn take_oauth_state(pool: &SqlitePool, state: &str) -> Result<Option<String>> {
    let mut tx = pool.begin().await?;
    let next: Option<String> = sqlx::query_scalar(
        "SELECT next_url FROM oauth_states WHERE state = ? AND created_at >= datetime('now', ?)",
    )
    .bind(state)
    .bind(format!("-{} minutes", OAUTH_STATE_TTL_MINUTES))
    .fetch_optional(&mut *tx)
    .await?;
    sqlx::query("DELETE FROM oauth_states WHERE state = ?")
        .bind(state)
        .execute(&mut *tx)
        .await?;
    tx.commit().await?;
    Ok(next)
}
