//! Dashboard user management (super_admin only)

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, put},
    Extension, Json, Router,
};
use crewledger_common::db::{AuthorizedUser, SystemRole};
use crewledger_common::phone::mask_email;
use crewledger_common::Error as CommonError;
use serde::{Deserialize, Deserializer};
use serde_json::{json, Value};
use sqlx::{QueryBuilder, Sqlite};
use tracing::info;

use crate::api::session::require_role;
use crate::db::{users, CurrentUser};
use crate::error::{ApiError, ApiResult};
use crate::services::permissions::{AccessLevel, Module};
use crate::AppState;

/// Distinguishes an explicit `null` (`Some(None)`) from an absent field (`None`)
fn explicit_null<'de, D, T>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

fn parse_role(raw: &str) -> ApiResult<SystemRole> {
    raw.parse::<SystemRole>()
        .map_err(|_| ApiError::BadRequest(format!("Invalid role: {}", raw)))
}

async fn existing_user(state: &AppState, id: i64) -> ApiResult<AuthorizedUser> {
    users::get_user(&state.db, id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("User {} not found", id)))
}

/// GET /api/admin/users
pub async fn list_users(
    State(state): State<AppState>,
    Extension(user): Extension<CurrentUser>,
) -> ApiResult<Json<Vec<AuthorizedUser>>> {
    require_role(&user, SystemRole::SuperAdmin)?;
    Ok(Json(users::list_users(&state.db).await?))
}

#[derive(Debug, Deserialize)]
pub struct CreateUser {
    pub email: String,
    pub name: Option<String>,
    pub system_role: Option<String>,
    pub employee_id: Option<i64>,
}

/// POST /api/admin/users
pub async fn create_user(
    State(state): State<AppState>,
    Extension(user): Extension<CurrentUser>,
    Json(body): Json<CreateUser>,
) -> ApiResult<(StatusCode, Json<Value>)> {
    require_role(&user, SystemRole::SuperAdmin)?;

    let email = body.email.trim().to_lowercase();
    let valid = email
        .split_once('@')
        .is_some_and(|(local, domain)| !local.is_empty() && !domain.is_empty());
    if !valid {
        return Err(ApiError::BadRequest("Valid email is required".to_string()));
    }
    let role = parse_role(body.system_role.as_deref().unwrap_or("employee"))?;
    let name = body.name.as_deref().map(str::trim).filter(|n| !n.is_empty());

    let result = sqlx::query(
        "INSERT INTO authorized_users (email, name, system_role, employee_id) VALUES (?, ?, ?, ?)",
    )
    .bind(&email)
    .bind(name)
    .bind(role.as_str())
    .bind(body.employee_id)
    .execute(&state.db)
    .await
    .map_err(|e| CommonError::from_insert(e, "Email already exists"))?;

    let id = result.last_insert_rowid();
    info!(user_id = id, role = role.as_str(), "Authorized user added: {}", mask_email(&email));
    Ok((
        StatusCode::CREATED,
        Json(json!({ "status": "created", "id": id, "email": email })),
    ))
}

#[derive(Debug, Default, Deserialize)]
pub struct UpdateUser {
    pub system_role: Option<String>,
    #[serde(default, deserialize_with = "explicit_null")]
    pub employee_id: Option<Option<i64>>,
    pub is_active: Option<bool>,
    pub name: Option<String>,
}

/// PUT /api/admin/users/:id
pub async fn update_user(
    State(state): State<AppState>,
    Extension(user): Extension<CurrentUser>,
    Path(id): Path<i64>,
    Json(body): Json<UpdateUser>,
) -> ApiResult<Json<Value>> {
    require_role(&user, SystemRole::SuperAdmin)?;
    existing_user(&state, id).await?;

    let mut qb = QueryBuilder::<Sqlite>::new("UPDATE authorized_users SET ");
    let mut fields = qb.separated(", ");
    let mut changed = Vec::new();

    if let Some(raw) = body.system_role.as_deref() {
        let role = parse_role(raw)?;
        fields.push("system_role = ").push_bind_unseparated(role.as_str());
        changed.push("system_role");
    }
    if let Some(employee_id) = body.employee_id {
        fields.push("employee_id = ").push_bind_unseparated(employee_id);
        changed.push("employee_id");
    }
    if let Some(active) = body.is_active {
        fields.push("is_active = ").push_bind_unseparated(active);
        changed.push("is_active");
    }
    if let Some(name) = body.name {
        fields.push("name = ").push_bind_unseparated(name);
        changed.push("name");
    }
    if changed.is_empty() {
        return Err(ApiError::BadRequest("No valid fields to update".to_string()));
    }
    qb.push(" WHERE id = ").push_bind(id);
    qb.build().execute(&state.db).await?;

    if body.is_active == Some(false) {
        sqlx::query("DELETE FROM sessions WHERE user_id = ?")
            .bind(id)
            .execute(&state.db)
            .await?;
    }

    info!(user_id = id, fields = ?changed, "Authorized user updated");
    Ok(Json(json!({ "status": "updated", "id": id })))
}

/// DELETE /api/admin/users/:id
pub async fn delete_user(
    State(state): State<AppState>,
    Extension(user): Extension<CurrentUser>,
    Path(id): Path<i64>,
) -> ApiResult<Json<Value>> {
    require_role(&user, SystemRole::SuperAdmin)?;
    if id == user.user_id {
        return Err(ApiError::BadRequest("You cannot remove your own account".to_string()));
    }
    let target = existing_user(&state, id).await?;

    let mut tx = state.db.begin().await?;
    for sql in [
        "DELETE FROM sessions WHERE user_id = ?",
        "DELETE FROM user_permissions WHERE user_id = ?",
        "DELETE FROM authorized_users WHERE id = ?",
    ] {
        sqlx::query(sql).bind(id).execute(&mut *tx).await?;
    }
    tx.commit().await?;

    info!(user_id = id, "Authorized user removed: {}", mask_email(&target.email));
    Ok(Json(json!({ "status": "deleted", "id": id })))
}

#[derive(Debug, Deserialize)]
pub struct PermissionOverride {
    pub module: String,
    /// `None` clears the override and restores the role default
    pub access_level: Option<String>,
}

/// PUT /api/admin/users/:id/permissions
pub async fn set_permission(
    State(state): State<AppState>,
    Extension(user): Extension<CurrentUser>,
    Path(id): Path<i64>,
    Json(body): Json<PermissionOverride>,
) -> ApiResult<Json<Value>> {
    require_role(&user, SystemRole::SuperAdmin)?;
    existing_user(&state, id).await?;

    let module = Module::ALL
        .into_iter()
        .find(|m| m.as_str() == body.module)
        .ok_or_else(|| ApiError::BadRequest(format!("Unknown module: {}", body.module)))?;

    match body.access_level.as_deref() {
        None | Some("default") => {
            sqlx::query("DELETE FROM user_permissions WHERE user_id = ? AND module = ?")
                .bind(id)
                .bind(module.as_str())
                .execute(&state.db)
                .await?;
            info!(user_id = id, module = module.as_str(), "Permission override cleared");
            Ok(Json(json!({ "status": "cleared", "module": module.as_str() })))
        }
        Some(raw) => {
            let level: AccessLevel = raw
                .parse()
                .map_err(|_| ApiError::BadRequest(format!("Invalid access level: {}", raw)))?;
            sqlx::query(
                r#"
                INSERT INTO user_permissions (user_id, module, access_level) VALUES (?, ?, ?)
                ON CONFLICT(user_id, module) DO UPDATE SET access_level = excluded.access_level
                "#,
            )
            .bind(id)
            .bind(module.as_str())
            .bind(level.as_str())
            .execute(&state.db)
            .await?;
            info!(
                user_id = id,
                module = module.as_str(),
                access_level = level.as_str(),
                "Permission override set"
            );
            Ok(Json(json!({
                "status": "updated",
                "module": module.as_str(),
                "access_level": level.as_str(),
            })))
        }
    }
}

pub fn user_routes() -> Router<AppState> {
    Router::new()
        .route("/api/admin/users", get(list_users).post(create_user))
        .route("/api/admin/users/:id", put(update_user).delete(delete_user))
        .route("/api/admin/users/:id/permissions", put(set_permission))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_update_distinguishes_null_from_absent() {
        let absent: UpdateUser = serde_json::from_str(r#"{"name":"Ana"}"#).unwrap();
        assert_eq!(absent.employee_id, None);

        let cleared: UpdateUser = serde_json::from_str(r#"{"employee_id":null}"#).unwrap();
        assert_eq!(cleared.employee_id, Some(None));

        let linked: UpdateUser = serde_json::from_str(r#"{"employee_id":7}"#).unwrap();
        assert_eq!(linked.employee_id, Some(Some(7)));
    }

    #[test]
    fn test_role_validation() {
        assert_eq!(parse_role("manager").unwrap(), SystemRole::Manager);
        assert!(matches!(parse_role("admin"), Err(ApiError::BadRequest(_))));
    }
}
