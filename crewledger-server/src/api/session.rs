//! Session cookie resolution and access checks
//!
//! Every protected route runs behind [`session_middleware`], which turns the
//! `crewledger_session` cookie into a [`CurrentUser`] request extension.
//! Requests without a valid session are redirected to the login page.

use axum::{
    extract::{Request, State},
    http::{header, HeaderMap, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use crewledger_common::db::SystemRole;
use tracing::warn;

use crate::db::{users, CurrentUser};
use crate::error::{ApiError, ApiResult};
use crate::services::permissions::{check_permission, has_minimum_role, load_override, AccessLevel, Module};
use crate::AppState;

pub const SESSION_COOKIE: &str = "crewledger_session";

/// Value of cookie `name` from the request headers
pub fn cookie_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(key, _)| *key == name)
        .map(|(_, value)| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

/// 302 redirect to `location`
pub fn found(location: &str) -> Response {
    (StatusCode::FOUND, [(header::LOCATION, location.to_string())]).into_response()
}

/// Login URL that returns to `next` afterwards
pub fn login_redirect(next: &str) -> Response {
    let encoded: String = url::form_urlencoded::byte_serialize(next.as_bytes()).collect();
    found(&format!("/auth/login?next={}", encoded))
}

/// Resolve the session cookie for the current request, if any
pub async fn resolve_session(state: &AppState, headers: &HeaderMap) -> ApiResult<Option<CurrentUser>> {
    let Some(token) = cookie_value(headers, SESSION_COOKIE) else {
        return Ok(None);
    };
    Ok(users::session_user(&state.db, &token).await?)
}

/// Session middleware for protected routes
pub async fn session_middleware(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Response {
    let user = match resolve_session(&state, request.headers()).await {
        Ok(user) => user,
        Err(e) => return e.into_response(),
    };

    let Some(user) = user else {
        let next_url = request
            .uri()
            .path_and_query()
            .map(|pq| pq.as_str().to_string())
            .unwrap_or_else(|| "/".to_string());
        return login_redirect(&next_url);
    };

    request.extensions_mut().insert(user);
    next.run(request).await
}

/// Require `level` access to `module`, honoring per-user overrides
pub async fn require_permission(
    state: &AppState,
    user: &CurrentUser,
    module: Module,
    level: AccessLevel,
) -> ApiResult<()> {
    let override_level = load_override(&state.db, user.user_id, module).await?;
    if check_permission(&user.role, module, level, override_level) {
        return Ok(());
    }
    warn!(
        user_id = user.user_id,
        role = %user.role,
        module = module.as_str(),
        required = level.as_str(),
        "Permission denied"
    );
    Err(ApiError::Forbidden(format!(
        "{} access to {} required",
        level.as_str(),
        module
    )))
}

/// Require at least `minimum` role
pub fn require_role(user: &CurrentUser, minimum: SystemRole) -> ApiResult<()> {
    if has_minimum_role(&user.role, minimum) {
        return Ok(());
    }
    warn!(
        user_id = user.user_id,
        role = %user.role,
        required = minimum.as_str(),
        "Role check failed"
    );
    Err(ApiError::Forbidden(format!("{} role required", minimum)))
}

/// Reject access to another employee's records for own-data-only roles
pub fn require_visible(user: &CurrentUser, employee_id: i64) -> ApiResult<()> {
    if user.can_see_employee(employee_id) {
        Ok(())
    } else {
        Err(ApiError::Forbidden("You can only view your own records".to_string()))
    }
}
