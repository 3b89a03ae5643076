//! Google sign-in and logout
//!
//! Flow: `/auth/google` stores a one-time state and redirects to Google,
//! `/auth/callback` redeems it, checks the email against `authorized_users`
//! and issues the session cookie.

use axum::{
    extract::{Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{Html, IntoResponse, Response},
    routing::get,
    Router,
};
use serde::Deserialize;
use tracing::{info, warn};
use uuid::Uuid;

use crate::api::session::{cookie_value, found, resolve_session, SESSION_COOKIE};
use crate::db::users;
use crate::error::{ApiError, ApiResult};
use crate::services::oauth::OAuthError;
use crate::AppState;

const LOGIN_HTML: &str = include_str!("../ui/login.html");
const ACCESS_DENIED_HTML: &str = include_str!("../ui/access_denied.html");

#[derive(Debug, Deserialize)]
pub struct NextQuery {
    pub next: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CallbackQuery {
    pub code: Option<String>,
    pub state: Option<String>,
    pub error: Option<String>,
}

/// Only same-site relative paths are honoured as post-login targets
pub fn safe_next(next: Option<&str>) -> String {
    match next {
        Some(n) if n.starts_with('/') && !n.starts_with("//") && !n.contains('\\') => n.to_string(),
        _ => "/".to_string(),
    }
}

fn session_cookie(token: &str, max_age_secs: i64, secure: bool) -> String {
    let mut cookie = format!(
        "{}={}; Path=/; HttpOnly; SameSite=Lax; Max-Age={}",
        SESSION_COOKIE, token, max_age_secs
    );
    if secure {
        cookie.push_str("; Secure");
    }
    cookie
}

/// GET /auth/login
pub async fn login_page(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<NextQuery>,
) -> ApiResult<Response> {
    if resolve_session(&state, &headers).await?.is_some() {
        return Ok(found("/"));
    }
    let next = safe_next(query.next.as_deref());
    let encoded: String = url::form_urlencoded::byte_serialize(next.as_bytes()).collect();
    Ok(Html(LOGIN_HTML.replace("{{next}}", &encoded)).into_response())
}

/// GET /auth/google
pub async fn google_login(
    State(state): State<AppState>,
    Query(query): Query<NextQuery>,
) -> ApiResult<Response> {
    let oauth_state = Uuid::new_v4().to_string();
    let next = safe_next(query.next.as_deref());
    users::store_oauth_state(&state.db, &oauth_state, &next).await?;

    let redirect_uri = format!("{}/auth/callback", state.config.public_base_url);
    let url = state
        .oauth
        .authorize_url(&oauth_state, &redirect_uri)
        .map_err(|e| match e {
            OAuthError::NotConfigured => {
                ApiError::Internal("Google sign-in is not configured".to_string())
            }
            other => ApiError::Internal(other.to_string()),
        })?;

    Ok(found(&url))
}

/// GET /auth/callback
pub async fn oauth_callback(
    State(state): State<AppState>,
    Query(query): Query<CallbackQuery>,
) -> ApiResult<Response> {
    if let Some(error) = query.error.as_deref() {
        warn!("OAuth provider returned error: {}", error);
        return Ok(found("/auth/login"));
    }
    let (Some(code), Some(oauth_state)) = (query.code.as_deref(), query.state.as_deref()) else {
        return Ok(found("/auth/login"));
    };

    let Some(next) = users::take_oauth_state(&state.db, oauth_state).await? else {
        warn!("Unknown or expired OAuth state");
        return Ok(found("/auth/login"));
    };

    let redirect_uri = format!("{}/auth/callback", state.config.public_base_url);
    let identity = match state.oauth.authenticate(code, &redirect_uri).await {
        Ok(identity) => identity,
        Err(e) => {
            warn!("OAuth exchange failed: {}", e);
            return Ok(found("/auth/login"));
        }
    };

    let email = identity.email.trim().to_lowercase();
    let Some(user) = users::find_active_by_email(&state.db, &email).await? else {
        warn!("Sign-in attempt by unauthorized account {}", crewledger_common::phone::mask_email(&email));
        return Ok((StatusCode::FORBIDDEN, Html(ACCESS_DENIED_HTML)).into_response());
    };

    users::record_login(&state.db, user.id, identity.name.as_deref()).await?;
    let token = users::create_session(
        &state.db,
        user.id,
        identity.picture.as_deref(),
        state.config.session_hours,
    )
    .await?;
    info!(user_id = user.id, role = %user.system_role, "User signed in");

    let cookie = session_cookie(
        &token,
        state.config.session_hours * 3600,
        state.config.public_base_url.starts_with("https://"),
    );
    let mut response = found(&safe_next(Some(&next)));
    response.headers_mut().insert(
        header::SET_COOKIE,
        cookie
            .parse()
            .map_err(|_| ApiError::Internal("Invalid session cookie".to_string()))?,
    );
    Ok(response)
}

/// GET /auth/logout
pub async fn logout(State(state): State<AppState>, headers: HeaderMap) -> ApiResult<Response> {
    if let Some(token) = cookie_value(&headers, SESSION_COOKIE) {
        users::delete_session(&state.db, &token).await?;
    }
    let mut response = found("/auth/login");
    response.headers_mut().insert(
        header::SET_COOKIE,
        session_cookie("", 0, false)
            .parse()
            .map_err(|_| ApiError::Internal("Invalid session cookie".to_string()))?,
    );
    Ok(response)
}

pub fn auth_routes() -> Router<AppState> {
    Router::new()
        .route("/auth/login", get(login_page))
        .route("/auth/google", get(google_login))
        .route("/auth/callback", get(oauth_callback))
        .route("/auth/logout", get(logout))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_relative_next_urls() {
        assert_eq!(safe_next(Some("/fleet/")), "/fleet/");
        assert_eq!(safe_next(Some("//evil.example.com")), "/");
        assert_eq!(safe_next(Some("https://evil.example.com")), "/");
        assert_eq!(safe_next(None), "/");
    }

    #[test]
    fn test_cookie_attributes() {
        let cookie = session_cookie("tok", 86400, true);
        assert!(cookie.starts_with("crewledger_session=tok;"));
        assert!(cookie.contains("HttpOnly"));
        assert!(cookie.contains("SameSite=Lax"));
        assert!(cookie.ends_with("Secure"));
    }
}
