//! Dashboard HTML shells
//!
//! Pages are static; they fetch their data from the JSON API.

use axum::{extract::State, response::Html, routing::get, Extension, Router};
use crewledger_common::db::SystemRole;

use crate::api::session::{require_permission, require_role};
use crate::db::CurrentUser;
use crate::error::ApiResult;
use crate::services::permissions::{AccessLevel, Module};
use crate::AppState;

const DASHBOARD_HTML: &str = include_str!("../ui/dashboard.html");
const LEDGER_HTML: &str = include_str!("../ui/ledger.html");
const SETTINGS_HTML: &str = include_str!("../ui/settings.html");
const USERS_HTML: &str = include_str!("../ui/users.html");

/// GET / and GET /dashboard
pub async fn dashboard_page(
    State(state): State<AppState>,
    Extension(user): Extension<CurrentUser>,
) -> ApiResult<Html<&'static str>> {
    require_permission(&state, &user, Module::CrewLedger, AccessLevel::View).await?;
    Ok(Html(DASHBOARD_HTML))
}

/// GET /ledger
pub async fn ledger_page(
    State(state): State<AppState>,
    Extension(user): Extension<CurrentUser>,
) -> ApiResult<Html<&'static str>> {
    require_permission(&state, &user, Module::CrewLedger, AccessLevel::View).await?;
    Ok(Html(LEDGER_HTML))
}

/// GET /settings
pub async fn settings_page(Extension(user): Extension<CurrentUser>) -> ApiResult<Html<&'static str>> {
    require_role(&user, SystemRole::SuperAdmin)?;
    Ok(Html(SETTINGS_HTML))
}

/// GET /admin/users
pub async fn users_page(Extension(user): Extension<CurrentUser>) -> ApiResult<Html<&'static str>> {
    require_role(&user, SystemRole::SuperAdmin)?;
    Ok(Html(USERS_HTML))
}

pub fn page_routes() -> Router<AppState> {
    Router::new()
        .route("/", get(dashboard_page))
        .route("/dashboard", get(dashboard_page))
        .route("/ledger", get(ledger_page))
        .route("/settings", get(settings_page))
        .route("/admin/users", get(users_page))
}
