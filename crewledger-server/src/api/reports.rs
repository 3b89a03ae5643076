//! Weekly report preview, data and delivery

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{Html, IntoResponse, Response},
    routing::{get, post},
    Extension, Json, Router,
};
use crewledger_common::db::SystemRole;
use serde::Deserialize;
use serde_json::json;
use tracing::error;

use crate::api::dashboard::WeekQuery;
use crate::api::session::require_role;
use crate::api::week_range;
use crate::db::CurrentUser;
use crate::error::ApiResult;
use crate::services::reports::{generate_weekly_report, render_html, send_weekly_report, WeeklyReport};
use crate::AppState;

/// GET /reports/weekly/preview
pub async fn preview(
    State(state): State<AppState>,
    Extension(user): Extension<CurrentUser>,
    Query(query): Query<WeekQuery>,
) -> ApiResult<Html<String>> {
    require_role(&user, SystemRole::Manager)?;
    let (start, end) = week_range(query.week_start.as_deref(), query.week_end.as_deref())?;
    let report = generate_weekly_report(&state.db, start, end).await?;
    Ok(Html(render_html(&report)))
}

/// GET /reports/weekly/data
pub async fn data(
    State(state): State<AppState>,
    Extension(user): Extension<CurrentUser>,
    Query(query): Query<WeekQuery>,
) -> ApiResult<Json<WeeklyReport>> {
    require_role(&user, SystemRole::Manager)?;
    let (start, end) = week_range(query.week_start.as_deref(), query.week_end.as_deref())?;
    Ok(Json(generate_weekly_report(&state.db, start, end).await?))
}

#[derive(Debug, Default, Deserialize)]
pub struct SendRequest {
    pub recipient: Option<String>,
    pub week_start: Option<String>,
    pub week_end: Option<String>,
}

/// POST /reports/weekly/send
///
/// The JSON body is optional; every field falls back to its default.
pub async fn send(
    State(state): State<AppState>,
    Extension(user): Extension<CurrentUser>,
    body: Option<Json<SendRequest>>,
) -> ApiResult<Response> {
    require_role(&user, SystemRole::CompanyAdmin)?;
    let request = body.map(|Json(b)| b).unwrap_or_default();
    let (start, end) = week_range(request.week_start.as_deref(), request.week_end.as_deref())?;

    let result = send_weekly_report(
        &state.db,
        state.mailer.as_ref(),
        start,
        end,
        request.recipient.as_deref(),
        &state.config.accountant_email,
    )
    .await;

    Ok(match result {
        Ok(outcome) => Json(json!({
            "status": "sent",
            "recipient": request.recipient.as_deref().unwrap_or("default"),
            "outcome": outcome,
        }))
        .into_response(),
        Err(e) => {
            error!(%start, %end, "Weekly report send failed: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "status": "failed", "error": "Check server logs for details" })),
            )
                .into_response()
        }
    })
}

pub fn report_routes() -> Router<AppState> {
    Router::new()
        .route("/reports/weekly/preview", get(preview))
        .route("/reports/weekly/data", get(data))
        .route("/reports/weekly/send", post(send))
}
