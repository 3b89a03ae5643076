//! crewledger-server library
//!
//! SMS receipt intake, the dashboard API and the weekly report pipeline.

use axum::Router;
use crewledger_common::config::AppConfig;
use sqlx::SqlitePool;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use crate::messaging::intake::Intake;
use crate::services::mailer::Mailer;
use crate::services::oauth::OAuthProvider;
use crate::services::twilio::MediaFetcher;
use crate::services::vision::VisionClient;

pub mod api;
pub mod db;
pub mod error;
pub mod messaging;
pub mod pagination;
pub mod services;

/// Application state shared across HTTP handlers
#[derive(Clone)]
pub struct AppState {
    pub db: SqlitePool,
    pub config: Arc<AppConfig>,
    /// MMS document pipeline (media download, vision, persistence)
    pub intake: Arc<Intake>,
    pub mailer: Arc<dyn Mailer>,
    pub oauth: Arc<dyn OAuthProvider>,
}

impl AppState {
    pub fn new(
        db: SqlitePool,
        config: AppConfig,
        vision: Arc<dyn VisionClient>,
        media: Arc<dyn MediaFetcher>,
        mailer: Arc<dyn Mailer>,
        oauth: Arc<dyn OAuthProvider>,
    ) -> Self {
        let intake = Intake::new(vision, media, config.receipt_storage_path.clone());
        Self {
            db,
            config: Arc::new(config),
            intake: Arc::new(intake),
            mailer,
            oauth,
        }
    }
}

/// Build application router
///
/// Dashboard pages and JSON endpoints sit behind the session cookie; health,
/// login and the SMS webhook are public (the webhook checks its own signature).
pub fn build_router(state: AppState) -> Router {
    use axum::middleware;

    let protected = Router::new()
        .merge(api::page_routes())
        .merge(api::dashboard_routes())
        .merge(api::receipt_routes())
        .merge(api::export_routes())
        .merge(api::report_routes())
        .merge(api::crew_routes())
        .merge(api::fleet_routes())
        .merge(api::user_routes())
        .layer(middleware::from_fn_with_state(
            state.clone(),
            api::session_middleware,
        ));

    let public = Router::new()
        .merge(api::health_routes())
        .merge(api::auth_routes())
        .merge(api::webhook_routes());

    Router::new()
        .merge(protected)
        .merge(public)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
