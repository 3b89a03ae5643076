//! Twilio inbound SMS webhook

use axum::{
    body::Bytes,
    extract::{OriginalUri, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::post,
    Router,
};
use std::collections::HashMap;
use tracing::{error, warn};

use crate::messaging::twiml::twiml_response;
use crate::messaging::{route_message, InboundMessage};
use crate::services::twilio::validate_signature;
use crate::AppState;

const SIGNATURE_HEADER: &str = "x-twilio-signature";

fn twiml(reply: Option<&str>) -> Response {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/xml")],
        twiml_response(reply),
    )
        .into_response()
}

/// POST /webhook/sms
///
/// Always answers 200 with TwiML once the signature checks out; router
/// failures are logged and answered with an empty response so the gateway
/// does not retry and repeat side effects.
pub async fn sms_webhook(
    State(state): State<AppState>,
    OriginalUri(uri): OriginalUri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let params: Vec<(String, String)> = url::form_urlencoded::parse(&body).into_owned().collect();

    let auth_token = &state.config.twilio.auth_token;
    if auth_token.is_empty() {
        warn!("Twilio auth token not configured; skipping signature validation");
    } else {
        let path = uri
            .path_and_query()
            .map(|pq| pq.as_str())
            .unwrap_or_else(|| uri.path());
        let url = format!("{}{}", state.config.public_base_url, path);
        let provided = headers
            .get(SIGNATURE_HEADER)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("");

        if !validate_signature(auth_token, &url, &params, provided) {
            warn!("Rejected webhook with invalid Twilio signature");
            return (StatusCode::FORBIDDEN, "Forbidden").into_response();
        }
    }

    let params: HashMap<String, String> = params.into_iter().collect();
    let inbound = InboundMessage::from_params(&params);

    match route_message(&state.db, &state.intake, &inbound).await {
        Ok(reply) => twiml(reply.as_deref()),
        Err(e) => {
            error!(message_sid = ?inbound.message_sid, "Failed to handle inbound SMS: {}", e);
            twiml(None)
        }
    }
}

pub fn webhook_routes() -> Router<AppState> {
    Router::new().route("/webhook/sms", post(sms_webhook))
}
