//! Shared fixtures for crewledger-server integration tests
//!
//! External services (vision model, MMS media, SMTP, Google) are replaced by
//! in-process fakes; every test gets its own database under a TempDir.

#![allow(dead_code)]

use async_trait::async_trait;
use axum::{
    body::Body,
    http::{header, Request, Response},
};
use crewledger_common::config::AppConfig;
use crewledger_common::db::init_database;
use crewledger_server::services::mailer::{MailError, Mailer, OutgoingEmail};
use crewledger_server::services::oauth::{OAuthError, OAuthProvider, OAuthUser};
use crewledger_server::services::twilio::{MediaError, MediaFetcher, MediaPayload};
use crewledger_server::services::vision::{Detail, VisionClient, VisionError, VisionRequest};
use crewledger_server::{build_router, AppState};
use serde_json::Value;
use sqlx::SqlitePool;
use std::sync::{Arc, Mutex};
use tempfile::TempDir;
use tower::util::ServiceExt;

pub const RECEIPT_JSON: &str = r#"{
    "vendor_name": "Home Depot",
    "vendor_city": "Kissimmee",
    "vendor_state": "FL",
    "purchase_date": "2026-02-10",
    "subtotal": 45.00,
    "tax": 3.15,
    "total": 48.15,
    "payment_method": "CARD 1234",
    "line_items": [
        {"item_name": "2x4 lumber", "quantity": 6, "unit_price": 7.50, "extended_price": 45.00}
    ]
}"#;

pub const INVOICE_JSON: &str = r#"{
    "vendor_name": "Ferguson Supply",
    "invoice_number": "INV-2231",
    "purchase_date": "2026-02-11",
    "total": 912.40,
    "line_items": [
        {"item_name": "PVC fittings", "quantity": 40, "unit_price": 22.81, "extended_price": 912.40}
    ]
}"#;

/// Vision fake: low-detail requests are classification, high-detail are extraction
pub struct FakeVision {
    pub doc_type: String,
    pub extraction: Result<String, String>,
}

impl FakeVision {
    pub fn receipt() -> Self {
        Self {
            doc_type: "receipt".to_string(),
            extraction: Ok(RECEIPT_JSON.to_string()),
        }
    }
}

#[async_trait]
impl VisionClient for FakeVision {
    async fn complete(&self, request: VisionRequest<'_>) -> Result<String, VisionError> {
        match request.detail {
            Detail::Low => Ok(format!(r#"{{"doc_type": "{}"}}"#, self.doc_type)),
            Detail::High => self
                .extraction
                .clone()
                .map_err(|e| VisionError::Api(500, e)),
        }
    }
}

/// Media fake returning a fixed-size JPEG-ish payload
pub struct FakeMedia {
    pub size: usize,
    pub fail: bool,
}

#[async_trait]
impl MediaFetcher for FakeMedia {
    async fn fetch(&self, _url: &str) -> Result<MediaPayload, MediaError> {
        if self.fail {
            return Err(MediaError::Network("connection reset".to_string()));
        }
        Ok(MediaPayload {
            bytes: vec![0xFF; self.size],
            content_type: "image/jpeg".to_string(),
        })
    }
}

/// Mailer fake that records every message
#[derive(Default)]
pub struct RecordingMailer {
    pub sent: Mutex<Vec<OutgoingEmail>>,
}

impl RecordingMailer {
    pub fn sent(&self) -> Vec<OutgoingEmail> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl Mailer for RecordingMailer {
    async fn send(&self, email: OutgoingEmail) -> Result<(), MailError> {
        self.sent.lock().unwrap().push(email);
        Ok(())
    }
}

/// OAuth fake that signs in as a fixed email for any code except "bad"
pub struct FakeOAuth {
    pub email: String,
}

#[async_trait]
impl OAuthProvider for FakeOAuth {
    fn authorize_url(&self, state: &str, redirect_uri: &str) -> Result<String, OAuthError> {
        Ok(format!(
            "https://accounts.example.test/auth?state={}&redirect_uri={}",
            state, redirect_uri
        ))
    }

    async fn authenticate(&self, code: &str, _redirect_uri: &str) -> Result<OAuthUser, OAuthError> {
        if code == "bad" {
            return Err(OAuthError::NotConfigured);
        }
        Ok(OAuthUser {
            email: self.email.clone(),
            name: Some("Test Admin".to_string()),
            picture: None,
        })
    }
}

pub struct TestApp {
    pub dir: TempDir,
    pub state: AppState,
    pub mailer: Arc<RecordingMailer>,
}

pub struct Fakes {
    pub vision: FakeVision,
    pub media: FakeMedia,
    pub oauth_email: String,
    pub auth_token: String,
    pub accountant_email: String,
}

impl Default for Fakes {
    fn default() -> Self {
        Self {
            vision: FakeVision::receipt(),
            media: FakeMedia {
                size: 64 * 1024,
                fail: false,
            },
            oauth_email: "owner@example.com".to_string(),
            auth_token: String::new(),
            accountant_email: "books@example.com".to_string(),
        }
    }
}

pub async fn setup() -> TestApp {
    setup_with(Fakes::default()).await
}

pub async fn setup_with(fakes: Fakes) -> TestApp {
    let dir = TempDir::new().unwrap();
    let mut config = AppConfig::for_root(dir.path());
    config.twilio.auth_token = fakes.auth_token;
    config.accountant_email = fakes.accountant_email;

    let pool = init_database(&config.database_path).await.unwrap();
    let mailer = Arc::new(RecordingMailer::default());
    let state = AppState::new(
        pool,
        config,
        Arc::new(fakes.vision),
        Arc::new(fakes.media),
        mailer.clone(),
        Arc::new(FakeOAuth {
            email: fakes.oauth_email,
        }),
    );

    TestApp { dir, state, mailer }
}

impl TestApp {
    pub fn pool(&self) -> &SqlitePool {
        &self.state.db
    }

    pub async fn request(&self, request: Request<Body>) -> Response<Body> {
        build_router(self.state.clone()).oneshot(request).await.unwrap()
    }

    pub async fn get(&self, uri: &str, cookie: Option<&str>) -> Response<Body> {
        let mut builder = Request::builder().method("GET").uri(uri);
        if let Some(token) = cookie {
            builder = builder.header(header::COOKIE, format!("crewledger_session={}", token));
        }
        self.request(builder.body(Body::empty()).unwrap()).await
    }

    pub async fn send_json(
        &self,
        method: &str,
        uri: &str,
        cookie: &str,
        body: Value,
    ) -> Response<Body> {
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .header(header::COOKIE, format!("crewledger_session={}", cookie))
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap();
        self.request(request).await
    }

    /// POST a form-encoded inbound SMS to the webhook
    pub async fn sms(&self, from: &str, body: &str, media_url: Option<&str>) -> Response<Body> {
        let form = sms_form(from, body, media_url);
        let request = Request::builder()
            .method("POST")
            .uri("/webhook/sms")
            .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(Body::from(form))
            .unwrap();
        self.request(request).await
    }

    /// Send an SMS and return the TwiML reply text
    pub async fn sms_reply(&self, from: &str, body: &str, media_url: Option<&str>) -> String {
        body_text(self.sms(from, body, media_url).await).await
    }
}

pub fn sms_params(from: &str, body: &str, media_url: Option<&str>) -> Vec<(String, String)> {
    let mut params = vec![
        ("From".to_string(), from.to_string()),
        ("Body".to_string(), body.to_string()),
        ("MessageSid".to_string(), "SM0001".to_string()),
        (
            "NumMedia".to_string(),
            if media_url.is_some() { "1" } else { "0" }.to_string(),
        ),
    ];
    if let Some(url) = media_url {
        params.push(("MediaUrl0".to_string(), url.to_string()));
        params.push(("MediaContentType0".to_string(), "image/jpeg".to_string()));
    }
    params
}

pub fn sms_form(from: &str, body: &str, media_url: Option<&str>) -> String {
    url::form_urlencoded::Serializer::new(String::new())
        .extend_pairs(sms_params(from, body, media_url))
        .finish()
}

/// Insert an employee; `language` of `None` leaves the preference unset
pub async fn add_employee(
    pool: &SqlitePool,
    first_name: &str,
    phone: &str,
    crew: Option<&str>,
    language: Option<&str>,
) -> i64 {
    sqlx::query(
        "INSERT INTO employees (first_name, phone_number, crew, language_preference) VALUES (?, ?, ?, ?)",
    )
    .bind(first_name)
    .bind(phone)
    .bind(crew)
    .bind(language)
    .execute(pool)
    .await
    .unwrap()
    .last_insert_rowid()
}

pub async fn add_project(pool: &SqlitePool, name: &str) -> i64 {
    sqlx::query("INSERT INTO projects (name) VALUES (?)")
        .bind(name)
        .execute(pool)
        .await
        .unwrap()
        .last_insert_rowid()
}

/// Insert a receipt directly
pub async fn add_receipt(
    pool: &SqlitePool,
    employee_id: i64,
    vendor: &str,
    total: f64,
    purchase_date: &str,
    status: &str,
    project_id: Option<i64>,
) -> i64 {
    sqlx::query(
        r#"
        INSERT INTO receipts (employee_id, vendor_name, subtotal, tax, total, purchase_date,
                              payment_method, status, project_id, flag_reason)
        VALUES (?, ?, ?, 0.0, ?, ?, 'CARD 1234', ?, ?, ?)
        "#,
    )
    .bind(employee_id)
    .bind(vendor)
    .bind(total)
    .bind(total)
    .bind(purchase_date)
    .bind(status)
    .bind(project_id)
    .bind(if status == "flagged" { Some("OCR processing failed") } else { None })
    .execute(pool)
    .await
    .unwrap()
    .last_insert_rowid()
}

/// Create a dashboard user with `role` and return a session token for them
pub async fn login_as(pool: &SqlitePool, email: &str, role: &str, employee_id: Option<i64>) -> String {
    let user_id = sqlx::query(
        "INSERT INTO authorized_users (email, name, system_role, employee_id) VALUES (?, ?, ?, ?)",
    )
    .bind(email)
    .bind(email.split('@').next())
    .bind(role)
    .bind(employee_id)
    .execute(pool)
    .await
    .unwrap()
    .last_insert_rowid();

    crewledger_server::db::users::create_session(pool, user_id, None, 24)
        .await
        .unwrap()
}

pub async fn body_bytes(response: Response<Body>) -> Vec<u8> {
    axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("Should read body")
        .to_vec()
}

pub async fn body_text(response: Response<Body>) -> String {
    String::from_utf8(body_bytes(response).await).expect("Body should be UTF-8")
}

pub async fn body_json(response: Response<Body>) -> Value {
    serde_json::from_slice(&body_bytes(response).await).expect("Should parse JSON")
}

pub async fn conversation_step(pool: &SqlitePool, employee_id: i64) -> String {
    sqlx::query_scalar("SELECT state FROM conversation_state WHERE employee_id = ?")
        .bind(employee_id)
        .fetch_optional(pool)
        .await
        .unwrap()
        .unwrap_or_else(|| "idle".to_string())
}
