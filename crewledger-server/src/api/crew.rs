//! Crew roster, projects and certifications

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Extension, Json, Router,
};
use chrono::{Local, NaiveDate};
use crewledger_common::db::{Language, Project, SystemRole};
use crewledger_common::phone::mask_phone;
use crewledger_common::Error as CommonError;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use sqlx::Row;
use tracing::info;

use crate::api::session::{require_permission, require_role, require_visible};
use crate::db::employees::{self, NewEmployee};
use crate::db::CurrentUser;
use crate::error::{ApiError, ApiResult};
use crate::services::cert_status::{
    calculate_cert_status, days_until_expiry, run_cert_status_refresh, CertStatus, RefreshSummary,
};
use crate::services::permissions::{has_minimum_role, AccessLevel, Module};
use crate::AppState;

#[derive(Debug, Serialize)]
pub struct EmployeeListing {
    pub id: i64,
    pub first_name: String,
    pub full_name: Option<String>,
    pub phone_number: String,
    pub email: Option<String>,
    pub crew: Option<String>,
    pub is_active: bool,
    pub language_preference: Option<String>,
}

/// GET /api/crew/employees
///
/// Phone numbers are masked for roles below company_admin.
pub async fn list_employees(
    State(state): State<AppState>,
    Extension(user): Extension<CurrentUser>,
) -> ApiResult<Json<Vec<EmployeeListing>>> {
    require_permission(&state, &user, Module::CrewCert, AccessLevel::View).await?;
    let show_phone = has_minimum_role(&user.role, SystemRole::CompanyAdmin);

    let rows = employees::list_employees(&state.db, user.visible_employee()).await?;
    Ok(Json(
        rows.into_iter()
            .map(|e| EmployeeListing {
                id: e.id,
                phone_number: if show_phone {
                    e.phone_number
                } else {
                    mask_phone(&e.phone_number)
                },
                first_name: e.first_name,
                full_name: e.full_name,
                email: e.email,
                crew: e.crew,
                is_active: e.is_active,
                language_preference: e.language_preference,
            })
            .collect(),
    ))
}

#[derive(Debug, Deserialize)]
pub struct CreateEmployee {
    pub first_name: String,
    pub full_name: Option<String>,
    pub phone_number: String,
    pub email: Option<String>,
    pub crew: Option<String>,
    pub language: Option<Language>,
}

/// POST /api/employees
pub async fn create_employee(
    State(state): State<AppState>,
    Extension(user): Extension<CurrentUser>,
    Json(body): Json<CreateEmployee>,
) -> ApiResult<(StatusCode, Json<Value>)> {
    require_role(&user, SystemRole::CompanyAdmin)?;

    let id = employees::create_employee(
        &state.db,
        &NewEmployee {
            first_name: body.first_name,
            full_name: body.full_name,
            phone_number: body.phone_number,
            email: body.email,
            crew: body.crew,
            language: body.language,
        },
    )
    .await?;
    info!(employee_id = id, user_id = user.user_id, "Employee registered");

    Ok((StatusCode::CREATED, Json(json!({ "id": id }))))
}

/// Certification as shown on a crew profile
#[derive(Debug, Serialize)]
pub struct CertificationView {
    pub id: i64,
    pub cert_type: String,
    pub cert_slug: String,
    pub issued_at: Option<String>,
    pub expires_at: Option<String>,
    pub notes: Option<String>,
    pub status: CertStatus,
    pub days_until_expiry: Option<i64>,
}

/// GET /crew/:id
pub async fn crew_profile(
    State(state): State<AppState>,
    Extension(user): Extension<CurrentUser>,
    Path(id): Path<i64>,
) -> ApiResult<Json<Value>> {
    require_permission(&state, &user, Module::CrewCert, AccessLevel::View).await?;
    require_visible(&user, id)?;

    let employee = employees::get_employee(&state.db, id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Employee {} not found", id)))?;

    let today = Local::now().date_naive();
    let rows = sqlx::query(
        r#"
        SELECT c.id, ct.name AS cert_type, ct.slug, c.issued_at, c.expires_at, c.notes
        FROM certifications c
        JOIN certification_types ct ON ct.id = c.cert_type_id
        WHERE c.employee_id = ? AND c.is_active = 1
        ORDER BY ct.sort_order, ct.name
        "#,
    )
    .bind(id)
    .fetch_all(&state.db)
    .await?;

    let certifications: Vec<CertificationView> = rows
        .iter()
        .map(|row| {
            let expires_at: Option<String> = row.get("expires_at");
            CertificationView {
                id: row.get("id"),
                cert_type: row.get("cert_type"),
                cert_slug: row.get("slug"),
                issued_at: row.get("issued_at"),
                status: calculate_cert_status(expires_at.as_deref(), today),
                days_until_expiry: days_until_expiry(expires_at.as_deref(), today),
                expires_at,
                notes: row.get("notes"),
            }
        })
        .collect();

    let count = |status: CertStatus| certifications.iter().filter(|c| c.status == status).count();
    let cert_summary = json!({
        "valid": count(CertStatus::Valid),
        "expiring": count(CertStatus::Expiring),
        "expired": count(CertStatus::Expired),
        "no_expiry": count(CertStatus::NoExpiry),
    });
    let phone = if has_minimum_role(&user.role, SystemRole::CompanyAdmin) {
        employee.phone_number.clone()
    } else {
        mask_phone(&employee.phone_number)
    };

    Ok(Json(json!({
        "employee": {
            "id": employee.id,
            "name": employee.display_name(),
            "first_name": employee.first_name,
            "phone_number": phone,
            "email": employee.email,
            "crew": employee.crew,
            "is_active": employee.is_active,
        },
        "certifications": certifications,
        "cert_summary": cert_summary,
    })))
}

/// GET /api/projects
pub async fn list_projects(
    State(state): State<AppState>,
    Extension(user): Extension<CurrentUser>,
) -> ApiResult<Json<Vec<Project>>> {
    require_permission(&state, &user, Module::CrewLedger, AccessLevel::View).await?;
    let projects = sqlx::query_as::<_, Project>(
        "SELECT id, name, address, city, state, status FROM projects ORDER BY name",
    )
    .fetch_all(&state.db)
    .await?;
    Ok(Json(projects))
}

#[derive(Debug, Deserialize)]
pub struct CreateProject {
    pub name: String,
    pub address: Option<String>,
    pub city: Option<String>,
    pub state: Option<String>,
    pub status: Option<String>,
}

const PROJECT_STATUSES: [&str; 3] = ["active", "completed", "on_hold"];

/// POST /api/projects
pub async fn create_project(
    State(state): State<AppState>,
    Extension(user): Extension<CurrentUser>,
    Json(body): Json<CreateProject>,
) -> ApiResult<(StatusCode, Json<Value>)> {
    require_role(&user, SystemRole::CompanyAdmin)?;

    let name = body.name.trim();
    if name.is_empty() {
        return Err(ApiError::BadRequest("name is required".to_string()));
    }
    let status = body.status.as_deref().unwrap_or("active");
    if !PROJECT_STATUSES.contains(&status) {
        return Err(ApiError::BadRequest(format!("Invalid project status: {}", status)));
    }

    let result = sqlx::query(
        "INSERT INTO projects (name, address, city, state, status) VALUES (?, ?, ?, ?, ?)",
    )
    .bind(name)
    .bind(body.address.as_deref())
    .bind(body.city.as_deref())
    .bind(body.state.as_deref())
    .bind(status)
    .execute(&state.db)
    .await
    .map_err(|e| CommonError::from_insert(e, &format!("Project {} already exists", name)))?;

    let id = result.last_insert_rowid();
    info!(project_id = id, "Project created: {}", name);
    Ok((StatusCode::CREATED, Json(json!({ "id": id }))))
}

#[derive(Debug, Deserialize)]
pub struct CreateCertification {
    pub employee_id: i64,
    /// Certification type slug or name
    pub cert_type: String,
    pub issued_at: Option<String>,
    pub expires_at: Option<String>,
    pub document_path: Option<String>,
    pub notes: Option<String>,
}

fn check_date(field: &str, value: Option<&str>) -> ApiResult<()> {
    match value {
        Some(v) if NaiveDate::parse_from_str(v, "%Y-%m-%d").is_err() => Err(
            ApiError::BadRequest(format!("Invalid {}: {} (expected YYYY-MM-DD)", field, v)),
        ),
        _ => Ok(()),
    }
}

/// POST /api/crew/certifications
pub async fn create_certification(
    State(state): State<AppState>,
    Extension(user): Extension<CurrentUser>,
    Json(body): Json<CreateCertification>,
) -> ApiResult<(StatusCode, Json<Value>)> {
    require_role(&user, SystemRole::CompanyAdmin)?;
    check_date("issued_at", body.issued_at.as_deref())?;
    check_date("expires_at", body.expires_at.as_deref())?;

    if employees::get_employee(&state.db, body.employee_id).await?.is_none() {
        return Err(ApiError::BadRequest(format!(
            "Unknown employee {}",
            body.employee_id
        )));
    }

    let cert_type = body.cert_type.trim();
    let type_id: Option<i64> = sqlx::query_scalar(
        "SELECT id FROM certification_types WHERE slug = ? OR LOWER(name) = LOWER(?)",
    )
    .bind(cert_type)
    .bind(cert_type)
    .fetch_optional(&state.db)
    .await?;
    let type_id = type_id
        .ok_or_else(|| ApiError::BadRequest(format!("Unknown certification type: {}", cert_type)))?;

    let result = sqlx::query(
        r#"
        INSERT INTO certifications (employee_id, cert_type_id, issued_at, expires_at, document_path, notes)
        VALUES (?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(body.employee_id)
    .bind(type_id)
    .bind(body.issued_at.as_deref())
    .bind(body.expires_at.as_deref())
    .bind(body.document_path.as_deref())
    .bind(body.notes.as_deref())
    .execute(&state.db)
    .await?;

    let id = result.last_insert_rowid();
    let status = calculate_cert_status(body.expires_at.as_deref(), Local::now().date_naive());
    info!(cert_id = id, employee_id = body.employee_id, status = status.as_str(), "Certification recorded");

    Ok((StatusCode::CREATED, Json(json!({ "id": id, "status": status }))))
}

/// POST /api/crew/certifications/refresh
pub async fn refresh_certifications(
    State(state): State<AppState>,
    Extension(user): Extension<CurrentUser>,
) -> ApiResult<Json<RefreshSummary>> {
    require_role(&user, SystemRole::CompanyAdmin)?;
    let summary = run_cert_status_refresh(&state.db, Local::now().date_naive()).await?;
    Ok(Json(summary))
}

#[derive(Debug, Deserialize)]
pub struct AlertQuery {
    #[serde(default)]
    pub include_acknowledged: bool,
}

#[derive(Debug, Serialize, sqlx::FromRow)]
pub struct CertAlert {
    pub id: i64,
    pub employee_id: i64,
    pub employee_name: String,
    pub cert_id: i64,
    pub cert_type: String,
    pub alert_type: String,
    pub previous_status: Option<String>,
    pub new_status: Option<String>,
    pub days_until_expiry: Option<i64>,
    pub acknowledged: bool,
    pub acknowledged_by: Option<String>,
    pub acknowledged_at: Option<String>,
    pub created_at: String,
}

/// GET /api/crew/cert-alerts
pub async fn list_alerts(
    State(state): State<AppState>,
    Extension(user): Extension<CurrentUser>,
    Query(query): Query<AlertQuery>,
) -> ApiResult<Json<Vec<CertAlert>>> {
    require_permission(&state, &user, Module::CrewCert, AccessLevel::View).await?;
    let scope = user.visible_employee();

    let alerts = sqlx::query_as::<_, CertAlert>(
        r#"
        SELECT a.id, a.employee_id,
               COALESCE(NULLIF(TRIM(e.full_name), ''), e.first_name) AS employee_name,
               a.cert_id, ct.name AS cert_type, a.alert_type, a.previous_status,
               a.new_status, a.days_until_expiry, a.acknowledged, a.acknowledged_by,
               a.acknowledged_at, a.created_at
        FROM cert_alerts a
        JOIN employees e ON e.id = a.employee_id
        JOIN certifications c ON c.id = a.cert_id
        JOIN certification_types ct ON ct.id = c.cert_type_id
        WHERE (? OR a.acknowledged = 0)
          AND (? IS NULL OR a.employee_id = ?)
        ORDER BY a.created_at DESC, a.id DESC
        "#,
    )
    .bind(query.include_acknowledged)
    .bind(scope)
    .bind(scope)
    .fetch_all(&state.db)
    .await?;

    Ok(Json(alerts))
}

/// POST /api/crew/cert-alerts/:id/acknowledge
pub async fn acknowledge_alert(
    State(state): State<AppState>,
    Extension(user): Extension<CurrentUser>,
    Path(id): Path<i64>,
) -> ApiResult<Json<Value>> {
    require_permission(&state, &user, Module::CrewCert, AccessLevel::Edit).await?;

    let result = sqlx::query(
        r#"
        UPDATE cert_alerts
        SET acknowledged = 1, acknowledged_by = ?, acknowledged_at = datetime('now')
        WHERE id = ?
        "#,
    )
    .bind(&user.email)
    .bind(id)
    .execute(&state.db)
    .await?;

    if result.rows_affected() == 0 {
        return Err(ApiError::NotFound(format!("Alert {} not found", id)));
    }
    info!(alert_id = id, user_id = user.user_id, "Cert alert acknowledged");
    Ok(Json(json!({ "status": "acknowledged", "id": id })))
}

pub fn crew_routes() -> Router<AppState> {
    Router::new()
        .route("/api/crew/employees", get(list_employees))
        .route("/api/employees", post(create_employee))
        .route("/crew/:id", get(crew_profile))
        .route("/api/projects", get(list_projects).post(create_project))
        .route("/api/crew/certifications", post(create_certification))
        .route("/api/crew/certifications/refresh", post(refresh_certifications))
        .route("/api/crew/cert-alerts", get(list_alerts))
        .route("/api/crew/cert-alerts/:id/acknowledge", post(acknowledge_alert))
}
