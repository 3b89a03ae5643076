//! CrewAsset fleet: vehicles and maintenance records

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, put},
    Extension, Json, Router,
};
use chrono::{Local, NaiveDate};
use crewledger_common::db::{MaintenanceRecord, SystemRole, Vehicle};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use sqlx::{QueryBuilder, Sqlite, SqlitePool};
use tracing::info;

use crate::api::session::{require_permission, require_role};
use crate::db::CurrentUser;
use crate::error::{ApiError, ApiResult};
use crate::services::permissions::{AccessLevel, Module};
use crate::AppState;

/// Active vehicles unserviced for longer than this need service
pub const SERVICE_INTERVAL_DAYS: i64 = 90;

const MAINTENANCE_COLUMNS: &str =
    "id, vehicle_id, service_date, description, cost, mileage, vendor, created_at";

#[derive(Debug, Serialize, sqlx::FromRow)]
pub struct VehicleOverview {
    pub id: i64,
    pub year: Option<i64>,
    pub make: Option<String>,
    pub model: Option<String>,
    pub nickname: Option<String>,
    pub plate_number: Option<String>,
    pub vin: Option<String>,
    pub color: Option<String>,
    pub tire_size: Option<String>,
    pub assigned_to: Option<String>,
    pub status: String,
    pub last_service_date: Option<String>,
    pub total_spend: f64,
    pub maintenance_count: i64,
    pub latest_mileage: Option<i64>,
}

#[derive(Debug, Default, PartialEq, Serialize)]
pub struct FleetSummary {
    pub total_vehicles: usize,
    pub total_spend: f64,
    pub vehicles_needing_service: usize,
    pub avg_cost_per_vehicle: f64,
}

#[derive(Debug, Serialize)]
pub struct FleetOverview {
    pub vehicles: Vec<VehicleOverview>,
    pub summary: FleetSummary,
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Whether an active vehicle is due for service on `today`
///
/// No service history, or an unreadable date, counts as due.
pub fn needs_service(status: &str, last_service_date: Option<&str>, today: NaiveDate) -> bool {
    if status != "active" {
        return false;
    }
    match last_service_date.and_then(|d| NaiveDate::parse_from_str(d, "%Y-%m-%d").ok()) {
        Some(last) => (today - last).num_days() > SERVICE_INTERVAL_DAYS,
        None => true,
    }
}

pub fn summarize(vehicles: &[VehicleOverview], today: NaiveDate) -> FleetSummary {
    let total_vehicles = vehicles.len();
    let total_spend = round2(vehicles.iter().map(|v| v.total_spend).sum());
    FleetSummary {
        total_vehicles,
        total_spend,
        vehicles_needing_service: vehicles
            .iter()
            .filter(|v| needs_service(&v.status, v.last_service_date.as_deref(), today))
            .count(),
        avg_cost_per_vehicle: if total_vehicles > 0 {
            round2(total_spend / total_vehicles as f64)
        } else {
            0.0
        },
    }
}

/// GET /fleet/
pub async fn fleet_overview(
    State(state): State<AppState>,
    Extension(user): Extension<CurrentUser>,
) -> ApiResult<Json<FleetOverview>> {
    require_permission(&state, &user, Module::CrewAsset, AccessLevel::View).await?;

    let vehicles = sqlx::query_as::<_, VehicleOverview>(
        r#"
        SELECT v.id, v.year, v.make, v.model, v.nickname, v.plate_number, v.vin,
               v.color, v.tire_size, v.assigned_to, v.status,
               MAX(m.service_date) AS last_service_date,
               ROUND(COALESCE(SUM(m.cost), 0.0), 2) AS total_spend,
               COUNT(m.id) AS maintenance_count,
               (SELECT lm.mileage FROM vehicle_maintenance lm
                WHERE lm.vehicle_id = v.id AND lm.mileage IS NOT NULL
                ORDER BY lm.service_date DESC, lm.id DESC LIMIT 1) AS latest_mileage
        FROM vehicles v
        LEFT JOIN vehicle_maintenance m ON m.vehicle_id = v.id
        GROUP BY v.id
        ORDER BY v.nickname, v.id
        "#,
    )
    .fetch_all(&state.db)
    .await?;

    let summary = summarize(&vehicles, Local::now().date_naive());
    Ok(Json(FleetOverview { vehicles, summary }))
}

async fn load_vehicle(pool: &SqlitePool, id: i64) -> ApiResult<Vehicle> {
    sqlx::query_as::<_, Vehicle>(
        r#"
        SELECT id, year, make, model, color, tire_size, plate_number, vin, nickname,
               assigned_to, status
        FROM vehicles WHERE id = ?
        "#,
    )
    .bind(id)
    .fetch_optional(pool)
    .await?
    .ok_or_else(|| ApiError::NotFound(format!("Vehicle {} not found", id)))
}

async fn maintenance_for(pool: &SqlitePool, vehicle_id: i64) -> ApiResult<Vec<MaintenanceRecord>> {
    let records = sqlx::query_as::<_, MaintenanceRecord>(&format!(
        "SELECT {} FROM vehicle_maintenance WHERE vehicle_id = ? ORDER BY service_date DESC, id DESC",
        MAINTENANCE_COLUMNS
    ))
    .bind(vehicle_id)
    .fetch_all(pool)
    .await?;
    Ok(records)
}

#[derive(Debug, Serialize, sqlx::FromRow)]
pub struct VendorSummary {
    pub vendor: String,
    pub visit_count: i64,
    pub total_spend: f64,
}

/// GET /fleet/:id
pub async fn vehicle_detail(
    State(state): State<AppState>,
    Extension(user): Extension<CurrentUser>,
    Path(id): Path<i64>,
) -> ApiResult<Json<Value>> {
    require_permission(&state, &user, Module::CrewAsset, AccessLevel::View).await?;
    let vehicle = load_vehicle(&state.db, id).await?;
    let maintenance = maintenance_for(&state.db, id).await?;

    let vendor_summary = sqlx::query_as::<_, VendorSummary>(
        r#"
        SELECT vendor, COUNT(*) AS visit_count, ROUND(COALESCE(SUM(cost), 0.0), 2) AS total_spend
        FROM vehicle_maintenance
        WHERE vehicle_id = ? AND vendor IS NOT NULL AND vendor != ''
        GROUP BY vendor
        ORDER BY total_spend DESC
        "#,
    )
    .bind(id)
    .fetch_all(&state.db)
    .await?;

    let total_spend = round2(maintenance.iter().filter_map(|m| m.cost).sum());
    let latest_mileage = maintenance.iter().find_map(|m| m.mileage);

    Ok(Json(json!({
        "vehicle": vehicle,
        "record_count": maintenance.len(),
        "maintenance": maintenance,
        "vendor_summary": vendor_summary,
        "total_spend": total_spend,
        "latest_mileage": latest_mileage,
    })))
}

/// GET /fleet/:id/maintenance
pub async fn list_maintenance(
    State(state): State<AppState>,
    Extension(user): Extension<CurrentUser>,
    Path(id): Path<i64>,
) -> ApiResult<Json<Value>> {
    require_permission(&state, &user, Module::CrewAsset, AccessLevel::View).await?;
    load_vehicle(&state.db, id).await?;
    let maintenance = maintenance_for(&state.db, id).await?;
    Ok(Json(json!({ "maintenance": maintenance })))
}

/// Maintenance fields; absent fields are left untouched on update
#[derive(Debug, Default, Deserialize)]
pub struct MaintenanceInput {
    pub service_date: Option<String>,
    pub description: Option<String>,
    pub cost: Option<f64>,
    pub mileage: Option<i64>,
    pub vendor: Option<String>,
}

impl MaintenanceInput {
    fn validate(&self) -> ApiResult<()> {
        if let Some(date) = self.service_date.as_deref() {
            NaiveDate::parse_from_str(date, "%Y-%m-%d").map_err(|_| {
                ApiError::BadRequest(format!("Invalid service_date: {} (expected YYYY-MM-DD)", date))
            })?;
        }
        if self.cost.is_some_and(|c| c < 0.0) {
            return Err(ApiError::BadRequest("cost cannot be negative".to_string()));
        }
        Ok(())
    }
}

/// POST /fleet/:id/maintenance
pub async fn add_maintenance(
    State(state): State<AppState>,
    Extension(user): Extension<CurrentUser>,
    Path(id): Path<i64>,
    Json(body): Json<MaintenanceInput>,
) -> ApiResult<(StatusCode, Json<Value>)> {
    require_permission(&state, &user, Module::CrewAsset, AccessLevel::Edit).await?;
    load_vehicle(&state.db, id).await?;

    let description = body
        .description
        .as_deref()
        .map(str::trim)
        .filter(|d| !d.is_empty())
        .ok_or_else(|| ApiError::BadRequest("description is required".to_string()))?;
    body.validate()?;

    let result = sqlx::query(
        r#"
        INSERT INTO vehicle_maintenance (vehicle_id, service_date, description, cost, mileage, vendor)
        VALUES (?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(id)
    .bind(body.service_date.as_deref())
    .bind(description)
    .bind(body.cost)
    .bind(body.mileage)
    .bind(body.vendor.as_deref())
    .execute(&state.db)
    .await?;

    let record_id = result.last_insert_rowid();
    info!(vehicle_id = id, record_id, user_id = user.user_id, "Maintenance record added");
    Ok((
        StatusCode::CREATED,
        Json(json!({ "id": record_id, "message": "Maintenance record added" })),
    ))
}

async fn maintenance_exists(pool: &SqlitePool, id: i64) -> ApiResult<()> {
    let found: Option<i64> = sqlx::query_scalar("SELECT id FROM vehicle_maintenance WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await?;
    found
        .map(|_| ())
        .ok_or_else(|| ApiError::NotFound(format!("Maintenance record {} not found", id)))
}

/// PUT /fleet/maintenance/:id
pub async fn edit_maintenance(
    State(state): State<AppState>,
    Extension(user): Extension<CurrentUser>,
    Path(id): Path<i64>,
    Json(body): Json<MaintenanceInput>,
) -> ApiResult<Json<Value>> {
    require_permission(&state, &user, Module::CrewAsset, AccessLevel::Edit).await?;
    maintenance_exists(&state.db, id).await?;
    body.validate()?;

    let mut qb = QueryBuilder::<Sqlite>::new("UPDATE vehicle_maintenance SET ");
    let mut fields = qb.separated(", ");
    let mut changed = 0;
    if let Some(v) = body.service_date {
        fields.push("service_date = ").push_bind_unseparated(v);
        changed += 1;
    }
    if let Some(v) = body.description {
        fields.push("description = ").push_bind_unseparated(v);
        changed += 1;
    }
    if let Some(v) = body.cost {
        fields.push("cost = ").push_bind_unseparated(v);
        changed += 1;
    }
    if let Some(v) = body.mileage {
        fields.push("mileage = ").push_bind_unseparated(v);
        changed += 1;
    }
    if let Some(v) = body.vendor {
        fields.push("vendor = ").push_bind_unseparated(v);
        changed += 1;
    }
    if changed == 0 {
        return Err(ApiError::BadRequest("No fields to update".to_string()));
    }
    qb.push(" WHERE id = ").push_bind(id);
    qb.build().execute(&state.db).await?;

    info!(record_id = id, fields = changed, user_id = user.user_id, "Maintenance record updated");
    Ok(Json(json!({ "message": "Maintenance record updated" })))
}

/// DELETE /fleet/maintenance/:id
pub async fn delete_maintenance(
    State(state): State<AppState>,
    Extension(user): Extension<CurrentUser>,
    Path(id): Path<i64>,
) -> ApiResult<Json<Value>> {
    require_role(&user, SystemRole::CompanyAdmin)?;
    maintenance_exists(&state.db, id).await?;

    sqlx::query("DELETE FROM vehicle_maintenance WHERE id = ?")
        .bind(id)
        .execute(&state.db)
        .await?;

    info!(record_id = id, user_id = user.user_id, "Maintenance record deleted");
    Ok(Json(json!({ "message": "Maintenance record deleted" })))
}

pub fn fleet_routes() -> Router<AppState> {
    Router::new()
        .route("/fleet/", get(fleet_overview))
        .route("/fleet/:id", get(vehicle_detail))
        .route("/fleet/:id/maintenance", get(list_maintenance).post(add_maintenance))
        .route("/fleet/maintenance/:id", put(edit_maintenance).delete(delete_maintenance))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vehicle(status: &str, last: Option<&str>, spend: f64) -> VehicleOverview {
        VehicleOverview {
            id: 1,
            year: Some(2019),
            make: Some("Ford".into()),
            model: Some("F-150".into()),
            nickname: None,
            plate_number: None,
            vin: None,
            color: None,
            tire_size: None,
            assigned_to: None,
            status: status.into(),
            last_service_date: last.map(str::to_string),
            total_spend: spend,
            maintenance_count: 0,
            latest_mileage: None,
        }
    }

    #[test]
    fn test_needs_service_window() {
        let today = NaiveDate::from_ymd_opt(2026, 6, 1).unwrap();
        assert!(needs_service("active", None, today));
        assert!(needs_service("active", Some("2026-01-15"), today));
        assert!(!needs_service("active", Some("2026-04-01"), today));
        assert!(!needs_service("sold", None, today));
        assert!(needs_service("active", Some("sometime"), today));
    }

    #[test]
    fn test_fleet_summary() {
        let today = NaiveDate::from_ymd_opt(2026, 6, 1).unwrap();
        let vehicles = vec![
            vehicle("active", Some("2026-05-20"), 300.0),
            vehicle("active", None, 0.0),
            vehicle("out_of_service", None, 100.01),
        ];
        let summary = summarize(&vehicles, today);
        assert_eq!(summary.total_vehicles, 3);
        assert_eq!(summary.total_spend, 400.01);
        assert_eq!(summary.vehicles_needing_service, 1);
        assert_eq!(summary.avg_cost_per_vehicle, 133.34);
        assert_eq!(summarize(&[], today), FleetSummary::default());
    }
}
