//! Certification status and the on-demand alert refresh
//!
//! Every status shown in the dashboard comes from [`calculate_cert_status`].

use chrono::{NaiveDate, NaiveDateTime};
use serde::Serialize;
use sqlx::{Row, SqlitePool};
use tracing::{info, warn};

/// Days before expiry at which a certification counts as expiring
pub const EXPIRING_WINDOW_DAYS: i64 = 90;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CertStatus {
    Valid,
    Expiring,
    Expired,
    NoExpiry,
}

impl CertStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CertStatus::Valid => "valid",
            CertStatus::Expiring => "expiring",
            CertStatus::Expired => "expired",
            CertStatus::NoExpiry => "no_expiry",
        }
    }
}

fn parse_expiry(expires_at: &str) -> Option<NaiveDate> {
    let raw = expires_at.trim();
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .or_else(|| {
            NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S")
                .ok()
                .map(|dt| dt.date())
        })
}

/// Days from `today` until expiry; negative once expired
pub fn days_until_expiry(expires_at: Option<&str>, today: NaiveDate) -> Option<i64> {
    let expiry = parse_expiry(expires_at?)?;
    Some((expiry - today).num_days())
}

/// Status of a certification on `today`
///
/// Missing or unparseable dates are `NoExpiry`.
pub fn calculate_cert_status(expires_at: Option<&str>, today: NaiveDate) -> CertStatus {
    match days_until_expiry(expires_at, today) {
        None => CertStatus::NoExpiry,
        Some(days) if days < 0 => CertStatus::Expired,
        Some(days) if days <= EXPIRING_WINDOW_DAYS => CertStatus::Expiring,
        Some(_) => CertStatus::Valid,
    }
}

/// Outcome of one refresh pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RefreshSummary {
    pub checked: u64,
    pub alerts_created: u64,
}

/// Scan active certifications and record alerts for expired/expiring ones
///
/// A certification whose newest unacknowledged alert already carries the
/// current status is skipped.
pub async fn run_cert_status_refresh(
    pool: &SqlitePool,
    today: NaiveDate,
) -> crewledger_common::Result<RefreshSummary> {
    let certs = sqlx::query(
        r#"
        SELECT c.id, c.employee_id, c.expires_at,
               ct.name AS cert_type_name,
               COALESCE(NULLIF(e.full_name, ''), e.first_name) AS employee_name
        FROM certifications c
        JOIN certification_types ct ON c.cert_type_id = ct.id
        JOIN employees e ON c.employee_id = e.id
        WHERE c.is_active = 1
        "#,
    )
    .fetch_all(pool)
    .await?;

    let mut summary = RefreshSummary::default();
    let mut tx = pool.begin().await?;

    for cert in &certs {
        summary.checked += 1;

        let cert_id: i64 = cert.get("id");
        let expires_at: Option<String> = cert.get("expires_at");
        let status = calculate_cert_status(expires_at.as_deref(), today);
        let days = days_until_expiry(expires_at.as_deref(), today);

        let previous: Option<Option<String>> = sqlx::query_scalar(
            r#"
            SELECT new_status FROM cert_alerts
            WHERE cert_id = ? AND acknowledged = 0
            ORDER BY created_at DESC, id DESC LIMIT 1
            "#,
        )
        .bind(cert_id)
        .fetch_optional(&mut *tx)
        .await?;
        let previous = previous.flatten();

        if previous.as_deref() == Some(status.as_str()) {
            continue;
        }
        if !matches!(status, CertStatus::Expired | CertStatus::Expiring) {
            continue;
        }

        sqlx::query(
            r#"
            INSERT INTO cert_alerts
                (employee_id, cert_id, alert_type, previous_status, new_status, days_until_expiry)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(cert.get::<i64, _>("employee_id"))
        .bind(cert_id)
        .bind(status.as_str())
        .bind(previous.as_deref())
        .bind(status.as_str())
        .bind(days)
        .execute(&mut *tx)
        .await?;
        summary.alerts_created += 1;

        let name: String = cert.get("employee_name");
        let cert_name: String = cert.get("cert_type_name");
        match status {
            CertStatus::Expired => warn!(
                "CERT ALERT: {} - {} - EXPIRED ({} days ago)",
                name,
                cert_name,
                days.unwrap_or(0).abs()
            ),
            _ => warn!(
                "CERT ALERT: {} - {} - expiring in {} days",
                name,
                cert_name,
                days.unwrap_or(0)
            ),
        }
    }

    tx.commit().await?;

    info!(
        checked = summary.checked,
        alerts_created = summary.alerts_created,
        "Cert status refresh complete"
    );
    Ok(summary)
}
