//! HTTP API handlers for the CrewLedger server

pub mod auth;
pub mod crew;
pub mod dashboard;
pub mod export;
pub mod fleet;
pub mod health;
pub mod pages;
pub mod receipts;
pub mod reports;
pub mod session;
pub mod users;
pub mod webhook;

pub use auth::auth_routes;
pub use crew::crew_routes;
pub use dashboard::dashboard_routes;
pub use export::export_routes;
pub use fleet::fleet_routes;
pub use health::health_routes;
pub use pages::page_routes;
pub use receipts::receipt_routes;
pub use reports::report_routes;
pub use session::session_middleware;
pub use users::user_routes;
pub use webhook::webhook_routes;

use chrono::{Duration, Local, NaiveDate};

use crate::error::{ApiError, ApiResult};
use crate::services::reports::default_week_range;

/// Parse an optional `YYYY-MM-DD` query value
pub fn parse_date_param(name: &str, value: Option<&str>) -> ApiResult<Option<NaiveDate>> {
    match value.map(str::trim).filter(|v| !v.is_empty()) {
        None => Ok(None),
        Some(raw) => NaiveDate::parse_from_str(raw, "%Y-%m-%d")
            .map(Some)
            .map_err(|_| ApiError::BadRequest(format!("Invalid {}: {} (expected YYYY-MM-DD)", name, raw))),
    }
}

/// Requested week; with neither bound given, the last full Monday to Sunday week
///
/// A single bound is widened to a seven-day range.
pub fn week_range(start: Option<&str>, end: Option<&str>) -> ApiResult<(NaiveDate, NaiveDate)> {
    let start = parse_date_param("week_start", start)?;
    let end = parse_date_param("week_end", end)?;
    let (start, end) = match (start, end) {
        (Some(s), Some(e)) => (s, e),
        (Some(s), None) => (s, s + Duration::days(6)),
        (None, Some(e)) => (e - Duration::days(6), e),
        (None, None) => default_week_range(Local::now().date_naive()),
    };
    if end < start {
        return Err(ApiError::BadRequest(format!(
            "week_end {} is before week_start {}",
            end, start
        )));
    }
    Ok((start, end))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_explicit_week_range() {
        let (start, end) = week_range(Some("2026-02-09"), Some("2026-02-15")).unwrap();
        assert_eq!(start.to_string(), "2026-02-09");
        assert_eq!(end.to_string(), "2026-02-15");
    }

    #[test]
    fn test_bad_dates_rejected() {
        assert!(matches!(
            week_range(Some("02/09/2026"), None),
            Err(ApiError::BadRequest(_))
        ));
        assert!(matches!(
            week_range(Some("2026-02-15"), Some("2026-02-09")),
            Err(ApiError::BadRequest(_))
        ));
    }

    #[test]
    fn test_single_bound_spans_a_week() {
        let (start, end) = week_range(Some("2026-02-09"), None).unwrap();
        assert_eq!(start.to_string(), "2026-02-09");
        assert_eq!(end.to_string(), "2026-02-15");
    }

    #[test]
    fn test_blank_means_default() {
        assert_eq!(parse_date_param("week_start", Some("  ")).unwrap(), None);
    }
}
