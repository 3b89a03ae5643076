//! CSV importers for employees, vehicles and maintenance history
//!
//! Each import runs in one transaction. A dry run goes through every row,
//! including duplicate detection against rows earlier in the same file, and
//! then rolls back.

use chrono::{Datelike, NaiveDate};
use crewledger_common::phone::normalize_phone;
use serde::Serialize;
use sqlx::{Sqlite, SqlitePool, Transaction};
use std::collections::HashMap;
use std::io::Read;
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum ImportError {
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Missing required column: {0}")]
    MissingColumn(&'static str),

    #[error(transparent)]
    Database(#[from] crewledger_common::Error),
}

impl From<sqlx::Error> for ImportError {
    fn from(err: sqlx::Error) -> Self {
        ImportError::Database(err.into())
    }
}

/// Counts reported back to the CLI
#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct ImportSummary {
    pub inserted: u64,
    pub skipped: u64,
    /// One message per rejected row, prefixed with its line number
    pub errors: Vec<String>,
}

/// Header name to column index, lowercased
struct Columns(HashMap<String, usize>);

impl Columns {
    fn new(headers: &csv::StringRecord) -> Self {
        Self(
            headers
                .iter()
                .enumerate()
                .map(|(i, h)| (h.trim().to_lowercase(), i))
                .collect(),
        )
    }

    fn has(&self, name: &str) -> bool {
        self.0.contains_key(name)
    }

    fn require(&self, name: &'static str) -> Result<(), ImportError> {
        if self.has(name) {
            Ok(())
        } else {
            Err(ImportError::MissingColumn(name))
        }
    }

    /// Trimmed, non-empty value of `name` in `record`
    fn get<'r>(&self, record: &'r csv::StringRecord, name: &str) -> Option<&'r str> {
        let idx = *self.0.get(name)?;
        record.get(idx).map(str::trim).filter(|v| !v.is_empty())
    }
}

fn csv_reader<R: Read>(input: R) -> csv::Reader<R> {
    csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .flexible(true)
        .from_reader(input)
}

async fn finish(
    tx: Transaction<'_, Sqlite>,
    dry_run: bool,
    what: &str,
    summary: &ImportSummary,
) -> Result<(), ImportError> {
    if dry_run {
        tx.rollback().await?;
        info!(
            inserted = summary.inserted,
            skipped = summary.skipped,
            errors = summary.errors.len(),
            "Dry run of {} import complete, nothing written",
            what
        );
    } else {
        tx.commit().await?;
        info!(
            inserted = summary.inserted,
            skipped = summary.skipped,
            errors = summary.errors.len(),
            "{} import complete",
            what
        );
    }
    Ok(())
}

/// Parse a dollar amount such as `$1,234.50`
pub fn parse_cost(raw: &str) -> Option<f64> {
    let cleaned: String = raw
        .trim()
        .chars()
        .filter(|c| !matches!(c, '$' | ',' | ' '))
        .collect();
    cleaned.parse::<f64>().ok().map(|v| (v * 100.0).round() / 100.0)
}

/// Parse an odometer reading such as `45,210 mi`
pub fn parse_mileage(raw: &str) -> Option<i64> {
    let lower = raw.trim().to_lowercase();
    let cleaned: String = lower
        .trim_end_matches("miles")
        .trim_end_matches("mi")
        .chars()
        .filter(|c| !matches!(c, ',' | ' '))
        .collect();
    cleaned
        .parse::<i64>()
        .ok()
        .or_else(|| cleaned.parse::<f64>().ok().map(|v| v.round() as i64))
}

/// Normalize `YYYY-MM-DD`, `MM/DD/YYYY` or `MM/DD/YY` to `YYYY-MM-DD`
pub fn parse_date(raw: &str) -> Option<String> {
    let raw = raw.trim();
    // %Y happily reads "25" as year 25, so two-digit years fall through to %y
    ["%Y-%m-%d", "%m/%d/%Y", "%m/%d/%y"]
        .iter()
        .filter_map(|fmt| NaiveDate::parse_from_str(raw, fmt).ok())
        .find(|d| d.year() >= 1900)
        .map(|d| d.format("%Y-%m-%d").to_string())
}

/// Import employees: `first_name, full_name, phone_number, email, crew`
pub async fn import_employees<R: Read>(
    pool: &SqlitePool,
    input: R,
    dry_run: bool,
) -> Result<ImportSummary, ImportError> {
    let mut reader = csv_reader(input);
    let cols = Columns::new(reader.headers()?);
    cols.require("phone_number")?;
    cols.require("first_name")?;

    let mut summary = ImportSummary::default();
    let mut tx = pool.begin().await?;

    for (idx, record) in reader.records().enumerate() {
        let line = idx + 2;
        let record = match record {
            Ok(r) => r,
            Err(e) => {
                summary.errors.push(format!("line {}: {}", line, e));
                continue;
            }
        };

        let (Some(phone), Some(first_name)) =
            (cols.get(&record, "phone_number"), cols.get(&record, "first_name"))
        else {
            summary
                .errors
                .push(format!("line {}: phone_number and first_name are required", line));
            continue;
        };
        let phone = normalize_phone(phone);

        let exists: Option<i64> = sqlx::query_scalar("SELECT id FROM employees WHERE phone_number = ?")
            .bind(&phone)
            .fetch_optional(&mut *tx)
            .await?;
        if exists.is_some() {
            debug!(line, "Employee phone already on file, skipping");
            summary.skipped += 1;
            continue;
        }

        sqlx::query(
            "INSERT INTO employees (phone_number, first_name, full_name, email, crew) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&phone)
        .bind(first_name)
        .bind(cols.get(&record, "full_name"))
        .bind(cols.get(&record, "email").map(str::to_lowercase))
        .bind(cols.get(&record, "crew"))
        .execute(&mut *tx)
        .await?;
        summary.inserted += 1;
    }

    finish(tx, dry_run, "Employee", &summary).await?;
    Ok(summary)
}

fn vehicle_status(raw: Option<&str>) -> Option<&'static str> {
    match raw.map(|s| s.to_lowercase().replace([' ', '-'], "_")).as_deref() {
        None | Some("active") => Some("active"),
        Some("sold") => Some("sold"),
        Some("out_of_service") => Some("out_of_service"),
        Some(_) => None,
    }
}

/// Import vehicles: `year, make, model, color, tire_size, plate_number, vin, nickname, assigned_to, status`
///
/// A row matches an existing vehicle by VIN, or by year + make + model when
/// it has no VIN; matches are skipped.
pub async fn import_vehicles<R: Read>(
    pool: &SqlitePool,
    input: R,
    dry_run: bool,
) -> Result<ImportSummary, ImportError> {
    let mut reader = csv_reader(input);
    let cols = Columns::new(reader.headers()?);
    cols.require("make")?;
    cols.require("model")?;

    let mut summary = ImportSummary::default();
    let mut tx = pool.begin().await?;

    for (idx, record) in reader.records().enumerate() {
        let line = idx + 2;
        let record = match record {
            Ok(r) => r,
            Err(e) => {
                summary.errors.push(format!("line {}: {}", line, e));
                continue;
            }
        };

        let year = match cols.get(&record, "year").map(|y| y.parse::<i64>()) {
            None => None,
            Some(Ok(y)) => Some(y),
            Some(Err(_)) => {
                summary.errors.push(format!("line {}: invalid year", line));
                continue;
            }
        };
        let make = cols.get(&record, "make");
        let model = cols.get(&record, "model");
        let vin = cols.get(&record, "vin").map(str::to_uppercase);

        let Some(status) = vehicle_status(cols.get(&record, "status")) else {
            summary.errors.push(format!("line {}: unknown status", line));
            continue;
        };

        let existing: Option<i64> = match &vin {
            Some(vin) => {
                sqlx::query_scalar("SELECT id FROM vehicles WHERE UPPER(vin) = ?")
                    .bind(vin)
                    .fetch_optional(&mut *tx)
                    .await?
            }
            None => {
                sqlx::query_scalar(
                    r#"
                    SELECT id FROM vehicles
                    WHERE year IS ? AND LOWER(make) IS LOWER(?) AND LOWER(model) IS LOWER(?)
                    "#,
                )
                .bind(year)
                .bind(make)
                .bind(model)
                .fetch_optional(&mut *tx)
                .await?
            }
        };
        if existing.is_some() {
            summary.skipped += 1;
            continue;
        }

        sqlx::query(
            r#"
            INSERT INTO vehicles
                (year, make, model, color, tire_size, plate_number, vin, nickname, assigned_to, status)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(year)
        .bind(make)
        .bind(model)
        .bind(cols.get(&record, "color"))
        .bind(cols.get(&record, "tire_size"))
        .bind(cols.get(&record, "plate_number"))
        .bind(vin.as_deref())
        .bind(cols.get(&record, "nickname"))
        .bind(cols.get(&record, "assigned_to"))
        .bind(status)
        .execute(&mut *tx)
        .await?;
        summary.inserted += 1;
    }

    finish(tx, dry_run, "Vehicle", &summary).await?;
    Ok(summary)
}

/// Import maintenance: `vin|nickname, service_date, description, cost, mileage, vendor`
///
/// Rows already on file (same vehicle, date and description) are skipped.
pub async fn import_maintenance<R: Read>(
    pool: &SqlitePool,
    input: R,
    dry_run: bool,
) -> Result<ImportSummary, ImportError> {
    let mut reader = csv_reader(input);
    let cols = Columns::new(reader.headers()?);
    if !cols.has("vin") && !cols.has("nickname") {
        return Err(ImportError::MissingColumn("vin or nickname"));
    }

    let mut summary = ImportSummary::default();
    let mut tx = pool.begin().await?;

    for (idx, record) in reader.records().enumerate() {
        let line = idx + 2;
        let record = match record {
            Ok(r) => r,
            Err(e) => {
                summary.errors.push(format!("line {}: {}", line, e));
                continue;
            }
        };

        let mut vehicle_id: Option<i64> = None;
        if let Some(vin) = cols.get(&record, "vin") {
            vehicle_id = sqlx::query_scalar("SELECT id FROM vehicles WHERE UPPER(vin) = UPPER(?)")
                .bind(vin)
                .fetch_optional(&mut *tx)
                .await?;
        }
        if vehicle_id.is_none() {
            if let Some(nickname) = cols.get(&record, "nickname") {
                vehicle_id = sqlx::query_scalar(
                    "SELECT id FROM vehicles WHERE LOWER(nickname) = LOWER(?) ORDER BY id LIMIT 1",
                )
                .bind(nickname)
                .fetch_optional(&mut *tx)
                .await?;
            }
        }
        let Some(vehicle_id) = vehicle_id else {
            warn!(line, "Maintenance row references an unknown vehicle");
            summary.errors.push(format!("line {}: vehicle not found", line));
            continue;
        };

        let service_date = match cols.get(&record, "service_date") {
            None => None,
            Some(raw) => match parse_date(raw) {
                Some(d) => Some(d),
                None => {
                    summary.errors.push(format!("line {}: unrecognized date {:?}", line, raw));
                    continue;
                }
            },
        };
        let description = cols.get(&record, "description");
        let cost = cols.get(&record, "cost").and_then(parse_cost);
        let mileage = cols.get(&record, "mileage").and_then(parse_mileage);

        let duplicate: Option<i64> = sqlx::query_scalar(
            r#"
            SELECT id FROM vehicle_maintenance
            WHERE vehicle_id = ? AND service_date IS ? AND description IS ?
            "#,
        )
        .bind(vehicle_id)
        .bind(service_date.as_deref())
        .bind(description)
        .fetch_optional(&mut *tx)
        .await?;
        if duplicate.is_some() {
            summary.skipped += 1;
            continue;
        }

        sqlx::query(
            r#"
            INSERT INTO vehicle_maintenance (vehicle_id, service_date, description, cost, mileage, vendor)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(vehicle_id)
        .bind(service_date.as_deref())
        .bind(description)
        .bind(cost)
        .bind(mileage)
        .bind(cols.get(&record, "vendor"))
        .execute(&mut *tx)
        .await?;
        summary.inserted += 1;
    }

    finish(tx, dry_run, "Maintenance", &summary).await?;
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_cost() {
        assert_eq!(parse_cost("$1,234.50"), Some(1234.5));
        assert_eq!(parse_cost("89"), Some(89.0));
        assert_eq!(parse_cost("n/a"), None);
    }

    #[test]
    fn test_parse_mileage() {
        assert_eq!(parse_mileage("45,210 mi"), Some(45210));
        assert_eq!(parse_mileage("120000"), Some(120000));
        assert_eq!(parse_mileage("98,500 miles"), Some(98500));
        assert_eq!(parse_mileage("unknown"), None);
    }

    #[test]
    fn test_parse_date_formats() {
        assert_eq!(parse_date("2025-06-01").as_deref(), Some("2025-06-01"));
        assert_eq!(parse_date("6/1/2025").as_deref(), Some("2025-06-01"));
        assert_eq!(parse_date("06/01/25").as_deref(), Some("2025-06-01"));
        assert_eq!(parse_date("June 1"), None);
    }

    #[test]
    fn test_vehicle_status_normalized() {
        assert_eq!(vehicle_status(None), Some("active"));
        assert_eq!(vehicle_status(Some("Out of Service")), Some("out_of_service"));
        assert_eq!(vehicle_status(Some("wrecked")), None);
    }
}
