//! Employee lookup and registration

use crewledger_common::db::{Employee, Language};
use crewledger_common::phone::{last_ten_digits, mask_phone, normalize_phone};
use crewledger_common::{Error, Result};
use sqlx::SqlitePool;
use tracing::{info, warn};

const EMPLOYEE_COLUMNS: &str =
    "id, phone_number, first_name, full_name, email, crew, is_active, language_preference";

/// Longest message body kept for an unknown sender
const UNKNOWN_BODY_LIMIT: usize = 500;

/// Find the employee who owns `raw_phone`
///
/// Tries the normalized number first. Failing that, active employees whose
/// stored number shares the last ten digits match, and their record is
/// rewritten to the normalized form so the next lookup is exact.
pub async fn find_by_phone(pool: &SqlitePool, raw_phone: &str) -> Result<Option<Employee>> {
    let phone = normalize_phone(raw_phone);

    let exact = sqlx::query_as::<_, Employee>(&format!(
        "SELECT {} FROM employees WHERE phone_number = ?",
        EMPLOYEE_COLUMNS
    ))
    .bind(&phone)
    .fetch_optional(pool)
    .await?;
    if exact.is_some() {
        return Ok(exact);
    }

    let Some(tail) = last_ten_digits(&phone) else {
        return Ok(None);
    };

    let active = sqlx::query_as::<_, Employee>(&format!(
        "SELECT {} FROM employees WHERE is_active = 1",
        EMPLOYEE_COLUMNS
    ))
    .fetch_all(pool)
    .await?;

    let Some(mut employee) = active
        .into_iter()
        .find(|e| last_ten_digits(&e.phone_number).as_deref() == Some(tail.as_str()))
    else {
        return Ok(None);
    };

    sqlx::query("UPDATE employees SET phone_number = ?, updated_at = datetime('now') WHERE id = ?")
        .bind(&phone)
        .bind(employee.id)
        .execute(pool)
        .await?;
    info!(
        employee_id = employee.id,
        "Normalized stored phone number to {}",
        mask_phone(&phone)
    );
    employee.phone_number = phone;

    Ok(Some(employee))
}

pub async fn get_employee(pool: &SqlitePool, id: i64) -> Result<Option<Employee>> {
    let employee = sqlx::query_as::<_, Employee>(&format!(
        "SELECT {} FROM employees WHERE id = ?",
        EMPLOYEE_COLUMNS
    ))
    .bind(id)
    .fetch_optional(pool)
    .await?;
    Ok(employee)
}

/// All employees ordered by name, or just `only` when given
pub async fn list_employees(pool: &SqlitePool, only: Option<i64>) -> Result<Vec<Employee>> {
    let employees = sqlx::query_as::<_, Employee>(&format!(
        "SELECT {} FROM employees WHERE (? IS NULL OR id = ?) ORDER BY first_name, id",
        EMPLOYEE_COLUMNS
    ))
    .bind(only)
    .bind(only)
    .fetch_all(pool)
    .await?;
    Ok(employees)
}

pub async fn set_language(pool: &SqlitePool, employee_id: i64, language: Language) -> Result<()> {
    sqlx::query(
        "UPDATE employees SET language_preference = ?, updated_at = datetime('now') WHERE id = ?",
    )
    .bind(language.as_str())
    .bind(employee_id)
    .execute(pool)
    .await?;
    Ok(())
}

/// Fields for a new employee record
#[derive(Debug, Clone, Default)]
pub struct NewEmployee {
    pub first_name: String,
    pub full_name: Option<String>,
    pub phone_number: String,
    pub email: Option<String>,
    pub crew: Option<String>,
    pub language: Option<Language>,
}

/// Insert an employee; the phone number is normalized first
///
/// Returns [`Error::Conflict`] when the number is already registered.
pub async fn create_employee(pool: &SqlitePool, new: &NewEmployee) -> Result<i64> {
    let first_name = new.first_name.trim();
    if first_name.is_empty() {
        return Err(Error::InvalidInput("first_name is required".to_string()));
    }
    let phone = normalize_phone(new.phone_number.trim());
    if last_ten_digits(&phone).is_none() {
        return Err(Error::InvalidInput(format!(
            "Invalid phone number: {}",
            new.phone_number
        )));
    }

    let result = sqlx::query(
        r#"
        INSERT INTO employees (phone_number, first_name, full_name, email, crew, language_preference)
        VALUES (?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&phone)
    .bind(first_name)
    .bind(new.full_name.as_deref())
    .bind(new.email.as_deref())
    .bind(new.crew.as_deref())
    .bind(new.language.map(|l| l.as_str()))
    .execute(pool)
    .await
    .map_err(|e| Error::from_insert(e, &format!("Phone number {} already registered", phone)))?;

    Ok(result.last_insert_rowid())
}

/// Log a message from a number with no employee record
pub async fn record_unknown_contact(
    pool: &SqlitePool,
    phone: &str,
    body: &str,
    has_media: bool,
) -> Result<()> {
    let body: String = body.chars().take(UNKNOWN_BODY_LIMIT).collect();
    sqlx::query(
        "INSERT INTO unknown_contacts (phone_number, message_body, has_media) VALUES (?, ?, ?)",
    )
    .bind(phone)
    .bind(body)
    .bind(has_media)
    .execute(pool)
    .await?;

    warn!("Message from unknown number {} dropped", mask_phone(phone));
    Ok(())
}
