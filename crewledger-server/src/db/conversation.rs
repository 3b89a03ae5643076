//! Per-employee conversation state

use crewledger_common::db::{ConversationStep, DocumentKind};
use crewledger_common::Result;
use sqlx::{Row, SqlitePool};

/// Record a conversation step is waiting on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateTarget {
    None,
    Receipt(i64),
    Document(DocumentKind, i64),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ConversationState {
    pub employee_id: i64,
    pub step: ConversationStep,
    pub target: StateTarget,
}

impl ConversationState {
    pub fn idle(employee_id: i64) -> Self {
        Self {
            employee_id,
            step: ConversationStep::Idle,
            target: StateTarget::None,
        }
    }
}

/// Current state for an employee; no row means idle
pub async fn current_state(pool: &SqlitePool, employee_id: i64) -> Result<ConversationState> {
    let row = sqlx::query(
        r#"
        SELECT state, receipt_id, document_kind, document_id
        FROM conversation_state
        WHERE employee_id = ?
        ORDER BY updated_at DESC, id DESC
        LIMIT 1
        "#,
    )
    .bind(employee_id)
    .fetch_optional(pool)
    .await?;

    let Some(row) = row else {
        return Ok(ConversationState::idle(employee_id));
    };

    let step: ConversationStep = row.get::<String, _>("state").parse()?;
    let receipt_id: Option<i64> = row.get("receipt_id");
    let document_kind: Option<String> = row.get("document_kind");
    let document_id: Option<i64> = row.get("document_id");

    let target = match (receipt_id, document_kind, document_id) {
        (_, Some(kind), Some(id)) => StateTarget::Document(kind.parse()?, id),
        (Some(id), _, _) => StateTarget::Receipt(id),
        _ => StateTarget::None,
    };

    Ok(ConversationState {
        employee_id,
        step,
        target,
    })
}

/// Replace the employee's state row
pub async fn set_state(
    pool: &SqlitePool,
    employee_id: i64,
    step: ConversationStep,
    target: StateTarget,
) -> Result<()> {
    let (receipt_id, document_kind, document_id) = match target {
        StateTarget::None => (None, None, None),
        StateTarget::Receipt(id) => (Some(id), None, None),
        StateTarget::Document(kind, id) => (None, Some(kind.as_str()), Some(id)),
    };

    let mut tx = pool.begin().await?;
    sqlx::query("DELETE FROM conversation_state WHERE employee_id = ?")
        .bind(employee_id)
        .execute(&mut *tx)
        .await?;
    sqlx::query(
        r#"
        INSERT INTO conversation_state (employee_id, receipt_id, document_kind, document_id, state)
        VALUES (?, ?, ?, ?, ?)
        "#,
    )
    .bind(employee_id)
    .bind(receipt_id)
    .bind(document_kind)
    .bind(document_id)
    .bind(step.as_str())
    .execute(&mut *tx)
    .await?;
    tx.commit().await?;

    tracing::debug!(employee_id, state = step.as_str(), "Conversation state updated");
    Ok(())
}

pub async fn reset_to_idle(pool: &SqlitePool, employee_id: i64) -> Result<()> {
    set_state(pool, employee_id, ConversationStep::Idle, StateTarget::None).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crewledger_common::db::create_schema;
    use sqlx::sqlite::SqlitePoolOptions;

    #[tokio::test]
    async fn test_state_round_trip_keeps_single_row() {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        create_schema(&pool).await.unwrap();
        sqlx::query("INSERT INTO employees (id, phone_number, first_name) VALUES (1, '+14075551234', 'Omar')")
            .execute(&pool)
            .await
            .unwrap();

        assert_eq!(current_state(&pool, 1).await.unwrap(), ConversationState::idle(1));

        set_state(&pool, 1, ConversationStep::AwaitingConfirmation, StateTarget::Receipt(7))
            .await
            .unwrap();
        set_state(
            &pool,
            1,
            ConversationStep::AwaitingDocConfirm,
            StateTarget::Document(DocumentKind::Invoice, 3),
        )
        .await
        .unwrap();

        let state = current_state(&pool, 1).await.unwrap();
        assert_eq!(state.step, ConversationStep::AwaitingDocConfirm);
        assert_eq!(state.target, StateTarget::Document(DocumentKind::Invoice, 3));

        let rows: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM conversation_state")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(rows, 1);
    }
}
