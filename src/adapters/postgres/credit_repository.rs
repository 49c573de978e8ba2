//! PostgreSQL implementation of CreditRepository.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use super::convert::{column_int, count, query_failed, user_id};
use crate::domain::foundation::{CreditId, DomainError, PaymentId, Timestamp, UserId};
use crate::domain::marketplace::Credit;
use crate::ports::CreditRepository;

const CREDIT_COLUMNS: &str = "id, user_id, amount, used, expires_at, payment_id, created_at";

pub struct PostgresCreditRepository {
    pool: PgPool,
}

impl PostgresCreditRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct CreditRow {
    id: Uuid,
    user_id: String,
    amount: i32,
    used: i32,
    expires_at: Option<DateTime<Utc>>,
    payment_id: Option<Uuid>,
    created_at: DateTime<Utc>,
}

impl TryFrom<CreditRow> for Credit {
    type Error = DomainError;

    fn try_from(row: CreditRow) -> Result<Self, Self::Error> {
        Ok(Credit {
            id: CreditId::from_uuid(row.id),
            user_id: user_id(row.user_id)?,
            amount: count("amount", row.amount)?,
            used: count("used", row.used)?,
            expires_at: row.expires_at.map(Timestamp::from_datetime),
            payment_id: row.payment_id.map(PaymentId::from_uuid),
            created_at: Timestamp::from_datetime(row.created_at),
        })
    }
}

#[async_trait]
impl CreditRepository for PostgresCreditRepository {
    async fn list_for_user(&self, user_id: &UserId) -> Result<Vec<Credit>, DomainError> {
        let rows: Vec<CreditRow> = sqlx::query_as(&format!(
            "SELECT {} FROM credits WHERE user_id = $1 ORDER BY created_at DESC",
            CREDIT_COLUMNS
        ))
        .bind(user_id.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| query_failed("list credits", e))?;

        rows.into_iter().map(Credit::try_from).collect()
    }

    async fn consume_one(
        &self,
        user_id: &UserId,
        now: Timestamp,
    ) -> Result<Option<Credit>, DomainError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| query_failed("begin transaction", e))?;

        // Soonest expiry first, non-expiring last, then oldest.
        let row: Option<CreditRow> = sqlx::query_as(&format!(
            r#"
            SELECT {} FROM credits
            WHERE user_id = $1
              AND used < amount
              AND (expires_at IS NULL OR expires_at > $2)
            ORDER BY expires_at ASC NULLS LAST, created_at ASC
            LIMIT 1
            FOR UPDATE
            "#,
            CREDIT_COLUMNS
        ))
        .bind(user_id.as_str())
        .bind(now.as_datetime())
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| query_failed("select credit", e))?;

        let Some(row) = row else {
            return Ok(None);
        };

        let mut credit = Credit::try_from(row)?;
        credit.consume_one(now)?;

        sqlx::query("UPDATE credits SET used = $2 WHERE id = $1")
            .bind(credit.id.as_uuid())
            .bind(column_int("used", credit.used)?)
            .execute(&mut *tx)
            .await
            .map_err(|e| query_failed("consume credit", e))?;

        tx.commit()
            .await
            .map_err(|e| query_failed("commit credit use", e))?;
        Ok(Some(credit))
    }
}
