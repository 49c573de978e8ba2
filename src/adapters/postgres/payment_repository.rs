//! PostgreSQL implementation of PaymentRepository.
//!
//! Unique constraints on `gateway_payment_intent_id` and on the invoice id
//! and period key held in `metadata` make recording idempotent: a
//! redelivered charge hits `ON CONFLICT DO NOTHING` and reports
//! [`SaveResult::AlreadyExists`].

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::types::Json;
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

use super::convert::{column_int, corrupt, money, query_failed, user_id};
use crate::domain::foundation::{DomainError, PaymentId, SubscriptionId, Timestamp, UserId};
use crate::domain::marketplace::{Credit, Payment, PaymentKind, PaymentStatus};
use crate::ports::{PaymentRepository, SaveResult};

const PAYMENT_COLUMNS: &str = "id, user_id, subscription_id, payment_type, amount_cents, \
     currency, status, gateway_payment_intent_id, description, metadata, created_at";

pub struct PostgresPaymentRepository {
    pool: PgPool,
}

impl PostgresPaymentRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn insert_payment(
        tx: &mut Transaction<'_, Postgres>,
        payment: &Payment,
    ) -> Result<SaveResult, DomainError> {
        let result = sqlx::query(
            r#"
            INSERT INTO payments (
                id, user_id, subscription_id, payment_type, amount_cents, currency,
                status, gateway_payment_intent_id, description, metadata, created_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            ON CONFLICT DO NOTHING
            "#,
        )
        .bind(payment.id.as_uuid())
        .bind(payment.user_id.as_str())
        .bind(payment.subscription_id.as_ref().map(SubscriptionId::as_uuid))
        .bind(payment.kind.as_str())
        .bind(payment.amount.cents())
        .bind(&payment.currency)
        .bind(payment.status.as_str())
        .bind(&payment.gateway_payment_intent_id)
        .bind(&payment.description)
        .bind(Json(&payment.metadata))
        .bind(payment.created_at.as_datetime())
        .execute(&mut **tx)
        .await
        .map_err(|e| query_failed("record payment", e))?;

        Ok(if result.rows_affected() == 0 {
            SaveResult::AlreadyExists
        } else {
            SaveResult::Inserted
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct PaymentRow {
    id: Uuid,
    user_id: String,
    subscription_id: Option<Uuid>,
    payment_type: String,
    amount_cents: i64,
    currency: String,
    status: String,
    gateway_payment_intent_id: Option<String>,
    description: String,
    metadata: Json<BTreeMap<String, String>>,
    created_at: DateTime<Utc>,
}

impl TryFrom<PaymentRow> for Payment {
    type Error = DomainError;

    fn try_from(row: PaymentRow) -> Result<Self, Self::Error> {
        Ok(Payment {
            id: PaymentId::from_uuid(row.id),
            user_id: user_id(row.user_id)?,
            subscription_id: row.subscription_id.map(SubscriptionId::from_uuid),
            kind: row
                .payment_type
                .parse::<PaymentKind>()
                .map_err(|e| corrupt("payment_type", e))?,
            amount: money("amount_cents", row.amount_cents)?,
            currency: row.currency,
            status: row
                .status
                .parse::<PaymentStatus>()
                .map_err(|e| corrupt("status", e))?,
            gateway_payment_intent_id: row.gateway_payment_intent_id,
            description: row.description,
            metadata: row.metadata.0,
            created_at: Timestamp::from_datetime(row.created_at),
        })
    }
}

#[async_trait]
impl PaymentRepository for PostgresPaymentRepository {
    async fn record(&self, payment: &Payment) -> Result<SaveResult, DomainError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| query_failed("begin transaction", e))?;

        let saved = Self::insert_payment(&mut tx, payment).await?;

        tx.commit()
            .await
            .map_err(|e| query_failed("commit payment", e))?;
        Ok(saved)
    }

    async fn record_with_credit(
        &self,
        payment: &Payment,
        credit: &Credit,
    ) -> Result<SaveResult, DomainError> {
        let amount = column_int("amount", credit.amount)?;
        let used = column_int("used", credit.used)?;

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| query_failed("begin transaction", e))?;

        if Self::insert_payment(&mut tx, payment).await? == SaveResult::AlreadyExists {
            return Ok(SaveResult::AlreadyExists);
        }

        sqlx::query(
            r#"
            INSERT INTO credits (id, user_id, amount, used, expires_at, payment_id, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(credit.id.as_uuid())
        .bind(credit.user_id.as_str())
        .bind(amount)
        .bind(used)
        .bind(credit.expires_at.as_ref().map(Timestamp::as_datetime))
        .bind(credit.payment_id.as_ref().map(PaymentId::as_uuid))
        .bind(credit.created_at.as_datetime())
        .execute(&mut *tx)
        .await
        .map_err(|e| query_failed("issue credit", e))?;

        tx.commit()
            .await
            .map_err(|e| query_failed("commit payment and credit", e))?;
        Ok(SaveResult::Inserted)
    }

    async fn find_by_intent_id(&self, intent_id: &str) -> Result<Option<Payment>, DomainError> {
        let row: Option<PaymentRow> = sqlx::query_as(&format!(
            "SELECT {} FROM payments WHERE gateway_payment_intent_id = $1",
            PAYMENT_COLUMNS
        ))
        .bind(intent_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| query_failed("find payment by intent", e))?;

        row.map(Payment::try_from).transpose()
    }

    async fn list_for_user(&self, user_id: &UserId) -> Result<Vec<Payment>, DomainError> {
        let rows: Vec<PaymentRow> = sqlx::query_as(&format!(
            "SELECT {} FROM payments WHERE user_id = $1 ORDER BY created_at DESC",
            PAYMENT_COLUMNS
        ))
        .bind(user_id.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| query_failed("list payments", e))?;

        rows.into_iter().map(Payment::try_from).collect()
    }
}
