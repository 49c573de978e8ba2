//! PostgreSQL implementation of PlanRepository.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, Transaction};

use super::convert::{column_int, count, money, query_failed, violates};
use crate::domain::foundation::{DomainError, ErrorCode, PlanId, Timestamp};
use crate::domain::marketplace::{NewPlan, Plan, PlanVisibility};
use crate::ports::{PlanDeletion, PlanRepository};

const PLAN_COLUMNS: &str = "id, name, display_name, price_cents, posts_per_month, is_active, \
     is_recommended, gateway_product_id, gateway_price_id, created_at, updated_at";

pub struct PostgresPlanRepository {
    pool: PgPool,
}

impl PostgresPlanRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct PlanRow {
    id: i64,
    name: String,
    display_name: String,
    price_cents: i64,
    posts_per_month: i32,
    is_active: bool,
    is_recommended: bool,
    gateway_product_id: Option<String>,
    gateway_price_id: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<PlanRow> for Plan {
    type Error = DomainError;

    fn try_from(row: PlanRow) -> Result<Self, Self::Error> {
        Ok(Plan {
            id: PlanId::new(row.id),
            name: row.name,
            display_name: row.display_name,
            price: money("price_cents", row.price_cents)?,
            posts_per_month: count("posts_per_month", row.posts_per_month)?,
            is_active: row.is_active,
            is_recommended: row.is_recommended,
            gateway_product_id: row.gateway_product_id,
            gateway_price_id: row.gateway_price_id,
            created_at: Timestamp::from_datetime(row.created_at),
            updated_at: Timestamp::from_datetime(row.updated_at),
        })
    }
}

fn name_conflict(name: &str) -> DomainError {
    DomainError::new(
        ErrorCode::Conflict,
        format!("A plan named '{}' already exists", name),
    )
}

/// Clears the recommended flag on every plan except `keep`.
async fn clear_other_recommendations(
    tx: &mut Transaction<'_, Postgres>,
    keep: Option<i64>,
) -> Result<(), DomainError> {
    sqlx::query(
        r#"
        UPDATE plans SET is_recommended = FALSE, updated_at = NOW()
        WHERE is_recommended AND ($1::BIGINT IS NULL OR id <> $1)
        "#,
    )
    .bind(keep)
    .execute(&mut **tx)
    .await
    .map_err(|e| query_failed("clear recommended plans", e))?;
    Ok(())
}

#[async_trait]
impl PlanRepository for PostgresPlanRepository {
    async fn list(&self, visibility: PlanVisibility) -> Result<Vec<Plan>, DomainError> {
        let active_only = visibility == PlanVisibility::ActiveOnly;
        let rows: Vec<PlanRow> = sqlx::query_as(&format!(
            "SELECT {} FROM plans WHERE (NOT $1 OR is_active) ORDER BY price_cents, id",
            PLAN_COLUMNS
        ))
        .bind(active_only)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| query_failed("list plans", e))?;

        rows.into_iter().map(Plan::try_from).collect()
    }

    async fn find_by_id(&self, id: PlanId) -> Result<Option<Plan>, DomainError> {
        let row: Option<PlanRow> =
            sqlx::query_as(&format!("SELECT {} FROM plans WHERE id = $1", PLAN_COLUMNS))
                .bind(id.value())
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| query_failed("find plan", e))?;

        row.map(Plan::try_from).transpose()
    }

    async fn insert(&self, plan: NewPlan) -> Result<Plan, DomainError> {
        let NewPlan {
            spec,
            gateway_product_id,
            gateway_price_id,
        } = plan;
        let posts_per_month = column_int("posts_per_month", spec.posts_per_month)?;

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| query_failed("begin transaction", e))?;

        if spec.is_recommended {
            clear_other_recommendations(&mut tx, None).await?;
        }

        let row: PlanRow = sqlx::query_as(&format!(
            r#"
            INSERT INTO plans (
                name, display_name, price_cents, posts_per_month, is_active,
                is_recommended, gateway_product_id, gateway_price_id
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            RETURNING {}
            "#,
            PLAN_COLUMNS
        ))
        .bind(&spec.name)
        .bind(&spec.display_name)
        .bind(spec.price.cents())
        .bind(posts_per_month)
        .bind(spec.is_active)
        .bind(spec.is_recommended)
        .bind(&gateway_product_id)
        .bind(&gateway_price_id)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| {
            if violates(&e, "plans_name_key") {
                name_conflict(&spec.name)
            } else {
                query_failed("insert plan", e)
            }
        })?;

        tx.commit()
            .await
            .map_err(|e| query_failed("commit plan insert", e))?;
        Plan::try_from(row)
    }

    async fn update(&self, plan: &Plan) -> Result<(), DomainError> {
        let posts_per_month = column_int("posts_per_month", plan.posts_per_month)?;

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| query_failed("begin transaction", e))?;

        if plan.is_recommended {
            clear_other_recommendations(&mut tx, Some(plan.id.value())).await?;
        }

        let result = sqlx::query(
            r#"
            UPDATE plans SET
                name = $2,
                display_name = $3,
                price_cents = $4,
                posts_per_month = $5,
                is_active = $6,
                is_recommended = $7,
                gateway_product_id = $8,
                gateway_price_id = $9,
                updated_at = $10
            WHERE id = $1
            "#,
        )
        .bind(plan.id.value())
        .bind(&plan.name)
        .bind(&plan.display_name)
        .bind(plan.price.cents())
        .bind(posts_per_month)
        .bind(plan.is_active)
        .bind(plan.is_recommended)
        .bind(&plan.gateway_product_id)
        .bind(&plan.gateway_price_id)
        .bind(plan.updated_at.as_datetime())
        .execute(&mut *tx)
        .await
        .map_err(|e| {
            if violates(&e, "plans_name_key") {
                name_conflict(&plan.name)
            } else {
                query_failed("update plan", e)
            }
        })?;

        if result.rows_affected() == 0 {
            return Err(DomainError::new(
                ErrorCode::PlanNotFound,
                format!("Plan {} not found", plan.id),
            )
            .with_detail("id", plan.id.to_string()));
        }

        tx.commit()
            .await
            .map_err(|e| query_failed("commit plan update", e))?;
        Ok(())
    }

    async fn delete_unreferenced(&self, id: PlanId) -> Result<PlanDeletion, DomainError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| query_failed("begin transaction", e))?;

        // The row lock blocks new subscriptions from referencing the plan
        // until the delete commits.
        let row: Option<PlanRow> = sqlx::query_as(&format!(
            "SELECT {} FROM plans WHERE id = $1 FOR UPDATE",
            PLAN_COLUMNS
        ))
        .bind(id.value())
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| query_failed("lock plan", e))?;

        let Some(row) = row else {
            return Ok(PlanDeletion::NotFound);
        };

        let active: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM subscriptions WHERE plan_id = $1 AND status = 'active'",
        )
        .bind(id.value())
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| query_failed("count plan subscribers", e))?;

        if active > 0 {
            return Ok(PlanDeletion::Referenced {
                active_subscriptions: active as u64,
            });
        }

        sqlx::query("DELETE FROM plans WHERE id = $1")
            .bind(id.value())
            .execute(&mut *tx)
            .await
            .map_err(|e| query_failed("delete plan", e))?;

        tx.commit()
            .await
            .map_err(|e| query_failed("commit plan delete", e))?;
        Ok(PlanDeletion::Deleted(Plan::try_from(row)?))
    }
}
