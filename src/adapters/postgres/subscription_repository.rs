//! PostgreSQL implementation of SubscriptionRepository.
//!
//! Reads join the referenced plan so each record carries the plan's current
//! terms. A record whose plan was deleted loads as free tier.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use super::convert::{column_int, count, corrupt, query_failed, user_id, violates};
use crate::domain::foundation::{DomainError, ErrorCode, PlanId, SubscriptionId, Timestamp, UserId};
use crate::domain::marketplace::{
    BillingPeriod, PlanTerms, Subscription, SubscriptionStatus,
};
use crate::ports::SubscriptionRepository;

const SELECT_SUBSCRIPTION: &str = r#"
    SELECT
        s.id, s.user_id, s.plan_id, s.status,
        s.current_period_start, s.current_period_end,
        s.posts_used_this_month, s.last_reset_date, s.cancel_at_period_end,
        s.gateway_customer_id, s.gateway_subscription_id,
        s.created_at, s.updated_at,
        p.name AS plan_name,
        p.display_name AS plan_display_name,
        p.posts_per_month AS plan_posts_per_month
    FROM subscriptions s
    LEFT JOIN plans p ON p.id = s.plan_id
"#;

const ONE_ACTIVE_PER_USER: &str = "subscriptions_one_active_per_user";

pub struct PostgresSubscriptionRepository {
    pool: PgPool,
}

impl PostgresSubscriptionRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct SubscriptionRow {
    id: Uuid,
    user_id: String,
    plan_id: Option<i64>,
    status: String,
    current_period_start: Option<DateTime<Utc>>,
    current_period_end: Option<DateTime<Utc>>,
    posts_used_this_month: i32,
    last_reset_date: DateTime<Utc>,
    cancel_at_period_end: bool,
    gateway_customer_id: Option<String>,
    gateway_subscription_id: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    plan_name: Option<String>,
    plan_display_name: Option<String>,
    plan_posts_per_month: Option<i32>,
}

impl SubscriptionRow {
    fn terms(&self) -> Result<Option<PlanTerms>, DomainError> {
        match (
            self.plan_id,
            &self.plan_name,
            &self.plan_display_name,
            self.plan_posts_per_month,
        ) {
            (Some(id), Some(name), Some(display_name), Some(posts)) => Ok(Some(PlanTerms {
                plan_id: PlanId::new(id),
                name: name.clone(),
                display_name: display_name.clone(),
                posts_per_month: count("posts_per_month", posts)?,
            })),
            _ => Ok(None),
        }
    }
}

impl TryFrom<SubscriptionRow> for Subscription {
    type Error = DomainError;

    fn try_from(row: SubscriptionRow) -> Result<Self, Self::Error> {
        let plan = row.terms()?;
        let status = row
            .status
            .parse::<SubscriptionStatus>()
            .map_err(|e| corrupt("status", e))?;

        Ok(Subscription {
            id: SubscriptionId::from_uuid(row.id),
            user_id: user_id(row.user_id)?,
            plan,
            status,
            period: BillingPeriod {
                start: row.current_period_start.map(Timestamp::from_datetime),
                end: row.current_period_end.map(Timestamp::from_datetime),
            },
            posts_used_this_month: count("posts_used_this_month", row.posts_used_this_month)?,
            last_reset_date: Timestamp::from_datetime(row.last_reset_date),
            cancel_at_period_end: row.cancel_at_period_end,
            gateway_customer_id: row.gateway_customer_id,
            gateway_subscription_id: row.gateway_subscription_id,
            created_at: Timestamp::from_datetime(row.created_at),
            updated_at: Timestamp::from_datetime(row.updated_at),
        })
    }
}

fn already_active(user_id: &UserId) -> DomainError {
    DomainError::new(
        ErrorCode::Conflict,
        format!("User {} already has an active subscription", user_id),
    )
}

const INSERT_SUBSCRIPTION: &str = r#"
    INSERT INTO subscriptions (
        id, user_id, plan_id, status, current_period_start, current_period_end,
        posts_used_this_month, last_reset_date, cancel_at_period_end,
        gateway_customer_id, gateway_subscription_id, created_at, updated_at
    ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
"#;

fn bind_insert<'q>(
    subscription: &'q Subscription,
    posts_used: i32,
) -> sqlx::query::Query<'q, sqlx::Postgres, sqlx::postgres::PgArguments> {
    sqlx::query(INSERT_SUBSCRIPTION)
        .bind(subscription.id.as_uuid())
        .bind(subscription.user_id.as_str())
        .bind(subscription.plan.as_ref().map(|p| p.plan_id.value()))
        .bind(subscription.status.as_str())
        .bind(subscription.period.start.as_ref().map(Timestamp::as_datetime))
        .bind(subscription.period.end.as_ref().map(Timestamp::as_datetime))
        .bind(posts_used)
        .bind(subscription.last_reset_date.as_datetime())
        .bind(subscription.cancel_at_period_end)
        .bind(&subscription.gateway_customer_id)
        .bind(&subscription.gateway_subscription_id)
        .bind(subscription.created_at.as_datetime())
        .bind(subscription.updated_at.as_datetime())
}

#[async_trait]
impl SubscriptionRepository for PostgresSubscriptionRepository {
    async fn history_for_user(&self, user_id: &UserId) -> Result<Vec<Subscription>, DomainError> {
        let rows: Vec<SubscriptionRow> = sqlx::query_as(&format!(
            "{} WHERE s.user_id = $1 ORDER BY s.created_at DESC",
            SELECT_SUBSCRIPTION
        ))
        .bind(user_id.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| query_failed("load subscription history", e))?;

        rows.into_iter().map(Subscription::try_from).collect()
    }

    async fn find_by_id(&self, id: SubscriptionId) -> Result<Option<Subscription>, DomainError> {
        let row: Option<SubscriptionRow> =
            sqlx::query_as(&format!("{} WHERE s.id = $1", SELECT_SUBSCRIPTION))
                .bind(id.as_uuid())
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| query_failed("find subscription", e))?;

        row.map(Subscription::try_from).transpose()
    }

    async fn find_by_gateway_subscription(
        &self,
        gateway_subscription_id: &str,
    ) -> Result<Option<Subscription>, DomainError> {
        let row: Option<SubscriptionRow> = sqlx::query_as(&format!(
            "{} WHERE s.gateway_subscription_id = $1 ORDER BY s.created_at DESC LIMIT 1",
            SELECT_SUBSCRIPTION
        ))
        .bind(gateway_subscription_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| query_failed("find subscription by gateway id", e))?;

        row.map(Subscription::try_from).transpose()
    }

    async fn insert(&self, subscription: &Subscription) -> Result<(), DomainError> {
        let posts_used = column_int("posts_used_this_month", subscription.posts_used_this_month)?;

        bind_insert(subscription, posts_used)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                if violates(&e, "subscriptions_pkey") {
                    DomainError::new(
                        ErrorCode::Conflict,
                        format!("Subscription {} already exists", subscription.id),
                    )
                } else if violates(&e, ONE_ACTIVE_PER_USER) {
                    already_active(&subscription.user_id)
                } else {
                    query_failed("insert subscription", e)
                }
            })?;

        Ok(())
    }

    async fn update(&self, subscription: &Subscription) -> Result<(), DomainError> {
        let posts_used = column_int("posts_used_this_month", subscription.posts_used_this_month)?;

        let result = sqlx::query(
            r#"
            UPDATE subscriptions SET
                plan_id = $2,
                status = $3,
                current_period_start = $4,
                current_period_end = $5,
                posts_used_this_month = $6,
                last_reset_date = $7,
                cancel_at_period_end = $8,
                gateway_customer_id = $9,
                gateway_subscription_id = $10,
                updated_at = $11
            WHERE id = $1
            "#,
        )
        .bind(subscription.id.as_uuid())
        .bind(subscription.plan.as_ref().map(|p| p.plan_id.value()))
        .bind(subscription.status.as_str())
        .bind(subscription.period.start.as_ref().map(Timestamp::as_datetime))
        .bind(subscription.period.end.as_ref().map(Timestamp::as_datetime))
        .bind(posts_used)
        .bind(subscription.last_reset_date.as_datetime())
        .bind(subscription.cancel_at_period_end)
        .bind(&subscription.gateway_customer_id)
        .bind(&subscription.gateway_subscription_id)
        .bind(subscription.updated_at.as_datetime())
        .execute(&self.pool)
        .await
        .map_err(|e| {
            if violates(&e, ONE_ACTIVE_PER_USER) {
                already_active(&subscription.user_id)
            } else {
                query_failed("update subscription", e)
            }
        })?;

        if result.rows_affected() == 0 {
            return Err(DomainError::new(
                ErrorCode::SubscriptionNotFound,
                format!("Subscription {} not found", subscription.id),
            )
            .with_detail("id", subscription.id.to_string()));
        }

        Ok(())
    }

    async fn set_customer_id(
        &self,
        id: SubscriptionId,
        customer_id: &str,
        now: Timestamp,
    ) -> Result<(), DomainError> {
        let result = sqlx::query(
            "UPDATE subscriptions SET gateway_customer_id = $2, updated_at = $3 WHERE id = $1",
        )
        .bind(id.as_uuid())
        .bind(customer_id)
        .bind(now.as_datetime())
        .execute(&self.pool)
        .await
        .map_err(|e| query_failed("set gateway customer", e))?;

        if result.rows_affected() == 0 {
            return Err(DomainError::new(
                ErrorCode::SubscriptionNotFound,
                format!("Subscription {} not found", id),
            )
            .with_detail("id", id.to_string()));
        }

        Ok(())
    }

    async fn supersede_active(
        &self,
        subscription: &Subscription,
    ) -> Result<Vec<SubscriptionId>, DomainError> {
        let posts_used = column_int("posts_used_this_month", subscription.posts_used_this_month)?;

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| query_failed("begin transaction", e))?;

        // Only active rows match, so every row here moves Active -> Completed.
        let completed: Vec<Uuid> = sqlx::query_scalar(
            r#"
            UPDATE subscriptions SET status = 'completed', updated_at = $2
            WHERE user_id = $1 AND status = 'active'
            RETURNING id
            "#,
        )
        .bind(subscription.user_id.as_str())
        .bind(subscription.created_at.as_datetime())
        .fetch_all(&mut *tx)
        .await
        .map_err(|e| query_failed("complete active subscriptions", e))?;

        bind_insert(subscription, posts_used)
            .execute(&mut *tx)
            .await
            .map_err(|e| {
                if violates(&e, ONE_ACTIVE_PER_USER) {
                    already_active(&subscription.user_id)
                } else {
                    query_failed("insert subscription", e)
                }
            })?;

        tx.commit()
            .await
            .map_err(|e| query_failed("commit subscription change", e))?;

        Ok(completed.into_iter().map(SubscriptionId::from_uuid).collect())
    }
}
