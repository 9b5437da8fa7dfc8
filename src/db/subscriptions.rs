use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::EntitlementResult;
use crate::subscriptions::{Subscription, SubscriptionRepository};

pub async fn insert_subscription(
    pool: &PgPool,
    subscription: &Subscription,
) -> Result<Subscription, sqlx::Error> {
    sqlx::query_as::<_, Subscription>(
        r#"
        INSERT INTO saas_subscriptions (
            id,
            owner_id,
            name,
            plan_id,
            status,
            trial_ends_at,
            starts_at,
            ends_at,
            canceled_at,
            created_at,
            updated_at
        ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
        RETURNING *
        "#,
    )
    .bind(subscription.id)
    .bind(&subscription.owner_id)
    .bind(&subscription.name)
    .bind(&subscription.plan_id)
    .bind(&subscription.status)
    .bind(subscription.trial_ends_at)
    .bind(subscription.starts_at)
    .bind(subscription.ends_at)
    .bind(subscription.canceled_at)
    .bind(subscription.created_at)
    .bind(subscription.updated_at)
    .fetch_one(pool)
    .await
}

pub async fn find_subscription(
    pool: &PgPool,
    id: Uuid,
) -> Result<Option<Subscription>, sqlx::Error> {
    sqlx::query_as::<_, Subscription>("SELECT * FROM saas_subscriptions WHERE id = $1")
        .bind(id)
        .fetch_optional(pool)
        .await
}

pub async fn list_owner_subscriptions(
    pool: &PgPool,
    owner_id: &str,
) -> Result<Vec<Subscription>, sqlx::Error> {
    sqlx::query_as::<_, Subscription>(
        "SELECT * FROM saas_subscriptions WHERE owner_id = $1 ORDER BY created_at DESC",
    )
    .bind(owner_id)
    .fetch_all(pool)
    .await
}

pub async fn update_subscription_plan(
    pool: &PgPool,
    id: Uuid,
    plan_id: &str,
) -> Result<Option<Subscription>, sqlx::Error> {
    sqlx::query_as::<_, Subscription>(
        r#"
        UPDATE saas_subscriptions
        SET plan_id = $2,
            updated_at = NOW()
        WHERE id = $1
        RETURNING *
        "#,
    )
    .bind(id)
    .bind(plan_id)
    .fetch_optional(pool)
    .await
}

/// key: subscription-postgres -> saas_subscriptions table
#[derive(Clone)]
pub struct PgSubscriptionRepository {
    pool: PgPool,
}

impl PgSubscriptionRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SubscriptionRepository for PgSubscriptionRepository {
    async fn insert(&self, subscription: &Subscription) -> EntitlementResult<Subscription> {
        Ok(insert_subscription(&self.pool, subscription).await?)
    }

    async fn find(&self, id: Uuid) -> EntitlementResult<Option<Subscription>> {
        Ok(find_subscription(&self.pool, id).await?)
    }

    async fn list_for_owner(&self, owner_id: &str) -> EntitlementResult<Vec<Subscription>> {
        Ok(list_owner_subscriptions(&self.pool, owner_id).await?)
    }

    async fn update_plan(
        &self,
        id: Uuid,
        plan_id: &str,
    ) -> EntitlementResult<Option<Subscription>> {
        Ok(update_subscription_plan(&self.pool, id, plan_id).await?)
    }
}
