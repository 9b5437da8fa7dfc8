use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use uuid::Uuid;

use crate::error::EntitlementResult;

use super::models::Subscription;

#[async_trait]
pub trait SubscriptionRepository: Send + Sync {
    async fn insert(&self, subscription: &Subscription) -> EntitlementResult<Subscription>;
    async fn find(&self, id: Uuid) -> EntitlementResult<Option<Subscription>>;
    async fn list_for_owner(&self, owner_id: &str) -> EntitlementResult<Vec<Subscription>>;
    async fn update_plan(
        &self,
        id: Uuid,
        plan_id: &str,
    ) -> EntitlementResult<Option<Subscription>>;
}

/// Process-local subscription store.
#[derive(Default)]
pub struct InMemorySubscriptionRepository {
    subscriptions: DashMap<Uuid, Subscription>,
}

impl InMemorySubscriptionRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SubscriptionRepository for InMemorySubscriptionRepository {
    async fn insert(&self, subscription: &Subscription) -> EntitlementResult<Subscription> {
        self.subscriptions
            .insert(subscription.id, subscription.clone());
        Ok(subscription.clone())
    }

    async fn find(&self, id: Uuid) -> EntitlementResult<Option<Subscription>> {
        Ok(self.subscriptions.get(&id).map(|entry| entry.value().clone()))
    }

    async fn list_for_owner(&self, owner_id: &str) -> EntitlementResult<Vec<Subscription>> {
        let mut subscriptions: Vec<Subscription> = self
            .subscriptions
            .iter()
            .filter(|entry| entry.owner_id == owner_id)
            .map(|entry| entry.value().clone())
            .collect();
        subscriptions.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(subscriptions)
    }

    async fn update_plan(
        &self,
        id: Uuid,
        plan_id: &str,
    ) -> EntitlementResult<Option<Subscription>> {
        let Some(mut entry) = self.subscriptions.get_mut(&id) else {
            return Ok(None);
        };
        entry.plan_id = plan_id.to_string();
        entry.updated_at = Utc::now();
        Ok(Some(entry.value().clone()))
    }
}
