use std::sync::Arc;

use tracing::info;
use uuid::Uuid;

use crate::catalog::{Plan, PlanRef, SharedCatalog};
use crate::error::{EntitlementError, EntitlementResult};

use super::models::Subscription;
use super::repository::SubscriptionRepository;

/// key: subscription-service -> subscribe, swap
#[derive(Clone)]
pub struct SubscriptionService {
    catalog: SharedCatalog,
    repository: Arc<dyn SubscriptionRepository>,
}

impl SubscriptionService {
    pub fn new(catalog: SharedCatalog, repository: Arc<dyn SubscriptionRepository>) -> Self {
        Self {
            catalog,
            repository,
        }
    }

    /// Creates a subscription on `plan`. Archived plans are refused.
    pub async fn subscribe(
        &self,
        owner_id: &str,
        name: &str,
        plan: PlanRef<'_>,
    ) -> EntitlementResult<Subscription> {
        let plan_id = self.ensure_subscribable(plan).await?;
        let subscription = Subscription::new(owner_id, name, plan_id);
        let stored = self.repository.insert(&subscription).await?;
        info!(
            subscription = %stored.id,
            owner = %stored.owner_id,
            plan = %stored.plan_id,
            "subscription created"
        );
        Ok(stored)
    }

    /// Moves the subscription to another plan. Usage is left untouched, so
    /// counters that exceed the new plan's quota stay over quota.
    pub async fn swap(
        &self,
        subscription_id: Uuid,
        plan: PlanRef<'_>,
    ) -> EntitlementResult<Subscription> {
        let plan_id = self.ensure_subscribable(plan).await?;
        let updated = self
            .repository
            .update_plan(subscription_id, &plan_id)
            .await?
            .ok_or_else(|| {
                EntitlementError::Message(format!("subscription {subscription_id} not found"))
            })?;
        info!(
            subscription = %updated.id,
            plan = %updated.plan_id,
            "subscription swapped to new plan"
        );
        Ok(updated)
    }

    pub async fn find(&self, subscription_id: Uuid) -> EntitlementResult<Option<Subscription>> {
        self.repository.find(subscription_id).await
    }

    /// Active subscriptions of the owner, newest first.
    pub async fn active_subscriptions(
        &self,
        owner_id: &str,
    ) -> EntitlementResult<Vec<Subscription>> {
        let now = chrono::Utc::now();
        let subscriptions = self.repository.list_for_owner(owner_id).await?;
        Ok(subscriptions
            .into_iter()
            .filter(|subscription| subscription.is_active(now))
            .collect())
    }

    /// Newest active subscription of the owner with the given name.
    pub async fn active_subscription(
        &self,
        owner_id: &str,
        name: &str,
    ) -> EntitlementResult<Option<Subscription>> {
        let subscriptions = self.active_subscriptions(owner_id).await?;
        Ok(subscriptions.into_iter().find(|subscription| subscription.name == name))
    }

    /// True when the owner has an active subscription answering to `plan_id`.
    pub async fn subscribed_to_plan(
        &self,
        owner_id: &str,
        plan_id: &str,
    ) -> EntitlementResult<bool> {
        let subscriptions = self.active_subscriptions(owner_id).await?;
        let catalog = self.catalog.read().await;
        let target = catalog.get_plan(plan_id);
        Ok(subscriptions.iter().any(|subscription| match target {
            Some(plan) => plan.answers_to(subscription.plan_identifier()),
            None => subscription.plan_identifier() == plan_id,
        }))
    }

    /// Metered price ids a billing provider must attach before the
    /// subscription on `plan` can be activated.
    pub fn required_metered_prices(plan: &Plan) -> Vec<String> {
        plan.get_metered_features()
            .into_iter()
            .filter_map(|feature| feature.metered_id().map(str::to_string))
            .collect()
    }

    async fn ensure_subscribable(&self, plan: PlanRef<'_>) -> EntitlementResult<String> {
        let catalog = self.catalog.read().await;
        let resolved = catalog.resolve_plan(plan).ok_or_else(|| {
            let plan_id = match plan {
                PlanRef::Id(id) => id.to_string(),
                PlanRef::Plan(plan) => plan.id().to_string(),
            };
            EntitlementError::PlanNotFound { plan_id }
        })?;
        if !resolved.is_active() {
            return Err(EntitlementError::PlanArchived {
                plan_id: resolved.id().to_string(),
            });
        }
        // Keep the yearly id when that is what the caller subscribed with.
        Ok(match plan {
            PlanRef::Id(id) => id.to_string(),
            PlanRef::Plan(plan) => plan.id().to_string(),
        })
    }
}
