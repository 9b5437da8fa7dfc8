use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::debug;

use crate::error::{EntitlementError, EntitlementResult};
use crate::subscriptions::Subscription;

use super::feature::Feature;
use super::item::Item;
use super::plan::{Plan, PlanRef};

/// Recomputes the ground-truth usage of a feature for a subscription.
/// Returning `None` keeps the ledger value.
#[async_trait]
pub trait UsageSync: Send + Sync {
    async fn sync(&self, subscription: &Subscription, feature: &Feature) -> Option<i64>;
}

#[async_trait]
impl<F> UsageSync for F
where
    F: Fn(&Subscription, &Feature) -> Option<i64> + Send + Sync,
{
    async fn sync(&self, subscription: &Subscription, feature: &Feature) -> Option<i64> {
        self(subscription, feature)
    }
}

pub type SharedCatalog = Arc<RwLock<Catalog>>;

/// key: catalog-registry -> plans, items, usage sync hooks
///
/// Populated during bootstrap and read afterwards. Lookups never fail loudly;
/// an unknown id is simply `None`.
#[derive(Default)]
pub struct Catalog {
    plans: Vec<Plan>,
    items: Vec<Item>,
    usage_syncs: HashMap<String, Arc<dyn UsageSync>>,
}

impl Catalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn into_shared(self) -> SharedCatalog {
        Arc::new(RwLock::new(self))
    }

    /// Registers a new plan and hands it back for configuration. Duplicate
    /// ids are accepted; `get_plan` returns the first registered match.
    pub fn plan(&mut self, name: &str, id: &str, yearly_id: Option<&str>) -> &mut Plan {
        debug!(plan = %id, yearly_plan = ?yearly_id, "registering plan");
        self.plans
            .push(Plan::new(name, id, yearly_id.map(str::to_string)));
        let index = self.plans.len() - 1;
        &mut self.plans[index]
    }

    /// Like [`Catalog::plan`] but refuses ids (primary or yearly) that any
    /// registered plan already answers to.
    pub fn try_plan(
        &mut self,
        name: &str,
        id: &str,
        yearly_id: Option<&str>,
    ) -> EntitlementResult<&mut Plan> {
        let candidates = std::iter::once(id).chain(yearly_id);
        for candidate in candidates {
            if self.plans.iter().any(|plan| plan.answers_to(candidate)) {
                return Err(EntitlementError::DuplicatePlanId {
                    plan_id: candidate.to_string(),
                });
            }
        }
        if yearly_id == Some(id) {
            return Err(EntitlementError::DuplicatePlanId {
                plan_id: id.to_string(),
            });
        }
        Ok(self.plan(name, id, yearly_id))
    }

    pub fn feature(name: &str, id: &str, value: i64) -> Feature {
        Feature::new(name, id, value)
    }

    pub fn metered_feature(name: &str, id: &str, value: i64) -> Feature {
        Feature::metered(name, id, value)
    }

    pub fn item(&mut self, id: &str, name: &str, price: f64, currency: Option<&str>) -> &mut Item {
        self.items.push(Item::new(id, name, price, currency));
        let index = self.items.len() - 1;
        &mut self.items[index]
    }

    pub fn get_plans(&self) -> &[Plan] {
        &self.plans
    }

    /// Matches the primary or the yearly id; first registered match wins.
    pub fn get_plan(&self, id: &str) -> Option<&Plan> {
        self.plans.iter().find(|plan| plan.answers_to(id))
    }

    pub fn get_plan_mut(&mut self, id: &str) -> Option<&mut Plan> {
        self.plans.iter_mut().find(|plan| plan.answers_to(id))
    }

    /// Handles are looked up by id, so a plan that was never registered
    /// resolves to `None`.
    pub fn resolve_plan(&self, plan: PlanRef<'_>) -> Option<&Plan> {
        match plan {
            PlanRef::Id(id) => self.get_plan(id),
            PlanRef::Plan(plan) => self.get_plan(plan.id()),
        }
    }

    pub fn get_available_plans(&self) -> Vec<&Plan> {
        self.plans.iter().filter(|plan| plan.is_active()).collect()
    }

    pub fn get_items(&self) -> &[Item] {
        &self.items
    }

    pub fn get_item(&self, id: &str) -> Option<&Item> {
        self.items.iter().find(|item| item.id() == id)
    }

    /// Registers a synchronous reconciliation hook for `feature_id`,
    /// replacing any previous one.
    pub fn sync_feature_usage<F>(&mut self, feature_id: &str, hook: F)
    where
        F: Fn(&Subscription, &Feature) -> Option<i64> + Send + Sync + 'static,
    {
        self.sync_feature_usage_with(feature_id, Arc::new(hook));
    }

    pub fn sync_feature_usage_with(&mut self, feature_id: &str, hook: Arc<dyn UsageSync>) {
        self.usage_syncs.insert(feature_id.to_string(), hook);
    }

    pub fn usage_sync_for(&self, feature_id: &str) -> Option<Arc<dyn UsageSync>> {
        self.usage_syncs.get(feature_id).cloned()
    }

    pub async fn apply_feature_usage_sync(
        &self,
        subscription: &Subscription,
        feature: &Feature,
    ) -> Option<i64> {
        let hook = self.usage_sync_for(feature.id())?;
        hook.sync(subscription, feature).await
    }

    pub fn clear_plans(&mut self) {
        self.plans.clear();
    }

    pub fn clear_items(&mut self) {
        self.items.clear();
    }

    pub fn clear_usage_syncs(&mut self) {
        self.usage_syncs.clear();
    }
}
