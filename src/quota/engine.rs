use std::sync::Arc;

use serde_json::json;
use tracing::{debug, info, warn};

use crate::catalog::{Feature, FeatureRef, PlanRef, SharedCatalog, UsageSync};
use crate::config::QuotaEngineConfig;
use crate::error::{EntitlementError, EntitlementResult};
use crate::metering::MeteringReporter;
use crate::subscriptions::Subscription;
use crate::telemetry::emit_usage_event;

use super::ledger::{UsageLedgerEntry, UsageRepository};
use super::locks::KeyedLocks;

/// Caller policy invoked with `(feature, amount over quota, subscription)`.
pub type OverageHandler<'a> = &'a (dyn Fn(&Feature, i64, &Subscription) + Send + Sync);

/// Remaining quota reported for unlimited features.
pub const UNLIMITED: i64 = -1;

/// key: quota-engine -> record, reduce, reset, evaluate usage against plans
///
/// Lookups fail soft: an unknown plan or feature reads as zero quota and
/// recording against it is a no-op. Only storage and metering errors surface.
pub struct QuotaEngine {
    catalog: SharedCatalog,
    usage: Arc<dyn UsageRepository>,
    metering: Option<Arc<dyn MeteringReporter>>,
    locks: KeyedLocks,
    config: QuotaEngineConfig,
}

/// Feature resolved against a plan, with the sync hook cloned out of the
/// catalog so no read guard is held across I/O.
struct ResolvedFeature {
    feature: Feature,
    sync: Option<Arc<dyn UsageSync>>,
}

impl QuotaEngine {
    pub fn new(
        catalog: SharedCatalog,
        usage: Arc<dyn UsageRepository>,
        config: QuotaEngineConfig,
    ) -> Self {
        Self {
            catalog,
            usage,
            metering: None,
            locks: KeyedLocks::new(),
            config,
        }
    }

    pub fn with_metering(mut self, reporter: Arc<dyn MeteringReporter>) -> Self {
        self.metering = Some(reporter);
        self
    }

    pub fn catalog(&self) -> &SharedCatalog {
        &self.catalog
    }

    /// Adds (or with `incremental == false`, sets) usage of a feature. The
    /// counters never drop below zero.
    ///
    /// Over-quota consumption is clamped in the ledger to the feature's quota,
    /// reported to metering for metered features, and passed to
    /// `on_overage`. Returns `None` when the feature is not on the plan.
    pub async fn record_feature_usage<'f>(
        &self,
        subscription: &Subscription,
        feature: impl Into<FeatureRef<'f>>,
        amount: i64,
        incremental: bool,
        on_overage: Option<OverageHandler<'_>>,
    ) -> EntitlementResult<Option<UsageLedgerEntry>> {
        let feature_id = feature.into().id();
        let Some(ResolvedFeature { feature, sync }) =
            self.resolve_feature(subscription, feature_id, None).await
        else {
            debug!(
                subscription = %subscription.id,
                plan = %subscription.plan_identifier(),
                feature = %feature_id,
                "ignoring usage for feature missing from plan"
            );
            return Ok(None);
        };

        let _guard = self.locks.lock(subscription.id, feature.id()).await;
        let update = self
            .usage
            .begin_update(subscription.id, feature.id(), true)
            .await?;

        let mut entry = update
            .current()
            .cloned()
            .unwrap_or_else(|| UsageLedgerEntry::new(subscription.id, feature.id()));

        self.recalculate(&mut entry, sync.as_deref(), subscription, &feature)
            .await;

        let used = if incremental { entry.used + amount } else { amount };
        let used_total = if incremental {
            entry.used_total + amount
        } else {
            amount
        };
        entry.used = used.max(0);
        entry.used_total = used_total.max(0);

        let quota = feature.get_value();
        let remaining = quota - entry.used;
        if !feature.is_unlimited() && remaining < 0 {
            let over_quota = -remaining;

            if let Some(metered_id) = feature.metered_id() {
                self.report_overage(subscription, metered_id, over_quota)
                    .await?;
            } else if feature.is_metered() {
                warn!(
                    subscription = %subscription.id,
                    feature = %feature.id(),
                    "metered feature has no metered price; overage not reported"
                );
            }

            entry.used = quota;

            emit_usage_event(
                "quota_exceeded",
                json!({
                    "subscription_id": subscription.id,
                    "feature_id": feature.id(),
                    "quota": quota,
                    "over_quota": over_quota,
                }),
            );

            if let Some(handler) = on_overage {
                handler(&feature, over_quota, subscription);
            }
        }

        let saved = update.commit(&entry).await?;
        emit_usage_event(
            "usage_recorded",
            json!({
                "subscription_id": subscription.id,
                "feature_id": saved.feature_id,
                "used": saved.used,
                "used_total": saved.used_total,
            }),
        );
        Ok(Some(saved))
    }

    /// Lowers current-period usage, flooring at zero. Lifetime usage is
    /// never reduced. No-op when nothing was recorded yet.
    pub async fn reduce_feature_usage<'f>(
        &self,
        subscription: &Subscription,
        feature: impl Into<FeatureRef<'f>>,
        amount: i64,
        incremental: bool,
    ) -> EntitlementResult<Option<UsageLedgerEntry>> {
        let feature_id = feature.into().id();
        let resolved = self.resolve_feature(subscription, feature_id, None).await;

        let _guard = self.locks.lock(subscription.id, feature_id).await;
        let update = self
            .usage
            .begin_update(subscription.id, feature_id, false)
            .await?;

        let Some(mut entry) = update.current().cloned() else {
            return Ok(None);
        };

        if let Some(ResolvedFeature { feature, sync }) = &resolved {
            self.recalculate(&mut entry, sync.as_deref(), subscription, feature)
                .await;
        }

        let used = if incremental { entry.used - amount } else { amount };
        entry.used = used.max(0);

        let saved = update.commit(&entry).await?;
        emit_usage_event(
            "usage_reduced",
            json!({
                "subscription_id": subscription.id,
                "feature_id": saved.feature_id,
                "used": saved.used,
                "used_total": saved.used_total,
            }),
        );
        Ok(Some(saved))
    }

    pub async fn decrement_feature_usage<'f>(
        &self,
        subscription: &Subscription,
        feature: impl Into<FeatureRef<'f>>,
        amount: i64,
        incremental: bool,
    ) -> EntitlementResult<Option<UsageLedgerEntry>> {
        self.reduce_feature_usage(subscription, feature, amount, incremental)
            .await
    }

    pub async fn set_feature_usage<'f>(
        &self,
        subscription: &Subscription,
        feature: impl Into<FeatureRef<'f>>,
        value: i64,
    ) -> EntitlementResult<Option<UsageLedgerEntry>> {
        self.record_feature_usage(subscription, feature, value, false, None)
            .await
    }

    pub async fn get_used_quota<'f>(
        &self,
        subscription: &Subscription,
        feature: impl Into<FeatureRef<'f>>,
    ) -> EntitlementResult<i64> {
        let entry = self.usage.find(subscription.id, feature.into().id()).await?;
        Ok(entry.map(|entry| entry.used).unwrap_or(0))
    }

    pub async fn get_total_used_quota<'f>(
        &self,
        subscription: &Subscription,
        feature: impl Into<FeatureRef<'f>>,
    ) -> EntitlementResult<i64> {
        let entry = self.usage.find(subscription.id, feature.into().id()).await?;
        Ok(entry.map(|entry| entry.used_total).unwrap_or(0))
    }

    /// Quota of the feature on `plan`, or on the subscription's plan when
    /// `plan` is `None`. Zero when the feature or plan is unknown.
    pub async fn get_feature_quota<'f>(
        &self,
        subscription: &Subscription,
        feature: impl Into<FeatureRef<'f>>,
        plan: Option<PlanRef<'_>>,
    ) -> i64 {
        self.resolve_feature(subscription, feature.into().id(), plan)
            .await
            .map(|resolved| resolved.feature.get_value())
            .unwrap_or(0)
    }

    /// `UNLIMITED` for unlimited features, otherwise quota minus used, which
    /// goes negative once usage exceeds the quota.
    pub async fn get_remaining_quota<'f>(
        &self,
        subscription: &Subscription,
        feature: impl Into<FeatureRef<'f>>,
        plan: Option<PlanRef<'_>>,
    ) -> EntitlementResult<i64> {
        let feature_id = feature.into().id();
        let quota = self.get_feature_quota(subscription, feature_id, plan).await;
        if quota < 0 {
            return Ok(UNLIMITED);
        }
        let used = self.get_used_quota(subscription, feature_id).await?;
        Ok(quota - used)
    }

    /// Features unknown to the resolved plan are never over quota.
    pub async fn feature_over_quota<'f>(
        &self,
        subscription: &Subscription,
        feature: impl Into<FeatureRef<'f>>,
        plan: Option<PlanRef<'_>>,
    ) -> EntitlementResult<bool> {
        let feature_id = feature.into().id();
        let Some(resolved) = self.resolve_feature(subscription, feature_id, plan).await else {
            return Ok(false);
        };
        if resolved.feature.is_unlimited() {
            return Ok(false);
        }
        let used = self.get_used_quota(subscription, feature_id).await?;
        Ok(resolved.feature.get_value() - used < 0)
    }

    /// Non-resettable, limited features of the target plan whose quota is
    /// below what the subscription already uses. Resettable counters start
    /// from zero on the next cycle and are not reported.
    pub async fn features_over_quota_when_swapping(
        &self,
        subscription: &Subscription,
        target_plan: PlanRef<'_>,
    ) -> EntitlementResult<Vec<Feature>> {
        let candidates: Vec<Feature> = {
            let catalog = self.catalog.read().await;
            let Some(plan) = catalog.resolve_plan(target_plan) else {
                return Ok(Vec::new());
            };
            plan.get_features()
                .iter()
                .filter(|feature| !feature.is_resettable() && !feature.is_unlimited())
                .cloned()
                .collect()
        };

        let mut over_quota = Vec::new();
        for feature in candidates {
            let used = self.get_used_quota(subscription, &feature).await?;
            if feature.get_value() - used < 0 {
                over_quota.push(feature);
            }
        }
        Ok(over_quota)
    }

    /// Deletes the ledger entries of resettable features on the current
    /// plan. Non-resettable entries, and entries for features the plan no
    /// longer has, are kept. Returns how many entries were cleared.
    pub async fn reset_quotas(&self, subscription: &Subscription) -> EntitlementResult<usize> {
        let entries = self.usage.list_for_subscription(subscription.id).await?;
        let resettable: Vec<String> = {
            let catalog = self.catalog.read().await;
            let Some(plan) = catalog.get_plan(subscription.plan_identifier()) else {
                warn!(
                    subscription = %subscription.id,
                    plan = %subscription.plan_identifier(),
                    "cannot reset quotas for unknown plan"
                );
                return Ok(0);
            };
            entries
                .iter()
                .filter(|entry| {
                    plan.get_feature(entry.feature_id.as_str())
                        .map(Feature::is_resettable)
                        .unwrap_or(false)
                })
                .map(|entry| entry.feature_id.clone())
                .collect()
        };

        let mut cleared = 0;
        for feature_id in resettable {
            let _guard = self.locks.lock(subscription.id, &feature_id).await;
            if self.usage.delete(subscription.id, &feature_id).await? {
                cleared += 1;
            }
        }

        emit_usage_event(
            "quotas_reset",
            json!({
                "subscription_id": subscription.id,
                "cleared": cleared,
            }),
        );
        Ok(cleared)
    }

    async fn resolve_feature(
        &self,
        subscription: &Subscription,
        feature_id: &str,
        plan: Option<PlanRef<'_>>,
    ) -> Option<ResolvedFeature> {
        let catalog = self.catalog.read().await;
        let plan = match plan {
            Some(plan) => catalog.resolve_plan(plan),
            None => catalog.get_plan(subscription.plan_identifier()),
        }?;
        let feature = plan.get_feature(feature_id)?.clone();
        let sync = catalog.usage_sync_for(feature.id());
        Some(ResolvedFeature { feature, sync })
    }

    /// Replaces the ledger counters with the sync hook's ground truth, floored
    /// at zero. A hook that answers `None` or times out leaves the entry
    /// unchanged.
    async fn recalculate(
        &self,
        entry: &mut UsageLedgerEntry,
        sync: Option<&dyn UsageSync>,
        subscription: &Subscription,
        feature: &Feature,
    ) {
        let Some(sync) = sync else {
            return;
        };
        let synced = sync.sync(subscription, feature);
        match tokio::time::timeout(self.config.sync_timeout, synced).await {
            Ok(Some(value)) => {
                let value = value.max(0);
                debug!(
                    subscription = %subscription.id,
                    feature = %feature.id(),
                    previous = entry.used,
                    synced = value,
                    "usage recalculated from sync hook"
                );
                entry.used = value;
                entry.used_total = value;
            }
            Ok(None) => {}
            Err(_) => warn!(
                subscription = %subscription.id,
                feature = %feature.id(),
                timeout_ms = self.config.sync_timeout.as_millis() as u64,
                "usage sync hook timed out; keeping ledger value"
            ),
        }
    }

    async fn report_overage(
        &self,
        subscription: &Subscription,
        metered_id: &str,
        quantity: i64,
    ) -> EntitlementResult<()> {
        let Some(reporter) = &self.metering else {
            debug!(
                subscription = %subscription.id,
                %metered_id,
                quantity,
                "no metering reporter configured; overage only tracked locally"
            );
            return Ok(());
        };

        let reported = tokio::time::timeout(
            self.config.metering_timeout,
            reporter.report_overage(metered_id, quantity),
        );
        match reported.await {
            Ok(result) => result?,
            Err(_) => {
                return Err(EntitlementError::MeteringTimeout {
                    metered_id: metered_id.to_string(),
                    timeout_ms: self.config.metering_timeout.as_millis() as u64,
                })
            }
        }

        info!(
            subscription = %subscription.id,
            %metered_id,
            quantity,
            "metered overage reported"
        );
        emit_usage_event(
            "metered_overage_reported",
            json!({
                "subscription_id": subscription.id,
                "metered_id": metered_id,
                "quantity": quantity,
            }),
        );
        Ok(())
    }
}
