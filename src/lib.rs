//! Subscription entitlements: a plan catalog, a per-subscription usage
//! ledger, and the quota engine that records usage against plan quotas and
//! hands over-quota consumption to metered billing.

pub mod catalog;
pub mod config;
pub mod db;
pub mod error;
pub mod metering;
pub mod quota;
pub mod subscriptions;
pub mod telemetry;

pub use catalog::{Catalog, Feature, FeatureRef, Item, Plan, PlanRef, SharedCatalog};
pub use config::QuotaEngineConfig;
pub use error::{EntitlementError, EntitlementResult};
pub use metering::{HttpMeteringReporter, InMemoryMeteringReporter, MeteringReporter};
pub use quota::{
    InMemoryUsageRepository, QuotaEngine, UsageLedgerEntry, UsageRepository, UsageUpdate,
};
pub use subscriptions::{
    InMemorySubscriptionRepository, Subscription, SubscriptionRepository, SubscriptionService,
};
