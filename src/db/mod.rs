//! Postgres-backed repositories.

pub mod subscription_usages;
pub mod subscriptions;

pub use subscription_usages::{PgUsageRepository, PgUsageUpdate};
pub use subscriptions::PgSubscriptionRepository;
