//! Subscriptions bound to catalog plans.

pub mod models;
pub mod repository;
pub mod service;

pub use models::Subscription;
pub use repository::{InMemorySubscriptionRepository, SubscriptionRepository};
pub use service::SubscriptionService;
