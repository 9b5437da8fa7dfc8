use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// key: subscription-model -> owner bound to a catalog plan
#[derive(Debug, Clone, FromRow, Serialize, Deserialize, PartialEq)]
pub struct Subscription {
    pub id: Uuid,
    pub owner_id: String,
    pub name: String,
    pub plan_id: String,
    pub status: String,
    pub trial_ends_at: Option<DateTime<Utc>>,
    pub starts_at: Option<DateTime<Utc>>,
    pub ends_at: Option<DateTime<Utc>>,
    pub canceled_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Subscription {
    pub fn new(
        owner_id: impl Into<String>,
        name: impl Into<String>,
        plan_id: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            owner_id: owner_id.into(),
            name: name.into(),
            plan_id: plan_id.into(),
            status: "active".to_string(),
            trial_ends_at: None,
            starts_at: Some(now),
            ends_at: None,
            canceled_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// The catalog id this subscription is billed under.
    pub fn plan_identifier(&self) -> &str {
        &self.plan_id
    }

    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        if self.status != "active" && self.status != "trialing" {
            return false;
        }
        if self.canceled_at.is_some() {
            return false;
        }
        if let Some(end) = self.ends_at {
            if end < now {
                return false;
            }
        }
        true
    }
}
