use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use crate::error::EntitlementResult;

/// key: usage-ledger -> per (subscription, feature) counters
///
/// `used` never drops below zero. It is clamped to the quota on overage, so
/// `used_total` can be larger than `used`.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize, PartialEq)]
pub struct UsageLedgerEntry {
    pub id: Uuid,
    pub subscription_id: Uuid,
    pub feature_id: String,
    pub used: i64,
    pub used_total: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl UsageLedgerEntry {
    pub fn new(subscription_id: Uuid, feature_id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            subscription_id,
            feature_id: feature_id.into(),
            used: 0,
            used_total: 0,
            created_at: now,
            updated_at: now,
        }
    }
}

/// An open read-modify-write on one ledger entry. The entry stays locked
/// against other writers until `commit` or drop; dropping without committing
/// discards the change.
#[async_trait]
pub trait UsageUpdate: Send {
    /// The entry as it was when the update began. `None` when it did not exist
    /// and the update was opened without creating it.
    fn current(&self) -> Option<&UsageLedgerEntry>;

    async fn commit(
        self: Box<Self>,
        entry: &UsageLedgerEntry,
    ) -> EntitlementResult<UsageLedgerEntry>;
}

#[async_trait]
pub trait UsageRepository: Send + Sync {
    async fn find(
        &self,
        subscription_id: Uuid,
        feature_id: &str,
    ) -> EntitlementResult<Option<UsageLedgerEntry>>;

    /// Inserts or replaces the entry for its (subscription, feature) pair.
    async fn save(&self, entry: &UsageLedgerEntry) -> EntitlementResult<UsageLedgerEntry>;

    /// Locks the entry for a read-modify-write. With `create`, a missing
    /// entry is created with zero usage first.
    async fn begin_update(
        &self,
        subscription_id: Uuid,
        feature_id: &str,
        create: bool,
    ) -> EntitlementResult<Box<dyn UsageUpdate>>;

    async fn delete(&self, subscription_id: Uuid, feature_id: &str) -> EntitlementResult<bool>;

    async fn list_for_subscription(
        &self,
        subscription_id: Uuid,
    ) -> EntitlementResult<Vec<UsageLedgerEntry>>;
}

type LedgerMap = DashMap<(Uuid, String), UsageLedgerEntry>;

/// Process-local ledger. Writers are serialized by the engine's keyed locks,
/// so updates here only stage the entry until commit.
#[derive(Default)]
pub struct InMemoryUsageRepository {
    entries: Arc<LedgerMap>,
}

impl InMemoryUsageRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn store(entries: &LedgerMap, entry: &UsageLedgerEntry) -> UsageLedgerEntry {
    let mut stored = entry.clone();
    stored.updated_at = Utc::now();
    entries.insert(
        (stored.subscription_id, stored.feature_id.clone()),
        stored.clone(),
    );
    stored
}

struct InMemoryUsageUpdate {
    entries: Arc<LedgerMap>,
    current: Option<UsageLedgerEntry>,
}

#[async_trait]
impl UsageUpdate for InMemoryUsageUpdate {
    fn current(&self) -> Option<&UsageLedgerEntry> {
        self.current.as_ref()
    }

    async fn commit(
        self: Box<Self>,
        entry: &UsageLedgerEntry,
    ) -> EntitlementResult<UsageLedgerEntry> {
        Ok(store(&self.entries, entry))
    }
}

#[async_trait]
impl UsageRepository for InMemoryUsageRepository {
    async fn find(
        &self,
        subscription_id: Uuid,
        feature_id: &str,
    ) -> EntitlementResult<Option<UsageLedgerEntry>> {
        Ok(self
            .entries
            .get(&(subscription_id, feature_id.to_string()))
            .map(|entry| entry.value().clone()))
    }

    async fn save(&self, entry: &UsageLedgerEntry) -> EntitlementResult<UsageLedgerEntry> {
        Ok(store(&self.entries, entry))
    }

    async fn begin_update(
        &self,
        subscription_id: Uuid,
        feature_id: &str,
        create: bool,
    ) -> EntitlementResult<Box<dyn UsageUpdate>> {
        let existing = self.find(subscription_id, feature_id).await?;
        let current = match existing {
            Some(entry) => Some(entry),
            None if create => Some(UsageLedgerEntry::new(subscription_id, feature_id)),
            None => None,
        };
        Ok(Box::new(InMemoryUsageUpdate {
            entries: self.entries.clone(),
            current,
        }))
    }

    async fn delete(&self, subscription_id: Uuid, feature_id: &str) -> EntitlementResult<bool> {
        Ok(self
            .entries
            .remove(&(subscription_id, feature_id.to_string()))
            .is_some())
    }

    async fn list_for_subscription(
        &self,
        subscription_id: Uuid,
    ) -> EntitlementResult<Vec<UsageLedgerEntry>> {
        let mut entries: Vec<UsageLedgerEntry> = self
            .entries
            .iter()
            .filter(|entry| entry.subscription_id == subscription_id)
            .map(|entry| entry.value().clone())
            .collect();
        entries.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn entries_are_scoped_by_subscription_and_feature() {
        let repository = InMemoryUsageRepository::new();
        let first = Uuid::new_v4();
        let second = Uuid::new_v4();

        let mut entry = UsageLedgerEntry::new(first, "build.minutes");
        entry.used = 50;
        entry.used_total = 50;
        repository.save(&entry).await.unwrap();
        repository
            .save(&UsageLedgerEntry::new(second, "build.minutes"))
            .await
            .unwrap();

        let stored = repository.find(first, "build.minutes").await.unwrap().unwrap();
        assert_eq!(stored.used, 50);
        assert!(repository.find(first, "teams").await.unwrap().is_none());
        assert_eq!(repository.list_for_subscription(first).await.unwrap().len(), 1);

        assert!(repository.delete(first, "build.minutes").await.unwrap());
        assert!(!repository.delete(first, "build.minutes").await.unwrap());
        assert_eq!(repository.len(), 1);
    }

    #[tokio::test]
    async fn update_is_only_visible_after_commit() {
        let repository = InMemoryUsageRepository::new();
        let subscription = Uuid::new_v4();

        let missing = repository
            .begin_update(subscription, "teams", false)
            .await
            .unwrap();
        assert!(missing.current().is_none());
        drop(missing);

        let update = repository
            .begin_update(subscription, "teams", true)
            .await
            .unwrap();
        let mut entry = update.current().cloned().expect("created on demand");
        assert_eq!(entry.used, 0);
        entry.used = 3;
        entry.used_total = 3;
        assert!(repository.is_empty());

        update.commit(&entry).await.unwrap();
        let stored = repository.find(subscription, "teams").await.unwrap().unwrap();
        assert_eq!(stored.used, 3);

        let abandoned = repository
            .begin_update(subscription, "teams", true)
            .await
            .unwrap();
        drop(abandoned);
        assert_eq!(repository.find(subscription, "teams").await.unwrap().unwrap().used, 3);
    }
}
