use async_trait::async_trait;
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

use crate::error::EntitlementResult;
use crate::quota::{UsageLedgerEntry, UsageRepository, UsageUpdate};

const UPSERT_USAGE: &str = r#"
    INSERT INTO subscription_usages (
        id,
        subscription_id,
        feature_id,
        used,
        used_total,
        created_at
    ) VALUES ($1, $2, $3, $4, $5, $6)
    ON CONFLICT (subscription_id, feature_id)
    DO UPDATE SET
        used = EXCLUDED.used,
        used_total = EXCLUDED.used_total,
        updated_at = NOW()
    RETURNING id, subscription_id, feature_id, used, used_total, created_at, updated_at
"#;

pub async fn find_usage(
    pool: &PgPool,
    subscription_id: Uuid,
    feature_id: &str,
) -> Result<Option<UsageLedgerEntry>, sqlx::Error> {
    sqlx::query_as::<_, UsageLedgerEntry>(
        r#"
        SELECT id, subscription_id, feature_id, used, used_total, created_at, updated_at
        FROM subscription_usages
        WHERE subscription_id = $1 AND feature_id = $2
        "#,
    )
    .bind(subscription_id)
    .bind(feature_id)
    .fetch_optional(pool)
    .await
}

/// Upserts on the unique (subscription_id, feature_id) index so concurrent
/// writers from different processes never create duplicate rows.
pub async fn upsert_usage(
    pool: &PgPool,
    entry: &UsageLedgerEntry,
) -> Result<UsageLedgerEntry, sqlx::Error> {
    sqlx::query_as::<_, UsageLedgerEntry>(UPSERT_USAGE)
        .bind(entry.id)
        .bind(entry.subscription_id)
        .bind(&entry.feature_id)
        .bind(entry.used)
        .bind(entry.used_total)
        .bind(entry.created_at)
        .fetch_one(pool)
        .await
}

/// Opens a transaction holding the row lock of one ledger entry. With
/// `create`, a zero row is inserted first so there is always a row to lock.
pub async fn lock_usage(
    pool: &PgPool,
    subscription_id: Uuid,
    feature_id: &str,
    create: bool,
) -> Result<PgUsageUpdate, sqlx::Error> {
    let mut tx = pool.begin().await?;

    if create {
        sqlx::query(
            r#"
            INSERT INTO subscription_usages (id, subscription_id, feature_id, used, used_total)
            VALUES ($1, $2, $3, 0, 0)
            ON CONFLICT (subscription_id, feature_id) DO NOTHING
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(subscription_id)
        .bind(feature_id)
        .execute(&mut *tx)
        .await?;
    }

    let current = sqlx::query_as::<_, UsageLedgerEntry>(
        r#"
        SELECT id, subscription_id, feature_id, used, used_total, created_at, updated_at
        FROM subscription_usages
        WHERE subscription_id = $1 AND feature_id = $2
        FOR UPDATE
        "#,
    )
    .bind(subscription_id)
    .bind(feature_id)
    .fetch_optional(&mut *tx)
    .await?;

    Ok(PgUsageUpdate { tx, current })
}

/// key: usage-ledger-postgres -> row stays locked until commit or rollback
pub struct PgUsageUpdate {
    tx: Transaction<'static, Postgres>,
    current: Option<UsageLedgerEntry>,
}

#[async_trait]
impl UsageUpdate for PgUsageUpdate {
    fn current(&self) -> Option<&UsageLedgerEntry> {
        self.current.as_ref()
    }

    async fn commit(
        self: Box<Self>,
        entry: &UsageLedgerEntry,
    ) -> EntitlementResult<UsageLedgerEntry> {
        let PgUsageUpdate { mut tx, .. } = *self;
        let saved = sqlx::query_as::<_, UsageLedgerEntry>(UPSERT_USAGE)
            .bind(entry.id)
            .bind(entry.subscription_id)
            .bind(&entry.feature_id)
            .bind(entry.used)
            .bind(entry.used_total)
            .bind(entry.created_at)
            .fetch_one(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(saved)
    }
}

pub async fn delete_usage(
    pool: &PgPool,
    subscription_id: Uuid,
    feature_id: &str,
) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        "DELETE FROM subscription_usages WHERE subscription_id = $1 AND feature_id = $2",
    )
    .bind(subscription_id)
    .bind(feature_id)
    .execute(pool)
    .await?;
    Ok(result.rows_affected() > 0)
}

pub async fn list_usages(
    pool: &PgPool,
    subscription_id: Uuid,
) -> Result<Vec<UsageLedgerEntry>, sqlx::Error> {
    sqlx::query_as::<_, UsageLedgerEntry>(
        r#"
        SELECT id, subscription_id, feature_id, used, used_total, created_at, updated_at
        FROM subscription_usages
        WHERE subscription_id = $1
        ORDER BY created_at ASC
        "#,
    )
    .bind(subscription_id)
    .fetch_all(pool)
    .await
}

/// key: usage-ledger-postgres -> subscription_usages table
#[derive(Clone)]
pub struct PgUsageRepository {
    pool: PgPool,
}

impl PgUsageRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl UsageRepository for PgUsageRepository {
    async fn find(
        &self,
        subscription_id: Uuid,
        feature_id: &str,
    ) -> EntitlementResult<Option<UsageLedgerEntry>> {
        Ok(find_usage(&self.pool, subscription_id, feature_id).await?)
    }

    async fn save(&self, entry: &UsageLedgerEntry) -> EntitlementResult<UsageLedgerEntry> {
        Ok(upsert_usage(&self.pool, entry).await?)
    }

    async fn begin_update(
        &self,
        subscription_id: Uuid,
        feature_id: &str,
        create: bool,
    ) -> EntitlementResult<Box<dyn UsageUpdate>> {
        let update = lock_usage(&self.pool, subscription_id, feature_id, create).await?;
        Ok(Box::new(update))
    }

    async fn delete(&self, subscription_id: Uuid, feature_id: &str) -> EntitlementResult<bool> {
        Ok(delete_usage(&self.pool, subscription_id, feature_id).await?)
    }

    async fn list_for_subscription(
        &self,
        subscription_id: Uuid,
    ) -> EntitlementResult<Vec<UsageLedgerEntry>> {
        Ok(list_usages(&self.pool, subscription_id).await?)
    }
}
