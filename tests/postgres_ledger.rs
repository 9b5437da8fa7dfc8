use std::sync::Arc;

use entitlements::db::{PgSubscriptionRepository, PgUsageRepository};
use entitlements::{
    Catalog, QuotaEngine, QuotaEngineConfig, SubscriptionService, UsageRepository, UsageUpdate,
};
use sqlx::PgPool;

fn catalog() -> Catalog {
    let mut catalog = Catalog::new();
    catalog.plan("Monthly", "monthly", None).features(vec![
        Catalog::feature("Build Minutes", "build.minutes", 3000),
        Catalog::feature("Seats", "teams", 10).not_resettable(),
    ]);
    catalog.plan("Free", "free", None).features(vec![
        Catalog::feature("Build Minutes", "build.minutes", 10),
        Catalog::feature("Seats", "teams", 5).not_resettable(),
    ]);
    catalog
}

// key: postgres-tests -> ledger upsert, reset, swap pre-flight
#[sqlx::test]
#[ignore = "requires DATABASE_URL with Postgres server"]
async fn postgres_ledger_tracks_usage(pool: PgPool) {
    sqlx::migrate!("./migrations").run(&pool).await.unwrap();

    let catalog = catalog().into_shared();
    let subscriptions = SubscriptionService::new(
        catalog.clone(),
        Arc::new(PgSubscriptionRepository::new(pool.clone())),
    );
    let usage = Arc::new(PgUsageRepository::new(pool.clone()));
    let engine = QuotaEngine::new(catalog, usage.clone(), QuotaEngineConfig::default());

    let subscription = subscriptions
        .subscribe("owner-1", "main", "monthly".into())
        .await
        .unwrap();

    engine
        .record_feature_usage(&subscription, "build.minutes", 50, true, None)
        .await
        .unwrap();
    engine
        .record_feature_usage(&subscription, "build.minutes", 25, true, None)
        .await
        .unwrap();
    engine
        .record_feature_usage(&subscription, "teams", 8, true, None)
        .await
        .unwrap();

    assert_eq!(
        engine
            .get_remaining_quota(&subscription, "build.minutes", None)
            .await
            .unwrap(),
        2925
    );

    let rows: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM subscription_usages WHERE subscription_id = $1",
    )
    .bind(subscription.id)
    .fetch_one(&pool)
    .await
    .unwrap();
    assert_eq!(rows, 2);

    let over_quota = engine
        .features_over_quota_when_swapping(&subscription, "free".into())
        .await
        .unwrap();
    assert_eq!(over_quota.len(), 1);
    assert_eq!(over_quota[0].id(), "teams");

    assert_eq!(engine.reset_quotas(&subscription).await.unwrap(), 1);
    let remaining = usage.list_for_subscription(subscription.id).await.unwrap();
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].feature_id, "teams");
    assert_eq!(remaining[0].used, 8);

    let swapped = subscriptions
        .swap(subscription.id, "free".into())
        .await
        .unwrap();
    assert_eq!(swapped.plan_id, "free");
    assert!(engine
        .feature_over_quota(&swapped, "teams", None)
        .await
        .unwrap());
}

#[sqlx::test]
#[ignore = "requires DATABASE_URL with Postgres server"]
async fn postgres_ledger_serializes_concurrent_writers(pool: PgPool) {
    sqlx::migrate!("./migrations").run(&pool).await.unwrap();

    let catalog = catalog().into_shared();
    let subscriptions = SubscriptionService::new(
        catalog.clone(),
        Arc::new(PgSubscriptionRepository::new(pool.clone())),
    );
    let engine = Arc::new(QuotaEngine::new(
        catalog,
        Arc::new(PgUsageRepository::new(pool.clone())),
        QuotaEngineConfig::default(),
    ));
    let subscription = subscriptions
        .subscribe("owner-1", "main", "monthly".into())
        .await
        .unwrap();

    let mut tasks = Vec::new();
    for _ in 0..20 {
        let engine = engine.clone();
        let subscription = subscription.clone();
        tasks.push(tokio::spawn(async move {
            engine
                .record_feature_usage(&subscription, "build.minutes", 2, true, None)
                .await
                .map(|_| ())
        }));
    }
    for task in tasks {
        task.await.unwrap().unwrap();
    }

    assert_eq!(
        engine
            .get_used_quota(&subscription, "build.minutes")
            .await
            .unwrap(),
        40
    );
}

// key: postgres-tests -> row lock holds across engines without a shared lock map
#[sqlx::test]
#[ignore = "requires DATABASE_URL with Postgres server"]
async fn postgres_row_lock_serializes_separate_engines(pool: PgPool) {
    sqlx::migrate!("./migrations").run(&pool).await.unwrap();

    let catalog = catalog().into_shared();
    let subscriptions = SubscriptionService::new(
        catalog.clone(),
        Arc::new(PgSubscriptionRepository::new(pool.clone())),
    );
    let subscription = subscriptions
        .subscribe("owner-1", "main", "monthly".into())
        .await
        .unwrap();

    let engines: Vec<Arc<QuotaEngine>> = (0..2)
        .map(|_| {
            Arc::new(QuotaEngine::new(
                catalog.clone(),
                Arc::new(PgUsageRepository::new(pool.clone())),
                QuotaEngineConfig::default(),
            ))
        })
        .collect();

    let mut tasks = Vec::new();
    for round in 0..30 {
        let engine = engines[round % 2].clone();
        let subscription = subscription.clone();
        tasks.push(tokio::spawn(async move {
            engine
                .record_feature_usage(&subscription, "build.minutes", 1, true, None)
                .await
                .map(|_| ())
        }));
    }
    for task in tasks {
        task.await.unwrap().unwrap();
    }

    let (used, used_total): (i64, i64) = sqlx::query_as(
        "SELECT used, used_total FROM subscription_usages \
         WHERE subscription_id = $1 AND feature_id = $2",
    )
    .bind(subscription.id)
    .bind("build.minutes")
    .fetch_one(&pool)
    .await
    .unwrap();
    assert_eq!(used, 30);
    assert_eq!(used_total, 30);
}

#[sqlx::test]
#[ignore = "requires DATABASE_URL with Postgres server"]
async fn postgres_update_rolls_back_without_commit(pool: PgPool) {
    sqlx::migrate!("./migrations").run(&pool).await.unwrap();

    let subscriptions = SubscriptionService::new(
        catalog().into_shared(),
        Arc::new(PgSubscriptionRepository::new(pool.clone())),
    );
    let subscription = subscriptions
        .subscribe("owner-1", "main", "monthly".into())
        .await
        .unwrap();
    let usage = PgUsageRepository::new(pool.clone());

    let update = usage
        .begin_update(subscription.id, "build.minutes", true)
        .await
        .unwrap();
    let mut entry = update.current().cloned().expect("row created inside the transaction");
    assert_eq!(entry.used, 0);
    entry.used = 12;
    entry.used_total = 12;
    drop(update);

    assert!(usage
        .find(subscription.id, "build.minutes")
        .await
        .unwrap()
        .is_none());

    let update = usage
        .begin_update(subscription.id, "build.minutes", true)
        .await
        .unwrap();
    let saved = update.commit(&entry).await.unwrap();
    assert_eq!(saved.used, 12);
    assert_eq!(
        usage
            .find(subscription.id, "build.minutes")
            .await
            .unwrap()
            .map(|stored| stored.used_total),
        Some(12)
    );
}
