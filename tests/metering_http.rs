use std::sync::Arc;

use entitlements::{
    Catalog, EntitlementError, HttpMeteringReporter, InMemoryUsageRepository, MeteringReporter,
    QuotaEngine, QuotaEngineConfig, Subscription,
};
use httpmock::prelude::*;

// key: metering-tests -> usage records posted with bearer auth
#[tokio::test]
async fn http_reporter_posts_usage_record() {
    let server = MockServer::start_async().await;

    let usage_mock = server.mock(|when, then| {
        when.method(POST)
            .path("/v1/usage_records")
            .header("authorization", "Bearer metering-token")
            .json_body_partial(
                r#"{"metered_id":"price_metered_minutes","quantity":1000,"action":"increment"}"#,
            );
        then.status(201);
    });

    let reporter = HttpMeteringReporter::new(
        format!("{}/v1/", server.base_url()),
        Some("metering-token".to_string()),
    )
    .unwrap();

    reporter
        .report_overage("price_metered_minutes", 1000)
        .await
        .unwrap();

    usage_mock.assert_async().await;
}

#[tokio::test]
async fn http_reporter_surfaces_rejections() {
    let server = MockServer::start_async().await;

    let usage_mock = server.mock(|when, then| {
        when.method(POST).path("/usage_records");
        then.status(422).body("unknown price");
    });

    let reporter = HttpMeteringReporter::new(server.base_url(), None).unwrap();
    let err = reporter
        .report_overage("price_missing", 10)
        .await
        .expect_err("422 must surface");
    assert!(!err.is_retryable());

    match err {
        EntitlementError::MeteringRejected {
            metered_id,
            status,
            body,
        } => {
            assert_eq!(metered_id, "price_missing");
            assert_eq!(status, 422);
            assert_eq!(body, "unknown price");
        }
        other => panic!("unexpected error: {other:?}"),
    }
    usage_mock.assert_async().await;
}

// key: metering-tests -> engine hands overage to the metering API
#[tokio::test]
async fn engine_reports_metered_overage_over_http() {
    let server = MockServer::start_async().await;

    let first = server.mock(|when, then| {
        when.method(POST)
            .path("/usage_records")
            .json_body_partial(r#"{"metered_id":"price_api_calls","quantity":25}"#);
        then.status(200);
    });

    let mut catalog = Catalog::new();
    catalog.plan("Starter", "starter", None).features(vec![
        Catalog::metered_feature("API Calls", "api.calls", 100).metered_price(
            "price_api_calls",
            0.01,
            "call",
        ),
    ]);

    let engine = QuotaEngine::new(
        catalog.into_shared(),
        Arc::new(InMemoryUsageRepository::new()),
        QuotaEngineConfig::default(),
    )
    .with_metering(Arc::new(
        HttpMeteringReporter::new(server.base_url(), None).unwrap(),
    ));
    let subscription = Subscription::new("owner-1", "main", "starter");

    engine
        .record_feature_usage(&subscription, "api.calls", 80, true, None)
        .await
        .unwrap();
    assert_eq!(first.hits_async().await, 0);

    let entry = engine
        .record_feature_usage(&subscription, "api.calls", 45, true, None)
        .await
        .unwrap()
        .expect("api.calls is on the plan");

    first.assert_async().await;
    assert_eq!(entry.used, 100);
    assert_eq!(entry.used_total, 125);
}
