use std::sync::Mutex;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config;
use crate::error::{EntitlementError, EntitlementResult};

/// key: metering-reporter -> pay-as-you-go hand-off for over-quota usage
///
/// Failures surface to the caller; retrying is left to the implementation.
#[async_trait]
pub trait MeteringReporter: Send + Sync {
    async fn report_overage(&self, metered_id: &str, quantity: i64) -> EntitlementResult<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UsageAction {
    Increment,
    Set,
}

/// Usage record pushed to the metering API.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UsageReport {
    pub metered_id: String,
    pub quantity: i64,
    pub action: UsageAction,
    pub timestamp: DateTime<Utc>,
}

impl UsageReport {
    pub fn increment(metered_id: impl Into<String>, quantity: i64) -> Self {
        Self {
            metered_id: metered_id.into(),
            quantity,
            action: UsageAction::Increment,
            timestamp: Utc::now(),
        }
    }
}

/// Posts usage records to `{base_url}/usage_records`.
pub struct HttpMeteringReporter {
    client: reqwest::Client,
    base_url: String,
    auth_token: Option<String>,
}

impl HttpMeteringReporter {
    pub fn new(base_url: impl Into<String>, auth_token: Option<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(*config::METERING_REPORT_TIMEOUT_MS))
            .build()
            .context("failed to build metering client")?;
        Ok(Self {
            client,
            base_url: base_url.into(),
            auth_token,
        })
    }

    /// Builds a reporter from `METERING_ENDPOINT`; `None` when it is unset.
    pub fn from_env() -> Result<Option<Self>> {
        match config::METERING_ENDPOINT.as_ref() {
            Some(endpoint) => Ok(Some(Self::new(
                endpoint.clone(),
                config::METERING_API_TOKEN.clone(),
            )?)),
            None => Ok(None),
        }
    }

    fn endpoint(&self, path: &str) -> String {
        let path = path.trim_start_matches('/');
        format!("{}/{}", self.base_url.trim_end_matches('/'), path)
    }

    fn auth(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        if let Some(token) = &self.auth_token {
            request.bearer_auth(token)
        } else {
            request
        }
    }
}

#[async_trait]
impl MeteringReporter for HttpMeteringReporter {
    async fn report_overage(&self, metered_id: &str, quantity: i64) -> EntitlementResult<()> {
        let report = UsageReport::increment(metered_id, quantity);
        let response = self
            .auth(self.client.post(self.endpoint("usage_records")))
            .json(&report)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(
                %metered_id,
                quantity,
                status = status.as_u16(),
                "metering rejected usage report"
            );
            return Err(EntitlementError::MeteringRejected {
                metered_id: metered_id.to_string(),
                status: status.as_u16(),
                body,
            });
        }

        debug!(%metered_id, quantity, "usage report accepted");
        Ok(())
    }
}

/// Keeps reports in memory. Useful for local runs and tests.
#[derive(Default)]
pub struct InMemoryMeteringReporter {
    reports: Mutex<Vec<UsageReport>>,
}

impl InMemoryMeteringReporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reports(&self) -> Vec<UsageReport> {
        self.reports
            .lock()
            .map(|reports| reports.clone())
            .unwrap_or_default()
    }

    /// Sum of all quantities reported for `metered_id`.
    pub fn total_for(&self, metered_id: &str) -> i64 {
        self.reports()
            .iter()
            .filter(|report| report.metered_id == metered_id)
            .map(|report| report.quantity)
            .sum()
    }
}

#[async_trait]
impl MeteringReporter for InMemoryMeteringReporter {
    async fn report_overage(&self, metered_id: &str, quantity: i64) -> EntitlementResult<()> {
        let mut reports = self
            .reports
            .lock()
            .map_err(|_| EntitlementError::Message("metering report buffer poisoned".to_string()))?;
        reports.push(UsageReport::increment(metered_id, quantity));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn in_memory_reporter_accumulates_per_metered_id() {
        let reporter = InMemoryMeteringReporter::new();
        reporter.report_overage("price_a", 1000).await.unwrap();
        reporter.report_overage("price_a", 4000).await.unwrap();
        reporter.report_overage("price_b", 3).await.unwrap();

        assert_eq!(reporter.total_for("price_a"), 5000);
        assert_eq!(reporter.total_for("price_b"), 3);
        assert_eq!(reporter.reports().len(), 3);
    }

    #[test]
    fn usage_report_serializes_action_in_snake_case() {
        let report = UsageReport::increment("price_a", 12);
        let value = serde_json::to_value(&report).unwrap();
        assert_eq!(value["action"], "increment");
        assert_eq!(value["quantity"], 12);
    }

    #[test]
    fn endpoint_joins_without_double_slash() {
        let reporter = HttpMeteringReporter::new("http://metering.test/", None).unwrap();
        assert_eq!(
            reporter.endpoint("/usage_records"),
            "http://metering.test/usage_records"
        );
    }
}
