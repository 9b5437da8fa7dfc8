use once_cell::sync::Lazy;
use std::fs;
use std::time::Duration;

/// Base URL of the metering API that receives over-quota usage. Unset disables
/// the HTTP reporter.
pub static METERING_ENDPOINT: Lazy<Option<String>> =
    Lazy::new(|| read_optional_env("METERING_ENDPOINT"));

/// Bearer token presented to the metering API. `METERING_API_TOKEN_FILE`
/// takes precedence over `METERING_API_TOKEN` when both are set.
pub static METERING_API_TOKEN: Lazy<Option<String>> =
    Lazy::new(|| read_secret_env("METERING_API_TOKEN", "METERING_API_TOKEN_FILE"));

/// key: metering-config -> upper bound on a single overage report
pub static METERING_REPORT_TIMEOUT_MS: Lazy<u64> =
    Lazy::new(|| read_positive_env("METERING_REPORT_TIMEOUT_MS", 10_000));

/// key: usage-sync-config -> upper bound on a ground-truth recalculation
pub static USAGE_SYNC_TIMEOUT_MS: Lazy<u64> =
    Lazy::new(|| read_positive_env("USAGE_SYNC_TIMEOUT_MS", 5_000));

/// Currency carried by plans and items created without one. Defaults to `EUR`.
pub static DEFAULT_CURRENCY: Lazy<String> = Lazy::new(|| {
    read_optional_env("DEFAULT_CURRENCY")
        .map(|value| value.to_ascii_uppercase())
        .unwrap_or_else(|| "EUR".to_string())
});

/// Timeouts applied by the quota engine around collaborator calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuotaEngineConfig {
    pub metering_timeout: Duration,
    pub sync_timeout: Duration,
}

impl QuotaEngineConfig {
    pub fn from_env() -> Self {
        Self {
            metering_timeout: Duration::from_millis(*METERING_REPORT_TIMEOUT_MS),
            sync_timeout: Duration::from_millis(*USAGE_SYNC_TIMEOUT_MS),
        }
    }
}

impl Default for QuotaEngineConfig {
    fn default() -> Self {
        Self {
            metering_timeout: Duration::from_millis(10_000),
            sync_timeout: Duration::from_millis(5_000),
        }
    }
}

fn read_optional_env(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn read_positive_env(key: &str, default_value: u64) -> u64 {
    std::env::var(key)
        .ok()
        .and_then(|value| value.trim().parse::<u64>().ok())
        .filter(|value| *value > 0)
        .unwrap_or(default_value)
}

fn read_secret_env(value_key: &str, file_key: &str) -> Option<String> {
    if let Some(path) = read_optional_env(file_key) {
        match fs::read_to_string(&path) {
            Ok(contents) => {
                let trimmed = contents.trim().to_string();
                if !trimmed.is_empty() {
                    return Some(trimmed);
                }
            }
            Err(err) => {
                tracing::warn!(%err, %path, key = file_key, "failed to read secret file");
            }
        }
    }

    read_optional_env(value_key)
}
