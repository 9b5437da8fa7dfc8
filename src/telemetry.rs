use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tracing::{info, warn};
use tracing_subscriber::{fmt, EnvFilter};

/// Installs a JSON `fmt` subscriber filtered by `RUST_LOG`. Safe to call more
/// than once; later calls are ignored.
pub fn init_tracing() {
    let _ = fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .json()
        .try_init();
}

#[derive(Debug, Serialize, Clone)]
pub struct UsageEvent {
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub event_type: String,
    pub details: Option<Value>,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum UsageEventValidationError {
    #[error("usage event `{event_type}` missing detail payload")]
    MissingDetails { event_type: String },
    #[error("usage event `{event_type}` missing required detail `{field}`")]
    MissingField {
        event_type: String,
        field: &'static str,
    },
}

pub fn validate_usage_event_details(
    event_type: &str,
    details: Option<&Value>,
) -> Result<(), UsageEventValidationError> {
    match event_type {
        "usage_recorded" | "usage_reduced" => {
            let payload = require_details(event_type, details)?;
            require_field(payload, event_type, "subscription_id")?;
            require_field(payload, event_type, "feature_id")?;
            require_field(payload, event_type, "used")?;
            require_field(payload, event_type, "used_total")?;
        }
        "quota_exceeded" => {
            let payload = require_details(event_type, details)?;
            require_field(payload, event_type, "subscription_id")?;
            require_field(payload, event_type, "feature_id")?;
            require_field(payload, event_type, "quota")?;
            require_field(payload, event_type, "over_quota")?;
        }
        "metered_overage_reported" => {
            let payload = require_details(event_type, details)?;
            require_field(payload, event_type, "subscription_id")?;
            require_field(payload, event_type, "metered_id")?;
            require_field(payload, event_type, "quantity")?;
        }
        "quotas_reset" => {
            let payload = require_details(event_type, details)?;
            require_field(payload, event_type, "subscription_id")?;
            require_field(payload, event_type, "cleared")?;
        }
        _ => {}
    }
    Ok(())
}

/// Validates and logs a structured usage event. Malformed events are logged
/// as warnings instead of being emitted.
pub fn emit_usage_event(event_type: &str, details: Value) -> Option<UsageEvent> {
    if let Err(err) = validate_usage_event_details(event_type, Some(&details)) {
        warn!(%err, event_type, "dropping malformed usage event");
        return None;
    }
    info!(event_type, details = %details, "usage event");
    Some(UsageEvent {
        timestamp: chrono::Utc::now(),
        event_type: event_type.to_string(),
        details: Some(details),
    })
}

fn require_details<'a>(
    event_type: &str,
    details: Option<&'a Value>,
) -> Result<&'a Value, UsageEventValidationError> {
    details.ok_or_else(|| UsageEventValidationError::MissingDetails {
        event_type: event_type.to_string(),
    })
}

fn require_field<'a>(
    payload: &'a Value,
    event_type: &str,
    field: &'static str,
) -> Result<&'a Value, UsageEventValidationError> {
    payload
        .get(field)
        .ok_or_else(|| UsageEventValidationError::MissingField {
            event_type: event_type.to_string(),
            field,
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn quota_exceeded_requires_expected_fields() {
        let payload = json!({
            "subscription_id": "6f1c",
            "feature_id": "build.minutes",
            "quota": 3000,
            "over_quota": 1000,
        });

        assert!(validate_usage_event_details("quota_exceeded", Some(&payload)).is_ok());
    }

    #[test]
    fn missing_field_is_reported() {
        let payload = json!({
            "subscription_id": "6f1c",
            "quantity": 10,
        });

        let err = validate_usage_event_details("metered_overage_reported", Some(&payload))
            .expect_err("missing metered_id should error");
        assert!(matches!(
            err,
            UsageEventValidationError::MissingField {
                field: "metered_id",
                ..
            }
        ));
    }

    #[test]
    fn malformed_events_are_not_emitted() {
        assert!(emit_usage_event("quotas_reset", json!({ "subscription_id": "6f1c" })).is_none());

        let event = emit_usage_event(
            "quotas_reset",
            json!({ "subscription_id": "6f1c", "cleared": 2 }),
        )
        .expect("valid event");
        assert_eq!(event.event_type, "quotas_reset");
    }

    #[test]
    fn unknown_events_pass_through() {
        assert!(validate_usage_event_details("custom", None).is_ok());
    }
}
