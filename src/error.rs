use thiserror::Error;

#[derive(Debug, Error)]
pub enum EntitlementError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("metering error: {0}")]
    Metering(#[from] reqwest::Error),
    #[error("metering rejected usage for `{metered_id}` with status {status}: {body}")]
    MeteringRejected {
        metered_id: String,
        status: u16,
        body: String,
    },
    #[error("metering report for `{metered_id}` timed out after {timeout_ms}ms")]
    MeteringTimeout { metered_id: String, timeout_ms: u64 },
    #[error("plan `{plan_id}` is archived and cannot be used anymore")]
    PlanArchived { plan_id: String },
    #[error("plan id `{plan_id}` is already registered in the catalog")]
    DuplicatePlanId { plan_id: String },
    #[error("plan `{plan_id}` not found")]
    PlanNotFound { plan_id: String },
    #[error("{0}")]
    Message(String),
}

impl EntitlementError {
    /// Metering failures may succeed on a later attempt; plan errors never will.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            EntitlementError::Metering(_)
                | EntitlementError::MeteringTimeout { .. }
                | EntitlementError::Database(_)
        ) || matches!(self, EntitlementError::MeteringRejected { status, .. } if *status >= 500)
    }
}

pub type EntitlementResult<T> = Result<T, EntitlementError>;
