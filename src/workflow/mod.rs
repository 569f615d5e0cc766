mod first_choice;
mod reservation;
mod second_choice;

pub use first_choice::{FirstChoiceUpdated, SlotInfo, SlotListing, StaffLoad};
pub use reservation::{
    CurrentReservation, ReservationEntry, ReservationHistory, ReservationStatusCounts,
    ReservationSummary, SummaryCounts, UpcomingEntry, UpcomingReservations,
};
pub use second_choice::{
    CurrentSecondChoice, HistoryEntry, SecondChoiceCleared, SecondChoiceHistory,
    SecondChoiceUpdated,
};

use std::sync::Arc;

use chrono::NaiveDateTime;
use tracing::{error, warn};

use crate::audit::AuditSink;
use crate::auth::{AuthError, Authenticator, StoreAuthenticator};
use crate::codec::CodecError;
use crate::engine::{Engine, EngineError, StartPolicy};
use crate::model::{BuildingId, CustomerId};

/// Every way a workflow can fail. Callers always get one of these, never a panic.
#[derive(Debug, thiserror::Error)]
pub enum ChoiceError {
    #[error("invalid format; expected {0}")]
    InvalidFormat(&'static str),
    #[error("past dates and times cannot be selected")]
    PastDateRejected,
    #[error("{0}")]
    OutsideBusinessHours(String),
    #[error("the selected time is fully booked; choose another time")]
    SlotFull,
    #[error("no current reservation found")]
    ReservationNotFound,
    #[error("authentication failed; check the customer id, secret and building")]
    AuthenticationFailed,
    #[error("validation failed: {}", .0.join("; "))]
    ValidationFailed(Vec<String>),
    #[error("building configuration missing: {0}")]
    ConfigurationMissing(String),
    /// Detail goes to the log, never to the caller.
    #[error("internal error; please try again later")]
    Repository,
}

impl ChoiceError {
    /// Stable snake_case code for the wire.
    pub fn kind(&self) -> &'static str {
        match self {
            ChoiceError::InvalidFormat(_) => "invalid_format",
            ChoiceError::PastDateRejected => "past_date_rejected",
            ChoiceError::OutsideBusinessHours(_) => "outside_business_hours",
            ChoiceError::SlotFull => "slot_full",
            ChoiceError::ReservationNotFound => "reservation_not_found",
            ChoiceError::AuthenticationFailed => "authentication_failed",
            ChoiceError::ValidationFailed(_) => "validation_failed",
            ChoiceError::ConfigurationMissing(_) => "configuration_missing",
            ChoiceError::Repository => "repository_error",
        }
    }
}

impl From<EngineError> for ChoiceError {
    fn from(e: EngineError) -> Self {
        match e {
            EngineError::UnknownBuilding(building) => {
                ChoiceError::ConfigurationMissing(format!("building {building} is not configured"))
            }
            other => {
                error!("store failure: {other}");
                ChoiceError::Repository
            }
        }
    }
}

impl From<AuthError> for ChoiceError {
    fn from(e: AuthError) -> Self {
        match e {
            AuthError::Failed => ChoiceError::AuthenticationFailed,
            AuthError::Store(e) => e.into(),
        }
    }
}

impl From<CodecError> for ChoiceError {
    fn from(e: CodecError) -> Self {
        match e {
            CodecError::Invalid(errors) => ChoiceError::ValidationFailed(errors),
            other => ChoiceError::ValidationFailed(vec![other.to_string()]),
        }
    }
}

pub(crate) fn now() -> NaiveDateTime {
    chrono::Local::now().naive_local()
}

/// Count a workflow outcome by operation and result kind.
fn observe<T>(operation: &'static str, result: &Result<T, ChoiceError>) {
    let status = match result {
        Ok(_) => "ok",
        Err(e) => e.kind(),
    };
    metrics::counter!(
        crate::observability::WORKFLOW_OUTCOMES_TOTAL,
        "operation" => operation,
        "status" => status
    )
    .increment(1);
}

/// The choice-update workflows over one engine.
pub struct ChoiceService {
    engine: Arc<Engine>,
    auth: Arc<dyn Authenticator>,
    audit: Arc<dyn AuditSink>,
    policy: StartPolicy,
}

impl ChoiceService {
    pub fn new(
        engine: Arc<Engine>,
        auth: Arc<dyn Authenticator>,
        audit: Arc<dyn AuditSink>,
        policy: StartPolicy,
    ) -> Self {
        Self {
            engine,
            auth,
            audit,
            policy,
        }
    }

    /// Wire the engine in as store, authenticator and audit sink.
    pub fn with_engine(engine: Arc<Engine>, policy: StartPolicy) -> Self {
        let auth = Arc::new(StoreAuthenticator::new(engine.clone()));
        let audit: Arc<dyn AuditSink> = engine.clone();
        Self::new(engine, auth, audit, policy)
    }

    pub fn engine(&self) -> &Arc<Engine> {
        &self.engine
    }

    pub fn policy(&self) -> StartPolicy {
        self.policy
    }

    async fn authenticate(
        &self,
        customer: &CustomerId,
        secret: &str,
        building: &BuildingId,
    ) -> Result<(), ChoiceError> {
        self.auth
            .authenticate(customer, secret, building)
            .await
            .map_err(ChoiceError::from)
    }

    /// Best-effort audit write: failures are logged and swallowed.
    async fn audit_best_effort(
        &self,
        customer: &CustomerId,
        building: &BuildingId,
        note: String,
        category: &str,
    ) {
        if let Err(e) = self.audit.append(customer, building, note, category).await {
            warn!(%building, %customer, category, "audit write failed: {e}");
        }
    }
}
