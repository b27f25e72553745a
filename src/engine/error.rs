use chrono::NaiveDate;
use ulid::Ulid;

use crate::model::ReservationStatus;

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Malformed input, rejected before any state is read.
    #[error("invalid input: {0}")]
    Validation(&'static str),
    /// The requested dates overlap a CONFIRMED or ACTIVE reservation.
    #[error("{message}")]
    Conflict {
        message: String,
        conflicting_date: NaiveDate,
        reservation_id: Ulid,
    },
    #[error("operation not allowed while reservation {id} is {status}")]
    InvalidState { id: Ulid, status: ReservationStatus },
    #[error("reservation {id} is already {status}")]
    AlreadyTerminal { id: Ulid, status: ReservationStatus },
    #[error("not found: {0}")]
    NotFound(Ulid),
    #[error("reservation {0} already has a pending extension")]
    DuplicatePending(Ulid),
    #[error("extension {0} is already settled")]
    AlreadySettled(Ulid),
    #[error("reservation {0} still has extensions")]
    HasDependents(Ulid),
    #[error("limit exceeded: {0}")]
    LimitExceeded(&'static str),
    #[error("WAL error: {0}")]
    WalError(String),
}

impl EngineError {
    pub(crate) fn conflict(reservation_id: Ulid, conflicting_date: NaiveDate) -> Self {
        EngineError::Conflict {
            message: format!("vehicle is already reserved from {conflicting_date}"),
            conflicting_date,
            reservation_id,
        }
    }

    /// Persistence failures may be retried by idempotent callers; everything
    /// else is a definite business answer.
    pub fn is_retryable(&self) -> bool {
        matches!(self, EngineError::WalError(_))
    }

    pub fn label(&self) -> &'static str {
        match self {
            EngineError::Validation(_) => "validation",
            EngineError::Conflict { .. } => "conflict",
            EngineError::InvalidState { .. } => "invalid_state",
            EngineError::AlreadyTerminal { .. } => "already_terminal",
            EngineError::NotFound(_) => "not_found",
            EngineError::DuplicatePending(_) => "duplicate_pending",
            EngineError::AlreadySettled(_) => "already_settled",
            EngineError::HasDependents(_) => "has_dependents",
            EngineError::LimitExceeded(_) => "limit_exceeded",
            EngineError::WalError(_) => "persistence",
        }
    }
}
