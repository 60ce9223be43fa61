//! Error types for booking-engine operations.

use thiserror::Error;

use crate::model::AppointmentId;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BookingError {
    #[error("Invalid interval: {0}")]
    InvalidInterval(String),

    #[error("Resource inactive: {0}")]
    ResourceInactive(String),

    #[error("Booking conflict with {} appointment(s)", appointment_ids.len())]
    Conflict { appointment_ids: Vec<AppointmentId> },

    #[error("Recurrence bounds exceeded: {0}")]
    RecurrenceBoundsExceeded(String),

    #[error("Timed out waiting for resource lock: {0}")]
    ConcurrencyTimeout(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid status transition: {0}")]
    InvalidTransition(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Storage error: {0}")]
    Storage(String),
}

impl BookingError {
    /// Stable snake_case name of the error kind, used in wire responses.
    pub fn kind(&self) -> &'static str {
        match self {
            BookingError::InvalidInterval(_) => "invalid_interval",
            BookingError::ResourceInactive(_) => "resource_inactive",
            BookingError::Conflict { .. } => "conflict",
            BookingError::RecurrenceBoundsExceeded(_) => "recurrence_bounds_exceeded",
            BookingError::ConcurrencyTimeout(_) => "concurrency_timeout",
            BookingError::NotFound(_) => "not_found",
            BookingError::InvalidTransition(_) => "invalid_transition",
            BookingError::InvalidInput(_) => "invalid_input",
            BookingError::Storage(_) => "storage",
        }
    }

    /// Whether resubmitting the identical request can succeed.
    ///
    /// Only lock timeouts qualify. Every other kind repeats the same
    /// failure until the input changes.
    pub fn is_retryable(&self) -> bool {
        matches!(self, BookingError::ConcurrencyTimeout(_))
    }

    /// Appointment ids carried by a conflict, empty for every other kind.
    pub fn conflicting_ids(&self) -> &[AppointmentId] {
        match self {
            BookingError::Conflict { appointment_ids } => appointment_ids,
            _ => &[],
        }
    }
}

pub type Result<T> = std::result::Result<T, BookingError>;
