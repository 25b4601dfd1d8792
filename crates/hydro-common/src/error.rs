//! Error types for the time-series data model.

use chrono::{DateTime, Utc};
use thiserror::Error;

/// Result type alias using DataModelError.
pub type DataModelResult<T> = Result<T, DataModelError>;

/// Errors raised while constructing data-model values.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum DataModelError {
    #[error("Invalid month-day: month {month}, day {day}")]
    InvalidMonthDay { month: u32, day: u32 },

    #[error("Invalid time scale: {0}")]
    InvalidTimeScale(String),

    #[error("Invalid time window: {0}")]
    InvalidTimeWindow(String),

    #[error("Event at {next} is earlier than the previous event at {previous}")]
    EventOutOfOrder {
        previous: DateTime<Utc>,
        next: DateTime<Utc>,
    },

    #[error("Duplicate event at {0}")]
    DuplicateEvent(DateTime<Utc>),

    #[error("Time-series metadata is required: {0}")]
    MissingMetadata(String),

    #[error("Invalid ensemble: {0}")]
    InvalidEnsemble(String),

    #[error("Unrecognized {kind}: '{name}'")]
    UnrecognizedName { kind: &'static str, name: String },
}

impl DataModelError {
    pub fn unrecognized(kind: &'static str, name: impl Into<String>) -> Self {
        Self::UnrecognizedName {
            kind,
            name: name.into(),
        }
    }
}
