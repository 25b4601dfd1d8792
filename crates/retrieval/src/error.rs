//! Error types for time-series retrieval.

use chrono::{DateTime, Utc};
use thiserror::Error;

use hydro_common::{DataModelError, DatasetOrientation, TimeScale};

/// Result type alias using RetrievalError.
pub type RetrievalResult<T> = Result<T, RetrievalError>;

/// Boxed cause carried by access errors.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors raised while building retrievers or streaming series.
#[derive(Debug, Error)]
pub enum RetrievalError {
    // === Construction ===
    #[error("Invalid retrieval configuration: {0}")]
    Configuration(String),

    // === Timescale consistency ===
    #[error(
        "Inconsistent time scale in {orientation} series {series_id} at {valid_time}: \
         other events have {expected}, this event has {}",
        describe_scale(.found)
    )]
    TimeScaleMismatch {
        orientation: DatasetOrientation,
        series_id: i64,
        valid_time: DateTime<Utc>,
        expected: TimeScale,
        found: Option<TimeScale>,
    },

    #[error(
        "The {orientation} event at {valid_time} was declared with time scale {declared} \
         but the data records {}",
        describe_scale(.found)
    )]
    DeclaredTimeScaleMismatch {
        orientation: DatasetOrientation,
        valid_time: DateTime<Utc>,
        declared: TimeScale,
        found: Option<TimeScale>,
    },

    // === Backend ===
    #[error("Failed to access {orientation} data: {message}")]
    Access {
        orientation: DatasetOrientation,
        message: String,
        #[source]
        source: Option<BoxError>,
    },

    #[error(
        "Rows for {orientation} arrived out of order: series {next} followed series {previous}"
    )]
    OutOfOrder {
        orientation: DatasetOrientation,
        previous: i64,
        next: i64,
    },

    #[error("Malformed row for series {series_id}: {message}")]
    InvalidRow { series_id: i64, message: String },

    // === Capability ===
    #[error("{operation} is not supported when retrieving {context}")]
    Unsupported {
        operation: &'static str,
        context: String,
    },

    #[error(transparent)]
    DataModel(#[from] DataModelError),
}

fn describe_scale(scale: &Option<TimeScale>) -> String {
    match scale {
        Some(s) => s.to_string(),
        None => "no time scale".to_string(),
    }
}

impl RetrievalError {
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }

    pub fn access(orientation: DatasetOrientation, message: impl Into<String>) -> Self {
        Self::Access {
            orientation,
            message: message.into(),
            source: None,
        }
    }

    pub fn access_with<E>(
        orientation: DatasetOrientation,
        message: impl Into<String>,
        cause: E,
    ) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Access {
            orientation,
            message: message.into(),
            source: Some(Box::new(cause)),
        }
    }

    pub fn unsupported(operation: &'static str, context: impl Into<String>) -> Self {
        Self::Unsupported {
            operation,
            context: context.into(),
        }
    }

    pub fn is_unsupported(&self) -> bool {
        matches!(self, Self::Unsupported { .. })
    }

    pub fn is_access(&self) -> bool {
        matches!(self, Self::Access { .. })
    }

    pub fn is_time_scale_error(&self) -> bool {
        matches!(
            self,
            Self::TimeScaleMismatch { .. } | Self::DeclaredTimeScaleMismatch { .. }
        )
    }
}

/// Backend failures that have not yet been attributed to an orientation.
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Query cancelled: {0}")]
    Cancelled(String),

    #[error("{0}")]
    Other(String),
}

impl BackendError {
    /// Attribute this failure to one side of the evaluation.
    pub fn into_retrieval(self, orientation: DatasetOrientation) -> RetrievalError {
        let message = self.to_string();
        RetrievalError::access_with(orientation, message, self)
    }
}

pub type BackendResult<T> = Result<T, BackendError>;
