use thiserror::Error;

/// Rejected mark input. Surfaced to the caller immediately, never queued.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("mark {value} is outside 0..={max}")]
    OutOfRange { value: f64, max: f64 },

    #[error("'{raw}' is not a number or a recognised mark token")]
    NotANumber { raw: String },
}

impl ValidationError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::OutOfRange { .. } => "out_of_range",
            Self::NotANumber { .. } => "not_a_number",
        }
    }
}

#[derive(Debug, Error)]
pub enum GradeError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// Missing subject/evaluation/class context or an unusable grading scale.
    /// Nothing is recorded when this is returned.
    #[error("{0}")]
    Configuration(String),

    #[error("storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error(transparent)]
    Settings(#[from] anyhow::Error),

    /// The write could not be staged for sync; the local change was rolled back.
    #[error(transparent)]
    Sync(#[from] crate::sync::QueueError),
}

impl GradeError {
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }

    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation(v) => v.code(),
            Self::Configuration(_) => "configuration_error",
            Self::Storage(_) => "db_query_failed",
            Self::Settings(_) => "db_query_failed",
            Self::Sync(_) => "sync_queue_failed",
        }
    }
}

pub type GradeResult<T> = Result<T, GradeError>;
