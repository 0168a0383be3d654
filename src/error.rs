use thiserror::Error;

#[derive(Debug, Error)]
pub enum RecommenderError {
    #[error("model has not been trained yet")]
    NotTrained,

    #[error("cannot train on an empty set of known ratings")]
    EmptyTrainingSet,

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("inconsistent state: {0}")]
    InconsistentState(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
}

impl RecommenderError {
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput(message.into())
    }

    pub fn inconsistent(message: impl Into<String>) -> Self {
        Self::InconsistentState(message.into())
    }
}

pub type Result<T> = std::result::Result<T, RecommenderError>;
