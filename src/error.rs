use thiserror::Error;

/// Errors raised at the edges of the planner: input validation, backup
/// documents and file access. The projection engine itself never fails.
#[derive(Debug, Error)]
pub enum PlannerError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("invalid backup: {0}")]
    InvalidBackup(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, PlannerError>;
