use thiserror::Error;

#[derive(Error, Debug)]
pub enum MonitorError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Data unavailable from {source_name}: {reason}")]
    DataUnavailable { source_name: String, reason: String },

    #[error("No data found for subject '{subject_id}'")]
    NotFound { subject_id: String },

    #[error("Blocking query task failed: {0}")]
    BlockingTask(#[from] tokio::task::JoinError),

    #[error("No async runtime to run playback on: {0}")]
    NoRuntime(#[from] tokio::runtime::TryCurrentError),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl MonitorError {
    pub fn unavailable(source_name: &str, reason: impl ToString) -> Self {
        Self::DataUnavailable {
            source_name: source_name.to_string(),
            reason: reason.to_string(),
        }
    }
}

pub type MonitorResult<T> = Result<T, MonitorError>;
