use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("invalid query: {0}")]
    InvalidQuery(String),

    #[error("event name not found: {0}")]
    UnknownEventName(String),

    #[error("invalid property filter: {0}")]
    InvalidFilter(String),

    /// A collaborator read failed. `stage` names the pipeline step so the
    /// failure can be traced back from logs.
    #[error("store read failed during {stage}: {source}")]
    Store {
        stage: &'static str,
        #[source]
        source: anyhow::Error,
    },

    #[error("attribution query exceeded deadline of {0:?}")]
    Timeout(Duration),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl CoreError {
    pub fn store(stage: &'static str, source: anyhow::Error) -> Self {
        CoreError::Store { stage, source }
    }

    /// True for errors caused by the caller's query rather than the store.
    pub fn is_config_error(&self) -> bool {
        matches!(
            self,
            CoreError::InvalidQuery(_) | CoreError::UnknownEventName(_) | CoreError::InvalidFilter(_)
        )
    }
}
