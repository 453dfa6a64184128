use thiserror::Error;

use crate::events::Channel;

#[derive(Debug, Error)]
pub enum SweepError {
    /// Invalid declaration or state request. Raised before any job runs and never retried.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// The child process could not be started or one of its streams could not be opened.
    /// The child's own exit status is never reported through this variant.
    #[error("failed to invoke `{executable}`: {source}")]
    Invocation {
        executable: String,
        #[source]
        source: std::io::Error,
    },

    /// An observer failed while handling a lifecycle event.
    #[error("handler `{handler}` failed on {channel}: {source}")]
    Handler {
        channel: Channel,
        handler: String,
        #[source]
        source: Box<SweepError>,
    },

    #[error("checkpoint error: {0}")]
    Checkpoint(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl SweepError {
    pub fn config(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }

    pub fn is_configuration(&self) -> bool {
        matches!(self, Self::Configuration(_))
    }
}

pub type Result<T> = std::result::Result<T, SweepError>;
