use thiserror::Error;

/// Result type for stage-sync operations
pub type Result<T> = std::result::Result<T, PipelineError>;

/// Errors that can occur while building or running a pipeline
#[derive(Error, Debug)]
pub enum PipelineError {
    /// Non-positive party count, capacity or tick count, or an unusable config
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// Enqueue attempted on a closed queue
    #[error("Queue is closed")]
    Closed,

    /// The one-time setup action failed or panicked
    #[error("Initialization failed: {reason}")]
    InitializationFailed {
        reason: String,
        #[source]
        source: Option<Box<PipelineError>>,
    },

    /// Error raised by a stage implementation
    #[error("Stage execution failed: {0}")]
    StageError(String),

    /// A run ended because one of its stages failed
    #[error("Stage '{stage}' failed at position {position}: {message}")]
    StageFailed {
        stage: String,
        position: u64,
        message: String,
    },

    /// A run ended early on a stop request
    #[error("Pipeline stopped before completion")]
    Stopped,

    /// Thread join error
    #[error("Thread join error: {0}")]
    ThreadError(String),

    /// Reporter I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl PipelineError {
    /// Shorthand for an [`PipelineError::InvalidConfiguration`]
    pub fn invalid(message: impl Into<String>) -> Self {
        PipelineError::InvalidConfiguration(message.into())
    }

    /// Shorthand for a [`PipelineError::StageError`]
    pub fn stage(message: impl Into<String>) -> Self {
        PipelineError::StageError(message.into())
    }
}
