use thiserror::Error;

#[derive(Error, Debug)]
pub enum SpinError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Execution context error: {0}")]
    Context(String),

    #[error("Command source failed: {0}")]
    SourceFailed(String),

    #[error("Stage on context '{context}' panicked: {message}")]
    StagePanicked { context: String, message: String },

    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, SpinError>;
