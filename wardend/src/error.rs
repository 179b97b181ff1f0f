use thiserror::Error;

/// Domain error kinds raised by the decoder, task table, and rule engine.
///
/// Ambient glue (config loading, store setup, CLI) uses `anyhow` instead;
/// this enum exists for the hot-path code that needs to match on *kind*.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("parse failure: {0}")]
    ParseFailure(String),

    #[error("correlation miss: pid={pid} function={function}")]
    CorrelationMiss { pid: i32, function: String },

    #[error("handler error: {0}")]
    HandlerError(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("kernel setup failure: {0}")]
    KernelSetupFailure(String),

    #[error("fatal: {0}")]
    Fatal(String),
}

impl EngineError {
    pub fn is_fatal(&self) -> bool {
        matches!(self, EngineError::Fatal(_))
    }
}
