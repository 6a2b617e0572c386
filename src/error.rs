//! Error types for the debugger engine.

use std::path::PathBuf;

use thiserror::Error;

/// Errors raised while loading the interpreter configuration file.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config file {}: {source}", path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("could not parse config file {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
}

/// Interpreter bring-up failures. Fatal to that `initialize` call, retryable.
#[derive(Debug, Error)]
pub enum InitError {
    #[error("failed to load interpreter configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("failed to prepare interpreter environment: {0}")]
    Environment(String),

    #[error("interpreter bring-up failed: {0}")]
    Interpreter(String),
}

/// Failures inside one `execute_code` call. Recovered at the session
/// boundary; an `Interrupted` outcome is user-requested cancellation, not a
/// script bug.
#[derive(Debug, Error)]
pub enum ExecError {
    #[error("python interpreter not initialized")]
    NotInitialized,

    #[error("python execution error: {message}")]
    Python { message: String },

    #[error("execution aborted by user")]
    Interrupted,
}

/// Reasons a run request is refused before a session starts.
#[derive(Debug, Error)]
pub enum RunnerError {
    #[error("code execution already in progress")]
    Busy,

    #[error("python interpreter not initialized")]
    NotInitialized,

    #[error("execution worker is not available")]
    WorkerUnavailable,
}
