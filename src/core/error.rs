//! Error types for scheduling, throttling, and execution.

use thiserror::Error;

/// Errors produced by scheduler components.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// The job definition source could not be read.
    #[error("definition source unavailable: {0}")]
    SourceUnavailable(String),
    /// A job definition cannot be turned into a registration.
    #[error("invalid definition for job `{job}`: {reason}")]
    InvalidDefinition {
        /// Job name as reported by the source.
        job: String,
        /// Human-readable reason.
        reason: String,
    },
    /// The external process command is missing or blank.
    #[error("external process command is required")]
    MissingCommand,
    /// The external process could not be spawned.
    #[error("failed to launch `{command}`: {source}")]
    ProcessLaunch {
        /// Command that failed to launch.
        command: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
    /// The external process exited with a non-zero code.
    #[error("external process exited with code {code}")]
    NonZeroExit {
        /// Exit code reported by the process (`-1` when terminated by a signal).
        code: i32,
    },
    /// The operation was cancelled while waiting.
    #[error("operation cancelled")]
    Cancelled,
    /// The fire-time engine rejected an operation.
    #[error("engine error: {0}")]
    Engine(String),
    /// Configuration snapshot could not be read or written.
    #[error("configuration cache error: {0}")]
    Cache(String),
    /// Configuration values are invalid.
    #[error("invalid configuration: {0}")]
    Config(String),
}

impl SchedulerError {
    /// Exit code carried by the error, if any.
    #[must_use]
    pub const fn exit_code(&self) -> Option<i32> {
        match self {
            Self::NonZeroExit { code } => Some(*code),
            _ => None,
        }
    }
}

/// Application-facing result using anyhow for higher-level contexts.
pub type AppResult<T> = Result<T, anyhow::Error>;
