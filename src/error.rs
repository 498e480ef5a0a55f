use std::fmt;
use std::path::PathBuf;
use std::process::ExitStatus;

use thiserror::Error;

/// Direction of a logical channel, used in channel errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Input,
    Output,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Input => f.write_str("input"),
            Direction::Output => f.write_str("output"),
        }
    }
}

/// Coarse classification of an [`EngineError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The operation descriptor or a config file is invalid
    Configuration,
    /// The transcoder binary could not be located
    Environment,
    /// A file check or pipe allocation failed
    Resource,
    /// The transcoder process could not be spawned
    Start,
    /// The transcoder exited unsuccessfully
    Runtime,
    /// The operation was cancelled or hit its deadline
    Cancellation,
    /// A logical channel was misused
    Channel,
}

/// Main error type for the engine
#[derive(Error, Debug)]
pub enum EngineError {
    /// A descriptor field is missing, out of range or inconsistent with the operation
    #[error("configuration error: {field}: {reason}")]
    InvalidConfig { field: String, reason: String },

    /// A configuration file could not be read or parsed
    #[error("Configuration error: {0}")]
    Config(String),

    /// The transcoder binary was not found on the host
    #[error("transcoder binary not found: {0}")]
    BinaryNotFound(String),

    /// A file-mode input or output failed its pre-flight check
    #[error("file check failed for {}: {reason}", .path.display())]
    FileCheck { path: PathBuf, reason: String },

    /// An OS pipe could not be allocated or registered with the runtime
    #[error("failed to allocate pipe: {0}")]
    Pipe(#[source] std::io::Error),

    /// The transcoder process could not be spawned
    #[error("failed to start transcoder: {0}")]
    Start(#[source] std::io::Error),

    /// The transcoder exited with a non-zero status
    #[error("transcoder exit error: {status}{}", stderr_suffix(.stderr))]
    Exit { status: ExitStatus, stderr: String },

    /// The operation was cancelled by the caller
    #[error("operation cancelled")]
    Cancelled,

    /// The configured deadline elapsed before the transcoder finished
    #[error("operation deadline exceeded")]
    DeadlineExceeded,

    /// The logical channel index does not exist for this operation
    #[error("{direction} channel {index} out of range")]
    ChannelOutOfRange { direction: Direction, index: usize },

    /// The logical channel has already been closed
    #[error("{direction} channel {index} is closed")]
    ChannelClosed { direction: Direction, index: usize },

    /// Channel I/O is not available for disk-file invocations
    #[error("{0} is not supported in file mode")]
    Unsupported(&'static str),

    /// The engine has not been started, or has already been torn down
    #[error("engine not running")]
    NotRunning,

    /// A standard I/O error on a channel or the process handle
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

fn stderr_suffix(stderr: &str) -> String {
    if stderr.is_empty() {
        String::new()
    } else {
        format!(", stderr: {}", stderr)
    }
}

impl EngineError {
    pub(crate) fn invalid(field: impl Into<String>, reason: impl Into<String>) -> Self {
        EngineError::InvalidConfig {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Classify this error into one of the engine's error categories.
    pub fn kind(&self) -> ErrorKind {
        match self {
            EngineError::InvalidConfig { .. } | EngineError::Config(_) => ErrorKind::Configuration,
            EngineError::BinaryNotFound(_) => ErrorKind::Environment,
            EngineError::FileCheck { .. } | EngineError::Pipe(_) => ErrorKind::Resource,
            EngineError::Start(_) => ErrorKind::Start,
            EngineError::Exit { .. } => ErrorKind::Runtime,
            EngineError::Cancelled | EngineError::DeadlineExceeded => ErrorKind::Cancellation,
            EngineError::ChannelOutOfRange { .. }
            | EngineError::ChannelClosed { .. }
            | EngineError::Unsupported(_)
            | EngineError::NotRunning
            | EngineError::Io(_) => ErrorKind::Channel,
        }
    }

    /// True for both explicit cancellation and an elapsed deadline.
    pub fn is_cancellation(&self) -> bool {
        self.kind() == ErrorKind::Cancellation
    }
}

/// Result type alias for convenience
pub type Result<T> = std::result::Result<T, EngineError>;
