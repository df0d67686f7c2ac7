use serde::{Deserialize, Serialize};
use std::fmt;
use std::io;
use std::time::Duration;
use thiserror::Error;

/// OS error code for "no space left on device".
const ENOSPC: i32 = 28;

/// Classification of a failure raised by a wrapped operation.
///
/// `Busy` and `Locked` are transient contention and worth retrying. The
/// remaining kinds are structural and retrying them will not help.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    Busy,
    Locked,
    ConstraintViolation,
    Corrupt,
    NoSpace,
    Unknown,
}

impl ErrorKind {
    /// All kinds, in a stable order usable as counter indices.
    pub const ALL: [ErrorKind; 6] = [
        ErrorKind::Busy,
        ErrorKind::Locked,
        ErrorKind::ConstraintViolation,
        ErrorKind::Corrupt,
        ErrorKind::NoSpace,
        ErrorKind::Unknown,
    ];

    /// Whether an operation failing with this kind may be attempted again.
    pub fn is_retryable(self) -> bool {
        matches!(self, ErrorKind::Busy | ErrorKind::Locked)
    }

    /// Stable index into [`ErrorKind::ALL`].
    pub fn index(self) -> usize {
        match self {
            ErrorKind::Busy => 0,
            ErrorKind::Locked => 1,
            ErrorKind::ConstraintViolation => 2,
            ErrorKind::Corrupt => 3,
            ErrorKind::NoSpace => 4,
            ErrorKind::Unknown => 5,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::Busy => "busy",
            ErrorKind::Locked => "locked",
            ErrorKind::ConstraintViolation => "constraint_violation",
            ErrorKind::Corrupt => "corrupt",
            ErrorKind::NoSpace => "no_space",
            ErrorKind::Unknown => "unknown",
        }
    }

    /// Classify an error message by the storage engine's well-known markers.
    ///
    /// Matching is case-insensitive and checked in order, so a message that
    /// mentions both `BUSY` and `CONSTRAINT` is treated as contention.
    pub fn from_message(message: &str) -> Self {
        let upper = message.to_ascii_uppercase();
        if upper.contains("BUSY") {
            ErrorKind::Busy
        } else if upper.contains("LOCKED") {
            // also covers "database is locked"
            ErrorKind::Locked
        } else if upper.contains("CONSTRAINT") {
            ErrorKind::ConstraintViolation
        } else if upper.contains("CORRUPT") || upper.contains("MALFORMED") {
            ErrorKind::Corrupt
        } else if upper.contains("ENOSPC") || upper.contains("NO SPACE LEFT") {
            ErrorKind::NoSpace
        } else {
            ErrorKind::Unknown
        }
    }

    /// Classify an error raised by a caller-supplied operation.
    ///
    /// The cause chain is searched for a [`BulwarkError`] (which keeps its
    /// own kind) or an [`io::Error`] carrying `ENOSPC` before falling back to
    /// message matching on the rendered chain.
    pub fn classify(err: &anyhow::Error) -> Self {
        for cause in err.chain() {
            if let Some(bulwark) = cause.downcast_ref::<BulwarkError>() {
                return bulwark.kind();
            }
            if let Some(io_err) = cause.downcast_ref::<io::Error>() {
                if io_err.raw_os_error() == Some(ENOSPC) {
                    return ErrorKind::NoSpace;
                }
            }
        }
        Self::from_message(&format!("{:#}", err))
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A compensation that failed while rolling a transaction back.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompensationFailure {
    pub step: String,
    pub error: String,
}

#[derive(Error, Debug)]
pub enum BulwarkError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Not found: {0}")]
    NotFound(String),

    /// Terminal failure of a retried operation.
    #[error("Operation failed ({kind}) after {attempts} attempt(s) in {elapsed:?}: {message}")]
    Operation {
        kind: ErrorKind,
        message: String,
        attempts: u32,
        elapsed: Duration,
        #[source]
        source: anyhow::Error,
    },

    #[error("Transaction '{transaction}' step '{step}' failed: {message}")]
    StepFailed {
        transaction: String,
        step: String,
        kind: ErrorKind,
        message: String,
    },

    #[error("Rollback of transaction '{transaction}' incomplete: {} compensation(s) failed", failures.len())]
    Rollback {
        transaction: String,
        failures: Vec<CompensationFailure>,
        /// The step failure that triggered the rollback, if any.
        cause: Option<String>,
    },

    #[error("Task '{task_id}' failed after {attempts} attempt(s): {last_error}")]
    TaskFailed {
        task_id: String,
        attempts: u32,
        last_error: String,
    },

    #[error("Task '{task_id}' was cancelled at {progress:.1}%")]
    Cancelled { task_id: String, progress: f64 },

    #[error("Write was dropped before it settled")]
    WriteDropped,

    #[error("Other error: {0}")]
    Other(#[from] anyhow::Error),
}

impl BulwarkError {
    /// Machine-readable kind of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            BulwarkError::Operation { kind, .. } | BulwarkError::StepFailed { kind, .. } => *kind,
            BulwarkError::Io(e) if e.raw_os_error() == Some(ENOSPC) => ErrorKind::NoSpace,
            BulwarkError::Other(e) => ErrorKind::classify(e),
            BulwarkError::TaskFailed { last_error, .. } => ErrorKind::from_message(last_error),
            _ => ErrorKind::Unknown,
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.kind().is_retryable()
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, BulwarkError::Cancelled { .. })
    }
}

impl From<serde_json::Error> for BulwarkError {
    fn from(err: serde_json::Error) -> Self {
        BulwarkError::Serialization(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, BulwarkError>;
