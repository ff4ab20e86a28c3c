use std::io;

use thiserror::Error;

/// Failure of a single call into the operating system.
#[derive(Error, Debug)]
pub enum OsError {
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("{0} not found")]
    NotFound(String),

    #[error("not supported on this platform: {0}")]
    Unsupported(String),

    #[error("`{program}` failed: {detail}")]
    Command { program: String, detail: String },

    #[error("timed out after {0} ms")]
    TimedOut(u64),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl OsError {
    pub fn command<P: Into<String>, D: Into<String>>(program: P, detail: D) -> Self {
        OsError::Command {
            program: program.into(),
            detail: detail.into(),
        }
    }

    pub fn unsupported<S: Into<String>>(what: S) -> Self {
        OsError::Unsupported(what.into())
    }

    /// True for access failures that elevation could fix.
    pub fn is_permission(&self) -> bool {
        match self {
            OsError::PermissionDenied(_) => true,
            OsError::Io(err) => err.kind() == io::ErrorKind::PermissionDenied,
            _ => false,
        }
    }
}

/// Why one catalog item or one pid could not be acted upon.
///
/// None of these abort a batch; each is rendered into the failed result
/// for the single item it concerns.
#[derive(Error, Debug)]
pub enum ActionError {
    #[error("{0} is not available on this system")]
    Unavailable(String),

    #[error(transparent)]
    Os(#[from] OsError),

    #[error("unknown selection `{0}`")]
    InvalidSelection(String),

    #[error("{0} requires administrator privileges; re-run elevated")]
    ElevationRequired(String),
}

impl ActionError {
    /// Map an OS failure for `what`, turning access errors into
    /// `ElevationRequired` when the process is not elevated.
    pub fn from_os(what: &str, err: OsError, elevated: bool) -> Self {
        if !elevated && err.is_permission() {
            ActionError::ElevationRequired(what.to_string())
        } else {
            ActionError::Os(err)
        }
    }
}
