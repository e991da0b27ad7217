//! Application-wide error types.

use std::path::{Path, PathBuf};

use thiserror::Error;

/// Application-wide result type.
pub type Result<T> = std::result::Result<T, Error>;

/// Application-wide error type.
#[derive(Error, Debug)]
pub enum Error {
    /// A persisted or submitted record failed schema validation.
    #[error("Validation error: {0}")]
    Validation(String),

    /// External tool exited non-zero or could not be spawned.
    #[error("{tool} {status}")]
    Process { tool: String, status: String },

    /// Cancelled through the task's token. Not a failure.
    #[error("Operation aborted")]
    Aborted,

    /// Not enough disk space, or an expected output file is missing or empty.
    #[error("Resource error: {0}")]
    Resource(String),

    #[error("Persistence error while {op} {}: {source}", path.display())]
    Persistence {
        op: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Registration error: {0}")]
    Registration(String),

    #[error("Unknown task type: {0}")]
    UnknownTaskType(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("IO error while {op} {}: {source}", path.display())]
    IoPath {
        op: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Pipeline failure tagged with the stage it happened in.
    #[error("{source}")]
    StageFailed {
        stage: u8,
        #[source]
        source: Box<Error>,
    },

    #[error("{0}")]
    Other(String),
}

impl Error {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn process(tool: impl Into<String>, status: impl Into<String>) -> Self {
        Self::Process {
            tool: tool.into(),
            status: status.into(),
        }
    }

    pub fn resource(msg: impl Into<String>) -> Self {
        Self::Resource(msg.into())
    }

    pub fn registration(msg: impl Into<String>) -> Self {
        Self::Registration(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    pub fn io_path(op: &'static str, path: &Path, source: std::io::Error) -> Self {
        Self::IoPath {
            op,
            path: path.to_path_buf(),
            source,
        }
    }

    pub fn persistence(op: &'static str, path: &Path, source: std::io::Error) -> Self {
        Self::Persistence {
            op,
            path: path.to_path_buf(),
            source,
        }
    }

    /// Tag with a pipeline stage. An already tagged error keeps its original stage.
    pub fn at_stage(self, stage: u8) -> Self {
        match self {
            tagged @ Self::StageFailed { .. } => tagged,
            other => Self::StageFailed {
                stage,
                source: Box::new(other),
            },
        }
    }

    /// Pipeline stage the error was raised in, if any.
    pub fn stage(&self) -> Option<u8> {
        match self {
            Self::StageFailed { stage, .. } => Some(*stage),
            _ => None,
        }
    }

    pub fn is_aborted(&self) -> bool {
        match self {
            Self::Aborted => true,
            Self::StageFailed { source, .. } => source.is_aborted(),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stage_tag_is_kept_once() {
        let err = Error::resource("disk full").at_stage(1).at_stage(5);
        assert_eq!(err.stage(), Some(1));
        assert_eq!(err.to_string(), "Resource error: disk full");
    }

    #[test]
    fn aborted_is_seen_through_stage_tag() {
        assert!(Error::Aborted.at_stage(2).is_aborted());
        assert!(!Error::process("ffmpeg", "failed").is_aborted());
    }

    #[test]
    fn process_message() {
        let err = Error::process("yt-dlp", "failed with exit code 1");
        assert_eq!(err.to_string(), "yt-dlp failed with exit code 1");
    }
}
