use std::path::{Path, PathBuf};

use thiserror::Error;

/// Failure to compose a click-paste insertion.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PasteError {
    #[error("command not found: {command}")]
    CommandNotFound { command: String },

    #[error("terminal has no active command line")]
    NotAtCommandLine,
}

impl PasteError {
    #[must_use]
    pub fn command_not_found(command: impl Into<String>) -> Self {
        Self::CommandNotFound {
            command: command.into(),
        }
    }
}

/// Failure while serving an authenticated file directive.
#[derive(Debug, Error)]
pub enum DirectiveError {
    #[error("directive payload exceeded {limit} bytes")]
    TooLarge { limit: usize },

    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl DirectiveError {
    #[must_use]
    pub fn io(path: &Path, source: std::io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}
