use std::io;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, MultiplexError>;

#[derive(Debug, Error)]
pub enum MultiplexError {
    #[error("failed to spawn {command:?}: {source}")]
    Spawn {
        command: String,
        #[source]
        source: io::Error,
    },

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[cfg(unix)]
    #[error("system call failed: {0}")]
    Nix(#[from] nix::errno::Errno),

    #[error("multiplexer is shutting down")]
    ShuttingDown,

    #[error("no session named {name:?}")]
    UnknownSession { name: String },
}

impl MultiplexError {
    #[must_use]
    pub fn spawn(command: impl Into<String>, source: impl Into<io::Error>) -> Self {
        Self::Spawn {
            command: command.into(),
            source: source.into(),
        }
    }

    #[must_use]
    pub fn unknown(name: impl Into<String>) -> Self {
        Self::UnknownSession { name: name.into() }
    }
}
