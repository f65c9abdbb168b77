// ABOUTME: Application-wide error types for sshmux.
// ABOUTME: Wraps configuration and session failures plus server selection errors.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("unknown server: {0}")]
    UnknownServer(String),

    #[error("server name {name} is ambiguous, use one of: {}", candidates.join(", "))]
    AmbiguousServer {
        name: String,
        candidates: Vec<String>,
    },

    #[error("invalid forward: {0}")]
    InvalidForward(String),

    #[error(transparent)]
    Config(#[from] crate::config::ConfigError),

    #[error(transparent)]
    Session(#[from] crate::session::SessionError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
