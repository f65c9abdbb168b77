// ABOUTME: SSH engine error types.
// ABOUTME: Covers connection, authentication, channel, forwarding, and unsupported operations.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("connection failed: {0}")]
    Connection(String),

    #[error("authentication failed: no valid credentials")]
    AuthenticationFailed,

    #[error("SSH agent not available: {0}")]
    AgentUnavailable(String),

    #[error("failed to load key from {path}: {reason}")]
    KeyLoadFailed { path: PathBuf, reason: String },

    #[error("channel error: {0}")]
    Channel(String),

    #[error("channel closed unexpectedly")]
    ChannelClosed,

    #[error("forwarding {spec} failed: {reason}")]
    Forward { spec: String, reason: String },

    #[error("invalid endpoint: {0}")]
    InvalidEndpoint(String),

    #[error("proxy protocol error: {0}")]
    Proxy(String),

    #[error("connection lost: {0}")]
    Disconnected(String),

    #[error("{0} is not supported by this SSH engine")]
    Unsupported(&'static str),

    #[error("SSH protocol error: {0}")]
    Protocol(#[from] russh::Error),

    #[error("SSH key error: {0}")]
    Key(#[from] russh::keys::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    pub(crate) fn forward(spec: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        Error::Forward {
            spec: spec.into(),
            reason: reason.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
