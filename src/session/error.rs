// ABOUTME: Fatal session errors.
// ABOUTME: Engine failures are surfaced verbatim; non-fatal ones go to Diagnostics instead.

use crate::localrc::BootstrapError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("{0} has no usable authentication method")]
    AuthUnavailable(String),

    #[error(transparent)]
    Connect(crate::ssh::Error),

    #[error(transparent)]
    Session(crate::ssh::Error),

    #[error(transparent)]
    Execute(crate::ssh::Error),

    #[error(transparent)]
    Bootstrap(#[from] BootstrapError),
}

pub type Result<T> = std::result::Result<T, SessionError>;
