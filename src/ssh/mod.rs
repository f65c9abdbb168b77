// ABOUTME: SSH engine: connections, shells, and port forwarding.
// ABOUTME: Supports certificate, key, and agent authentication with known_hosts verification.

mod auth;
mod client;
mod engine;
mod error;
mod forward;
mod proxy;
mod session_log;
mod stream;
mod terminal;

pub use auth::{AuthMethod, resolve_auth_methods};
pub use client::{EngineConfig, RusshConnection, RusshEngine};
pub use engine::{Connection, SshEngine};
pub use error::{Error, Result};
pub use session_log::SessionLogConfig;
pub use stream::expand_proxy_command;
