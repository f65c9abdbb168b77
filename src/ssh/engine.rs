// ABOUTME: Interface of the SSH engine the session orchestrator drives.
// ABOUTME: One engine creates connections; a connection owns channels and forwards.

use super::auth::{self, AuthMethod};
use super::error::Result;
use super::session_log::SessionLogConfig;
use crate::config::ServerDescriptor;
use async_trait::async_trait;

/// Establishes authenticated connections.
#[async_trait]
pub trait SshEngine: Send + Sync {
    type Connection: Connection;

    /// Authentication methods usable for `server`. An empty list means the
    /// target cannot be authenticated and must not be dialed.
    fn auth_methods(&self, server: &ServerDescriptor) -> Vec<AuthMethod> {
        auth::resolve_auth_methods(server)
    }

    /// Dial and authenticate. Called once per session; never retried.
    async fn connect(
        &self,
        server: &ServerDescriptor,
        methods: &[AuthMethod],
    ) -> Result<Self::Connection>;
}

/// A live, authenticated SSH connection.
///
/// Channel creation must be safe from concurrent tasks: dynamic-style
/// forwards share one connection without any caller-side locking.
#[async_trait]
pub trait Connection: Send + Sync + 'static {
    /// An open session channel, not yet attached to a shell.
    type Session: Send;

    async fn create_session(&self) -> Result<Self::Session>;

    /// Attach the local SSH agent to `session`.
    async fn forward_agent(&self, session: &mut Self::Session) -> Result<()>;

    /// Start a local listener on `bind` tunnelling to `target`. Returns once
    /// the listener is up; accepted connections are served in the background.
    async fn tcp_local_forward(&self, bind: &str, target: &str) -> Result<()>;

    /// Ask the server to listen on `bind` and tunnel to local `target`.
    async fn tcp_remote_forward(&self, bind: &str, target: &str) -> Result<()>;

    // The dynamic-style forwards below run until they fail or are aborted.

    /// Local SOCKS5 proxy on `address:port`, dialing through the connection.
    async fn dynamic_forward(&self, address: &str, port: &str) -> Result<()>;

    /// Remote SOCKS5 proxy on the server's `address:port`, dialing locally.
    async fn reverse_dynamic_forward(&self, address: &str, port: &str) -> Result<()>;

    /// Local HTTP proxy on `address:port`, dialing through the connection.
    async fn http_dynamic_forward(&self, address: &str, port: &str) -> Result<()>;

    /// Remote HTTP proxy on the server's `address:port`, dialing locally.
    async fn http_reverse_dynamic_forward(&self, address: &str, port: &str) -> Result<()>;

    /// Serve the remote `path` over NFS on local `address:port`.
    async fn nfs_forward(&self, address: &str, port: &str, path: &str) -> Result<()>;

    /// Serve the local `path` over NFS on the server's `address:port`.
    async fn nfs_reverse_forward(&self, address: &str, port: &str, path: &str) -> Result<()>;

    /// Tee terminal output of subsequent shells into a log file.
    fn set_log(&self, log: SessionLogConfig);

    /// Probe the transport; an error means the connection is gone.
    async fn check_alive(&self) -> Result<()>;

    /// Attach an interactive shell and block until it exits.
    async fn shell(&self, session: Self::Session) -> Result<()>;

    /// Attach an interactive shell started with `command` and block until it exits.
    async fn command_shell(&self, session: Self::Session, command: &str) -> Result<()>;

    async fn close(&self) -> Result<()>;
}
