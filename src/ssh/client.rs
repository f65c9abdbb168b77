// ABOUTME: russh-backed SSH engine and connection.
// ABOUTME: Handles dialing (direct or ProxyCommand), host key checks, shells, and forwards.

use super::auth::{self, AuthMethod};
use super::engine::{Connection, SshEngine};
use super::error::{Error, Result};
use super::forward::{self, RemoteRoute, RouteTable, SharedHandle};
use super::session_log::{SessionLog, SessionLogConfig};
use super::stream::{ChildStream, expand_proxy_command};
use super::terminal::{self, RawModeGuard};
use crate::config::ServerDescriptor;
use async_trait::async_trait;
use parking_lot::Mutex;
use russh::client::{self, Config, Handle, Msg};
use russh::keys::known_hosts::{
    check_known_hosts, check_known_hosts_path, learn_known_hosts, learn_known_hosts_path,
};
use russh::keys::ssh_key;
use russh::{Channel, ChannelMsg, Disconnect};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::task::JoinHandle;

const KEEPALIVE_TIMEOUT: Duration = Duration::from_secs(5);

/// Settings shared by every connection the engine makes.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub connect_timeout: Duration,
    /// Accept and record unknown host keys.
    pub trust_on_first_use: bool,
    /// Defaults to ~/.ssh/known_hosts.
    pub known_hosts_path: Option<PathBuf>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(30),
            trust_on_first_use: true,
            known_hosts_path: None,
        }
    }
}

/// SSH client handler for russh.
pub(crate) struct SshHandler {
    host: String,
    port: u16,
    trust_on_first_use: bool,
    known_hosts_path: Option<PathBuf>,
    routes: RouteTable,
}

impl client::Handler for SshHandler {
    type Error = russh::Error;

    async fn check_server_key(
        &mut self,
        server_public_key: &ssh_key::PublicKey,
    ) -> std::result::Result<bool, Self::Error> {
        let check_result = match &self.known_hosts_path {
            Some(path) => check_known_hosts_path(&self.host, self.port, server_public_key, path),
            None => check_known_hosts(&self.host, self.port, server_public_key),
        };

        match check_result {
            Ok(true) => Ok(true),
            Ok(false) if self.trust_on_first_use => {
                tracing::warn!(
                    "Trust-On-First-Use: accepting unknown host key for {}:{}",
                    self.host,
                    self.port
                );
                let learn_result = match &self.known_hosts_path {
                    Some(path) => learn_known_hosts_path(&self.host, self.port, server_public_key, path),
                    None => learn_known_hosts(&self.host, self.port, server_public_key),
                };
                if let Err(e) = learn_result {
                    tracing::warn!("Failed to save host key to known_hosts: {}", e);
                }
                Ok(true)
            }
            Ok(false) => {
                tracing::warn!("unknown host key for {}:{}", self.host, self.port);
                Ok(false)
            }
            Err(russh::keys::Error::KeyChanged { .. }) => {
                tracing::error!(
                    "host key for {}:{} does not match known_hosts",
                    self.host,
                    self.port
                );
                Ok(false)
            }
            Err(e) => {
                tracing::debug!("known_hosts check failed: {}", e);
                Ok(self.trust_on_first_use)
            }
        }
    }

    async fn server_channel_open_forwarded_tcpip(
        &mut self,
        channel: Channel<Msg>,
        connected_address: &str,
        connected_port: u32,
        originator_address: &str,
        originator_port: u32,
        _session: &mut client::Session,
    ) -> std::result::Result<(), Self::Error> {
        let Some(route) = self.routes.get(connected_port) else {
            tracing::warn!(
                "no route for forwarded channel {}:{}, closing",
                connected_address,
                connected_port
            );
            return Ok(());
        };

        tracing::debug!(
            "forwarded channel {}:{} from {}:{}",
            connected_address,
            connected_port,
            originator_address,
            originator_port
        );
        tokio::spawn(async move {
            if let Err(e) = forward::serve_forwarded(channel, route).await {
                tracing::debug!("Forwarded connection error: {}", e);
            }
        });
        Ok(())
    }

    async fn server_channel_open_agent_forward(
        &mut self,
        channel: Channel<Msg>,
        _session: &mut client::Session,
    ) -> std::result::Result<(), Self::Error> {
        tokio::spawn(async move {
            if let Err(e) = forward::serve_agent(channel).await {
                tracing::debug!("Agent forwarding error: {}", e);
            }
        });
        Ok(())
    }
}

/// Engine that dials with russh.
#[derive(Debug, Clone, Default)]
pub struct RusshEngine {
    config: EngineConfig,
}

impl RusshEngine {
    pub fn new(config: EngineConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl SshEngine for RusshEngine {
    type Connection = RusshConnection;

    async fn connect(
        &self,
        server: &ServerDescriptor,
        methods: &[AuthMethod],
    ) -> Result<RusshConnection> {
        let port = server.port_number().map_err(Error::InvalidEndpoint)?;
        let routes = RouteTable::default();

        let handler = SshHandler {
            host: server.addr.clone(),
            port,
            trust_on_first_use: self.config.trust_on_first_use,
            known_hosts_path: self.config.known_hosts_path.clone(),
            routes: routes.clone(),
        };

        let russh_config = Arc::new(Config {
            keepalive_interval: Some(Duration::from_secs(30)),
            ..Default::default()
        });

        let dial = async {
            match &server.proxy_command {
                Some(command) => {
                    let command = expand_proxy_command(command, &server.addr, port, &server.user);
                    tracing::debug!("connecting via ProxyCommand: {}", command);
                    let stream = ChildStream::spawn(&command)?;
                    client::connect_stream(russh_config, stream, handler)
                        .await
                        .map_err(|e| Error::Connection(e.to_string()))
                }
                None => client::connect(russh_config, (server.addr.as_str(), port), handler)
                    .await
                    .map_err(|e| {
                        if e.to_string().contains("Connection refused") {
                            Error::Connection(format!(
                                "connection refused to {}:{}",
                                server.addr, port
                            ))
                        } else {
                            Error::Connection(e.to_string())
                        }
                    }),
            }
        };

        let mut handle = tokio::time::timeout(self.config.connect_timeout, dial)
            .await
            .map_err(|_| {
                Error::Connection(format!(
                    "timed out after {:?} connecting to {}:{}",
                    self.config.connect_timeout, server.addr, port
                ))
            })??;

        auth::authenticate(&mut handle, &server.user, methods).await?;
        tracing::debug!("authenticated as {} on {}:{}", server.user, server.addr, port);

        Ok(RusshConnection {
            handle: Arc::new(tokio::sync::Mutex::new(handle)),
            routes,
            log: Mutex::new(None),
            listeners: Mutex::new(Vec::new()),
        })
    }
}

/// An authenticated russh connection.
pub struct RusshConnection {
    handle: SharedHandle,
    routes: RouteTable,
    log: Mutex<Option<SessionLogConfig>>,
    /// Accept loops of static local forwards.
    listeners: Mutex<Vec<JoinHandle<()>>>,
}

impl std::fmt::Debug for RusshConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RusshConnection")
            .field("handle", &"<russh::Handle>")
            .field("log", &self.log.lock())
            .finish()
    }
}

impl RusshConnection {
    async fn run_interactive(&self, mut channel: Channel<Msg>, command: Option<&str>) -> Result<()> {
        let (cols, rows) = terminal::window_size();
        channel
            .request_pty(false, &terminal::term_type(), cols, rows, 0, 0, &[])
            .await
            .map_err(|e| Error::Channel(format!("PTY request failed: {}", e)))?;

        match command {
            Some(command) => channel.exec(true, command).await,
            None => channel.request_shell(true).await,
        }
        .map_err(|e| Error::Channel(format!("shell request failed: {}", e)))?;

        let log_config = self.log.lock().clone();
        let mut log = match log_config {
            Some(config) => match SessionLog::open(&config).await {
                Ok(log) => Some(log),
                Err(e) => {
                    tracing::warn!("failed to open session log {}: {}", config.path.display(), e);
                    None
                }
            },
            None => None,
        };

        let _raw = RawModeGuard::enable();
        let mut input = terminal::spawn_stdin_reader();
        let mut input_open = true;
        let mut resize = ResizeSignal::new();
        let mut stdout = tokio::io::stdout();
        let mut stderr = tokio::io::stderr();

        loop {
            tokio::select! {
                data = input.recv(), if input_open => {
                    match data {
                        Some(data) => {
                            channel
                                .data(&data[..])
                                .await
                                .map_err(|e| Error::Channel(e.to_string()))?;
                        }
                        None => {
                            input_open = false;
                            let _ = channel.eof().await;
                        }
                    }
                }

                _ = resize.recv() => {
                    let (cols, rows) = terminal::window_size();
                    if let Err(e) = channel.window_change(cols, rows, 0, 0).await {
                        tracing::debug!("Failed to resize PTY: {}", e);
                    }
                }

                msg = channel.wait() => {
                    match msg {
                        Some(ChannelMsg::Data { data }) => {
                            stdout.write_all(&data).await?;
                            stdout.flush().await?;
                            write_log(&mut log, &data).await;
                        }
                        Some(ChannelMsg::ExtendedData { data, .. }) => {
                            stderr.write_all(&data).await?;
                            stderr.flush().await?;
                            write_log(&mut log, &data).await;
                        }
                        Some(ChannelMsg::ExitStatus { exit_status }) => {
                            tracing::debug!("remote shell exited with status {}", exit_status);
                        }
                        Some(ChannelMsg::Close) | None => break,
                        Some(_) => {}
                    }
                }
            }
        }

        if let Some(log) = log.as_mut()
            && let Err(e) = log.finish().await
        {
            tracing::warn!("failed to flush session log: {}", e);
        }

        Ok(())
    }
}

async fn write_log(log: &mut Option<SessionLog>, data: &[u8]) {
    if let Some(writer) = log
        && let Err(e) = writer.write(data).await
    {
        tracing::warn!("session log write failed, logging disabled: {}", e);
        *log = None;
    }
}

/// Window-change notifications; never fires where unsupported.
struct ResizeSignal {
    #[cfg(unix)]
    inner: Option<tokio::signal::unix::Signal>,
}

impl ResizeSignal {
    #[cfg(unix)]
    fn new() -> Self {
        use tokio::signal::unix::{SignalKind, signal};
        Self {
            inner: signal(SignalKind::window_change()).ok(),
        }
    }

    #[cfg(not(unix))]
    fn new() -> Self {
        Self {}
    }

    async fn recv(&mut self) {
        #[cfg(unix)]
        if let Some(signal) = &mut self.inner
            && signal.recv().await.is_some()
        {
            return;
        }
        std::future::pending::<()>().await
    }
}

#[async_trait]
impl Connection for RusshConnection {
    type Session = Channel<Msg>;

    async fn create_session(&self) -> Result<Channel<Msg>> {
        self.handle
            .lock()
            .await
            .channel_open_session()
            .await
            .map_err(|e| Error::Channel(format!("failed to open session: {}", e)))
    }

    async fn forward_agent(&self, session: &mut Channel<Msg>) -> Result<()> {
        if std::env::var_os("SSH_AUTH_SOCK").is_none() {
            return Err(Error::AgentUnavailable("SSH_AUTH_SOCK is not set".to_string()));
        }
        session
            .agent_forward(true)
            .await
            .map_err(|e| Error::Channel(format!("agent forwarding request failed: {}", e)))
    }

    async fn tcp_local_forward(&self, bind: &str, target: &str) -> Result<()> {
        let task = forward::start_local_forward(self.handle.clone(), bind, target).await?;
        self.listeners.lock().push(task);
        Ok(())
    }

    async fn tcp_remote_forward(&self, bind: &str, target: &str) -> Result<()> {
        let target = forward::parse_endpoint(target)?;
        forward::request_remote_forward(&self.handle, &self.routes, bind, RemoteRoute::Static(target))
            .await
            .map(|_| ())
    }

    async fn dynamic_forward(&self, address: &str, port: &str) -> Result<()> {
        forward::run_socks_forward(self.handle.clone(), address, port).await
    }

    async fn reverse_dynamic_forward(&self, address: &str, port: &str) -> Result<()> {
        forward::run_reverse_proxy(
            self.handle.clone(),
            self.routes.clone(),
            address,
            port,
            RemoteRoute::Socks,
        )
        .await
    }

    async fn http_dynamic_forward(&self, address: &str, port: &str) -> Result<()> {
        forward::run_http_forward(self.handle.clone(), address, port).await
    }

    async fn http_reverse_dynamic_forward(&self, address: &str, port: &str) -> Result<()> {
        forward::run_reverse_proxy(
            self.handle.clone(),
            self.routes.clone(),
            address,
            port,
            RemoteRoute::Http,
        )
        .await
    }

    async fn nfs_forward(&self, _address: &str, _port: &str, _path: &str) -> Result<()> {
        Err(Error::Unsupported("NFS forwarding"))
    }

    async fn nfs_reverse_forward(&self, _address: &str, _port: &str, _path: &str) -> Result<()> {
        Err(Error::Unsupported("NFS reverse forwarding"))
    }

    fn set_log(&self, log: SessionLogConfig) {
        *self.log.lock() = Some(log);
    }

    async fn check_alive(&self) -> Result<()> {
        let handle = self.handle.lock().await;
        if handle.is_closed() {
            return Err(Error::Disconnected("connection closed".to_string()));
        }

        match tokio::time::timeout(KEEPALIVE_TIMEOUT, handle.send_keepalive(true)).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(Error::Disconnected(e.to_string())),
            Err(_) => Err(Error::Disconnected("keepalive timed out".to_string())),
        }
    }

    async fn shell(&self, session: Channel<Msg>) -> Result<()> {
        self.run_interactive(session, None).await
    }

    async fn command_shell(&self, session: Channel<Msg>, command: &str) -> Result<()> {
        self.run_interactive(session, Some(command)).await
    }

    async fn close(&self) -> Result<()> {
        // Drain to Vec to release the lock before awaiting
        let listeners: Vec<_> = self.listeners.lock().drain(..).collect();
        for listener in listeners {
            listener.abort();
        }

        let handle = self.handle.lock().await;
        if handle.is_closed() {
            return Ok(());
        }
        handle
            .disconnect(Disconnect::ByApplication, "", "en")
            .await
            .map_err(Error::Protocol)
    }
}
