// ABOUTME: Test support utilities.
// ABOUTME: Provides tracing setup and an in-memory SSH engine that records every call.

#![allow(dead_code)]

use async_trait::async_trait;
use sshmux::config::ServerDescriptor;
use sshmux::ssh::{AuthMethod, Connection, Error, Result, SessionLogConfig, SshEngine};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, Once};
use std::time::Duration;

static TRACING_INIT: Once = Once::new();

/// Initialize tracing for tests. Safe to call multiple times.
pub fn init_tracing() {
    TRACING_INIT.call_once(|| {
        use tracing_subscriber::EnvFilter;
        let filter = EnvFilter::from_default_env().add_directive("sshmux=debug".parse().unwrap());
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .try_init()
            .ok();
    });
}

/// Every engine operation the mock observed, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Connect(String),
    CreateSession,
    ForwardAgent,
    LocalForward(String, String),
    RemoteForward(String, String),
    Dynamic(String, String),
    ReverseDynamic(String, String),
    HttpDynamic(String, String),
    HttpReverseDynamic(String, String),
    Nfs(String, String, String),
    NfsReverse(String, String, String),
    SetLog(SessionLogConfig),
    CheckAlive(usize),
    Shell,
    CommandShell(String),
    Close,
}

#[derive(Debug, Clone, Default)]
pub struct Recorder(Arc<Mutex<Vec<Call>>>);

impl Recorder {
    fn push(&self, call: Call) {
        self.0.lock().unwrap().push(call);
    }

    pub fn calls(&self) -> Vec<Call> {
        self.0.lock().unwrap().clone()
    }

    pub fn count(&self, pred: impl Fn(&Call) -> bool) -> usize {
        self.0.lock().unwrap().iter().filter(|c| pred(c)).count()
    }
}

/// How the mock engine and its connections behave.
#[derive(Debug, Clone)]
pub struct Behavior {
    pub auth: Vec<AuthMethod>,
    pub fail_connect: bool,
    pub fail_session: bool,
    pub fail_shell: bool,
    /// Bind endpoints whose static forward fails.
    pub failing_binds: Vec<String>,
    /// 1-based poll on which the liveness check fails.
    pub alive_fail_at: Option<usize>,
    /// Time spent inside the shell before it returns.
    pub shell_duration: Duration,
}

impl Default for Behavior {
    fn default() -> Self {
        Self {
            auth: vec![AuthMethod::Agent],
            fail_connect: false,
            fail_session: false,
            fail_shell: false,
            failing_binds: Vec::new(),
            alive_fail_at: None,
            shell_duration: Duration::from_millis(20),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct MockEngine {
    pub recorder: Recorder,
    pub behavior: Behavior,
}

impl MockEngine {
    pub fn new(behavior: Behavior) -> Self {
        Self {
            recorder: Recorder::default(),
            behavior,
        }
    }
}

#[async_trait]
impl SshEngine for MockEngine {
    type Connection = MockConnection;

    fn auth_methods(&self, _server: &ServerDescriptor) -> Vec<AuthMethod> {
        self.behavior.auth.clone()
    }

    async fn connect(&self, server: &ServerDescriptor, _methods: &[AuthMethod]) -> Result<MockConnection> {
        self.recorder.push(Call::Connect(server.addr.clone()));
        if self.behavior.fail_connect {
            return Err(Error::Connection(format!("connection refused to {}:22", server.addr)));
        }
        Ok(MockConnection::new(self.recorder.clone(), self.behavior.clone()))
    }
}

fn forward_error(bind: &str, reason: &str) -> Error {
    Error::Forward {
        spec: bind.to_string(),
        reason: reason.to_string(),
    }
}

pub struct MockConnection {
    recorder: Recorder,
    behavior: Behavior,
    polls: AtomicUsize,
}

impl MockConnection {
    pub fn new(recorder: Recorder, behavior: Behavior) -> Self {
        Self {
            recorder,
            behavior,
            polls: AtomicUsize::new(0),
        }
    }

    pub fn polls(&self) -> usize {
        self.polls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Connection for MockConnection {
    type Session = u32;

    async fn create_session(&self) -> Result<u32> {
        self.recorder.push(Call::CreateSession);
        if self.behavior.fail_session {
            return Err(Error::Channel("failed to open session: administratively prohibited".into()));
        }
        Ok(1)
    }

    async fn forward_agent(&self, _session: &mut u32) -> Result<()> {
        self.recorder.push(Call::ForwardAgent);
        Err(Error::AgentUnavailable("SSH_AUTH_SOCK is not set".into()))
    }

    async fn tcp_local_forward(&self, bind: &str, target: &str) -> Result<()> {
        self.recorder.push(Call::LocalForward(bind.into(), target.into()));
        if self.behavior.failing_binds.iter().any(|b| b == bind) {
            return Err(forward_error(bind, "address already in use"));
        }
        Ok(())
    }

    async fn tcp_remote_forward(&self, bind: &str, target: &str) -> Result<()> {
        self.recorder.push(Call::RemoteForward(bind.into(), target.into()));
        if self.behavior.failing_binds.iter().any(|b| b == bind) {
            return Err(forward_error(bind, "server refused listener"));
        }
        Ok(())
    }

    async fn dynamic_forward(&self, address: &str, port: &str) -> Result<()> {
        self.recorder.push(Call::Dynamic(address.into(), port.into()));
        std::future::pending().await
    }

    async fn reverse_dynamic_forward(&self, address: &str, port: &str) -> Result<()> {
        self.recorder.push(Call::ReverseDynamic(address.into(), port.into()));
        std::future::pending().await
    }

    async fn http_dynamic_forward(&self, address: &str, port: &str) -> Result<()> {
        self.recorder.push(Call::HttpDynamic(address.into(), port.into()));
        std::future::pending().await
    }

    async fn http_reverse_dynamic_forward(&self, address: &str, port: &str) -> Result<()> {
        self.recorder.push(Call::HttpReverseDynamic(address.into(), port.into()));
        std::future::pending().await
    }

    async fn nfs_forward(&self, address: &str, port: &str, path: &str) -> Result<()> {
        self.recorder.push(Call::Nfs(address.into(), port.into(), path.into()));
        Err(Error::Unsupported("NFS forwarding"))
    }

    async fn nfs_reverse_forward(&self, address: &str, port: &str, path: &str) -> Result<()> {
        self.recorder.push(Call::NfsReverse(address.into(), port.into(), path.into()));
        Err(Error::Unsupported("NFS reverse forwarding"))
    }

    fn set_log(&self, log: SessionLogConfig) {
        self.recorder.push(Call::SetLog(log));
    }

    async fn check_alive(&self) -> Result<()> {
        let poll = self.polls.fetch_add(1, Ordering::SeqCst) + 1;
        self.recorder.push(Call::CheckAlive(poll));
        if self.behavior.alive_fail_at == Some(poll) {
            return Err(Error::Disconnected("keepalive timed out".into()));
        }
        Ok(())
    }

    async fn shell(&self, _session: u32) -> Result<()> {
        self.recorder.push(Call::Shell);
        tokio::time::sleep(self.behavior.shell_duration).await;
        if self.behavior.fail_shell {
            return Err(Error::ChannelClosed);
        }
        Ok(())
    }

    async fn command_shell(&self, _session: u32, command: &str) -> Result<()> {
        self.recorder.push(Call::CommandShell(command.into()));
        tokio::time::sleep(self.behavior.shell_duration).await;
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.recorder.push(Call::Close);
        Ok(())
    }
}
