// ABOUTME: Drives one SSH session from authentication check to teardown.
// ABOUTME: Merges overrides, sets up forwards, then holds the connection or attaches a shell.

mod background;
mod error;
mod header;
mod liveness;
mod local_command;
mod overrides;

pub use error::{Result, SessionError};
pub use liveness::{LIVENESS_INTERVAL, LivenessMonitor};
pub use overrides::RuntimeOverrides;

use crate::config::{ForwardDirection, LogConfig, ServerDescriptor};
use crate::diagnostics::{Diagnostics, Warning};
use crate::localrc::Bootstrap;
use crate::logpath;
use crate::ssh::{Connection, SessionLogConfig, SshEngine};
use background::BackgroundForwards;
use local_command::PostCommand;
use std::sync::Arc;
use std::time::Duration;

/// Address every dynamic-style forward listens on.
const DYNAMIC_FORWARD_ADDRESS: &str = "localhost";

/// Orchestration stages, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Init,
    AuthCheck,
    OverrideMerge,
    HeaderDisplay,
    Connect,
    SessionCreate,
    AgentForward,
    ForwardSetup,
    Execute,
    Teardown,
}

/// What the session does once forwards are up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecMode {
    /// Hold the connection open and watch its health.
    None,
    /// Interactive shell started with the local rc payload.
    Bootstrap,
    /// Plain interactive shell.
    Shell,
}

impl ExecMode {
    pub fn select(not_execute: bool, server: &ServerDescriptor) -> Self {
        if not_execute {
            ExecMode::None
        } else if server.local_rc.is_enabled() {
            ExecMode::Bootstrap
        } else {
            ExecMode::Shell
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExitReason {
    ShellClosed,
    /// The liveness monitor saw the connection fail.
    LivenessLost(String),
    Interrupted,
}

#[derive(Debug)]
pub struct SessionOutcome {
    pub mode: ExecMode,
    pub exit: ExitReason,
    pub diagnostics: Diagnostics,
}

#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub overrides: RuntimeOverrides,
    /// Hold the connection without a shell.
    pub not_execute: bool,
    /// Terminal logging; ignored unless `enable` is set.
    pub log: Option<LogConfig>,
    pub liveness_interval: Duration,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            overrides: RuntimeOverrides::default(),
            not_execute: false,
            log: None,
            liveness_interval: LIVENESS_INTERVAL,
        }
    }
}

pub struct Orchestrator<E: SshEngine> {
    engine: E,
    stage: Stage,
}

impl<E: SshEngine> Orchestrator<E> {
    pub fn new(engine: E) -> Self {
        Self {
            engine,
            stage: Stage::Init,
        }
    }

    /// The last stage entered. After an error this is the stage that failed.
    pub fn stage(&self) -> Stage {
        self.stage
    }

    fn enter(&mut self, stage: Stage) {
        tracing::debug!(?stage, "session stage");
        self.stage = stage;
    }

    /// Run one session against `template`, registered under `name`.
    pub async fn run(
        &mut self,
        name: &str,
        template: &ServerDescriptor,
        options: &SessionOptions,
    ) -> Result<SessionOutcome> {
        self.enter(Stage::AuthCheck);
        let methods = self.engine.auth_methods(template);
        if methods.is_empty() {
            return Err(SessionError::AuthUnavailable(name.to_string()));
        }

        self.enter(Stage::OverrideMerge);
        let server = options.overrides.apply(template);

        self.enter(Stage::HeaderDisplay);
        eprint!("{}", header::render(name, &server));

        self.enter(Stage::Connect);
        let conn = Arc::new(
            self.engine
                .connect(&server, &methods)
                .await
                .map_err(SessionError::Connect)?,
        );

        self.enter(Stage::SessionCreate);
        let mut session = match conn.create_session().await {
            Ok(session) => session,
            Err(e) => {
                let _ = conn.close().await;
                return Err(SessionError::Session(e));
            }
        };

        let mut diagnostics = Diagnostics::default();

        if server.agent_forward {
            self.enter(Stage::AgentForward);
            if let Err(e) = conn.forward_agent(&mut session).await {
                tracing::debug!("agent forwarding: {}", e);
            }
        }

        self.enter(Stage::ForwardSetup);
        setup_static_forwards(conn.as_ref(), &server, &mut diagnostics).await;
        let mut background = BackgroundForwards::default();
        spawn_background_forwards(&mut background, &conn, &server);
        tracing::debug!("{} background forwards running", background.len());

        self.enter(Stage::Execute);
        let mode = ExecMode::select(options.not_execute, &server);

        if let Some(pre) = server.pre_command.as_deref().filter(|c| !c.is_empty()) {
            match local_command::run(pre).await {
                Ok(status) if status.success() => {}
                Ok(status) => diagnostics.warn(Warning::local_command(format!(
                    "pre command '{}' exited with {}",
                    pre, status
                ))),
                Err(e) => diagnostics.warn(Warning::local_command(format!(
                    "pre command '{}' failed: {}",
                    pre, e
                ))),
            }
        }
        let post = PostCommand::new(server.post_command.as_deref());

        if mode != ExecMode::None
            && let Some(log) = options.log.as_ref().filter(|l| l.enable)
        {
            enable_session_log(conn.as_ref(), name, log, &mut diagnostics);
        }

        let exit = tokio::select! {
            result = execute(conn.as_ref(), session, &server, mode, options.liveness_interval) => result,
            _ = interrupted() => Ok(ExitReason::Interrupted),
        };

        post.finish().await;

        self.enter(Stage::Teardown);
        background.shutdown().await;

        if !matches!(exit, Ok(ExitReason::LivenessLost(_)))
            && let Err(e) = conn.close().await
        {
            diagnostics.warn(Warning::ssh_disconnect(e.to_string()));
        }

        Ok(SessionOutcome {
            mode,
            exit: exit?,
            diagnostics,
        })
    }
}

/// Request static forwards in declaration order. Failures are reported and skipped.
async fn setup_static_forwards<C: Connection>(
    conn: &C,
    server: &ServerDescriptor,
    diagnostics: &mut Diagnostics,
) {
    for fw in &server.forwards {
        let result = match fw.direction {
            ForwardDirection::Local => conn.tcp_local_forward(&fw.bind, &fw.target).await,
            ForwardDirection::Remote => conn.tcp_remote_forward(&fw.bind, &fw.target).await,
        };

        if let Err(e) = result {
            eprintln!("{}", e);
            diagnostics.warn(Warning::forward_setup(format!(
                "{} {} => {}: {}",
                fw.direction, fw.bind, fw.target, e
            )));
        }
    }
}

fn spawn_background_forwards<C: Connection>(
    background: &mut BackgroundForwards,
    conn: &Arc<C>,
    server: &ServerDescriptor,
) {
    let non_empty = |v: &Option<String>| v.as_deref().filter(|s| !s.is_empty()).map(str::to_string);

    if let Some(port) = non_empty(&server.dynamic_forward) {
        let conn = Arc::clone(conn);
        background.spawn("dynamic", async move {
            conn.dynamic_forward(DYNAMIC_FORWARD_ADDRESS, &port).await
        });
    }
    if let Some(port) = non_empty(&server.reverse_dynamic_forward) {
        let conn = Arc::clone(conn);
        background.spawn("reverse dynamic", async move {
            conn.reverse_dynamic_forward(DYNAMIC_FORWARD_ADDRESS, &port).await
        });
    }
    if let Some(port) = non_empty(&server.http_dynamic_forward) {
        let conn = Arc::clone(conn);
        background.spawn("http dynamic", async move {
            conn.http_dynamic_forward(DYNAMIC_FORWARD_ADDRESS, &port).await
        });
    }
    if let Some(port) = non_empty(&server.http_reverse_dynamic_forward) {
        let conn = Arc::clone(conn);
        background.spawn("http reverse dynamic", async move {
            conn.http_reverse_dynamic_forward(DYNAMIC_FORWARD_ADDRESS, &port).await
        });
    }
    if let Some((port, path)) = server.nfs_forward.endpoint() {
        let conn = Arc::clone(conn);
        let (port, path) = (port.to_string(), path.to_string());
        background.spawn("nfs", async move {
            conn.nfs_forward(DYNAMIC_FORWARD_ADDRESS, &port, &path).await
        });
    }
    if let Some((port, path)) = server.nfs_reverse_forward.endpoint() {
        let conn = Arc::clone(conn);
        let (port, path) = (port.to_string(), path.to_string());
        background.spawn("nfs reverse", async move {
            conn.nfs_reverse_forward(DYNAMIC_FORWARD_ADDRESS, &port, &path).await
        });
    }
}

fn enable_session_log<C: Connection>(
    conn: &C,
    name: &str,
    log: &LogConfig,
    diagnostics: &mut Diagnostics,
) {
    match logpath::resolve(&log.dir, name, chrono::Local::now()) {
        Ok(path) => {
            tracing::debug!("logging terminal output to {}", path.display());
            conn.set_log(SessionLogConfig {
                path,
                timestamp: log.timestamp,
                remove_ansi_code: log.remove_ansi_code,
            });
        }
        Err(e) => {
            eprintln!("failed to prepare log directory {}: {}", log.dir, e);
            diagnostics.warn(Warning::log_setup(e.to_string()));
        }
    }
}

async fn execute<C: Connection>(
    conn: &C,
    session: C::Session,
    server: &ServerDescriptor,
    mode: ExecMode,
    liveness_interval: Duration,
) -> Result<ExitReason> {
    match mode {
        ExecMode::None => {
            let _session = session;
            let reason = LivenessMonitor::new(liveness_interval).run(conn).await;
            Ok(ExitReason::LivenessLost(reason))
        }
        ExecMode::Bootstrap => {
            let command = Bootstrap::from_server(server).command()?;
            conn.command_shell(session, &command)
                .await
                .map_err(SessionError::Execute)?;
            Ok(ExitReason::ShellClosed)
        }
        ExecMode::Shell => {
            conn.shell(session).await.map_err(SessionError::Execute)?;
            Ok(ExitReason::ShellClosed)
        }
    }
}

/// Resolves on Ctrl-C; never resolves if the signal cannot be watched.
async fn interrupted() {
    if tokio::signal::ctrl_c().await.is_err() {
        std::future::pending::<()>().await;
    }
}
