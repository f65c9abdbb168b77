// ABOUTME: Diagnostics accumulator for non-fatal warnings during a session.
// ABOUTME: Collects failures that must not abort the session but are reported in its outcome.

/// Collects non-fatal warnings during session orchestration.
#[derive(Debug, Default)]
pub struct Diagnostics {
    warnings: Vec<Warning>,
}

impl Diagnostics {
    /// Record a warning. Callers print user-facing messages themselves.
    pub fn warn(&mut self, warning: Warning) {
        tracing::debug!(kind = ?warning.kind, "{}", warning.message);
        self.warnings.push(warning);
    }

    pub fn warnings(&self) -> &[Warning] {
        &self.warnings
    }

    pub fn has_warnings(&self) -> bool {
        !self.warnings.is_empty()
    }

    /// Warnings of one kind.
    pub fn of_kind(&self, kind: WarningKind) -> impl Iterator<Item = &Warning> {
        self.warnings.iter().filter(move |w| w.kind == kind)
    }
}

/// A non-fatal warning collected during a session.
#[derive(Debug, Clone)]
pub struct Warning {
    pub kind: WarningKind,
    pub message: String,
}

impl Warning {
    /// A static forward could not be established.
    pub fn forward_setup(message: impl Into<String>) -> Self {
        Self {
            kind: WarningKind::ForwardSetup,
            message: message.into(),
        }
    }

    /// The pre-command could not be run or exited non-zero.
    pub fn local_command(message: impl Into<String>) -> Self {
        Self {
            kind: WarningKind::LocalCommand,
            message: message.into(),
        }
    }

    /// The terminal log could not be prepared.
    pub fn log_setup(message: impl Into<String>) -> Self {
        Self {
            kind: WarningKind::LogSetup,
            message: message.into(),
        }
    }

    /// Failed to cleanly disconnect the SSH connection.
    pub fn ssh_disconnect(message: impl Into<String>) -> Self {
        Self {
            kind: WarningKind::SshDisconnect,
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WarningKind {
    ForwardSetup,
    LocalCommand,
    LogSetup,
    SshDisconnect,
}
