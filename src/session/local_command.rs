// ABOUTME: Local pre/post commands run around the remote shell.
// ABOUTME: The post-command guard runs its command exactly once on every exit path.

use std::process::{ExitStatus, Stdio};
use tokio::process::Command;

/// Run `command` through `sh -c` with the terminal's stdio.
pub(crate) async fn run(command: &str) -> std::io::Result<ExitStatus> {
    tracing::debug!("running local command: {}", command);
    Command::new("sh")
        .arg("-c")
        .arg(command)
        .stdin(Stdio::null())
        .stdout(Stdio::inherit())
        .stderr(Stdio::inherit())
        .status()
        .await
}

fn report(command: &str, result: std::io::Result<ExitStatus>) {
    match result {
        Ok(status) if status.success() => {}
        Ok(status) => tracing::warn!("local command '{}' exited with {}", command, status),
        Err(e) => tracing::warn!("failed to run local command '{}': {}", command, e),
    }
}

/// Holds the post-command until the session ends.
///
/// `finish` runs it asynchronously; if the guard is dropped first (error
/// unwinding, panic, or cancellation) it runs synchronously in `Drop`.
pub(crate) struct PostCommand {
    command: Option<String>,
}

impl PostCommand {
    pub(crate) fn new(command: Option<&str>) -> Self {
        Self {
            command: command.filter(|c| !c.is_empty()).map(str::to_string),
        }
    }

    pub(crate) async fn finish(mut self) {
        if let Some(command) = self.command.take() {
            let result = run(&command).await;
            report(&command, result);
        }
    }
}

impl Drop for PostCommand {
    fn drop(&mut self) {
        if let Some(command) = self.command.take() {
            let result = std::process::Command::new("sh")
                .arg("-c")
                .arg(&command)
                .stdin(Stdio::null())
                .status();
            report(&command, result);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn counter_command(dir: &TempDir) -> (String, std::path::PathBuf) {
        let path = dir.path().join("count");
        (format!("echo x >> {}", path.display()), path)
    }

    fn runs(path: &std::path::Path) -> usize {
        std::fs::read_to_string(path).map(|s| s.lines().count()).unwrap_or(0)
    }

    #[tokio::test]
    async fn finish_runs_once() {
        let dir = TempDir::new().unwrap();
        let (command, path) = counter_command(&dir);

        PostCommand::new(Some(&command)).finish().await;

        assert_eq!(runs(&path), 1);
    }

    #[test]
    fn drop_runs_when_not_finished() {
        let dir = TempDir::new().unwrap();
        let (command, path) = counter_command(&dir);

        drop(PostCommand::new(Some(&command)));

        assert_eq!(runs(&path), 1);
    }

    #[test]
    fn empty_command_is_ignored() {
        assert!(PostCommand::new(Some("")).command.is_none());
    }
}
