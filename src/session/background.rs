// ABOUTME: Supervision of dynamic-style forwards running alongside the session.
// ABOUTME: Failures are reaped and logged at debug level only; teardown aborts what is left.

use crate::ssh;
use std::future::Future;
use tokio::task::JoinSet;

#[derive(Default)]
pub(crate) struct BackgroundForwards {
    tasks: JoinSet<(&'static str, ssh::Result<()>)>,
}

impl BackgroundForwards {
    pub(crate) fn spawn<F>(&mut self, name: &'static str, task: F)
    where
        F: Future<Output = ssh::Result<()>> + Send + 'static,
    {
        tracing::debug!("starting {} forward", name);
        self.tasks.spawn(async move { (name, task.await) });
    }

    pub(crate) fn len(&self) -> usize {
        self.tasks.len()
    }

    /// Collect tasks that already finished. Their errors are deliberately not surfaced.
    pub(crate) fn reap(&mut self) {
        while let Some(joined) = self.tasks.try_join_next() {
            log_finished(joined);
        }
    }

    /// Abort every remaining task and wait for them to unwind.
    pub(crate) async fn shutdown(mut self) {
        self.reap();
        self.tasks.abort_all();
        while let Some(joined) = self.tasks.join_next().await {
            log_finished(joined);
        }
    }
}

fn log_finished(joined: Result<(&'static str, ssh::Result<()>), tokio::task::JoinError>) {
    match joined {
        Ok((name, Ok(()))) => tracing::debug!("{} forward finished", name),
        Ok((name, Err(e))) => tracing::debug!("{} forward failed: {}", name, e),
        Err(e) if e.is_cancelled() => {}
        Err(e) => tracing::debug!("forward task panicked: {}", e),
    }
}
