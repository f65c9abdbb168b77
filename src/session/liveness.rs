// ABOUTME: Connection health poller for sessions that attach no shell.
// ABOUTME: Stops at the first failed check after closing the connection once.

use crate::ssh::Connection;
use std::time::Duration;

pub const LIVENESS_INTERVAL: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, Copy)]
pub struct LivenessMonitor {
    interval: Duration,
}

impl LivenessMonitor {
    pub fn new(interval: Duration) -> Self {
        Self { interval }
    }

    /// Poll `conn` until a check fails, then close it and return the failure.
    ///
    /// The connection is released here and must not be closed again by the caller.
    pub async fn run<C: Connection>(&self, conn: &C) -> String {
        loop {
            tokio::time::sleep(self.interval).await;

            if let Err(e) = conn.check_alive().await {
                let reason = e.to_string();
                eprintln!("Exit Connect, Error: {}", reason);

                if let Err(e) = conn.close().await {
                    tracing::debug!("close after liveness loss: {}", e);
                }
                return reason;
            }
        }
    }
}
