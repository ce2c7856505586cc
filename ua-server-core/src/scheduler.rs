use std::time::Duration;
use tokio_util::sync::CancellationToken;
use ua_server_sdk::{Scheduler, TimerCallback};

/// Tokio-backed [`Scheduler`]: each `schedule_after` spawns a sleep-then-run
/// task raced against a shared [`CancellationToken`], so shutting the token
/// down cancels every outstanding publishing tick at once.
///
/// Must be constructed and used inside a Tokio runtime context; the spawned
/// callback re-enters subscription locks, so callbacks stay short and never
/// block.
#[derive(Debug, Clone)]
pub struct TokioScheduler {
    shutdown: CancellationToken,
}

impl TokioScheduler {
    pub fn new(shutdown: CancellationToken) -> Self {
        TokioScheduler { shutdown }
    }

    pub fn shutdown_token(&self) -> &CancellationToken {
        &self.shutdown
    }
}

impl Default for TokioScheduler {
    fn default() -> Self {
        TokioScheduler::new(CancellationToken::new())
    }
}

impl Scheduler for TokioScheduler {
    fn schedule_after(&self, delay: Duration, callback: TimerCallback) {
        let token = self.shutdown.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {}
                _ = tokio::time::sleep(delay) => callback(),
            }
        });
    }
}
