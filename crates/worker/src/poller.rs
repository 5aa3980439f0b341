//! Build worker loop.
//!
//! Builds arrive two ways: through the in-process task channel right after
//! they are queued, and through a periodic sweep of `queued` builds that
//! catches anything the channel missed (restarts, other producers). Both
//! paths end in [`Pipeline::run_build`], whose `queued` guard makes repeat
//! deliveries harmless. Builds run one at a time.

use std::time::Duration;

use tokio::sync::mpsc::UnboundedReceiver;
use tokio_util::sync::CancellationToken;

use commitreel_core::types::DbId;
use commitreel_pipeline::dispatch::{Task, RUN_BUILD_TASK};
use commitreel_pipeline::runner::RunOutcome;
use commitreel_pipeline::Pipeline;

pub struct BuildWorker {
    pipeline: Pipeline,
    poll_interval: Duration,
    batch_size: i64,
}

impl BuildWorker {
    pub fn new(pipeline: Pipeline, poll_interval: Duration, batch_size: i64) -> Self {
        Self {
            pipeline,
            poll_interval,
            batch_size,
        }
    }

    /// Run until `cancel` fires. A build in progress is finished first.
    pub async fn run(&self, mut tasks: UnboundedReceiver<Task>, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.poll_interval);
        let mut channel_open = true;
        tracing::info!(
            poll_interval_ms = self.poll_interval.as_millis() as u64,
            batch_size = self.batch_size,
            "Build worker started",
        );

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    tracing::info!("Build worker shutting down");
                    break;
                }
                task = tasks.recv(), if channel_open => match task {
                    Some(task) => self.handle_task(task).await,
                    None => {
                        tracing::warn!("Task channel closed; continuing with polling only");
                        channel_open = false;
                    }
                },
                _ = ticker.tick() => {
                    if let Err(e) = self.sweep(&cancel).await {
                        tracing::error!(error = %e, "Queued build sweep failed");
                    }
                }
            }
        }
    }

    async fn handle_task(&self, task: Task) {
        if task.name != RUN_BUILD_TASK {
            tracing::warn!(task = task.name, build_id = task.build_id, "Unknown task; dropping");
            return;
        }
        self.run_one(task.build_id).await;
    }

    /// Run every currently queued build, oldest first. Returns how many
    /// were picked up.
    pub async fn sweep(&self, cancel: &CancellationToken) -> anyhow::Result<usize> {
        let queued = self.pipeline.store().queued_builds(self.batch_size).await?;
        if queued.is_empty() {
            tracing::debug!("No queued builds");
            return Ok(0);
        }

        let mut picked = 0;
        for build in queued {
            if cancel.is_cancelled() {
                break;
            }
            self.run_one(build.id).await;
            picked += 1;
        }
        Ok(picked)
    }

    async fn run_one(&self, build_id: DbId) {
        match self.pipeline.run_build(build_id).await {
            Ok(RunOutcome::Skipped(status)) => {
                tracing::debug!(build_id, %status, "Build already handled");
            }
            Ok(outcome) => tracing::info!(build_id, ?outcome, "Build task finished"),
            Err(e) => tracing::error!(build_id, error = %e, "Failed to start build"),
        }
    }
}
