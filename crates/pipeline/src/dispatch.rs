//! Hand-off of build ids to workers.
//!
//! Delivery is at-least-once at best: a task may arrive twice, or after the
//! worker's own poll already picked the build up. `run_build` absorbs both
//! through its `queued` guard.

use async_trait::async_trait;
use commitreel_core::types::DbId;
use tokio::sync::mpsc;

/// Task name for executing a build.
pub const RUN_BUILD_TASK: &str = "run_build";

#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("task queue is closed")]
    Closed,
}

/// A scheduled unit of work.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Task {
    pub name: &'static str,
    pub build_id: DbId,
}

#[async_trait]
pub trait TaskDispatcher: Send + Sync {
    async fn enqueue(&self, name: &'static str, build_id: DbId) -> Result<(), DispatchError>;
}

/// In-process dispatcher backed by an unbounded channel. The receiving
/// half belongs to the worker loop.
#[derive(Debug, Clone)]
pub struct ChannelDispatcher {
    tx: mpsc::UnboundedSender<Task>,
}

impl ChannelDispatcher {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Task>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

#[async_trait]
impl TaskDispatcher for ChannelDispatcher {
    async fn enqueue(&self, name: &'static str, build_id: DbId) -> Result<(), DispatchError> {
        self.tx
            .send(Task { name, build_id })
            .map_err(|_| DispatchError::Closed)?;
        tracing::debug!(task = name, build_id, "Task enqueued");
        Ok(())
    }
}
