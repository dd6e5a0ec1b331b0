// src/worker/callbacks.rs

//! Stage callbacks and the error collaborator they report to.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use tracing::error;

use crate::types::{Stage, StageEvent};
use crate::worker::WorkerContext;

/// Future returned by a stage callback.
///
/// Workers run on a single-threaded runtime, so the future does not need to
/// be `Send`.
pub type StageFuture = Pin<Box<dyn Future<Output = anyhow::Result<()>> + 'static>>;

/// A user callback, invoked once inside each worker of its stage.
pub type StageCallback = Arc<dyn Fn(WorkerContext) -> StageFuture + Send + Sync>;

/// Receives failures raised by stage callbacks inside worker processes.
pub trait ErrorHandler: Send + Sync {
    fn handle_error(&self, stage: Stage, index: usize, error: &anyhow::Error);
}

/// Default collaborator: log the failure and move on.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogErrorHandler;

impl ErrorHandler for LogErrorHandler {
    fn handle_error(&self, stage: Stage, index: usize, error: &anyhow::Error) {
        error!(%stage, index, error = format!("{error:#}"), "stage callback failed");
    }
}

/// One optional callback per stage. Registering twice replaces.
#[derive(Clone, Default)]
pub struct StageCallbacks {
    left: Option<StageCallback>,
    center: Option<StageCallback>,
    right: Option<StageCallback>,
}

impl std::fmt::Debug for StageCallbacks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StageCallbacks")
            .field("left", &self.left.is_some())
            .field("center", &self.center.is_some())
            .field("right", &self.right.is_some())
            .finish()
    }
}

impl StageCallbacks {
    pub fn set(&mut self, event: StageEvent, callback: StageCallback) {
        let slot = match event {
            StageEvent::LeftStart => &mut self.left,
            StageEvent::CenterStart => &mut self.center,
            StageEvent::RightStart => &mut self.right,
        };
        *slot = Some(callback);
    }

    pub fn get(&self, stage: Stage) -> Option<StageCallback> {
        match stage {
            Stage::Left => self.left.clone(),
            Stage::Center => self.center.clone(),
            Stage::Right => self.right.clone(),
        }
    }
}

/// Box an async closure into a [`StageCallback`].
pub fn stage_callback<F, Fut>(f: F) -> StageCallback
where
    F: Fn(WorkerContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + 'static,
{
    Arc::new(move |ctx| Box::pin(f(ctx)) as StageFuture)
}
