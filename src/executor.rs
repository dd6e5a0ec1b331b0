// src/executor.rs

//! User-facing entry point: configure a pipeline, register stage callbacks,
//! start the supervisor.

use std::future::Future;
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::engine::{PipelineReport, Runtime, SupervisorCore, SupervisorEvent};
use crate::errors::{Result, TasklineError};
use crate::exec::naming::{master_name, set_process_name};
use crate::exec::{ForkBackend, spawn_reaper, spawn_stop_listeners};
use crate::ipc::{PipelineQueues, SharedStateTable};
use crate::pipeline::PipelineSpec;
use crate::types::{Stage, StageEvent};
use crate::worker::{ErrorHandler, LogErrorHandler, StageCallbacks, WorkerContext, stage_callback};

/// Capacity of the supervisor's event channel.
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Programmatic equivalent of sending SIGTERM to the supervisor.
#[derive(Debug, Clone)]
pub struct StopHandle {
    tx: mpsc::Sender<SupervisorEvent>,
}

impl StopHandle {
    /// Request a graceful stop. Safe to call from any thread, any number of
    /// times. Returns `false` if the supervisor is already gone.
    pub fn stop(&self) -> bool {
        match self.tx.try_send(SupervisorEvent::StopRequested) {
            Ok(()) => true,
            // A full channel means the supervisor is busy, not gone; it will
            // see one of the queued events.
            Err(mpsc::error::TrySendError::Full(_)) => true,
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }
}

/// Multi-process pipeline executor.
///
/// ```no_run
/// use taskline::{ExecutionMode, PipelineKind, PipelineSpec, StageEvent, TaskExecutor};
///
/// let mut spec = PipelineSpec::new("numbers", PipelineKind::Batch, ExecutionMode::Push);
/// spec.center = 2;
///
/// let mut executor = TaskExecutor::new(spec);
/// executor
///     .on(StageEvent::LeftStart, |ctx| async move {
///         for n in 0..10u32 {
///             ctx.push_next_json(&n).await?;
///         }
///         anyhow::Ok(())
///     })
///     .on(StageEvent::CenterStart, |ctx| async move {
///         while !ctx.should_exit()? {
///             if let Some(n) = ctx.pop_json::<u32>().await? {
///                 println!("{}", n * n);
///             }
///         }
///         anyhow::Ok(())
///     });
/// let report = executor.start()?;
/// assert_eq!(report.restarts, 0);
/// # Ok::<(), taskline::TasklineError>(())
/// ```
pub struct TaskExecutor {
    spec: PipelineSpec,
    callbacks: StageCallbacks,
    error_handler: Arc<dyn ErrorHandler>,
    event_tx: mpsc::Sender<SupervisorEvent>,
    event_rx: mpsc::Receiver<SupervisorEvent>,
}

impl std::fmt::Debug for TaskExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskExecutor")
            .field("spec", &self.spec)
            .field("callbacks", &self.callbacks)
            .finish_non_exhaustive()
    }
}

impl TaskExecutor {
    /// `spec` is normalized immediately (see [`PipelineSpec::normalized`]).
    pub fn new(spec: PipelineSpec) -> Self {
        let (event_tx, event_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            spec: spec.normalized(),
            callbacks: StageCallbacks::default(),
            error_handler: Arc::new(LogErrorHandler),
            event_tx,
            event_rx,
        }
    }

    pub fn spec(&self) -> &PipelineSpec {
        &self.spec
    }

    /// Register the callback run once inside every worker of a stage.
    pub fn on<F, Fut>(&mut self, event: StageEvent, callback: F) -> &mut Self
    where
        F: Fn(WorkerContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + 'static,
    {
        self.callbacks.set(event, stage_callback(callback));
        self
    }

    /// Replace the collaborator that receives stage callback failures.
    pub fn with_error_handler(mut self, handler: impl ErrorHandler + 'static) -> Self {
        self.error_handler = Arc::new(handler);
        self
    }

    pub fn stop_handle(&self) -> StopHandle {
        StopHandle {
            tx: self.event_tx.clone(),
        }
    }

    /// Build the topology and supervise it until the pipeline terminates.
    ///
    /// Blocks the calling thread. The supervisor runs on a single-threaded
    /// runtime, which is what makes forking workers from it sound; do not
    /// call this from inside another Tokio runtime.
    pub fn start(self) -> Result<PipelineReport> {
        self.ensure_callbacks()?;

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;

        runtime.block_on(self.supervise())
    }

    /// Alias of [`start`](Self::start).
    pub fn run(self) -> Result<PipelineReport> {
        self.start()
    }

    fn ensure_callbacks(&self) -> Result<()> {
        for stage in Stage::CREATION_ORDER {
            if self.spec.count_of(stage) > 0 && self.callbacks.get(stage).is_none() {
                return Err(TasklineError::ConfigError(format!(
                    "{} stage has {} worker(s) but no {:?} callback",
                    stage,
                    self.spec.count_of(stage),
                    StageEvent::from(stage)
                )));
            }
        }
        Ok(())
    }

    async fn supervise(self) -> Result<PipelineReport> {
        let TaskExecutor {
            spec,
            callbacks,
            error_handler,
            event_tx,
            event_rx,
        } = self;

        set_process_name(&master_name(&spec.name));

        let table = SharedStateTable::create(&spec)?;
        let queues = PipelineQueues::open(&spec.queue_name)?;

        let reaper = spawn_reaper(event_tx.clone())?;
        let stop_listeners = spawn_stop_listeners(event_tx.clone(), spec.kind)?;

        let core = SupervisorCore::new(spec.clone(), table.clone());
        let backend = ForkBackend::new(spec.clone(), table, queues, callbacks, error_handler);
        let result = Runtime::new(core, event_rx, backend).run().await;

        reaper.abort();
        for listener in stop_listeners {
            listener.abort();
        }
        drop(event_tx);

        if let Err(e) = queues.remove() {
            warn!(error = %e, "failed to remove inter-stage queues");
        }

        match &result {
            Ok(report) => info!(?report, "pipeline terminated"),
            Err(e) => warn!(error = %e, "pipeline aborted"),
        }
        result
    }
}
