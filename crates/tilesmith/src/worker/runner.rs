use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use futures_util::FutureExt;
use log::{debug, error, info};
use tokio::runtime::Handle;
use tokio::task::JoinHandle;

use crate::error::WorkerError;
use crate::pipeline::{Pipeline, TileJob};

/// Runs admitted jobs as tasks on the tokio runtime, one task per job.
///
/// Every task handle is kept until [`JobRunner::wait`] collects it, so
/// shutdown can await all in-flight runs.
pub struct JobRunner {
    pipeline: Arc<Pipeline>,
    runtime: Handle,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    shutdown: AtomicBool,
}

impl JobRunner {
    /// Binds the runner to the runtime it is created on.
    pub fn new(pipeline: Arc<Pipeline>) -> Result<Self, WorkerError> {
        let runtime = Handle::try_current().map_err(|_| WorkerError::NoRuntime)?;
        Ok(Self::with_handle(pipeline, runtime))
    }

    pub fn with_handle(pipeline: Arc<Pipeline>, runtime: Handle) -> Self {
        Self {
            pipeline,
            runtime,
            tasks: Mutex::new(Vec::new()),
            shutdown: AtomicBool::new(false),
        }
    }

    fn tasks(&self) -> MutexGuard<'_, Vec<JoinHandle<()>>> {
        match self.tasks.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Starts a background run for an admitted job.
    pub fn spawn(&self, job: TileJob) -> Result<(), WorkerError> {
        if self.is_shutdown() {
            return Err(WorkerError::ShutDown);
        }

        let pipeline = Arc::clone(&self.pipeline);
        let tile_id = job.tile_id.clone();
        debug!("Spawning background run for {}", tile_id);

        let handle = self.runtime.spawn(async move {
            let run = AssertUnwindSafe(pipeline.execute(job.clone()))
                .catch_unwind()
                .await;
            match run {
                Ok(Ok(record)) => debug!(
                    "Background run for {} finished (zoom {}-{})",
                    tile_id, record.min_zoom, record.max_zoom
                ),
                Ok(Err(e)) => debug!("Background run for {} failed: {}", tile_id, e),
                Err(_) => {
                    error!("Background run for {} panicked", tile_id);
                    pipeline.abandon(&job, "Pipeline task panicked").await;
                }
            }
        });

        let mut tasks = self.tasks();
        tasks.retain(|task| !task.is_finished());
        tasks.push(handle);
        Ok(())
    }

    /// Number of background runs not yet finished.
    pub fn in_flight(&self) -> usize {
        self.tasks().iter().filter(|task| !task.is_finished()).count()
    }

    /// Refuses further submissions. Runs already started continue.
    pub fn shutdown(&self) {
        info!("Shutting down job runner...");
        self.shutdown.store(true, Ordering::SeqCst);
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }

    /// Awaits every background run started so far.
    pub async fn wait(&self) {
        loop {
            let pending = std::mem::take(&mut *self.tasks());
            if pending.is_empty() {
                break;
            }
            for task in pending {
                if let Err(e) = task.await {
                    error!("Background task failed to join: {}", e);
                }
            }
        }
        info!("All background runs have stopped");
    }
}
