//! Worker pool for asynchronous actions.
//!
//! The pool owns a multi-threaded tokio runtime and runs every task on its
//! blocking threads, because action code drives hardware synchronously.
//! Nothing runs before [`WorkerPool::start`], and [`WorkerPool::stop`] shuts
//! the runtime down. A task that will never run is still invoked once, with
//! [`Dispatch::Discard`], so its owner can record the reason.

use crate::config::PoolConfig;
use parking_lot::{Condvar, Mutex};
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tokio::runtime::{Builder, Handle, Runtime};

/// Errors from the worker pool lifecycle.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum PoolError {
    #[error("Worker pool is not running")]
    NotRunning,

    #[error("Worker pool is already running")]
    AlreadyRunning,

    #[error("Invalid worker pool configuration: {0}")]
    InvalidConfig(String),

    #[error("Failed to start worker runtime: {0}")]
    Spawn(String),

    #[error("Task discarded by worker pool stop")]
    Discarded,
}

/// How a submitted task is invoked.
#[derive(Debug, Clone, PartialEq)]
pub enum Dispatch {
    /// A worker picked the task up.
    Run,
    /// The task will never run.
    Discard(PoolError),
}

/// A unit of work submitted to the pool. It is invoked exactly once.
pub type Task = Box<dyn FnOnce(Dispatch) + Send + 'static>;

#[derive(Debug, Default)]
struct Counts {
    queued: usize,
    running: usize,
    discarding: bool,
}

#[derive(Debug, Default)]
struct Shared {
    counts: Mutex<Counts>,
    idle: Condvar,
}

impl Shared {
    /// Move a job from queued to running and decide how to invoke it.
    fn begin(&self) -> Dispatch {
        let mut counts = self.counts.lock();
        counts.queued -= 1;
        counts.running += 1;
        if counts.discarding {
            Dispatch::Discard(PoolError::Discarded)
        } else {
            Dispatch::Run
        }
    }

    fn end(&self) {
        let mut counts = self.counts.lock();
        counts.running -= 1;
        if counts.queued == 0 && counts.running == 0 {
            self.idle.notify_all();
        }
    }

    fn wait_idle(&self, deadline: Instant) -> bool {
        let mut counts = self.counts.lock();
        while counts.queued > 0 || counts.running > 0 {
            if self.idle.wait_until(&mut counts, deadline).timed_out() {
                return counts.queued == 0 && counts.running == 0;
            }
        }
        true
    }
}

/// A queued task. Dropping it unrun, as tokio does with blocking work still
/// queued at shutdown, invokes it with `Dispatch::Discard`.
struct Job {
    task: Option<Task>,
    shared: Arc<Shared>,
}

impl Job {
    fn run(mut self) {
        if let Some(task) = self.task.take() {
            let dispatch = self.shared.begin();
            invoke(task, dispatch);
            self.shared.end();
        }
    }
}

impl Drop for Job {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            self.shared.begin();
            invoke(task, Dispatch::Discard(PoolError::Discarded));
            self.shared.end();
        }
    }
}

fn invoke(task: Task, dispatch: Dispatch) {
    if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| task(dispatch))) {
        tracing::error!(reason = %panic_message(payload.as_ref()), "Worker task panicked");
    }
}

/// Fixed-size pool of worker threads backed by a tokio runtime.
///
/// # Example
///
/// ```rust
/// use actionable::action::WorkerPool;
/// use actionable::config::PoolConfig;
/// use std::sync::mpsc;
///
/// let pool = WorkerPool::new(PoolConfig::default().with_workers(2));
/// pool.start().unwrap();
///
/// let (tx, rx) = mpsc::channel();
/// pool.submit(move || tx.send(7).unwrap()).unwrap();
/// assert_eq!(rx.recv().unwrap(), 7);
///
/// pool.stop();
/// assert!(pool.submit(|| {}).is_err());
/// ```
pub struct WorkerPool {
    config: PoolConfig,
    shared: Arc<Shared>,
    runtime: Mutex<Option<Runtime>>,
}

impl WorkerPool {
    pub fn new(config: PoolConfig) -> Self {
        Self {
            config,
            shared: Arc::new(Shared::default()),
            runtime: Mutex::new(None),
        }
    }

    /// Build and start a pool in one step.
    pub fn started(config: PoolConfig) -> Result<Arc<Self>, PoolError> {
        let pool = Arc::new(Self::new(config));
        pool.start()?;
        Ok(pool)
    }

    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    /// Build the runtime. Worker threads are spawned on demand.
    pub fn start(&self) -> Result<(), PoolError> {
        self.config.validate().map_err(PoolError::InvalidConfig)?;

        let mut slot = self.runtime.lock();
        if slot.is_some() {
            return Err(PoolError::AlreadyRunning);
        }

        let prefix = self.config.thread_name.clone();
        let next = AtomicUsize::new(0);
        let runtime = Builder::new_multi_thread()
            .worker_threads(self.config.workers)
            .max_blocking_threads(self.config.workers)
            .thread_name_fn(move || format!("{}-{}", prefix, next.fetch_add(1, Ordering::Relaxed)))
            .build()
            .map_err(|err| PoolError::Spawn(err.to_string()))?;

        self.shared.counts.lock().discarding = false;
        *slot = Some(runtime);
        tracing::info!(workers = self.config.workers, "Worker pool started");
        Ok(())
    }

    /// Stop accepting tasks and shut the runtime down.
    ///
    /// Queued tasks run first when `run_until_queue_empty` is set, otherwise
    /// they are discarded. Either way the wait is bounded by the configured
    /// shutdown timeout. Called from one of the pool's own threads, the
    /// runtime is released in the background and queued tasks are discarded.
    pub fn stop(&self) {
        let runtime = {
            let mut slot = self.runtime.lock();
            let Some(runtime) = slot.take() else {
                return;
            };
            let mut counts = self.shared.counts.lock();
            if !self.config.run_until_queue_empty {
                counts.discarding = true;
                if counts.queued > 0 {
                    tracing::warn!(count = counts.queued, "Discarding queued tasks on stop");
                }
            }
            runtime
        };

        if Handle::try_current().is_ok() {
            runtime.shutdown_background();
            tracing::info!("Worker pool stopped from within a runtime");
            return;
        }

        let deadline = Instant::now() + self.config.shutdown_timeout();
        if !self.shared.wait_idle(deadline) {
            tracing::warn!(
                timeout_ms = self.config.shutdown_timeout_ms,
                "Worker pool tasks still running at shutdown timeout"
            );
        }
        runtime.shutdown_timeout(deadline.saturating_duration_since(Instant::now()));
        tracing::info!("Worker pool stopped");
    }

    /// Queue plain work. It is dropped without running if the pool discards it.
    pub fn submit<F>(&self, work: F) -> Result<(), PoolError>
    where
        F: FnOnce() + Send + 'static,
    {
        self.submit_task(Box::new(move |dispatch| {
            if dispatch == Dispatch::Run {
                work();
            }
        }))
    }

    /// Queue a task that is told whether it runs or is discarded.
    ///
    /// When the pool is not running the task is invoked on the calling thread
    /// with `Dispatch::Discard(PoolError::NotRunning)` before the error is returned.
    pub fn submit_task(&self, task: Task) -> Result<(), PoolError> {
        let slot = self.runtime.lock();
        match slot.as_ref() {
            Some(runtime) => {
                self.shared.counts.lock().queued += 1;
                let job = Job {
                    task: Some(task),
                    shared: Arc::clone(&self.shared),
                };
                runtime.spawn_blocking(move || job.run());
                Ok(())
            }
            None => {
                drop(slot);
                invoke(task, Dispatch::Discard(PoolError::NotRunning));
                Err(PoolError::NotRunning)
            }
        }
    }

    pub fn is_running(&self) -> bool {
        self.runtime.lock().is_some()
    }

    /// Number of tasks waiting for a worker.
    pub fn queued(&self) -> usize {
        self.shared.counts.lock().queued
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.stop();
    }
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("workers", &self.config.workers)
            .field("running", &self.is_running())
            .field("queued", &self.queued())
            .finish()
    }
}

/// Best-effort text of a panic payload.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
