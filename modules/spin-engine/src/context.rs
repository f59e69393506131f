//! Execution contexts: where a stage's work runs.

use std::fmt;
use std::sync::Arc;
use std::thread;

use futures::future::BoxFuture;
use spin_common::SpinError;
use tokio::runtime::{Builder, Handle};
use tokio::sync::mpsc;
use tracing::debug;

use crate::traits::ExecutionContext;

pub type ContextRef = Arc<dyn ExecutionContext>;

tokio::task_local! {
    static CURRENT_CONTEXT: Arc<str>;
}

/// Name of the execution context the calling task was spawned on, if any.
pub fn current_context() -> Option<Arc<str>> {
    CURRENT_CONTEXT.try_with(Arc::clone).ok()
}

// ---------------------------------------------------------------------------
// TokioContext
// ---------------------------------------------------------------------------

/// Runs stage work as tasks on an existing tokio runtime.
#[derive(Clone)]
pub struct TokioContext {
    name: Arc<str>,
    handle: Handle,
}

impl TokioContext {
    pub fn new(name: impl Into<Arc<str>>, handle: Handle) -> Self {
        Self {
            name: name.into(),
            handle,
        }
    }

    /// Bind to the runtime the caller is running on.
    pub fn current(name: impl Into<Arc<str>>) -> Result<Self, SpinError> {
        let name = name.into();
        let handle = Handle::try_current()
            .map_err(|e| SpinError::Context(format!("{name}: {e}")))?;
        Ok(Self { name, handle })
    }

    pub fn shared(self) -> ContextRef {
        Arc::new(self)
    }
}

impl fmt::Debug for TokioContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokioContext")
            .field("name", &self.name)
            .finish()
    }
}

impl ExecutionContext for TokioContext {
    fn name(&self) -> &str {
        &self.name
    }

    fn spawn(&self, task: BoxFuture<'static, ()>) -> Result<(), SpinError> {
        self.handle
            .spawn(CURRENT_CONTEXT.scope(Arc::clone(&self.name), task));
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// WorkerContext
// ---------------------------------------------------------------------------

/// A dedicated, named OS thread driving a current-thread runtime.
///
/// All work spawned here shares one thread, so the context is serial. The
/// thread exits once every clone of the context has been dropped.
#[derive(Clone)]
pub struct WorkerContext {
    name: Arc<str>,
    queue: mpsc::UnboundedSender<BoxFuture<'static, ()>>,
}

impl WorkerContext {
    pub fn new(name: impl Into<Arc<str>>) -> Result<Self, SpinError> {
        let name: Arc<str> = name.into();
        let runtime = Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| SpinError::Context(format!("{name}: {e}")))?;

        let (queue, mut tasks) = mpsc::unbounded_channel::<BoxFuture<'static, ()>>();
        let scope = Arc::clone(&name);

        thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                runtime.block_on(async {
                    while let Some(task) = tasks.recv().await {
                        tokio::spawn(CURRENT_CONTEXT.scope(Arc::clone(&scope), task));
                    }
                });
                debug!(context = %scope, "Worker context stopped");
            })
            .map_err(|e| SpinError::Context(format!("{name}: {e}")))?;

        Ok(Self { name, queue })
    }

    pub fn shared(self) -> ContextRef {
        Arc::new(self)
    }
}

impl fmt::Debug for WorkerContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerContext")
            .field("name", &self.name)
            .finish()
    }
}

impl ExecutionContext for WorkerContext {
    fn name(&self) -> &str {
        &self.name
    }

    fn spawn(&self, task: BoxFuture<'static, ()>) -> Result<(), SpinError> {
        self.queue
            .send(task)
            .map_err(|_| SpinError::Context(format!("worker '{}' has shut down", self.name)))
    }
}
