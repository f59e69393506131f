//! Loop identity and lifetime bookkeeping.

use std::fmt;
use std::mem;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures::future::AbortHandle;
use serde::Serialize;
use spin_common::SpinError;
use tokio::sync::watch;
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::context::ContextRef;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct LoopId(Uuid);

impl LoopId {
    fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl fmt::Display for LoopId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

/// `Idle → Running → Stopped`. There is no way back from `Stopped`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LoopStatus {
    Idle,
    Running,
    Stopped,
}

// ---------------------------------------------------------------------------
// Lifecycle
// ---------------------------------------------------------------------------

/// Shared by every stage of one loop instance. Owns the abort handles of the
/// stage tasks, the contexts they run on, and the teardown hooks.
#[derive(Clone)]
pub(crate) struct Lifecycle {
    inner: Arc<Inner>,
}

struct Inner {
    id: LoopId,
    status: watch::Sender<LoopStatus>,
    tasks: Mutex<Vec<AbortHandle>>,
    contexts: Mutex<Vec<ContextRef>>,
    release_hooks: Mutex<Vec<Box<dyn FnOnce() + Send>>>,
    failure: Mutex<Option<SpinError>>,
}

impl Lifecycle {
    pub(crate) fn new() -> Self {
        let (status, _) = watch::channel(LoopStatus::Idle);
        Self {
            inner: Arc::new(Inner {
                id: LoopId::new(),
                status,
                tasks: Mutex::new(Vec::new()),
                contexts: Mutex::new(Vec::new()),
                release_hooks: Mutex::new(Vec::new()),
                failure: Mutex::new(None),
            }),
        }
    }

    pub(crate) fn id(&self) -> LoopId {
        self.inner.id
    }

    pub(crate) fn status(&self) -> LoopStatus {
        *self.inner.status.borrow()
    }

    /// `Idle → Running`. Returns false from any other state.
    pub(crate) fn start(&self) -> bool {
        self.inner.status.send_if_modified(|status| {
            if *status == LoopStatus::Idle {
                *status = LoopStatus::Running;
                true
            } else {
                false
            }
        })
    }

    /// Track a stage task. Aborted immediately if the loop already stopped.
    pub(crate) fn register_task(&self, task: AbortHandle) {
        let mut tasks = lock(&self.inner.tasks);
        if self.status() == LoopStatus::Stopped {
            task.abort();
            return;
        }
        tasks.push(task);
    }

    /// Keep a context alive for as long as the loop runs.
    pub(crate) fn retain_context(&self, context: &ContextRef) {
        let mut contexts = lock(&self.inner.contexts);
        if self.status() == LoopStatus::Stopped {
            return;
        }
        if !contexts.iter().any(|held| Arc::ptr_eq(held, context)) {
            contexts.push(Arc::clone(context));
        }
    }

    /// Run `hook` once on release (or now, if already released).
    pub(crate) fn on_release(&self, hook: impl FnOnce() + Send + 'static) {
        let mut hooks = lock(&self.inner.release_hooks);
        if self.status() == LoopStatus::Stopped {
            drop(hooks);
            hook();
            return;
        }
        hooks.push(Box::new(hook));
    }

    /// Record a fatal failure. Only the first one is kept.
    pub(crate) fn fail(&self, err: SpinError) {
        let mut failure = lock(&self.inner.failure);
        if failure.is_none() {
            error!(loop_id = %self.inner.id, error = %err, "Loop failed");
            *failure = Some(err);
        } else {
            debug!(loop_id = %self.inner.id, error = %err, "Additional loop failure ignored");
        }
    }

    pub(crate) fn take_failure(&self) -> Option<SpinError> {
        lock(&self.inner.failure).take()
    }

    /// Stop the loop. Only the first call does anything; it returns true.
    pub(crate) fn release(&self) -> bool {
        let stopped = self.inner.status.send_if_modified(|status| {
            if *status == LoopStatus::Stopped {
                false
            } else {
                *status = LoopStatus::Stopped;
                true
            }
        });
        if !stopped {
            return false;
        }

        let tasks = mem::take(&mut *lock(&self.inner.tasks));
        let hooks = mem::take(&mut *lock(&self.inner.release_hooks));
        let contexts = mem::take(&mut *lock(&self.inner.contexts));

        for task in &tasks {
            task.abort();
        }
        for hook in hooks {
            hook();
        }
        drop(contexts);

        info!(loop_id = %self.inner.id, stages = tasks.len(), "Loop stopped");
        true
    }

    /// Resolves once the loop reaches `Stopped`.
    pub(crate) async fn stopped(&self) {
        let mut status = self.inner.status.subscribe();
        // The sender lives as long as `self`, so this cannot fail.
        let _ = status
            .wait_for(|status| *status == LoopStatus::Stopped)
            .await;
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn transitions_idle_running_stopped() {
        let lifecycle = Lifecycle::new();
        assert_eq!(lifecycle.status(), LoopStatus::Idle);
        assert!(lifecycle.start());
        assert!(!lifecycle.start());
        assert_eq!(lifecycle.status(), LoopStatus::Running);
        assert!(lifecycle.release());
        assert_eq!(lifecycle.status(), LoopStatus::Stopped);
        assert!(!lifecycle.start());
        assert_eq!(lifecycle.status(), LoopStatus::Stopped);
    }

    #[test]
    fn release_runs_hooks_exactly_once() {
        let lifecycle = Lifecycle::new();
        lifecycle.start();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        lifecycle.on_release(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        assert!(lifecycle.release());
        assert!(!lifecycle.release());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn late_registrations_are_torn_down_immediately() {
        let lifecycle = Lifecycle::new();
        lifecycle.release();

        let (task, _registration) = AbortHandle::new_pair();
        lifecycle.register_task(task.clone());
        assert!(task.is_aborted());

        let ran = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&ran);
        lifecycle.on_release(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(ran.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn keeps_first_failure_only() {
        let lifecycle = Lifecycle::new();
        lifecycle.fail(SpinError::SourceFailed("first".into()));
        lifecycle.fail(SpinError::SourceFailed("second".into()));
        let failure = lifecycle.take_failure().unwrap();
        assert_eq!(failure.to_string(), "Command source failed: first");
        assert!(lifecycle.take_failure().is_none());
    }
}
