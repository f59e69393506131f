//! Core traits for the feedback loop.

use std::sync::Arc;

use futures::future::BoxFuture;
use spin_common::SpinError;

use crate::command::MutationStream;

/// A unit of work that, given the current state, produces mutations.
///
/// Must be callable repeatedly and concurrently. A failure is signalled by an
/// `Err` item in the returned stream; the loop stops reading that stream and
/// keeps going with the next command.
pub trait Command: Send + Sync + 'static {
    type State: Clone + Send + Sync + 'static;
    type Mutation: Send + 'static;

    fn execute(&self, state: Self::State) -> MutationStream<Self::Mutation>;
}

/// Lets callers keep a handle on a command (for assertions or bookkeeping)
/// while the loop owns a clone.
impl<C: Command + ?Sized> Command for Arc<C> {
    type State = C::State;
    type Mutation = C::Mutation;

    fn execute(&self, state: Self::State) -> MutationStream<Self::Mutation> {
        (**self).execute(state)
    }
}

/// A scheduling target a stage's work can be bound to.
///
/// Implementations must run spawned tasks inside the context's task-local
/// scope so that [`current_context`](crate::current_context) reports `name()`.
pub trait ExecutionContext: Send + Sync + 'static {
    fn name(&self) -> &str;

    fn spawn(&self, task: BoxFuture<'static, ()>) -> Result<(), SpinError>;
}

/// Observes every state transition of a scan stage. Purely side-effecting:
/// cannot change the emitted state. Panics are caught and logged.
pub trait Middleware<S, M>: Send + Sync {
    fn on_transition(&self, previous: &S, mutation: &M, next: &S);
}

impl<S, M, F> Middleware<S, M> for F
where
    F: Fn(&S, &M, &S) + Send + Sync,
{
    fn on_transition(&self, previous: &S, mutation: &M, next: &S) {
        self(previous, mutation, next)
    }
}

/// Side channel for command failures swallowed by the execution stage.
pub trait FailureObserver: Send + Sync {
    fn on_failure(&self, error: &anyhow::Error);
}

impl<F> FailureObserver for F
where
    F: Fn(&anyhow::Error) + Send + Sync,
{
    fn on_failure(&self, error: &anyhow::Error) {
        self(error)
    }
}
