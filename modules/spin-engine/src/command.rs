//! Command adapters and mutation stream helpers.

use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

use futures::stream::{self, BoxStream, StreamExt};

use crate::traits::Command;

/// Mutations produced by one command execution. An `Err` item is a failure.
pub type MutationStream<M> = BoxStream<'static, anyhow::Result<M>>;

// ---------------------------------------------------------------------------
// AnyCommand: type erasure
// ---------------------------------------------------------------------------

/// A type-erased command. Lets one source carry heterogeneous commands that
/// share a state and mutation type.
pub struct AnyCommand<S, M> {
    inner: Arc<dyn Command<State = S, Mutation = M>>,
}

impl<S, M> Clone for AnyCommand<S, M> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<S, M> fmt::Debug for AnyCommand<S, M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AnyCommand").finish_non_exhaustive()
    }
}

impl<S, M> Command for AnyCommand<S, M>
where
    S: Clone + Send + Sync + 'static,
    M: Send + 'static,
{
    type State = S;
    type Mutation = M;

    fn execute(&self, state: S) -> MutationStream<M> {
        self.inner.execute(state)
    }
}

pub trait CommandExt: Command + Sized {
    /// Erase the concrete command type.
    fn erase(self) -> AnyCommand<Self::State, Self::Mutation> {
        AnyCommand {
            inner: Arc::new(self),
        }
    }
}

impl<C: Command> CommandExt for C {}

// ---------------------------------------------------------------------------
// FnCommand: closure adapter
// ---------------------------------------------------------------------------

pub struct FnCommand<S, M, F> {
    f: F,
    _phantom: PhantomData<fn(S) -> M>,
}

/// Build a command from a closure `state -> mutations`.
pub fn command_fn<S, M, F>(f: F) -> FnCommand<S, M, F>
where
    F: Fn(S) -> MutationStream<M> + Send + Sync + 'static,
{
    FnCommand {
        f,
        _phantom: PhantomData,
    }
}

impl<S, M, F> Command for FnCommand<S, M, F>
where
    S: Clone + Send + Sync + 'static,
    M: Send + 'static,
    F: Fn(S) -> MutationStream<M> + Send + Sync + 'static,
{
    type State = S;
    type Mutation = M;

    fn execute(&self, state: S) -> MutationStream<M> {
        (self.f)(state)
    }
}

// ---------------------------------------------------------------------------
// Mutation stream helpers
// ---------------------------------------------------------------------------

/// A single, immediately available mutation.
pub fn just<M: Send + 'static>(mutation: M) -> MutationStream<M> {
    stream::once(async move { Ok(mutation) }).boxed()
}

/// Immediately available mutations, in order.
pub fn from_iter<M, I>(mutations: I) -> MutationStream<M>
where
    M: Send + 'static,
    I: IntoIterator<Item = M>,
    I::IntoIter: Send + 'static,
{
    stream::iter(mutations.into_iter().map(Ok)).boxed()
}

/// A command execution that fails before producing anything.
pub fn fail<M: Send + 'static>(error: impl Into<anyhow::Error>) -> MutationStream<M> {
    let error = error.into();
    stream::once(async move { Err(error) }).boxed()
}

/// A command execution that produces nothing.
pub fn none<M: Send + 'static>() -> MutationStream<M> {
    stream::empty().boxed()
}
