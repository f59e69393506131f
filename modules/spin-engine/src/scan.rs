//! Reducer stage: mutations in, states out.

use std::future;
use std::sync::Arc;

use futures::stream::{self, BoxStream, StreamExt};

use crate::guard::shielded;
use crate::traits::Middleware;

/// Fold mutations into states.
///
/// Emits `initial` first, then `reducer(&previous, &mutation)` for every
/// mutation. Middlewares see each transition in registration order and cannot
/// alter it.
///
/// The reducer must be pure and total. If it panics, the panic unwinds out of
/// the stage; inside a running loop that stops the loop with
/// `SpinError::StagePanicked`.
pub fn scan<S, M, R>(
    mutations: BoxStream<'static, M>,
    initial: S,
    reducer: R,
    middlewares: Vec<Arc<dyn Middleware<S, M>>>,
) -> BoxStream<'static, S>
where
    S: Clone + Send + Sync + 'static,
    M: Send + 'static,
    R: Fn(&S, &M) -> S + Send + 'static,
{
    let states = mutations.scan(initial.clone(), move |state, mutation| {
        let previous: &S = state;
        let next = reducer(previous, &mutation);
        for middleware in &middlewares {
            shielded("middleware", || {
                middleware.on_transition(previous, &mutation, &next)
            });
        }
        *state = next.clone();
        future::ready(Some(next))
    });

    stream::once(future::ready(initial)).chain(states).boxed()
}
