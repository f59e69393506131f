//! The fused execute → reduce → rebroadcast operation.

use std::fmt;
use std::sync::Arc;

use futures::stream::{BoxStream, StreamExt};

use crate::execute::{execute, ExecuteOptions};
use crate::scan::scan;
use crate::state_cache::StateCache;
use crate::traits::{Command, FailureObserver, Middleware};

type Reducer<S, M> = Box<dyn Fn(&S, &M) -> S + Send + Sync>;

/// Everything a feedback stage needs: the initial state, the reducer and the
/// optional observers and limits.
pub struct Feedback<S, M> {
    initial: S,
    reducer: Reducer<S, M>,
    middlewares: Vec<Arc<dyn Middleware<S, M>>>,
    failure_observer: Option<Arc<dyn FailureObserver>>,
    max_in_flight: Option<usize>,
}

impl<S, M> Feedback<S, M>
where
    S: Clone + Send + Sync + 'static,
    M: Send + 'static,
{
    pub fn new(initial: S, reducer: impl Fn(&S, &M) -> S + Send + Sync + 'static) -> Self {
        Self {
            initial,
            reducer: Box::new(reducer),
            middlewares: Vec::new(),
            failure_observer: None,
            max_in_flight: None,
        }
    }

    pub fn middleware(mut self, middleware: impl Middleware<S, M> + 'static) -> Self {
        self.middlewares.push(Arc::new(middleware));
        self
    }

    pub fn on_failure(mut self, observer: impl FailureObserver + 'static) -> Self {
        self.failure_observer = Some(Arc::new(observer));
        self
    }

    /// Overrides `LoopConfig::max_in_flight` for this stage.
    pub fn max_in_flight(mut self, max: usize) -> Self {
        self.max_in_flight = Some(max);
        self
    }

    /// Run the loop over `commands` outside of a pipeline.
    ///
    /// The state cache lives as long as the returned stream.
    pub fn apply<C>(self, commands: BoxStream<'static, C>) -> BoxStream<'static, S>
    where
        C: Command<State = S, Mutation = M>,
    {
        self.attach(commands, None).0
    }

    /// Wire execute → scan → cache. Returns the state stream and the cache it
    /// feeds so the caller can tie the cache to a loop's lifetime.
    pub(crate) fn attach<C>(
        self,
        commands: BoxStream<'static, C>,
        default_max_in_flight: Option<usize>,
    ) -> (BoxStream<'static, S>, Arc<StateCache<S>>)
    where
        C: Command<State = S, Mutation = M>,
    {
        let cache = Arc::new(StateCache::new(self.initial.clone()));

        let mutations = execute(
            commands,
            Arc::clone(&cache),
            ExecuteOptions {
                max_in_flight: self.max_in_flight.or(default_max_in_flight),
                failure_observer: self.failure_observer,
            },
        );

        let writer = Arc::clone(&cache);
        let states = scan(mutations, self.initial, self.reducer, self.middlewares)
            .inspect(move |state| {
                writer.write(state.clone());
            })
            .boxed();

        (states, cache)
    }
}

impl<S: fmt::Debug, M> fmt::Debug for Feedback<S, M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Feedback")
            .field("initial", &self.initial)
            .field("middlewares", &self.middlewares.len())
            .field("failure_observer", &self.failure_observer.is_some())
            .field("max_in_flight", &self.max_in_flight)
            .finish()
    }
}
