//! Execution stage: commands in, mutations out.

use std::fmt;
use std::future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures::stream::{BoxStream, SelectAll, Stream, StreamExt};
use tracing::{trace, warn};

use crate::command::MutationStream;
use crate::guard::shielded;
use crate::state_cache::StateCache;
use crate::traits::{Command, FailureObserver};

/// Commands launched by one `poll_next` before the stage yields.
const LAUNCH_BUDGET: usize = 32;

#[derive(Clone, Default)]
pub struct ExecuteOptions {
    /// Upper bound on concurrently executing commands. `None` = unbounded.
    pub max_in_flight: Option<usize>,
    pub failure_observer: Option<Arc<dyn FailureObserver>>,
}

impl fmt::Debug for ExecuteOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecuteOptions")
            .field("max_in_flight", &self.max_in_flight)
            .field("failure_observer", &self.failure_observer.is_some())
            .finish()
    }
}

/// Execute each command against the latest cached state and merge the
/// resulting mutations.
///
/// Mutations of one command keep their order; mutations of different commands
/// interleave as they arrive. A command whose stream yields an error
/// contributes nothing further; the stage itself never fails.
pub fn execute<C: Command>(
    commands: BoxStream<'static, C>,
    cache: Arc<StateCache<C::State>>,
    options: ExecuteOptions,
) -> BoxStream<'static, C::Mutation> {
    ExecuteStage {
        commands: Some(commands),
        in_flight: SelectAll::new(),
        cache,
        max_in_flight: options.max_in_flight.map(|max| max.max(1)),
        failure_observer: options.failure_observer,
        executed: 0,
    }
    .boxed()
}

struct ExecuteStage<C: Command> {
    commands: Option<BoxStream<'static, C>>,
    in_flight: SelectAll<BoxStream<'static, C::Mutation>>,
    cache: Arc<StateCache<C::State>>,
    max_in_flight: Option<usize>,
    failure_observer: Option<Arc<dyn FailureObserver>>,
    executed: u64,
}

impl<C: Command> ExecuteStage<C> {
    fn has_room(&self) -> bool {
        self.max_in_flight
            .map_or(true, |max| self.in_flight.len() < max)
    }

    fn launch(&mut self, command: C) {
        let state = self.cache.read_latest();
        self.executed += 1;
        trace!(
            command = self.executed,
            state_version = self.cache.version(),
            in_flight = self.in_flight.len(),
            "Executing command"
        );
        let mutations = recover(command.execute(state), self.failure_observer.clone());
        self.in_flight.push(mutations);
    }
}

impl<C: Command> Stream for ExecuteStage<C> {
    type Item = C::Mutation;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = &mut *self;
        let mut launched = 0;
        loop {
            // In-flight work first, so mutations that are ready right away are
            // reduced (and cached) before the next command reads the cache.
            if !this.in_flight.is_empty() {
                if let Poll::Ready(Some(mutation)) = this.in_flight.poll_next_unpin(cx) {
                    return Poll::Ready(Some(mutation));
                }
            }

            if this.has_room() {
                if let Some(commands) = this.commands.as_mut() {
                    match commands.poll_next_unpin(cx) {
                        Poll::Ready(Some(command)) => {
                            this.launch(command);
                            launched += 1;
                            if launched >= LAUNCH_BUDGET {
                                // An always-ready source must not starve the
                                // executor or the commands already launched.
                                cx.waker().wake_by_ref();
                                return Poll::Pending;
                            }
                            continue;
                        }
                        Poll::Ready(None) => {
                            trace!(executed = this.executed, "Command source exhausted");
                            this.commands = None;
                        }
                        Poll::Pending => {}
                    }
                }
            }

            if this.commands.is_none() && this.in_flight.is_empty() {
                return Poll::Ready(None);
            }
            return Poll::Pending;
        }
    }
}

/// Cut a command's stream at its first error, reporting the error.
fn recover<M: Send + 'static>(
    mutations: MutationStream<M>,
    observer: Option<Arc<dyn FailureObserver>>,
) -> BoxStream<'static, M> {
    mutations
        .take_while(move |item| {
            if let Err(error) = item {
                warn!(error = %error, "Command failed, dropping its remaining mutations");
                if let Some(observer) = &observer {
                    shielded("failure_observer", || observer.on_failure(error));
                }
            }
            future::ready(item.is_ok())
        })
        .filter_map(|item| future::ready(item.ok()))
        .boxed()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::{command_fn, fail, from_iter, just, CommandExt};
    use futures::stream;
    use std::sync::Mutex;
    use std::time::Duration;

    #[tokio::test]
    async fn failing_command_is_dropped_and_stage_continues() {
        let cache = Arc::new(StateCache::new(0));
        let commands = stream::iter(vec![
            command_fn(|_state: i32| fail::<&str>(anyhow::anyhow!("broken"))).erase(),
            command_fn(|_state: i32| just("ok")).erase(),
        ])
        .boxed();

        let out: Vec<&str> = execute(commands, cache, ExecuteOptions::default())
            .collect()
            .await;
        assert_eq!(out, vec!["ok"]);
    }

    #[tokio::test]
    async fn mutations_before_a_failure_are_kept() {
        let cache = Arc::new(StateCache::new(0));
        let command = command_fn(|_state: i32| {
            stream::iter(vec![Ok(1), Ok(2), Err(anyhow::anyhow!("mid-stream")), Ok(3)]).boxed()
        });

        let out: Vec<i32> = execute(
            stream::iter(vec![command]).boxed(),
            cache,
            ExecuteOptions::default(),
        )
        .collect()
        .await;
        assert_eq!(out, vec![1, 2]);
    }

    #[tokio::test]
    async fn failures_reach_the_observer() {
        let seen = Arc::new(Mutex::new(Vec::<String>::new()));
        let sink = Arc::clone(&seen);
        let options = ExecuteOptions {
            failure_observer: Some(Arc::new(move |error: &anyhow::Error| {
                sink.lock().unwrap().push(error.to_string());
            })),
            ..Default::default()
        };

        let commands = stream::iter(vec![
            command_fn(|_state: i32| fail::<i32>(anyhow::anyhow!("first"))).erase(),
            command_fn(|_state: i32| fail::<i32>(anyhow::anyhow!("second"))).erase(),
        ])
        .boxed();
        let out: Vec<i32> = execute(commands, Arc::new(StateCache::new(0)), options)
            .collect()
            .await;

        assert!(out.is_empty());
        assert_eq!(*seen.lock().unwrap(), vec!["first", "second"]);
    }

    #[tokio::test]
    async fn command_observes_latest_cached_state() {
        let cache = Arc::new(StateCache::new("s-init"));
        cache.write("s0");
        cache.write("s1");
        cache.write("s2");

        let command = command_fn(|state: &'static str| just(state));
        let out: Vec<&str> = execute(
            stream::iter(vec![command]).boxed(),
            cache,
            ExecuteOptions::default(),
        )
        .collect()
        .await;
        assert_eq!(out, vec!["s2"]);
    }

    #[tokio::test]
    async fn single_command_mutations_keep_their_order() {
        let command = command_fn(|_state: i32| from_iter(1..=5));
        let out: Vec<i32> = execute(
            stream::iter(vec![command]).boxed(),
            Arc::new(StateCache::new(0)),
            ExecuteOptions {
                max_in_flight: Some(1),
                ..Default::default()
            },
        )
        .collect()
        .await;
        assert_eq!(out, vec![1, 2, 3, 4, 5]);
    }

    #[tokio::test]
    async fn always_ready_source_does_not_starve_pending_commands() {
        let command = command_fn(|_state: i32| {
            stream::once(async {
                tokio::time::sleep(Duration::from_millis(1)).await;
                Ok(1)
            })
            .boxed()
        })
        .erase();

        let mut out = execute(
            stream::repeat(command).boxed(),
            Arc::new(StateCache::new(0)),
            ExecuteOptions::default(),
        );

        let first = tokio::time::timeout(Duration::from_secs(3), out.next())
            .await
            .expect("no mutation while the source stays ready");
        assert_eq!(first, Some(1));
    }

    #[tokio::test]
    async fn panicking_failure_observer_does_not_stop_the_stage() {
        let options = ExecuteOptions {
            failure_observer: Some(Arc::new(|_error: &anyhow::Error| {
                panic!("observer bug");
            })),
            ..Default::default()
        };

        let commands = stream::iter(vec![
            command_fn(|_state: i32| fail::<&str>(anyhow::anyhow!("broken"))).erase(),
            command_fn(|_state: i32| just("after")).erase(),
        ])
        .boxed();
        let out: Vec<&str> = execute(commands, Arc::new(StateCache::new(0)), options)
            .collect()
            .await;
        assert_eq!(out, vec!["after"]);
    }
}
