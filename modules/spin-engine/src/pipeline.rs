//! Pipeline composition and the loop driver.
//!
//! A [`Pipeline`] is a lazy description of a stage chain. Each pipeline is
//! bound to the execution context its trailing stages run on; `observe_on`,
//! `consume` and `feedback` switch to a new context by driving everything
//! before them on the previous one. Nothing runs until [`Pipeline::spin`] or
//! [`Pipeline::into_stream`].

use std::future;
use std::pin::Pin;
use std::task::{Context, Poll};

use futures::stream::{BoxStream, Stream, StreamExt};
use spin_common::{LoopConfig, SpinError};
use tracing::{debug, error, info};

use crate::context::ContextRef;
use crate::feedback::Feedback;
use crate::guard::shielded;
use crate::handle::LoopHandle;
use crate::lifecycle::{Lifecycle, LoopStatus};
use crate::stage::{hop, run_on};
use crate::traits::Command;

/// What a stage builder gets at spin time.
struct StageScope {
    lifecycle: Lifecycle,
    config: LoopConfig,
}

type Build<T> = Box<dyn FnOnce(&StageScope) -> BoxStream<'static, T> + Send>;

/// Entry point for building a loop.
pub struct Spinner;

impl Spinner {
    /// Start a pipeline from a lazily created source. `source` is called at
    /// spin time, and the source is driven on `context`.
    pub fn from<C, St, F>(context: ContextRef, source: F) -> Pipeline<C>
    where
        C: Send + 'static,
        St: Stream<Item = C> + Send + 'static,
        F: FnOnce() -> St + Send + 'static,
    {
        Pipeline {
            context,
            config: LoopConfig::default(),
            build: Box::new(move |_scope: &StageScope| source().boxed()),
        }
    }

    /// Like [`Spinner::from`], for sources that can fail. The first error
    /// ends command intake and stops the loop with `SpinError::SourceFailed`.
    pub fn from_fallible<C, St, F>(context: ContextRef, source: F) -> Pipeline<C>
    where
        C: Send + 'static,
        St: Stream<Item = anyhow::Result<C>> + Send + 'static,
        F: FnOnce() -> St + Send + 'static,
    {
        Pipeline {
            context,
            config: LoopConfig::default(),
            build: Box::new(move |scope: &StageScope| {
                let lifecycle = scope.lifecycle.clone();
                source()
                    .take_while(move |item| {
                        if let Err(err) = item {
                            error!(loop_id = %lifecycle.id(), error = %err, "Command source failed");
                            lifecycle.fail(SpinError::SourceFailed(format!("{err:#}")));
                        }
                        future::ready(item.is_ok())
                    })
                    .filter_map(|item| future::ready(item.ok()))
                    .boxed()
            }),
        }
    }
}

pub struct Pipeline<T> {
    context: ContextRef,
    config: LoopConfig,
    build: Build<T>,
}

impl<T: Send + 'static> Pipeline<T> {
    /// The context the trailing stages of this pipeline run on.
    pub fn context(&self) -> &ContextRef {
        &self.context
    }

    pub fn with_config(mut self, config: LoopConfig) -> Self {
        self.config = config;
        self
    }

    fn then<U, F>(self, stage: F) -> Pipeline<U>
    where
        U: Send + 'static,
        F: FnOnce(BoxStream<'static, T>, &StageScope) -> BoxStream<'static, U> + Send + 'static,
    {
        let Pipeline {
            context,
            config,
            build,
        } = self;
        Pipeline {
            context,
            config,
            build: Box::new(move |scope: &StageScope| stage(build(scope), scope)),
        }
    }

    /// Re-type the stream with an arbitrary transform. The transform runs on
    /// the pipeline's current context.
    pub fn compose<U, St, F>(self, transform: F) -> Pipeline<U>
    where
        U: Send + 'static,
        St: Stream<Item = U> + Send + 'static,
        F: FnOnce(BoxStream<'static, T>) -> St + Send + 'static,
    {
        self.then(move |stream, _scope| transform(stream).boxed())
    }

    pub fn map<U, F>(self, f: F) -> Pipeline<U>
    where
        U: Send + 'static,
        F: FnMut(T) -> U + Send + 'static,
    {
        self.compose(move |stream| stream.map(f))
    }

    /// Fold values into states on the current context, emitting `initial`
    /// first. Unlike `feedback`, states are not fed back anywhere.
    pub fn scan<S, R>(self, initial: S, reducer: R) -> Pipeline<S>
    where
        S: Clone + Send + Sync + 'static,
        R: Fn(&S, &T) -> S + Send + 'static,
    {
        self.compose(move |values| crate::scan::scan(values, initial, reducer, Vec::new()))
    }

    /// Tap every value without altering it. A panicking observer is logged
    /// and the value still flows on.
    pub fn spy<F>(self, observer: F) -> Self
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        self.tap("spy", observer)
    }

    fn tap<F>(self, stage: &'static str, observer: F) -> Self
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        self.compose(move |stream| {
            stream.inspect(move |value| shielded(stage, || observer(value)))
        })
    }

    /// Switch execution context: stages so far keep running on the current
    /// context, stages added after this run on `context`.
    pub fn observe_on(self, context: ContextRef) -> Self {
        let Pipeline {
            context: previous,
            config,
            build,
        } = self;
        Pipeline {
            context,
            config,
            build: Box::new(move |scope: &StageScope| {
                let upstream = build(scope);
                hop(
                    &scope.lifecycle,
                    &previous,
                    upstream,
                    scope.config.stage_buffer,
                )
            }),
        }
    }

    /// Observe every value on `on`. Same contract as [`Pipeline::spy`].
    pub fn consume<F>(self, by: F, on: ContextRef) -> Self
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        self.observe_on(on).tap("consume", by)
    }

    /// Start the loop: spawn every stage onto its context and drain the final
    /// stream on this pipeline's context.
    #[doc(alias = "engage")]
    pub fn spin(self) -> LoopHandle {
        let Pipeline {
            context,
            config,
            build,
        } = self;

        let lifecycle = Lifecycle::new();
        lifecycle.start();
        info!(
            loop_id = %lifecycle.id(),
            context = context.name(),
            stage_buffer = config.stage_buffer,
            "Loop spinning"
        );

        let scope = StageScope {
            lifecycle: lifecycle.clone(),
            config,
        };
        let tail = build(&scope);

        let owner = lifecycle.clone();
        run_on(&lifecycle, &context, async move {
            tail.for_each(|_| future::ready(())).await;
            debug!(loop_id = %owner.id(), "Pipeline drained");
            owner.release();
        });

        LoopHandle::new(lifecycle)
    }

    /// Start the stages and hand back the final stream instead of draining
    /// it. The trailing stages run on whichever task polls the stream.
    /// Dropping the stream releases every stage.
    pub fn into_stream(self) -> PipelineStream<T> {
        let Pipeline { config, build, .. } = self;

        let lifecycle = Lifecycle::new();
        lifecycle.start();
        let scope = StageScope {
            lifecycle: lifecycle.clone(),
            config,
        };
        let inner = build(&scope);

        PipelineStream { inner, lifecycle }
    }
}

impl<C: Command> Pipeline<C> {
    /// Execute commands against the latest state, reduce their mutations and
    /// feed every new state back. The stage runs on `on`.
    #[doc(alias = "execute_and_scan")]
    pub fn feedback<R>(self, initial: C::State, reducer: R, on: ContextRef) -> Pipeline<C::State>
    where
        R: Fn(&C::State, &C::Mutation) -> C::State + Send + Sync + 'static,
    {
        self.feedback_with(Feedback::new(initial, reducer), on)
    }

    pub fn feedback_with(
        self,
        feedback: Feedback<C::State, C::Mutation>,
        on: ContextRef,
    ) -> Pipeline<C::State> {
        self.observe_on(on).then(move |commands, scope| {
            let (states, cache) = feedback.attach(commands, scope.config.max_in_flight);
            let loop_id = scope.lifecycle.id();
            scope.lifecycle.on_release(move || {
                if cache.close() {
                    debug!(%loop_id, writes = cache.version(), "State cache closed");
                }
            });
            states
        })
    }

    #[deprecated(note = "renamed to `feedback`")]
    pub fn execute_and_scan<R>(
        self,
        initial: C::State,
        reducer: R,
        on: ContextRef,
    ) -> Pipeline<C::State>
    where
        R: Fn(&C::State, &C::Mutation) -> C::State + Send + Sync + 'static,
    {
        self.feedback(initial, reducer, on)
    }
}

// ---------------------------------------------------------------------------
// PipelineStream
// ---------------------------------------------------------------------------

/// The final stream of a started pipeline. Owns the stages feeding it.
pub struct PipelineStream<T> {
    inner: BoxStream<'static, T>,
    lifecycle: Lifecycle,
}

impl<T> PipelineStream<T> {
    pub fn is_released(&self) -> bool {
        self.lifecycle.status() == LoopStatus::Stopped
    }
}

impl<T> Stream for PipelineStream<T> {
    type Item = T;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<T>> {
        let polled = self.inner.poll_next_unpin(cx);
        if let Poll::Ready(None) = polled {
            self.lifecycle.release();
        }
        polled
    }
}

impl<T> Drop for PipelineStream<T> {
    fn drop(&mut self) {
        self.lifecycle.release();
    }
}
