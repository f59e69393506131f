//! Spawning stage work onto execution contexts.

use std::future::Future;
use std::panic::AssertUnwindSafe;

use futures::channel::mpsc;
use futures::future::{AbortHandle, Abortable};
use futures::stream::{BoxStream, StreamExt};
use futures::{FutureExt, SinkExt};
use spin_common::SpinError;
use tracing::{debug, warn};

use crate::context::ContextRef;
use crate::guard::panic_message;
use crate::lifecycle::Lifecycle;

/// Run `task` on `context` as part of the loop owned by `lifecycle`.
///
/// The task is aborted on release. A panic inside it is fatal for the loop.
pub(crate) fn run_on<F>(lifecycle: &Lifecycle, context: &ContextRef, task: F)
where
    F: Future<Output = ()> + Send + 'static,
{
    let (abort, registration) = AbortHandle::new_pair();
    lifecycle.register_task(abort);
    lifecycle.retain_context(context);

    let owner = lifecycle.clone();
    let name = context.name().to_string();
    let task = Abortable::new(AssertUnwindSafe(task).catch_unwind(), registration);

    let spawned = context.spawn(
        async move {
            match task.await {
                Ok(Ok(())) => {}
                Ok(Err(panic)) => {
                    owner.fail(SpinError::StagePanicked {
                        context: name,
                        message: panic_message(panic.as_ref()),
                    });
                    owner.release();
                }
                Err(_aborted) => {
                    debug!(loop_id = %owner.id(), context = %name, "Stage aborted");
                }
            }
        }
        .boxed(),
    );

    if let Err(err) = spawned {
        warn!(loop_id = %lifecycle.id(), error = %err, "Failed to spawn stage");
        lifecycle.fail(err);
        lifecycle.release();
    }
}

/// Drive `upstream` on `context`, handing its values over through a bounded
/// channel. The returned stream is the downstream side of the hop.
pub(crate) fn hop<T: Send + 'static>(
    lifecycle: &Lifecycle,
    context: &ContextRef,
    upstream: BoxStream<'static, T>,
    buffer: usize,
) -> BoxStream<'static, T> {
    let (mut tx, rx) = mpsc::channel(buffer);
    let loop_id = lifecycle.id();
    let name = context.name().to_string();

    run_on(lifecycle, context, async move {
        let mut upstream = upstream;
        while let Some(value) = upstream.next().await {
            if tx.send(value).await.is_err() {
                debug!(%loop_id, context = %name, "Downstream closed, stopping stage");
                return;
            }
        }
        debug!(%loop_id, context = %name, "Stage completed");
    });

    rx.boxed()
}
