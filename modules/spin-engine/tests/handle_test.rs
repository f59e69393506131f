//! Loop lifecycle: release, join, drop and status reporting.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::stream::{self, StreamExt};
use spin_engine::command::just;
use spin_engine::{
    command_fn, AnyCommand, CommandExt, ContextRef, LoopStatus, Spinner, TokioContext,
    WorkerContext,
};
use tokio::time::{sleep, timeout};

const JOIN_TIMEOUT: Duration = Duration::from_secs(5);

fn tokio_context(name: &str) -> ContextRef {
    TokioContext::current(name).unwrap().shared()
}

fn worker_context(name: &str) -> ContextRef {
    WorkerContext::new(name).unwrap().shared()
}

fn add_one(state: &u64, _mutation: &()) -> u64 {
    state + 1
}

/// One increment command every few milliseconds, forever.
fn ticking_commands() -> impl futures::Stream<Item = AnyCommand<u64, ()>> + Send {
    stream::unfold((), |()| async {
        sleep(Duration::from_millis(5)).await;
        Some((command_fn(|_state: u64| just(())).erase(), ()))
    })
}

fn counter() -> (Arc<AtomicUsize>, impl Fn(&u64) + Send + Sync + 'static) {
    let count = Arc::new(AtomicUsize::new(0));
    let sink = Arc::clone(&count);
    (count, move |_state: &u64| {
        sink.fetch_add(1, Ordering::SeqCst);
    })
}

async fn settle() {
    sleep(Duration::from_millis(30)).await;
}

// =========================================================================
// Release
// =========================================================================

#[tokio::test]
async fn release_is_idempotent() {
    let (consumed, record) = counter();

    let handle = Spinner::from(tokio_context("FROM"), ticking_commands)
        .feedback(0, add_one, worker_context("FEEDBACK"))
        .consume(record, worker_context("CONSUME"))
        .spin();

    sleep(Duration::from_millis(50)).await;
    assert_eq!(handle.status(), LoopStatus::Running);
    assert!(consumed.load(Ordering::SeqCst) > 0);

    assert!(handle.release());
    assert!(!handle.release());
    assert_eq!(handle.status(), LoopStatus::Stopped);
    assert!(handle.is_released());
}

#[tokio::test]
async fn no_states_are_consumed_after_release() {
    let (consumed, record) = counter();

    let handle = Spinner::from(tokio_context("FROM"), ticking_commands)
        .feedback(0, add_one, worker_context("FEEDBACK"))
        .consume(record, worker_context("CONSUME"))
        .spin();

    sleep(Duration::from_millis(50)).await;
    handle.release();
    settle().await;

    let at_release = consumed.load(Ordering::SeqCst);
    sleep(Duration::from_millis(100)).await;
    assert_eq!(consumed.load(Ordering::SeqCst), at_release);
}

#[tokio::test]
async fn dropping_the_handle_releases_the_loop() {
    let (consumed, record) = counter();

    let handle = Spinner::from(tokio_context("FROM"), ticking_commands)
        .feedback(0, add_one, worker_context("FEEDBACK"))
        .consume(record, worker_context("CONSUME"))
        .spin();

    sleep(Duration::from_millis(50)).await;
    drop(handle);
    settle().await;

    let at_drop = consumed.load(Ordering::SeqCst);
    sleep(Duration::from_millis(100)).await;
    assert_eq!(consumed.load(Ordering::SeqCst), at_drop);
}

#[tokio::test]
async fn dropping_the_stream_releases_the_loop() {
    let mut states = Spinner::from(tokio_context("FROM"), ticking_commands)
        .feedback(0, add_one, worker_context("FEEDBACK"))
        .into_stream();

    let first_two: Vec<u64> = (&mut states).take(2).collect().await;
    assert_eq!(first_two, vec![0, 1]);
    assert!(!states.is_released());
    drop(states);
}

// =========================================================================
// Join and status
// =========================================================================

#[tokio::test]
async fn join_returns_after_the_source_completes() {
    let (consumed, record) = counter();
    let commands: Vec<AnyCommand<u64, ()>> = (0..3)
        .map(|_| command_fn(|_state: u64| just(())).erase())
        .collect();

    let handle = Spinner::from(tokio_context("FROM"), move || stream::iter(commands))
        .feedback(0, add_one, worker_context("FEEDBACK"))
        .consume(record, tokio_context("CONSUME"))
        .spin();

    timeout(JOIN_TIMEOUT, handle.join()).await.unwrap().unwrap();
    assert_eq!(consumed.load(Ordering::SeqCst), 4);
}

#[tokio::test]
async fn completed_loop_reports_stopped() {
    let handle = Spinner::from(tokio_context("FROM"), || stream::iter(vec![1, 2, 3]))
        .consume(|_value: &i32| {}, tokio_context("CONSUME"))
        .spin();

    timeout(JOIN_TIMEOUT, async {
        while !handle.is_released() {
            sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();

    assert_eq!(handle.status(), LoopStatus::Stopped);
    assert!(!handle.release());
}

#[tokio::test]
async fn join_after_release_is_ok() {
    let handle = Spinner::from(tokio_context("FROM"), ticking_commands)
        .feedback(0, add_one, worker_context("FEEDBACK"))
        .spin();

    sleep(Duration::from_millis(20)).await;
    handle.release();
    timeout(JOIN_TIMEOUT, handle.join()).await.unwrap().unwrap();
}

#[tokio::test]
async fn each_loop_gets_its_own_identity() {
    let first = Spinner::from(tokio_context("FROM"), ticking_commands)
        .feedback(0, add_one, tokio_context("FEEDBACK"))
        .spin();
    let second = Spinner::from(tokio_context("FROM"), ticking_commands)
        .feedback(0, add_one, tokio_context("FEEDBACK"))
        .spin();

    assert_ne!(first.id(), second.id());
    assert!(first.started_at() <= second.started_at());
    assert_eq!(first.id().to_string(), first.id().as_uuid().to_string());
}
