mod counter;

use std::sync::{Arc, Mutex};

use anyhow::Result;
use chrono::Utc;
use futures::StreamExt;
use serde::Serialize;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use spin_common::LoopConfig;
use spin_engine::{current_context, Feedback, Spinner, TokioContext, WorkerContext};

use counter::{reduce, script, CounterMutation, CounterState};

const ROUNDS: usize = 12;

#[derive(Debug, Serialize)]
struct RunSummary {
    loop_id: String,
    started_at: chrono::DateTime<Utc>,
    finished_at: chrono::DateTime<Utc>,
    states_seen: usize,
    failures: usize,
    final_state: Option<CounterState>,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("spin_engine=info".parse()?))
        .init();

    info!("Spin demo starting...");

    let config = LoopConfig::from_env()?;
    config.log();

    let failures = Arc::new(Mutex::new(0usize));
    let seen = Arc::new(Mutex::new(Vec::<CounterState>::new()));

    let failure_count = Arc::clone(&failures);
    let feedback = Feedback::new(CounterState::default(), reduce)
        .middleware(
            |prev: &CounterState, mutation: &CounterMutation, next: &CounterState| {
                if matches!(mutation, CounterMutation::Reset) {
                    info!(from = prev.value, resets = next.resets, "Counter reset");
                }
            },
        )
        .on_failure(move |error: &anyhow::Error| {
            warn!(error = %error, "Command failed");
            if let Ok(mut count) = failure_count.lock() {
                *count += 1;
            }
        });

    let sink = Arc::clone(&seen);
    let handle = Spinner::from(TokioContext::current("commands")?.shared(), || {
        script(ROUNDS).boxed()
    })
    .with_config(config)
    .feedback_with(feedback, WorkerContext::new("feedback")?.shared())
    .consume(
        move |state: &CounterState| {
            println!(
                "[{}] value={} resets={}",
                current_context().as_deref().unwrap_or("?"),
                state.value,
                state.resets
            );
            if let Ok(mut seen) = sink.lock() {
                seen.push(state.clone());
            }
        },
        TokioContext::current("display")?.shared(),
    )
    .spin();

    let loop_id = handle.id().to_string();
    let started_at = handle.started_at();
    handle.join().await?;

    let states = seen.lock().map(|s| s.clone()).unwrap_or_default();
    let summary = RunSummary {
        loop_id,
        started_at,
        finished_at: Utc::now(),
        states_seen: states.len(),
        failures: failures.lock().map(|f| *f).unwrap_or_default(),
        final_state: states.last().cloned(),
    };

    println!("{}", serde_json::to_string_pretty(&summary)?);
    info!("Spin demo complete");
    Ok(())
}
