//! A small counter domain driven by the loop.

use futures::stream::{self, StreamExt};
use serde::Serialize;
use spin_engine::command::{fail, from_iter, just};
use spin_engine::{Command, MutationStream};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CounterState {
    pub value: i64,
    pub resets: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CounterMutation {
    Add(i64),
    Reset,
}

pub fn reduce(state: &CounterState, mutation: &CounterMutation) -> CounterState {
    match mutation {
        CounterMutation::Add(delta) => CounterState {
            value: state.value + delta,
            ..state.clone()
        },
        CounterMutation::Reset => CounterState {
            value: 0,
            resets: state.resets + 1,
        },
    }
}

#[derive(Debug, Clone)]
pub enum CounterCommand {
    /// Add `step`, or reset once the counter reaches `ceiling`.
    Tick { step: i64, ceiling: i64 },
    /// Add one per unit, emitted as separate mutations.
    Burst { units: usize },
    /// Always fails.
    Flaky { reason: &'static str },
}

impl Command for CounterCommand {
    type State = CounterState;
    type Mutation = CounterMutation;

    fn execute(&self, state: CounterState) -> MutationStream<CounterMutation> {
        match self {
            CounterCommand::Tick { ceiling, .. } if state.value >= *ceiling => {
                just(CounterMutation::Reset)
            }
            CounterCommand::Tick { step, .. } => just(CounterMutation::Add(*step)),
            CounterCommand::Burst { units } => {
                from_iter(std::iter::repeat(CounterMutation::Add(1)).take(*units))
            }
            CounterCommand::Flaky { reason } => fail(anyhow::anyhow!(*reason)),
        }
    }
}

/// The scripted command source the demo runs.
pub fn script(rounds: usize) -> impl futures::Stream<Item = CounterCommand> + Send {
    stream::iter(0..rounds).flat_map(|round| {
        let mut commands = vec![CounterCommand::Tick {
            step: 2,
            ceiling: 10,
        }];
        if round % 3 == 0 {
            commands.push(CounterCommand::Burst { units: 3 });
        }
        if round % 4 == 1 {
            commands.push(CounterCommand::Flaky {
                reason: "upstream unavailable",
            });
        }
        stream::iter(commands)
    })
}
