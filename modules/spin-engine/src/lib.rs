//! Command-driven state-feedback loop.
//!
//! Commands flow in, each is executed against the latest state, the resulting
//! mutations are folded by a reducer into new states, and every new state is
//! fed back as the context for the next command:
//!
//! ```text
//! commands → [latest state] → execute → mutations → scan → states → consumers
//!                 ▲                                          │
//!                 └──────────────── state cache ◄────────────┘
//! ```
//!
//! A failing command never terminates the loop; its failure is logged and its
//! remaining mutations are dropped. Every stage is bound to an explicit
//! [`ExecutionContext`], and a running loop is owned by a [`LoopHandle`].

pub mod command;
pub mod context;
pub mod execute;
pub mod feedback;
pub mod handle;
pub mod lifecycle;
pub mod pipeline;
pub mod scan;
pub mod state_cache;
pub mod traits;

mod guard;
mod stage;

pub use command::{command_fn, AnyCommand, CommandExt, FnCommand, MutationStream};
pub use context::{current_context, ContextRef, TokioContext, WorkerContext};
pub use execute::{execute, ExecuteOptions};
pub use feedback::Feedback;
pub use handle::LoopHandle;
pub use lifecycle::{LoopId, LoopStatus};
pub use pipeline::{Pipeline, PipelineStream, Spinner};
pub use scan::scan;
pub use state_cache::StateCache;
pub use traits::{Command, ExecutionContext, FailureObserver, Middleware};

pub use spin_common::{LoopConfig, SpinError};
