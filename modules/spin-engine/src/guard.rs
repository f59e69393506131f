//! Panic isolation for caller-supplied observers.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};

use tracing::warn;

/// Run an observer, logging and swallowing any panic it raises.
pub(crate) fn shielded(stage: &'static str, observer: impl FnOnce()) {
    if let Err(panic) = panic::catch_unwind(AssertUnwindSafe(observer)) {
        warn!(
            stage,
            panic = %panic_message(panic.as_ref()),
            "Observer panicked, value passed through"
        );
    }
}

pub(crate) fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
