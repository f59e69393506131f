pub mod config;
pub mod error;

pub use config::LoopConfig;
pub use error::{Result, SpinError};
