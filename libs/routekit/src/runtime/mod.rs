//! Startup orchestration: discovery, binding, serving, shutdown.

pub mod runner;

pub use runner::{run, Exit, RunOptions, ShutdownOptions};
