//! CLI module
//!
//! Command-line arguments, the configuration built from them, and the
//! terminal progress display.

pub mod args;
pub mod config;
pub mod progress;

pub use args::CliArgs;
pub use config::Config;
pub use progress::{format_bytes, format_duration, ProgressDisplay};
