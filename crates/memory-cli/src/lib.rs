//! Memory CLI library exports.
//!
//! # Modules
//!
//! - `cli`: Command-line argument parsing with clap
//! - `commands`: Service construction and command implementations

pub mod cli;
pub mod commands;

pub use cli::{Cli, Commands};
pub use commands::{apply_overrides, build_service, execute, init_logging, run, Runtime};
