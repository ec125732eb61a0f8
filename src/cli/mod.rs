//! Command-line interface for dockrun.
//!
//! Provides commands to run, inspect and tear down containers, and to manage
//! the images, networks and volumes they depend on.

mod commands;

pub use commands::{parse_cli, run, run_with_cli, Cli, Commands, EngineArgs, RunArgs};
