//! dockrun: supervised single-container runs on a Docker daemon.
//!
//! This library creates a container from a run request, starts it, waits for
//! it under an execution budget, collects its logs and execution duration,
//! and removes it.

pub mod cli;
pub mod error;
pub mod execution;

pub use error::DockerError;
