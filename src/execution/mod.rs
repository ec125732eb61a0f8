//! Supervised Docker container runs.
//!
//! This module drives a single container through its lifecycle with the
//! bollard crate: creation from a [`RunRequest`], start, supervision under an
//! execution budget, log and duration collection, then teardown.
//!
//! # Architecture
//!
//! Runs follow this lifecycle:
//! ```text
//! CREATING → STARTING → DETACHED
//!                     → SUPERVISING → EXITED | TIMED OUT → COLLECTING → CLEANUP
//! ```
//!
//! [`ContainerRunner`] owns the state machine and talks to the daemon through
//! the [`ContainerEngine`] trait, implemented by [`DockerClient`].
//!
//! # Example
//!
//! ```ignore
//! use dockrun::execution::{ContainerRunner, DockerClient, DriverMode, RunRequest};
//!
//! let runner = ContainerRunner::new(DockerClient::new()?);
//!
//! let request = RunRequest::builder("job-42", "alpine:3.19")
//!     .with_cmd("sh -c 'echo hello'")
//!     .with_driver_mode(Some(DriverMode::Native))
//!     .with_max_execution_time_ms(60_000)
//!     .build()?;
//!
//! let result = runner.run(&request).await;
//! println!("{} {}", result.status, result.stdout());
//! ```

pub mod config;
pub mod docker_client;
pub mod driver;
pub mod engine;
pub mod image;
pub mod pool;
pub mod request;
pub mod resources;
pub mod result;
pub mod runner;

pub use config::{EngineConfig, RegistryCredentials};
pub use docker_client::DockerClient;
pub use driver::DriverMode;
pub use engine::{ContainerEngine, ContainerLogs, ContainerState, ContainerTimestamps};
pub use image::{normalize_image_name, normalize_registry_address, parse_registry};
pub use pool::{ClientKey, ClientPool};
pub use request::{DeviceMapping, HostSettings, RunRequest, RunRequestBuilder};
pub use resources::ResourceLimits;
pub use result::{RunResult, RunStatus, UNKNOWN_EXIT_CODE};
pub use runner::{ContainerRunner, DEFAULT_PULL_TIMEOUT, POLL_INTERVAL};
