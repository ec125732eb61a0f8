//! Container engine capability consumed by the runner.
//!
//! [`ContainerEngine`] is the seam between the lifecycle logic in
//! [`ContainerRunner`](crate::execution::ContainerRunner) and the daemon.
//! [`DockerClient`](crate::execution::DockerClient) implements it over the
//! Docker API; tests implement it in memory.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Datelike, Utc};
use serde::{Deserialize, Serialize};

use crate::error::DockerError;
use crate::execution::request::RunRequest;

/// Timestamp the engine reports for a lifecycle event that never happened.
pub const UNSET_TIMESTAMP: &str = "0001-01-01T00:00:00Z";

/// Observed state of a container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContainerState {
    /// Created but never started.
    Created,
    /// Running.
    Running,
    /// Being restarted by the engine.
    Restarting,
    /// Terminated on its own or after a stop.
    Exited,
    /// Not found, or in a state this crate does not track.
    Unknown,
}

impl ContainerState {
    /// Maps the engine's status string.
    pub fn from_status(status: &str) -> Self {
        match status.trim().to_lowercase().as_str() {
            "created" => ContainerState::Created,
            "running" => ContainerState::Running,
            "restarting" => ContainerState::Restarting,
            "exited" => ContainerState::Exited,
            _ => ContainerState::Unknown,
        }
    }

    /// Running or restarting.
    pub fn is_active(&self) -> bool {
        matches!(self, ContainerState::Running | ContainerState::Restarting)
    }
}

impl std::fmt::Display for ContainerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ContainerState::Created => write!(f, "created"),
            ContainerState::Running => write!(f, "running"),
            ContainerState::Restarting => write!(f, "restarting"),
            ContainerState::Exited => write!(f, "exited"),
            ContainerState::Unknown => write!(f, "unknown"),
        }
    }
}

/// Start and finish times of a container, `None` when the event did not
/// happen yet.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ContainerTimestamps {
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl ContainerTimestamps {
    /// Builds timestamps from the engine's RFC 3339 strings.
    pub fn from_engine(started_at: Option<&str>, finished_at: Option<&str>) -> Self {
        Self {
            started_at: started_at.and_then(parse_engine_timestamp),
            finished_at: finished_at.and_then(parse_engine_timestamp),
        }
    }

    /// Execution duration, see [`execution_duration_between`].
    pub fn execution_duration(&self) -> Option<Duration> {
        execution_duration_between(self.started_at, self.finished_at)
    }
}

/// Parses an engine timestamp. The unset sentinel (year 1) and unparsable
/// values both yield `None`.
pub fn parse_engine_timestamp(value: &str) -> Option<DateTime<Utc>> {
    let parsed = DateTime::parse_from_rfc3339(value.trim())
        .map(|t| t.with_timezone(&Utc))
        .ok()?;
    (parsed.year() > 1).then_some(parsed)
}

/// Duration between start and finish.
///
/// `None` if either time is unset: not started and not finished are not
/// told apart. The engine's precision can put the finish of a very short
/// container before its start; that comes back as exactly zero.
pub fn execution_duration_between(
    started_at: Option<DateTime<Utc>>,
    finished_at: Option<DateTime<Utc>>,
) -> Option<Duration> {
    let (start, finish) = (started_at?, finished_at?);
    Some((finish - start).to_std().unwrap_or(Duration::ZERO))
}

/// Output streams captured from a container or an exec session.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerLogs {
    pub stdout: String,
    pub stderr: String,
}

impl ContainerLogs {
    pub fn new(stdout: impl Into<String>, stderr: impl Into<String>) -> Self {
        Self {
            stdout: stdout.into(),
            stderr: stderr.into(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.stdout.is_empty() && self.stderr.is_empty()
    }
}

/// Operations the runner needs from a container engine.
///
/// Containers are addressed by name. Implementations report every daemon
/// failure as a `DockerError`; the runner decides what a failure means.
#[async_trait]
pub trait ContainerEngine: Send + Sync {
    /// Creates a container from the request and returns its id.
    async fn create_container(&self, request: &RunRequest) -> Result<String, DockerError>;

    async fn start_container(&self, name: &str) -> Result<(), DockerError>;

    /// Stops a container immediately, without grace period.
    async fn stop_container(&self, name: &str) -> Result<(), DockerError>;

    async fn remove_container(&self, name: &str) -> Result<(), DockerError>;

    /// Id of the container with exactly this name, if any.
    async fn container_id(&self, name: &str) -> Result<Option<String>, DockerError>;

    async fn container_state(&self, name: &str) -> Result<ContainerState, DockerError>;

    async fn exit_code(&self, name: &str) -> Result<i64, DockerError>;

    async fn timestamps(&self, name: &str) -> Result<ContainerTimestamps, DockerError>;

    /// Full stdout/stderr of the container, read to the end of the stream.
    async fn logs(&self, name: &str) -> Result<ContainerLogs, DockerError>;

    /// Runs a command inside a running container.
    async fn exec(&self, name: &str, cmd: &[String]) -> Result<ContainerLogs, DockerError>;

    async fn pull_image(&self, image: &str, timeout: Duration) -> Result<(), DockerError>;

    /// Id of a local image whose repo tags contain the normalized reference.
    async fn image_id(&self, image: &str) -> Result<Option<String>, DockerError>;

    async fn remove_image(&self, image: &str) -> Result<(), DockerError>;

    async fn network_id(&self, name: &str) -> Result<Option<String>, DockerError>;

    /// Creates a bridge network and returns its id.
    async fn create_network(&self, name: &str) -> Result<String, DockerError>;

    async fn remove_network(&self, name: &str) -> Result<(), DockerError>;

    async fn volume_exists(&self, name: &str) -> Result<bool, DockerError>;

    async fn create_volume(&self, name: &str) -> Result<(), DockerError>;

    async fn remove_volume(&self, name: &str) -> Result<(), DockerError>;
}
