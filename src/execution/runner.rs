//! Supervised container runs.
//!
//! [`ContainerRunner`] drives a [`ContainerEngine`] through the lifecycle of
//! one container:
//!
//! ```text
//! CREATING → STARTING → DETACHED
//!                     → SUPERVISING → EXITED | TIMED OUT → COLLECTING → CLEANUP
//! ```
//!
//! Engine failures never escape [`ContainerRunner::run`]: they are logged and
//! folded into the returned [`RunResult`]. Lifecycle mutations (create, start,
//! stop, remove) go through one lock shared by every handle on the engine, so
//! that a duplicate check and the following create cannot interleave with
//! another caller's.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::error::DockerError;
use crate::execution::docker_client::{is_user_network, DockerClient};
use crate::execution::engine::{ContainerEngine, ContainerLogs, ContainerState};
use crate::execution::request::RunRequest;
use crate::execution::result::{RunResult, RunStatus, UNKNOWN_EXIT_CODE};

/// Interval between two state checks of a supervised container.
pub const POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Default time allowed for an image pull.
pub const DEFAULT_PULL_TIMEOUT: Duration = Duration::from_secs(60);

/// Polls between two "still running" log lines.
const RUNNING_LOG_EVERY: u64 = 60;

/// Lifecycle controller for containers of one engine.
///
/// Clones share the engine and its lifecycle lock, so every handle on one
/// engine serializes its mutations against the others.
pub struct ContainerRunner<E = DockerClient> {
    engine: Arc<E>,
    lifecycle: Arc<Mutex<()>>,
}

impl<E> Clone for ContainerRunner<E> {
    fn clone(&self) -> Self {
        Self {
            engine: Arc::clone(&self.engine),
            lifecycle: Arc::clone(&self.lifecycle),
        }
    }
}

impl<E: ContainerEngine + 'static> ContainerRunner<E> {
    pub fn new(engine: E) -> Self {
        Self {
            engine: Arc::new(engine),
            lifecycle: Arc::new(Mutex::new(())),
        }
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    /// Runs a container to completion, or leaves it running in detached mode.
    ///
    /// A request with a zero or negative execution budget returns right after
    /// the start. Otherwise the container is watched until it exits or its
    /// budget runs out, in which case it is killed. Logs and duration are
    /// collected, then the container is removed.
    ///
    /// The lifecycle runs on its own task: dropping the returned future does
    /// not stop the supervision, and the container is still torn down.
    pub async fn run(&self, request: &RunRequest) -> RunResult {
        let runner = self.clone();
        let owned = request.clone();
        let supervision = tokio::spawn(async move { runner.run_to_completion(&owned).await });

        match supervision.await {
            Ok(result) => result,
            Err(e) => {
                error!(container = %request.container_name(), error = %e, "Docker run task failed");
                RunResult::failed()
            }
        }
    }

    async fn run_to_completion(&self, request: &RunRequest) -> RunResult {
        let name = request.container_name();
        info!(
            container = %name,
            image = %request.image(),
            cmd = ?request.cmd_args(),
            "Running docker container"
        );
        let mut result = RunResult::failed();

        if self.create_container(request, true).await.is_none() {
            error!(container = %name, "Failed to create container for docker run");
            return result;
        }
        if !self.start_container(name).await {
            error!(container = %name, "Failed to start container for docker run");
            self.remove_container(name).await;
            return result;
        }
        let Some(budget) = request.max_execution_time() else {
            // runs until it exits by itself or someone stops it
            info!(container = %name, "Docker container will run in detached mode");
            return RunResult::detached();
        };

        let deadline = Instant::now() + budget;
        match self.wait_until_exit_or_timeout(name, deadline).await {
            Ok(exit_code) => {
                result.exit_code = exit_code;
                result.status = if exit_code == 0 {
                    RunStatus::Success
                } else {
                    RunStatus::Failed
                };
                info!(
                    container = %name,
                    exit_code,
                    success = result.is_success(),
                    "Finished running docker container"
                );
            }
            Err(DockerError::Timeout { .. }) => {
                error!(container = %name, budget_ms = request.max_execution_time_ms(), "Container reached timeout");
                result.status = RunStatus::Timeout;
                if !self.stop_container(name).await {
                    result.logs = self.container_logs(name).await;
                    error!(container = %name, "Failed to force-stop container after timeout");
                    return result;
                }
            }
            Err(e) => error!(container = %name, error = %e, "Failed to wait for container"),
        }

        result.logs = self.container_logs(name).await;
        result.execution_duration = self.execution_duration(name).await;
        if request.display_logs() {
            if let Some(logs) = &result.logs {
                info!(container = %name, stdout = %logs.stdout, stderr = %logs.stderr, "Container logs");
            }
        }
        if !self.remove_container(name).await {
            warn!(container = %name, "Failed to remove container after run");
        }
        result
    }

    /// Creates a container for the request.
    ///
    /// An existing container with the same name is stopped and removed first
    /// when `remove_duplicate` is set; otherwise creation is refused and the
    /// existing container is left untouched. A user-defined network named in
    /// the host settings is created if missing.
    ///
    /// Returns the new container id.
    pub async fn create_container(
        &self,
        request: &RunRequest,
        remove_duplicate: bool,
    ) -> Option<String> {
        let name = request.container_name();
        let _guard = self.lifecycle.lock().await;

        if let Some(existing_id) = self.container_id(name).await {
            info!(
                container = %name,
                old_container_id = %existing_id,
                remove_duplicate,
                "Found duplicate container"
            );
            if !remove_duplicate {
                return None;
            }
            self.stop_unlocked(name).await;
            self.remove_unlocked(name).await;
        }

        if let Some(network) = request
            .host()
            .network_mode
            .as_deref()
            .filter(|mode| is_user_network(mode))
        {
            if self.create_network_unlocked(network).await.is_none() {
                error!(container = %name, network = %network, "Failed to create network for the container");
                return None;
            }
        }

        match self.engine.create_container(request).await {
            Ok(id) if !id.trim().is_empty() => {
                info!(container = %name, id = %id, "Created docker container");
                Some(id)
            }
            Ok(_) => {
                error!(container = %name, "Docker returned an empty container id");
                None
            }
            Err(e) => {
                error!(container = %name, error = %e, "Error creating docker container");
                None
            }
        }
    }

    pub async fn start_container(&self, name: &str) -> bool {
        if name.trim().is_empty() {
            error!("Cannot start container with a blank name");
            return false;
        }
        let _guard = self.lifecycle.lock().await;
        match self.engine.start_container(name).await {
            Ok(()) => {
                info!(container = %name, "Started docker container");
                true
            }
            Err(e) => {
                error!(container = %name, error = %e, "Error starting docker container");
                false
            }
        }
    }

    /// Kills a running container.
    ///
    /// Returns `true` when the container is not active afterwards, including
    /// when it was absent or already stopped.
    pub async fn stop_container(&self, name: &str) -> bool {
        if name.trim().is_empty() {
            error!("Cannot stop container with a blank name");
            return false;
        }
        let _guard = self.lifecycle.lock().await;
        self.stop_unlocked(name).await
    }

    /// Removes a container. Returns `false` if there was nothing to remove.
    pub async fn remove_container(&self, name: &str) -> bool {
        if name.trim().is_empty() {
            error!("Cannot remove container with a blank name");
            return false;
        }
        let _guard = self.lifecycle.lock().await;
        self.remove_unlocked(name).await
    }

    /// Stops then removes a container, whatever each step reports.
    ///
    /// Returns `true` when no container with this name exists afterwards.
    pub async fn stop_and_remove(&self, name: &str) -> bool {
        self.stop_container(name).await;
        self.remove_container(name).await;
        !self.is_present(name).await
    }

    pub async fn container_id(&self, name: &str) -> Option<String> {
        if name.trim().is_empty() {
            error!("Invalid docker container name");
            return None;
        }
        match self.engine.container_id(name).await {
            Ok(id) => id.filter(|id| !id.is_empty()),
            Err(e) => {
                error!(container = %name, error = %e, "Error getting docker container id");
                None
            }
        }
    }

    pub async fn is_present(&self, name: &str) -> bool {
        self.container_id(name).await.is_some()
    }

    /// Current state, [`ContainerState::Unknown`] if absent or unreadable.
    pub async fn container_state(&self, name: &str) -> ContainerState {
        if name.trim().is_empty() {
            return ContainerState::Unknown;
        }
        match self.engine.container_state(name).await {
            Ok(state) => state,
            Err(e) => {
                error!(container = %name, error = %e, "Error getting docker container status");
                ContainerState::Unknown
            }
        }
    }

    /// Running or restarting.
    pub async fn is_active(&self, name: &str) -> bool {
        self.container_state(name).await.is_active()
    }

    /// Waits until the container exits or the deadline passes.
    ///
    /// The state is checked once per [`POLL_INTERVAL`]. Returns the exit code.
    ///
    /// # Errors
    ///
    /// - `DockerError::InvalidArgument` for a blank name, before any engine
    ///   call
    /// - `DockerError::Timeout` when the deadline passes first
    pub async fn wait_until_exit_or_timeout(
        &self,
        name: &str,
        deadline: Instant,
    ) -> Result<i64, DockerError> {
        if name.trim().is_empty() {
            return Err(DockerError::blank("Container name"));
        }

        let mut polls: u64 = 0;
        let exited = loop {
            if polls % RUNNING_LOG_EVERY == 0 {
                info!(container = %name, "Container is running");
            }
            tokio::time::sleep(POLL_INTERVAL).await;
            polls += 1;

            let state = self.container_state(name).await;
            debug!(container = %name, state = %state, polls, "Polled container state");
            if state == ContainerState::Exited {
                break true;
            }
            if Instant::now() > deadline {
                break false;
            }
        };

        if !exited {
            return Err(DockerError::Timeout {
                name: name.to_string(),
            });
        }
        let exit_code = self.exit_code(name).await?;
        info!(container = %name, exit_code, "Container exited by itself");
        Ok(exit_code)
    }

    /// Exit code of a container, `-1` if it cannot be read.
    ///
    /// # Errors
    ///
    /// Returns `DockerError::InvalidArgument` for a blank name.
    pub async fn exit_code(&self, name: &str) -> Result<i64, DockerError> {
        if name.trim().is_empty() {
            return Err(DockerError::blank("Container name"));
        }
        Ok(match self.engine.exit_code(name).await {
            Ok(code) => code,
            Err(e) => {
                error!(container = %name, error = %e, "Error getting container exit code");
                UNKNOWN_EXIT_CODE
            }
        })
    }

    /// Stdout and stderr of a container, `None` if absent or unreadable.
    pub async fn container_logs(&self, name: &str) -> Option<ContainerLogs> {
        if !self.is_present(name).await {
            error!(container = %name, "Cannot get logs of inexistent docker container");
            return None;
        }
        match self.engine.logs(name).await {
            Ok(logs) => Some(logs),
            Err(e) => {
                error!(container = %name, error = %e, "Error getting docker container logs");
                None
            }
        }
    }

    /// Time between start and finish.
    ///
    /// `None` if the container never started, has not finished, or cannot
    /// be inspected.
    pub async fn execution_duration(&self, name: &str) -> Option<Duration> {
        if name.trim().is_empty() {
            error!("Invalid docker container name");
            return None;
        }
        let timestamps = match self.engine.timestamps(name).await {
            Ok(timestamps) => timestamps,
            Err(e) => {
                warn!(container = %name, error = %e, "Can't get execution duration of container");
                return None;
            }
        };
        match (timestamps.started_at, timestamps.finished_at) {
            (None, _) => debug!(container = %name, "Container has not been started yet"),
            (_, None) => debug!(container = %name, "Container has not been ended yet"),
            (Some(start), Some(finish)) if finish < start => {
                debug!(container = %name, "Container has finished faster than Docker precision");
            }
            _ => {}
        }
        timestamps.execution_duration()
    }

    /// Runs a command in a running container.
    pub async fn exec(&self, name: &str, cmd: &[String]) -> Option<ContainerLogs> {
        if !self.is_present(name).await {
            error!(container = %name, "Cannot run docker exec since container not found");
            return None;
        }
        match self.engine.exec(name, cmd).await {
            Ok(logs) => Some(logs),
            Err(e) => {
                error!(container = %name, cmd = ?cmd, error = %e, "Error running docker exec command");
                None
            }
        }
    }

    pub async fn pull_image(&self, image: &str, timeout: Duration) -> bool {
        if image.trim().is_empty() {
            error!("Invalid docker image name");
            return false;
        }
        info!(image = %image, "Pulling docker image");
        match self.engine.pull_image(image, timeout).await {
            Ok(()) => {
                info!(image = %image, "Pulled docker image");
                true
            }
            Err(e) => {
                error!(image = %image, error = %e, "Error pulling docker image");
                false
            }
        }
    }

    pub async fn image_id(&self, image: &str) -> Option<String> {
        if image.trim().is_empty() {
            error!("Invalid docker image name");
            return None;
        }
        match self.engine.image_id(image).await {
            Ok(id) => id.filter(|id| !id.is_empty()),
            Err(e) => {
                error!(image = %image, error = %e, "Error getting docker image id");
                None
            }
        }
    }

    pub async fn is_image_present(&self, image: &str) -> bool {
        self.image_id(image).await.is_some()
    }

    /// Removes a local image. Returns `false` if it was not present.
    pub async fn remove_image(&self, image: &str) -> bool {
        if !self.is_image_present(image).await {
            info!(image = %image, "No docker image to remove");
            return false;
        }
        let _guard = self.lifecycle.lock().await;
        match self.engine.remove_image(image).await {
            Ok(()) => {
                info!(image = %image, "Removed docker image");
                true
            }
            Err(e) => {
                error!(image = %image, error = %e, "Error removing docker image");
                false
            }
        }
    }

    /// Creates a bridge network unless it exists. Returns its id.
    pub async fn create_network(&self, name: &str) -> Option<String> {
        let _guard = self.lifecycle.lock().await;
        self.create_network_unlocked(name).await
    }

    pub async fn network_id(&self, name: &str) -> Option<String> {
        if name.trim().is_empty() {
            error!("Invalid docker network name");
            return None;
        }
        match self.engine.network_id(name).await {
            Ok(id) => id.filter(|id| !id.is_empty()),
            Err(e) => {
                error!(network = %name, error = %e, "Error getting network id");
                None
            }
        }
    }

    pub async fn is_network_present(&self, name: &str) -> bool {
        self.network_id(name).await.is_some()
    }

    pub async fn remove_network(&self, name: &str) -> bool {
        if name.trim().is_empty() {
            error!("Invalid docker network name");
            return false;
        }
        if !self.is_network_present(name).await {
            warn!(network = %name, "No docker network to remove");
            return false;
        }
        let _guard = self.lifecycle.lock().await;
        match self.engine.remove_network(name).await {
            Ok(()) => {
                info!(network = %name, "Removed docker network");
                true
            }
            Err(e) => {
                error!(network = %name, error = %e, "Error removing docker network");
                false
            }
        }
    }

    /// Creates a volume unless it exists.
    pub async fn create_volume(&self, name: &str) -> bool {
        if name.trim().is_empty() {
            error!("Invalid docker volume name");
            return false;
        }
        let _guard = self.lifecycle.lock().await;
        if self.is_volume_present(name).await {
            info!(volume = %name, "Docker volume already present");
            return true;
        }
        match self.engine.create_volume(name).await {
            Ok(()) => {
                info!(volume = %name, "Created docker volume");
                true
            }
            Err(e) => {
                error!(volume = %name, error = %e, "Error creating docker volume");
                false
            }
        }
    }

    pub async fn is_volume_present(&self, name: &str) -> bool {
        if name.trim().is_empty() {
            error!("Invalid docker volume name");
            return false;
        }
        match self.engine.volume_exists(name).await {
            Ok(exists) => exists,
            Err(e) => {
                error!(volume = %name, error = %e, "Error getting docker volume");
                false
            }
        }
    }

    pub async fn remove_volume(&self, name: &str) -> bool {
        if !self.is_volume_present(name).await {
            warn!(volume = %name, "No docker volume to remove");
            return false;
        }
        let _guard = self.lifecycle.lock().await;
        match self.engine.remove_volume(name).await {
            Ok(()) => {
                info!(volume = %name, "Removed docker volume");
                true
            }
            Err(e) => {
                error!(volume = %name, error = %e, "Error removing docker volume");
                false
            }
        }
    }

    async fn stop_unlocked(&self, name: &str) -> bool {
        if !self.is_present(name).await {
            info!(container = %name, "No docker container to stop");
            return true;
        }
        if !self.is_active(name).await {
            return true;
        }
        match self.engine.stop_container(name).await {
            Ok(()) => {
                info!(container = %name, "Stopped docker container");
                true
            }
            Err(e) => {
                error!(container = %name, error = %e, "Error stopping docker container");
                false
            }
        }
    }

    async fn remove_unlocked(&self, name: &str) -> bool {
        if !self.is_present(name).await {
            info!(container = %name, "No docker container to remove");
            return false;
        }
        match self.engine.remove_container(name).await {
            Ok(()) => {
                info!(container = %name, "Removed docker container");
                true
            }
            Err(e) => {
                error!(container = %name, error = %e, "Error removing docker container");
                false
            }
        }
    }

    async fn create_network_unlocked(&self, name: &str) -> Option<String> {
        if name.trim().is_empty() {
            error!("Invalid docker network name");
            return None;
        }
        if let Some(id) = self.network_id(name).await {
            info!(network = %name, "Docker network already present");
            return Some(id);
        }
        match self.engine.create_network(name).await {
            Ok(id) => {
                info!(network = %name, "Created docker network");
                Some(id)
            }
            Err(e) => {
                error!(network = %name, error = %e, "Error creating docker network");
                None
            }
        }
    }
}
