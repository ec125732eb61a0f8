//! Docker API wrapper using the bollard crate.
//!
//! [`DockerClient`] implements [`ContainerEngine`] by translating each call
//! into one Docker API request. It holds no lifecycle logic of its own.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use bollard::auth::DockerCredentials;
use bollard::container::{
    Config, CreateContainerOptions, InspectContainerOptions, ListContainersOptions, LogOutput,
    LogsOptions, RemoveContainerOptions, StartContainerOptions, StopContainerOptions,
};
use bollard::exec::{CreateExecOptions, StartExecResults};
use bollard::image::{CreateImageOptions, ListImagesOptions, RemoveImageOptions};
use bollard::models::{ContainerState as EngineState, DeviceMapping as EngineDevice, HostConfig};
use bollard::network::{CreateNetworkOptions, ListNetworksOptions};
use bollard::volume::{CreateVolumeOptions, ListVolumesOptions};
use bollard::{Docker, API_DEFAULT_VERSION};
use futures::StreamExt;
use tracing::debug;

use crate::error::DockerError;
use crate::execution::config::RegistryCredentials;
use crate::execution::engine::{
    ContainerEngine, ContainerLogs, ContainerState, ContainerTimestamps,
};
use crate::execution::image::{normalize_image_name, parse_registry, split_repository_tag};
use crate::execution::request::RunRequest;

/// Seconds before a request to the daemon gives up.
const DAEMON_TIMEOUT_SECS: u64 = 120;

/// Network modes built into the engine; anything else names a user network.
const BUILTIN_NETWORK_MODES: &[&str] = &["bridge", "host", "none", "default"];

/// Docker client wrapper for container operations.
#[derive(Debug, Clone)]
pub struct DockerClient {
    docker: Docker,
    registry: String,
    credentials: Option<DockerCredentials>,
}

impl DockerClient {
    /// Creates a new Docker client connecting to the local Docker daemon.
    ///
    /// # Errors
    ///
    /// Returns `DockerError::DaemonUnavailable` if the connection cannot be
    /// set up.
    pub fn new() -> Result<Self, DockerError> {
        Self::connect(None, crate::execution::image::DEFAULT_REGISTRY)
    }

    /// Connects to the daemon at `docker_host` (`unix://`, `tcp://` or
    /// `http://`), or to the local defaults when `None`.
    pub fn connect(docker_host: Option<&str>, registry: &str) -> Result<Self, DockerError> {
        let docker = match docker_host.map(str::trim).filter(|h| !h.is_empty()) {
            Some(host) if host.starts_with("unix://") => {
                Docker::connect_with_unix(host, DAEMON_TIMEOUT_SECS, API_DEFAULT_VERSION)
            }
            Some(host) => {
                Docker::connect_with_http(host, DAEMON_TIMEOUT_SECS, API_DEFAULT_VERSION)
            }
            None => Docker::connect_with_local_defaults(),
        }
        .map_err(|e| DockerError::DaemonUnavailable(format!("Failed to connect: {e}")))?;

        Ok(Self {
            docker,
            registry: registry.to_string(),
            credentials: None,
        })
    }

    /// Creates a new Docker client from an existing bollard Docker instance.
    pub fn from_docker(docker: Docker, registry: &str) -> Self {
        Self {
            docker,
            registry: registry.to_string(),
            credentials: None,
        }
    }

    /// Attaches registry credentials used when pulling from this client's
    /// registry.
    pub fn with_credentials(mut self, credentials: &RegistryCredentials) -> Self {
        self.credentials = Some(DockerCredentials {
            username: Some(credentials.username.clone()),
            password: Some(credentials.password.clone()),
            serveraddress: Some(self.registry.clone()),
            ..Default::default()
        });
        self
    }

    /// Checks that the daemon answers.
    pub async fn ping(&self) -> Result<(), DockerError> {
        self.docker
            .ping()
            .await
            .map(|_| ())
            .map_err(|e| DockerError::DaemonUnavailable(e.to_string()))
    }

    async fn inspect_state(&self, name: &str) -> Result<EngineState, DockerError> {
        let info = self
            .docker
            .inspect_container(name, None::<InspectContainerOptions>)
            .await
            .map_err(|e| {
                if is_not_found(&e) {
                    DockerError::ContainerNotFound {
                        name: name.to_string(),
                    }
                } else {
                    DockerError::InspectFailed {
                        name: name.to_string(),
                        reason: e.to_string(),
                    }
                }
            })?;

        info.state.ok_or_else(|| DockerError::InspectFailed {
            name: name.to_string(),
            reason: "container has no state".to_string(),
        })
    }

    fn credentials_for(&self, image: &str) -> Option<DockerCredentials> {
        self.credentials
            .as_ref()
            .filter(|_| parse_registry(image) == self.registry)
            .cloned()
    }
}

#[async_trait]
impl ContainerEngine for DockerClient {
    async fn create_container(&self, request: &RunRequest) -> Result<String, DockerError> {
        let options = CreateContainerOptions {
            name: request.container_name().to_string(),
            platform: None,
        };

        let response = self
            .docker
            .create_container(Some(options), container_config(request))
            .await
            .map_err(|e| DockerError::CreateFailed(format!("Failed to create container: {e}")))?;

        for warning in &response.warnings {
            debug!(container = %request.container_name(), warning = %warning, "Docker create warning");
        }
        Ok(response.id)
    }

    async fn start_container(&self, name: &str) -> Result<(), DockerError> {
        self.docker
            .start_container(name, None::<StartContainerOptions<String>>)
            .await
            .map_err(|e| DockerError::RunFailed(format!("Failed to start container: {e}")))
    }

    async fn stop_container(&self, name: &str) -> Result<(), DockerError> {
        // no grace period: the process gets SIGKILL right away
        let options = StopContainerOptions { t: 0 };

        self.docker
            .stop_container(name, Some(options))
            .await
            .map_err(|e| DockerError::RunFailed(format!("Failed to stop container: {e}")))
    }

    async fn remove_container(&self, name: &str) -> Result<(), DockerError> {
        let options = RemoveContainerOptions {
            force: false,
            v: true,
            ..Default::default()
        };

        self.docker
            .remove_container(name, Some(options))
            .await
            .map_err(|e| DockerError::RunFailed(format!("Failed to remove container: {e}")))
    }

    async fn container_id(&self, name: &str) -> Result<Option<String>, DockerError> {
        let mut filters = HashMap::new();
        filters.insert("name".to_string(), vec![name.to_string()]);
        let options = ListContainersOptions::<String> {
            all: true,
            filters,
            ..Default::default()
        };

        let containers = self
            .docker
            .list_containers(Some(options))
            .await
            .map_err(|e| DockerError::InspectFailed {
                name: name.to_string(),
                reason: e.to_string(),
            })?;

        // the name filter matches substrings, keep the exact name only
        let wanted = format!("/{name}");
        Ok(containers
            .into_iter()
            .find(|c| {
                c.names
                    .as_ref()
                    .is_some_and(|names| names.iter().any(|n| n == &wanted || n == name))
            })
            .and_then(|c| c.id))
    }

    async fn container_state(&self, name: &str) -> Result<ContainerState, DockerError> {
        match self.inspect_state(name).await {
            Ok(state) => Ok(state
                .status
                .map(|s| ContainerState::from_status(&s.to_string()))
                .unwrap_or(ContainerState::Unknown)),
            Err(e) if e.is_not_found() => Ok(ContainerState::Unknown),
            Err(e) => Err(e),
        }
    }

    async fn exit_code(&self, name: &str) -> Result<i64, DockerError> {
        let state = self.inspect_state(name).await?;
        Ok(state.exit_code.unwrap_or(-1))
    }

    async fn timestamps(&self, name: &str) -> Result<ContainerTimestamps, DockerError> {
        let state = self.inspect_state(name).await?;
        Ok(ContainerTimestamps::from_engine(
            state.started_at.as_deref(),
            state.finished_at.as_deref(),
        ))
    }

    async fn logs(&self, name: &str) -> Result<ContainerLogs, DockerError> {
        let options = LogsOptions::<String> {
            stdout: true,
            stderr: true,
            follow: false,
            timestamps: false,
            ..Default::default()
        };

        let mut stream = self.docker.logs(name, Some(options));
        let mut logs = ContainerLogs::default();

        while let Some(chunk) = stream.next().await {
            let chunk =
                chunk.map_err(|e| DockerError::RunFailed(format!("Error reading logs: {e}")))?;
            append_output(&mut logs, chunk);
        }

        Ok(logs)
    }

    async fn exec(&self, name: &str, cmd: &[String]) -> Result<ContainerLogs, DockerError> {
        let exec_options = CreateExecOptions {
            cmd: Some(cmd.to_vec()),
            attach_stdout: Some(true),
            attach_stderr: Some(true),
            tty: Some(false),
            ..Default::default()
        };

        let exec = self
            .docker
            .create_exec(name, exec_options)
            .await
            .map_err(|e| DockerError::ExecFailed(format!("Failed to create exec: {e}")))?;

        let start_result = self
            .docker
            .start_exec(&exec.id, None)
            .await
            .map_err(|e| DockerError::ExecFailed(format!("Failed to start exec: {e}")))?;

        let mut logs = ContainerLogs::default();
        if let StartExecResults::Attached { mut output, .. } = start_result {
            while let Some(chunk) = output.next().await {
                let chunk = chunk
                    .map_err(|e| DockerError::ExecFailed(format!("Error reading output: {e}")))?;
                append_output(&mut logs, chunk);
            }
        }

        Ok(logs)
    }

    async fn pull_image(&self, image: &str, timeout: Duration) -> Result<(), DockerError> {
        let (repository, tag) = split_repository_tag(image.trim());
        if repository.is_empty() || tag.is_empty() {
            return Err(DockerError::InvalidArgument(format!(
                "image '{image}' must name a repository and a tag"
            )));
        }

        let options = CreateImageOptions {
            from_image: repository,
            tag,
            ..Default::default()
        };
        let mut stream = self
            .docker
            .create_image(Some(options), None, self.credentials_for(image));

        let drain = async {
            while let Some(progress) = stream.next().await {
                progress.map_err(|e| pull_error(image, &e))?;
            }
            Ok::<(), DockerError>(())
        };

        tokio::time::timeout(timeout, drain)
            .await
            .map_err(|_| DockerError::PullTimeout {
                image: image.to_string(),
                seconds: timeout.as_secs(),
            })?
    }

    async fn image_id(&self, image: &str) -> Result<Option<String>, DockerError> {
        let mut reference = normalize_image_name(image.trim());
        if split_repository_tag(&reference).1.is_empty() {
            reference.push_str(":latest");
        }

        let mut filters = HashMap::new();
        filters.insert("reference".to_string(), vec![reference.clone()]);
        let options = ListImagesOptions::<String> {
            all: false,
            filters,
            ..Default::default()
        };

        let images = self
            .docker
            .list_images(Some(options))
            .await
            .map_err(|e| DockerError::InspectFailed {
                name: image.to_string(),
                reason: e.to_string(),
            })?;

        Ok(images
            .into_iter()
            .find(|summary| summary.repo_tags.iter().any(|t| t == &reference))
            .map(|summary| summary.id))
    }

    async fn remove_image(&self, image: &str) -> Result<(), DockerError> {
        self.docker
            .remove_image(image, None::<RemoveImageOptions>, None)
            .await
            .map(|_| ())
            .map_err(|e| DockerError::RunFailed(format!("Failed to remove image: {e}")))
    }

    async fn network_id(&self, name: &str) -> Result<Option<String>, DockerError> {
        let mut filters = HashMap::new();
        filters.insert("name".to_string(), vec![name.to_string()]);
        let networks = self
            .docker
            .list_networks(Some(ListNetworksOptions { filters }))
            .await
            .map_err(|e| DockerError::InspectFailed {
                name: name.to_string(),
                reason: e.to_string(),
            })?;

        Ok(networks
            .into_iter()
            .find(|n| n.name.as_deref() == Some(name))
            .and_then(|n| n.id))
    }

    async fn create_network(&self, name: &str) -> Result<String, DockerError> {
        let options = CreateNetworkOptions {
            name: name.to_string(),
            driver: "bridge".to_string(),
            ..Default::default()
        };

        let response = self
            .docker
            .create_network(options)
            .await
            .map_err(|e| DockerError::CreateFailed(format!("Failed to create network: {e}")))?;

        response
            .id
            .filter(|id| !id.is_empty())
            .ok_or_else(|| DockerError::CreateFailed(format!("Network '{name}' has no id")))
    }

    async fn remove_network(&self, name: &str) -> Result<(), DockerError> {
        self.docker
            .remove_network(name)
            .await
            .map_err(|e| DockerError::RunFailed(format!("Failed to remove network: {e}")))
    }

    async fn volume_exists(&self, name: &str) -> Result<bool, DockerError> {
        let mut filters = HashMap::new();
        filters.insert("name".to_string(), vec![name.to_string()]);
        let response = self
            .docker
            .list_volumes(Some(ListVolumesOptions { filters }))
            .await
            .map_err(|e| DockerError::InspectFailed {
                name: name.to_string(),
                reason: e.to_string(),
            })?;

        Ok(response
            .volumes
            .unwrap_or_default()
            .iter()
            .any(|v| v.name == name))
    }

    async fn create_volume(&self, name: &str) -> Result<(), DockerError> {
        let options = CreateVolumeOptions {
            name: name.to_string(),
            ..Default::default()
        };

        let volume = self
            .docker
            .create_volume(options)
            .await
            .map_err(|e| DockerError::CreateFailed(format!("Failed to create volume: {e}")))?;

        if volume.name != name {
            return Err(DockerError::CreateFailed(format!(
                "Volume created as '{}' instead of '{name}'",
                volume.name
            )));
        }
        Ok(())
    }

    async fn remove_volume(&self, name: &str) -> Result<(), DockerError> {
        self.docker
            .remove_volume(name, None)
            .await
            .map_err(|e| DockerError::RunFailed(format!("Failed to remove volume: {e}")))
    }
}

/// Whether a network mode names a user-defined network.
pub fn is_user_network(mode: &str) -> bool {
    let mode = mode.trim();
    !mode.is_empty() && !BUILTIN_NETWORK_MODES.contains(&mode) && !mode.starts_with("container:")
}

/// Translates a run request into the engine's container configuration.
pub fn container_config(request: &RunRequest) -> Config<String> {
    let host = request.host();
    let devices: Vec<EngineDevice> = request
        .devices()
        .iter()
        .map(|d| EngineDevice {
            path_on_host: Some(d.path_on_host.clone()),
            path_in_container: Some(d.path_in_container.clone()),
            cgroup_permissions: Some(d.cgroup_permissions.clone()),
        })
        .collect();

    let host_config = HostConfig {
        memory: host.limits.memory_bytes(),
        cpu_period: host.limits.cpu_period(),
        cpu_quota: host.limits.cpu_quota(),
        pids_limit: host.limits.pids_limit(),
        network_mode: host.network_mode.clone(),
        binds: (!host.binds.is_empty()).then(|| host.binds.clone()),
        devices: (!devices.is_empty()).then_some(devices),
        ..Default::default()
    };

    let exposed_ports = request.exposed_port().map(|port| {
        let mut ports = HashMap::new();
        ports.insert(format!("{port}/tcp"), HashMap::new());
        ports
    });

    Config {
        image: Some(request.image().to_string()),
        cmd: request.cmd_args(),
        entrypoint: request.entrypoint_args(),
        env: (!request.env().is_empty()).then(|| request.env().to_vec()),
        working_dir: request.working_dir().map(str::to_string),
        exposed_ports,
        host_config: Some(host_config),
        // no tty so stdout and stderr stay separate streams
        tty: Some(false),
        attach_stdin: Some(false),
        attach_stdout: Some(true),
        attach_stderr: Some(true),
        ..Default::default()
    }
}

fn append_output(logs: &mut ContainerLogs, chunk: LogOutput) {
    match chunk {
        LogOutput::StdOut { message } | LogOutput::Console { message } => {
            logs.stdout.push_str(&String::from_utf8_lossy(&message));
        }
        LogOutput::StdErr { message } => {
            logs.stderr.push_str(&String::from_utf8_lossy(&message));
        }
        LogOutput::StdIn { .. } => {}
    }
}

fn pull_error(image: &str, error: &bollard::errors::Error) -> DockerError {
    match error {
        bollard::errors::Error::DockerResponseServerError {
            status_code: 401 | 403,
            message,
        } => DockerError::AuthFailed {
            registry: parse_registry(image),
            reason: message.clone(),
        },
        _ => DockerError::PullFailed {
            image: image.to_string(),
            reason: error.to_string(),
        },
    }
}

fn is_not_found(error: &bollard::errors::Error) -> bool {
    matches!(
        error,
        bollard::errors::Error::DockerResponseServerError {
            status_code: 404,
            ..
        }
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::driver::DriverMode;
    use crate::execution::request::DeviceMapping;
    use crate::execution::resources::ResourceLimits;

    #[test]
    fn test_container_config_full_request() {
        let request = RunRequest::builder("job-1", "alpine:3.19")
            .with_cmd("sh -c date")
            .with_entrypoint("")
            .with_env("FOO", "bar")
            .with_working_dir("/work")
            .with_exposed_port(8080)
            .with_network_mode("job-net")
            .with_bind("/tmp/in:/in:ro")
            .with_limits(ResourceLimits::new(512, 1.0, 64))
            .with_device(DeviceMapping::new("/dev/fuse"))
            .with_driver_mode(Some(DriverMode::Legacy))
            .build()
            .unwrap();

        let config = container_config(&request);
        assert_eq!(config.image.as_deref(), Some("alpine:3.19"));
        assert_eq!(config.cmd.unwrap(), vec!["sh", "-c", "date"]);
        assert_eq!(config.entrypoint.unwrap(), vec![String::new()]);
        assert_eq!(config.env.unwrap(), vec!["FOO=bar"]);
        assert_eq!(config.working_dir.as_deref(), Some("/work"));
        assert!(config.exposed_ports.unwrap().contains_key("8080/tcp"));
        assert_eq!(config.tty, Some(false));

        let host = config.host_config.unwrap();
        assert_eq!(host.network_mode.as_deref(), Some("job-net"));
        assert_eq!(host.binds.unwrap(), vec!["/tmp/in:/in:ro"]);
        assert_eq!(host.memory, Some(512 * 1024 * 1024));
        assert_eq!(host.cpu_quota, Some(100_000));
        assert_eq!(host.pids_limit, Some(64));
        let devices = host.devices.unwrap();
        assert_eq!(devices.len(), 2);
        assert_eq!(devices[1].path_on_host.as_deref(), Some("/dev/isgx"));
        assert_eq!(devices[1].cgroup_permissions.as_deref(), Some("rwm"));
    }

    #[test]
    fn test_container_config_minimal_request() {
        let request = RunRequest::builder("job-1", "alpine").build().unwrap();
        let config = container_config(&request);

        assert!(config.cmd.is_none());
        assert!(config.entrypoint.is_none());
        assert!(config.env.is_none());
        assert!(config.working_dir.is_none());
        assert!(config.exposed_ports.is_none());
        let host = config.host_config.unwrap();
        assert!(host.devices.is_none());
        assert!(host.binds.is_none());
        assert!(host.memory.is_none());
    }

    #[test]
    fn test_is_user_network() {
        assert!(is_user_network("job-net"));
        assert!(!is_user_network("bridge"));
        assert!(!is_user_network("host"));
        assert!(!is_user_network("none"));
        assert!(!is_user_network("default"));
        assert!(!is_user_network("container:abc"));
        assert!(!is_user_network(" "));
    }

    #[test]
    fn test_append_output_separates_streams() {
        let mut logs = ContainerLogs::default();
        append_output(
            &mut logs,
            LogOutput::StdOut {
                message: "out\n".into(),
            },
        );
        append_output(
            &mut logs,
            LogOutput::StdErr {
                message: "err\n".into(),
            },
        );
        assert_eq!(logs, ContainerLogs::new("out\n", "err\n"));
    }

    #[test]
    fn test_pull_error_classification() {
        let denied = bollard::errors::Error::DockerResponseServerError {
            status_code: 401,
            message: "unauthorized".to_string(),
        };
        assert!(matches!(
            pull_error("nexus.example/app:1.0", &denied),
            DockerError::AuthFailed { registry, .. } if registry == "nexus.example"
        ));

        let missing = bollard::errors::Error::DockerResponseServerError {
            status_code: 404,
            message: "manifest unknown".to_string(),
        };
        assert!(matches!(
            pull_error("alpine:0.0", &missing),
            DockerError::PullFailed { .. }
        ));
        assert!(is_not_found(&missing));
    }
}
