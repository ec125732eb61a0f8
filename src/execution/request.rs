//! Run request: the immutable description of one container execution.
//!
//! Requests are built in two stages. [`RunRequestBuilder`] collects the
//! declared devices and the declared [`DriverMode`] separately; [`build`]
//! validates the request and merges both device sources into the host
//! configuration. The merge is additive and does not depend on the order in
//! which the builder methods were called.
//!
//! [`build`]: RunRequestBuilder::build

use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::DockerError;
use crate::execution::driver::DriverMode;
use crate::execution::resources::ResourceLimits;

/// Default cgroup permissions granted on a mapped device.
const DEFAULT_CGROUP_PERMISSIONS: &str = "rwm";

/// A host device exposed inside the container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct DeviceMapping {
    pub path_on_host: String,
    pub path_in_container: String,
    pub cgroup_permissions: String,
}

impl DeviceMapping {
    /// Maps a host device to the same path inside the container.
    pub fn new(path: impl Into<String>) -> Self {
        let path = path.into();
        Self {
            path_in_container: path.clone(),
            path_on_host: path,
            cgroup_permissions: DEFAULT_CGROUP_PERMISSIONS.to_string(),
        }
    }
}

impl FromStr for DeviceMapping {
    type Err = DockerError;

    /// Parses `host[:container[:permissions]]`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.trim().split(':').collect();
        let host = parts[0];
        if host.is_empty() || parts.len() > 3 {
            return Err(DockerError::InvalidArgument(format!(
                "invalid device specification '{s}'"
            )));
        }
        let container = parts.get(1).filter(|p| !p.is_empty()).unwrap_or(&host);
        let permissions = parts
            .get(2)
            .filter(|p| !p.is_empty())
            .copied()
            .unwrap_or(DEFAULT_CGROUP_PERMISSIONS);
        if !permissions.chars().all(|c| matches!(c, 'r' | 'w' | 'm')) {
            return Err(DockerError::InvalidArgument(format!(
                "invalid device permissions '{permissions}' in '{s}'"
            )));
        }
        Ok(Self {
            path_on_host: host.to_string(),
            path_in_container: container.to_string(),
            cgroup_permissions: permissions.to_string(),
        })
    }
}

impl TryFrom<String> for DeviceMapping {
    type Error = DockerError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<DeviceMapping> for String {
    fn from(device: DeviceMapping) -> Self {
        device.to_string()
    }
}

impl std::fmt::Display for DeviceMapping {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}:{}:{}",
            self.path_on_host, self.path_in_container, self.cgroup_permissions
        )
    }
}

/// Host-side configuration of the container.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HostSettings {
    /// Network mode ("bridge", "host", "none" or a user network name).
    pub network_mode: Option<String>,
    /// Bind mounts in `host:container[:ro]` format.
    pub binds: Vec<String>,
    /// Devices mapped into the container.
    pub devices: Vec<DeviceMapping>,
    /// Resource limits.
    pub limits: ResourceLimits,
}

/// Immutable description of one container execution.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunRequest {
    container_name: String,
    image: String,
    cmd: Option<String>,
    entrypoint: Option<String>,
    env: Vec<String>,
    host: HostSettings,
    exposed_port: u16,
    working_dir: Option<String>,
    max_execution_time_ms: i64,
    driver_mode: DriverMode,
    display_logs: bool,
}

impl RunRequest {
    /// Starts building a request for the given container name and image.
    pub fn builder(
        container_name: impl Into<String>,
        image: impl Into<String>,
    ) -> RunRequestBuilder {
        RunRequestBuilder::new(container_name, image)
    }

    pub fn container_name(&self) -> &str {
        &self.container_name
    }

    pub fn image(&self) -> &str {
        &self.image
    }

    /// Raw command string, as supplied.
    pub fn cmd(&self) -> Option<&str> {
        self.cmd.as_deref()
    }

    /// Command split into arguments, `None` when no command was given.
    pub fn cmd_args(&self) -> Option<Vec<String>> {
        self.cmd
            .as_deref()
            .filter(|cmd| !cmd.trim().is_empty())
            .map(split_args)
    }

    pub fn entrypoint(&self) -> Option<&str> {
        self.entrypoint.as_deref()
    }

    /// Entrypoint split into arguments.
    ///
    /// An empty entrypoint is kept as a single empty argument, which is how
    /// the engine is told to clear the image's default entrypoint.
    pub fn entrypoint_args(&self) -> Option<Vec<String>> {
        self.entrypoint.as_deref().map(|entrypoint| {
            if entrypoint.trim().is_empty() {
                vec![String::new()]
            } else {
                split_args(entrypoint)
            }
        })
    }

    /// Environment in `KEY=VALUE` form, in declaration order.
    pub fn env(&self) -> &[String] {
        &self.env
    }

    pub fn host(&self) -> &HostSettings {
        &self.host
    }

    /// Final device list: declared devices followed by driver mode devices.
    pub fn devices(&self) -> &[DeviceMapping] {
        &self.host.devices
    }

    /// Exposed container port, `None` when no port is exposed.
    pub fn exposed_port(&self) -> Option<u16> {
        (self.exposed_port > 0).then_some(self.exposed_port)
    }

    pub fn working_dir(&self) -> Option<&str> {
        self.working_dir.as_deref()
    }

    pub fn max_execution_time_ms(&self) -> i64 {
        self.max_execution_time_ms
    }

    /// Supervision budget, `None` for a detached run.
    pub fn max_execution_time(&self) -> Option<Duration> {
        (self.max_execution_time_ms > 0)
            .then(|| Duration::from_millis(self.max_execution_time_ms as u64))
    }

    /// A zero or negative budget means the container runs detached.
    pub fn is_detached(&self) -> bool {
        self.max_execution_time_ms <= 0
    }

    pub fn driver_mode(&self) -> DriverMode {
        self.driver_mode
    }

    pub fn display_logs(&self) -> bool {
        self.display_logs
    }
}

/// Builder for [`RunRequest`].
///
/// Also deserializable, so a request can be described in a YAML file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunRequestBuilder {
    pub container_name: String,
    pub image: String,
    pub cmd: Option<String>,
    pub entrypoint: Option<String>,
    pub env: Vec<String>,
    pub host: HostSettings,
    pub devices: Vec<DeviceMapping>,
    pub exposed_port: u16,
    pub working_dir: Option<String>,
    pub max_execution_time_ms: i64,
    pub driver_mode: Option<DriverMode>,
    pub display_logs: bool,
}

impl RunRequestBuilder {
    pub fn new(container_name: impl Into<String>, image: impl Into<String>) -> Self {
        Self {
            container_name: container_name.into(),
            image: image.into(),
            ..Default::default()
        }
    }

    /// Loads a request description from a YAML file. Missing fields keep
    /// their defaults.
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self, DockerError> {
        let content = std::fs::read_to_string(path)?;
        Ok(serde_yaml::from_str(&content)?)
    }

    pub fn with_container_name(mut self, name: impl Into<String>) -> Self {
        self.container_name = name.into();
        self
    }

    pub fn with_image(mut self, image: impl Into<String>) -> Self {
        self.image = image.into();
        self
    }

    /// Sets the command, a whitespace-separated argument string.
    pub fn with_cmd(mut self, cmd: impl Into<String>) -> Self {
        self.cmd = Some(cmd.into());
        self
    }

    /// Overrides the image entrypoint. An empty string clears it.
    pub fn with_entrypoint(mut self, entrypoint: impl Into<String>) -> Self {
        self.entrypoint = Some(entrypoint.into());
        self
    }

    /// Appends one `KEY=VALUE` environment entry.
    pub fn with_env(mut self, key: impl AsRef<str>, value: impl AsRef<str>) -> Self {
        self.env
            .push(format!("{}={}", key.as_ref(), value.as_ref()));
        self
    }

    /// Appends raw `KEY=VALUE` entries.
    pub fn with_env_entries<I, S>(mut self, entries: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.env.extend(entries.into_iter().map(Into::into));
        self
    }

    /// Replaces the host settings. Devices it carries are added to the
    /// declared devices rather than replacing them.
    pub fn with_host(mut self, mut host: HostSettings) -> Self {
        self.devices.append(&mut host.devices);
        self.host = host;
        self
    }

    pub fn with_network_mode(mut self, mode: impl Into<String>) -> Self {
        self.host.network_mode = Some(mode.into());
        self
    }

    pub fn with_bind(mut self, bind: impl Into<String>) -> Self {
        self.host.binds.push(bind.into());
        self
    }

    pub fn with_limits(mut self, limits: ResourceLimits) -> Self {
        self.host.limits = limits;
        self
    }

    pub fn with_device(mut self, device: DeviceMapping) -> Self {
        self.devices.push(device);
        self
    }

    pub fn with_devices(mut self, devices: impl IntoIterator<Item = DeviceMapping>) -> Self {
        self.devices.extend(devices);
        self
    }

    pub fn with_exposed_port(mut self, port: u16) -> Self {
        self.exposed_port = port;
        self
    }

    pub fn with_working_dir(mut self, dir: impl Into<String>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    /// Sets the supervision budget in milliseconds. Zero or less runs detached.
    pub fn with_max_execution_time_ms(mut self, millis: i64) -> Self {
        self.max_execution_time_ms = millis;
        self
    }

    pub fn with_max_execution_time(self, budget: Duration) -> Self {
        let millis = i64::try_from(budget.as_millis()).unwrap_or(i64::MAX);
        self.with_max_execution_time_ms(millis)
    }

    /// Selects the driver mode. `None` is normalized to [`DriverMode::None`].
    pub fn with_driver_mode(mut self, mode: Option<DriverMode>) -> Self {
        self.driver_mode = mode;
        self
    }

    pub fn with_display_logs(mut self, display: bool) -> Self {
        self.display_logs = display;
        self
    }

    /// Validates the request and merges driver mode devices.
    ///
    /// # Errors
    ///
    /// Returns `DockerError::InvalidArgument` if the container name or the
    /// image is blank.
    pub fn build(self) -> Result<RunRequest, DockerError> {
        if self.container_name.trim().is_empty() {
            return Err(DockerError::blank("Container name"));
        }
        if self.image.trim().is_empty() {
            return Err(DockerError::blank("Image"));
        }

        let driver_mode = self.driver_mode.unwrap_or_default();
        let mut host = self.host;
        let mut devices = host.devices;
        devices.extend(self.devices);
        if driver_mode.is_active() {
            devices.extend(driver_mode.devices().iter().copied().map(DeviceMapping::new));
        }
        host.devices = devices;

        Ok(RunRequest {
            container_name: self.container_name,
            image: self.image,
            cmd: self.cmd,
            entrypoint: self.entrypoint,
            env: self.env,
            host,
            exposed_port: self.exposed_port,
            working_dir: self.working_dir,
            max_execution_time_ms: self.max_execution_time_ms,
            driver_mode,
            display_logs: self.display_logs,
        })
    }
}

fn split_args(args: &str) -> Vec<String> {
    args.split_whitespace().map(str::to_string).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn builder() -> RunRequestBuilder {
        RunRequest::builder("job-1", "alpine:latest")
    }

    #[test]
    fn test_build_minimal_request() {
        let request = builder().build().unwrap();
        assert_eq!(request.container_name(), "job-1");
        assert_eq!(request.image(), "alpine:latest");
        assert_eq!(request.driver_mode(), DriverMode::None);
        assert!(request.devices().is_empty());
        assert!(request.is_detached());
        assert_eq!(request.max_execution_time(), None);
        assert_eq!(request.exposed_port(), None);
        assert_eq!(request.cmd_args(), None);
        assert_eq!(request.entrypoint_args(), None);
    }

    #[test]
    fn test_blank_name_is_rejected() {
        let err = RunRequest::builder("  ", "alpine:latest").build().unwrap_err();
        assert!(matches!(err, DockerError::InvalidArgument(_)));
    }

    #[test]
    fn test_blank_image_is_rejected() {
        let err = RunRequest::builder("job-1", "").build().unwrap_err();
        assert!(matches!(err, DockerError::InvalidArgument(_)));
    }

    #[test]
    fn test_native_mode_adds_to_manual_device() {
        let request = builder()
            .with_device(DeviceMapping::new("/dev/fuse"))
            .with_driver_mode(Some(DriverMode::Native))
            .build()
            .unwrap();

        let paths: Vec<&str> = request
            .devices()
            .iter()
            .map(|d| d.path_on_host.as_str())
            .collect();
        assert_eq!(
            paths,
            vec!["/dev/fuse", "/dev/sgx/enclave", "/dev/sgx/provision"]
        );
    }

    #[test]
    fn test_device_merge_is_order_independent() {
        let mode_first = builder()
            .with_driver_mode(Some(DriverMode::Native))
            .with_device(DeviceMapping::new("/dev/fuse"))
            .build()
            .unwrap();
        let device_first = builder()
            .with_device(DeviceMapping::new("/dev/fuse"))
            .with_driver_mode(Some(DriverMode::Native))
            .build()
            .unwrap();

        assert_eq!(mode_first.devices().len(), 3);
        assert_eq!(mode_first.devices(), device_first.devices());
    }

    #[test]
    fn test_devices_are_not_deduplicated() {
        let request = builder()
            .with_device(DeviceMapping::new("/dev/isgx"))
            .with_driver_mode(Some(DriverMode::Legacy))
            .build()
            .unwrap();
        assert_eq!(request.devices().len(), 2);
        assert_eq!(request.devices()[0], request.devices()[1]);
    }

    #[test]
    fn test_host_devices_are_kept_when_host_is_replaced() {
        let host = HostSettings {
            network_mode: Some("job-net".to_string()),
            devices: vec![DeviceMapping::new("/dev/kvm")],
            ..Default::default()
        };
        let request = builder()
            .with_device(DeviceMapping::new("/dev/fuse"))
            .with_host(host)
            .with_driver_mode(Some(DriverMode::Legacy))
            .build()
            .unwrap();

        assert_eq!(request.devices().len(), 3);
        assert_eq!(request.host().network_mode.as_deref(), Some("job-net"));
    }

    #[test]
    fn test_absent_driver_mode_is_none() {
        let request = builder().with_driver_mode(None).build().unwrap();
        assert_eq!(request.driver_mode(), DriverMode::None);
        assert!(request.devices().is_empty());
    }

    #[test]
    fn test_cmd_and_entrypoint_args() {
        let request = builder()
            .with_cmd("sh -c   'echo'")
            .with_entrypoint("")
            .build()
            .unwrap();
        assert_eq!(
            request.cmd_args().unwrap(),
            vec!["sh", "-c", "'echo'"]
        );
        assert_eq!(request.entrypoint_args().unwrap(), vec![String::new()]);
    }

    #[test]
    fn test_blank_cmd_is_ignored() {
        let request = builder().with_cmd("   ").build().unwrap();
        assert_eq!(request.cmd_args(), None);
    }

    #[test]
    fn test_supervised_budget() {
        let request = builder()
            .with_max_execution_time(Duration::from_secs(5))
            .build()
            .unwrap();
        assert!(!request.is_detached());
        assert_eq!(request.max_execution_time_ms(), 5000);
        assert_eq!(request.max_execution_time(), Some(Duration::from_secs(5)));

        let negative = builder().with_max_execution_time_ms(-1).build().unwrap();
        assert!(negative.is_detached());
    }

    #[test]
    fn test_env_keeps_order() {
        let request = builder()
            .with_env("B", "2")
            .with_env("A", "1")
            .with_env_entries(["C=3"])
            .build()
            .unwrap();
        assert_eq!(request.env(), &["B=2", "A=1", "C=3"]);
    }

    #[test]
    fn test_parse_device_mapping() {
        let short: DeviceMapping = "/dev/isgx".parse().unwrap();
        assert_eq!(short, DeviceMapping::new("/dev/isgx"));

        let full: DeviceMapping = "/dev/sda:/dev/xvda:r".parse().unwrap();
        assert_eq!(full.path_on_host, "/dev/sda");
        assert_eq!(full.path_in_container, "/dev/xvda");
        assert_eq!(full.cgroup_permissions, "r");

        assert!("".parse::<DeviceMapping>().is_err());
        assert!("/dev/a:/dev/b:rx".parse::<DeviceMapping>().is_err());
        assert!("/a:/b:r:extra".parse::<DeviceMapping>().is_err());
    }

    #[test]
    fn test_builder_from_yaml() {
        let yaml = r#"
container_name: job-yaml
image: alpine:3.19
cmd: echo hello
env:
  - FOO=bar
host:
  network_mode: none
  binds:
    - /tmp/in:/in:ro
  limits:
    memory_mb: 256
devices:
  - /dev/fuse
max_execution_time_ms: 10000
driver_mode: legacy
"#;
        let builder: RunRequestBuilder = serde_yaml::from_str(yaml).unwrap();
        let request = builder.build().unwrap();

        assert_eq!(request.container_name(), "job-yaml");
        assert_eq!(request.cmd_args().unwrap(), vec!["echo", "hello"]);
        assert_eq!(request.host().binds, vec!["/tmp/in:/in:ro"]);
        assert_eq!(request.host().limits.memory_mb, Some(256));
        assert_eq!(request.driver_mode(), DriverMode::Legacy);
        assert_eq!(request.devices().len(), 2);
        assert!(!request.is_detached());
    }

    #[test]
    fn test_from_yaml_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("request.yaml");
        std::fs::write(&path, "image: alpine:3.19\nmax_execution_time_ms: -1\n").unwrap();

        let builder = RunRequestBuilder::from_yaml_file(&path).unwrap();
        assert_eq!(builder.image, "alpine:3.19");
        assert!(builder.container_name.is_empty());

        std::fs::write(&path, "image: [unterminated").unwrap();
        assert!(matches!(
            RunRequestBuilder::from_yaml_file(&path),
            Err(DockerError::Yaml(_))
        ));
        assert!(matches!(
            RunRequestBuilder::from_yaml_file(dir.path().join("missing.yaml")),
            Err(DockerError::Io(_))
        ));
    }
}
