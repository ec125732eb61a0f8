//! Outcome of a container run.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::execution::engine::ContainerLogs;

/// Exit code reported when none was obtained.
pub const UNKNOWN_EXIT_CODE: i64 = -1;

/// Final status of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Exited with code 0, or started in detached mode.
    Success,
    /// Could not be created or started, or exited with a non-zero code.
    Failed,
    /// Still running when the execution budget ran out.
    Timeout,
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunStatus::Success => write!(f, "success"),
            RunStatus::Failed => write!(f, "failed"),
            RunStatus::Timeout => write!(f, "timeout"),
        }
    }
}

/// Result of [`ContainerRunner::run`](crate::execution::ContainerRunner::run).
///
/// `exit_code` is only populated when the container exited on its own within
/// its budget. A timed-out run and a detached run both report
/// [`UNKNOWN_EXIT_CODE`]; `detached` tells them apart.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunResult {
    pub status: RunStatus,
    pub exit_code: i64,
    pub logs: Option<ContainerLogs>,
    #[serde(with = "duration_millis")]
    pub execution_duration: Option<Duration>,
    /// The container was left running with no supervision.
    pub detached: bool,
}

impl RunResult {
    pub(crate) fn failed() -> Self {
        Self {
            status: RunStatus::Failed,
            exit_code: UNKNOWN_EXIT_CODE,
            logs: None,
            execution_duration: None,
            detached: false,
        }
    }

    pub(crate) fn detached() -> Self {
        Self {
            status: RunStatus::Success,
            detached: true,
            ..Self::failed()
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == RunStatus::Success
    }

    /// Captured stdout, empty when no logs were collected.
    pub fn stdout(&self) -> &str {
        self.logs.as_ref().map_or("", |logs| logs.stdout.as_str())
    }

    /// Captured stderr, empty when no logs were collected.
    pub fn stderr(&self) -> &str {
        self.logs.as_ref().map_or("", |logs| logs.stderr.as_str())
    }
}

/// Serializes an optional duration as milliseconds.
mod duration_millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Option<Duration>, s: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(d) => s.serialize_some(&(d.as_millis() as u64)),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Duration>, D::Error> {
        Ok(Option::<u64>::deserialize(d)?.map(Duration::from_millis))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failed_defaults() {
        let result = RunResult::failed();
        assert_eq!(result.status, RunStatus::Failed);
        assert_eq!(result.exit_code, UNKNOWN_EXIT_CODE);
        assert!(result.logs.is_none());
        assert!(result.execution_duration.is_none());
        assert!(!result.detached);
        assert_eq!(result.stdout(), "");
    }

    #[test]
    fn test_detached_is_success_without_exit_code() {
        let result = RunResult::detached();
        assert!(result.is_success());
        assert!(result.detached);
        assert_eq!(result.exit_code, UNKNOWN_EXIT_CODE);
    }

    #[test]
    fn test_status_display() {
        assert_eq!(RunStatus::Success.to_string(), "success");
        assert_eq!(RunStatus::Failed.to_string(), "failed");
        assert_eq!(RunStatus::Timeout.to_string(), "timeout");
    }

    #[test]
    fn test_json_shape() {
        let result = RunResult {
            status: RunStatus::Success,
            exit_code: 0,
            logs: Some(ContainerLogs::new("hi\n", "")),
            execution_duration: Some(Duration::from_millis(1500)),
            detached: false,
        };
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["status"], "success");
        assert_eq!(json["exit_code"], 0);
        assert_eq!(json["execution_duration"], 1500);
        assert_eq!(json["logs"]["stdout"], "hi\n");

        let back: RunResult = serde_json::from_value(json).unwrap();
        assert_eq!(back, result);
    }
}
