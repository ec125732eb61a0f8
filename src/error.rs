//! Error types for dockrun operations.
//!
//! A single error enum covers the whole container control layer:
//! - Argument validation at the API boundary
//! - Docker daemon connectivity
//! - Container lifecycle calls (create, start, stop, remove, inspect)
//! - Image pulls, exec sessions and request files

use thiserror::Error;

/// Errors that can occur during Docker operations.
#[derive(Debug, Error)]
pub enum DockerError {
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Docker daemon not available: {0}")]
    DaemonUnavailable(String),

    #[error("Docker create failed: {0}")]
    CreateFailed(String),

    #[error("Docker run failed: {0}")]
    RunFailed(String),

    #[error("Container '{name}' not found")]
    ContainerNotFound { name: String },

    #[error("Container '{name}' reached timeout")]
    Timeout { name: String },

    #[error("Failed to inspect '{name}': {reason}")]
    InspectFailed { name: String, reason: String },

    #[error("Failed to pull image '{image}': {reason}")]
    PullFailed { image: String, reason: String },

    #[error("Image '{image}' was not pulled within {seconds} seconds")]
    PullTimeout { image: String, seconds: u64 },

    #[error("Docker exec failed: {0}")]
    ExecFailed(String),

    #[error("Registry authentication failed for '{registry}': {reason}")]
    AuthFailed { registry: String, reason: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML parsing error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl DockerError {
    /// Shorthand for a blank/missing argument rejection.
    pub fn blank(what: &str) -> Self {
        DockerError::InvalidArgument(format!("{what} must not be blank"))
    }

    /// Whether the error means the daemon does not know the object.
    pub fn is_not_found(&self) -> bool {
        matches!(self, DockerError::ContainerNotFound { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blank_message() {
        let err = DockerError::blank("Container name");
        assert_eq!(
            err.to_string(),
            "Invalid argument: Container name must not be blank"
        );
    }

    #[test]
    fn test_timeout_display() {
        let err = DockerError::Timeout {
            name: "job-1".to_string(),
        };
        assert_eq!(err.to_string(), "Container 'job-1' reached timeout");
    }

    #[test]
    fn test_is_not_found() {
        assert!(DockerError::ContainerNotFound {
            name: "x".to_string()
        }
        .is_not_found());
        assert!(!DockerError::RunFailed("x".to_string()).is_not_found());
    }
}
