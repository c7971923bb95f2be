use thiserror::Error;

/// Main error type for the rightsizer
#[derive(Error, Debug)]
pub enum RecommenderError {
    /// Metrics backend errors
    #[error("Metrics error: {0}")]
    Metrics(#[from] MetricsError),

    /// Kubernetes API errors
    #[error("Kubernetes error: {0}")]
    Kubernetes(#[from] KubernetesError),

    /// Manifest parsing / editing errors
    #[error("Manifest error: {0}")]
    Manifest(#[from] ManifestError),

    /// Branch / commit / pull request errors
    #[error("Publish error: {0}")]
    Publish(#[from] PublishError),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization errors
    #[error("Serialization error: {0}")]
    Serialize(String),

    /// Every fetch unit failed against the metrics backend
    #[error("Metrics backend unavailable: {0}")]
    BackendUnavailable(String),

    /// Operator aborted the run
    #[error("Cancelled by operator")]
    Cancelled,
}

/// Metrics backend errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum MetricsError {
    /// Transport failure, timeout, 429 or 5xx. Retried.
    #[error("Network error: {0}")]
    Network(String),

    /// Missing/invalid credentials, 401 or 403. Never retried.
    #[error("Authentication failed: {0}")]
    Auth(String),

    /// Query rejected by the backend (400/422). Never retried.
    #[error("Invalid query: {0}")]
    InvalidQuery(String),

    /// Backend answered but the payload is unusable
    #[error("Backend error: {0}")]
    Backend(String),
}

impl MetricsError {
    /// Whether another attempt could succeed
    pub fn is_transient(&self) -> bool {
        matches!(self, MetricsError::Network(_))
    }
}

/// Kubernetes-specific errors
#[derive(Error, Debug)]
pub enum KubernetesError {
    /// API server connection failed
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// API error
    #[error("API error: {0}")]
    ApiError(String),
}

/// Manifest errors, scoped to a single file or patch
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ManifestError {
    /// No workload/container in the document matches the patch
    #[error("Target not found: {0}")]
    TargetNotFound(String),

    /// Malformed manifest
    #[error("Parse error: {0}")]
    Parse(String),
}

/// Publish-time errors
#[derive(Error, Debug)]
pub enum PublishError {
    /// Credentials rejected or missing. Raised before any remote mutation.
    #[error("Authentication failed: {0}")]
    Auth(String),

    /// Branch already exists with a different head, or the push was rejected
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Transport failure talking to the repository host
    #[error("Network error: {0}")]
    Network(String),

    /// The selection produced no file changes
    #[error("Nothing to publish: {0}")]
    EmptyPatch(String),

    /// Branch was pushed but the pull request could not be opened
    #[error("Branch '{branch}' pushed but pull request failed: {reason}")]
    PullRequest { branch: String, reason: String },

    /// Another publish is already running in this process
    #[error("A publish is already in progress")]
    InProgress,

    /// Local repository operation failed
    #[error("Repository error: {0}")]
    Repository(String),
}

impl From<git2::Error> for PublishError {
    fn from(e: git2::Error) -> Self {
        match e.code() {
            git2::ErrorCode::Auth | git2::ErrorCode::Certificate => {
                PublishError::Auth(e.message().to_string())
            }
            git2::ErrorCode::NotFastForward | git2::ErrorCode::Conflict => {
                PublishError::Conflict(e.message().to_string())
            }
            _ => match e.class() {
                git2::ErrorClass::Net | git2::ErrorClass::Http | git2::ErrorClass::Ssl => {
                    PublishError::Network(e.message().to_string())
                }
                git2::ErrorClass::Ssh => PublishError::Auth(e.message().to_string()),
                _ => PublishError::Repository(e.message().to_string()),
            },
        }
    }
}

/// Configuration-specific errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Missing required configuration
    #[error("Missing required: {0}")]
    MissingRequired(String),

    /// Invalid configuration value
    #[error("Invalid value: {0}")]
    InvalidValue(String),
}

impl From<serde_json::Error> for RecommenderError {
    fn from(e: serde_json::Error) -> Self {
        RecommenderError::Serialize(e.to_string())
    }
}

impl From<serde_yaml::Error> for RecommenderError {
    fn from(e: serde_yaml::Error) -> Self {
        RecommenderError::Serialize(e.to_string())
    }
}

impl From<git2::Error> for RecommenderError {
    fn from(e: git2::Error) -> Self {
        RecommenderError::Publish(e.into())
    }
}

/// Process outcome, mapped to an exit code by the binary
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitStatus {
    Success,
    PartialFailure,
    Fatal,
    Cancelled,
}

impl ExitStatus {
    pub fn code(self) -> u8 {
        match self {
            ExitStatus::Success => 0,
            ExitStatus::Fatal => 1,
            ExitStatus::PartialFailure => 2,
            ExitStatus::Cancelled => 130,
        }
    }

    /// Classify a fatal error
    pub fn from_error(err: &RecommenderError) -> Self {
        match err {
            RecommenderError::Cancelled => ExitStatus::Cancelled,
            _ => ExitStatus::Fatal,
        }
    }
}

/// Helper type alias for Results
pub type Result<T> = std::result::Result<T, RecommenderError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_network_errors_are_transient() {
        assert!(MetricsError::Network("reset".into()).is_transient());
        assert!(!MetricsError::Auth("403".into()).is_transient());
        assert!(!MetricsError::InvalidQuery("bad".into()).is_transient());
        assert!(!MetricsError::Backend("oops".into()).is_transient());
    }

    #[test]
    fn git_auth_errors_map_to_publish_auth() {
        let err = git2::Error::new(git2::ErrorCode::Auth, git2::ErrorClass::Http, "denied");
        assert!(matches!(PublishError::from(err), PublishError::Auth(_)));

        let err = git2::Error::new(
            git2::ErrorCode::NotFastForward,
            git2::ErrorClass::Reference,
            "rejected",
        );
        assert!(matches!(PublishError::from(err), PublishError::Conflict(_)));
    }

    #[test]
    fn exit_codes_distinguish_outcomes() {
        assert_eq!(ExitStatus::Success.code(), 0);
        assert_eq!(ExitStatus::PartialFailure.code(), 2);
        assert_eq!(ExitStatus::from_error(&RecommenderError::Cancelled).code(), 130);
        assert_eq!(
            ExitStatus::from_error(&RecommenderError::BackendUnavailable("x".into())).code(),
            1
        );
    }
}
