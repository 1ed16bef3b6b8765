use thiserror::Error;

#[derive(Error, Debug)]
pub enum RelayError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Package install failed: {0}")]
    Install(String),

    #[error("Configuration write failed: {0}")]
    ConfigWrite(String),

    #[error("SASL map build failed: {0}")]
    MapBuildFailed(String),

    #[error("Postfix reload failed: {0}")]
    ReloadFailed(String),

    #[error("Service control failed: {0}")]
    Daemon(String),

    #[error("Postfix did not become ready within {waited_secs}s")]
    ReadinessTimeout { waited_secs: u64 },

    #[error("Queue operation failed: {0}")]
    QueueFailed(String),

    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Backup error: {0}")]
    Backup(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl RelayError {
    /// Stable kind tag used in API error bodies.
    pub fn kind(&self) -> &'static str {
        match self {
            RelayError::Io(_) => "io",
            RelayError::PermissionDenied(_) => "permission_denied",
            RelayError::Install(_) => "install_error",
            RelayError::ConfigWrite(_) => "config_write_failed",
            RelayError::MapBuildFailed(_) => "map_build_failed",
            RelayError::ReloadFailed(_) => "reload_failed",
            RelayError::Daemon(_) => "daemon_error",
            RelayError::ReadinessTimeout { .. } => "readiness_timeout",
            RelayError::QueueFailed(_) => "queue_error",
            RelayError::NotFound(_) => "not_found",
            RelayError::Backup(_) => "backup_error",
            RelayError::Config(_) => "config_error",
            RelayError::Json(_) => "json_error",
        }
    }

    /// Classify an IO error from a config-file write.
    pub fn from_write_io(err: std::io::Error, path: &std::path::Path) -> Self {
        if err.kind() == std::io::ErrorKind::PermissionDenied {
            RelayError::PermissionDenied(format!("cannot write {}", path.display()))
        } else {
            RelayError::ConfigWrite(format!("{}: {}", path.display(), err))
        }
    }
}

pub type Result<T> = std::result::Result<T, RelayError>;
