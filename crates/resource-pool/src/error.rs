//! Error types for pool operations

use std::path::PathBuf;
use std::time::Duration;

use bollard::errors::Error as DockerError;

pub type Result<T> = std::result::Result<T, PoolError>;

/// Everything a pool operation can fail with.
///
/// Remote failures keep the bollard error as their source and carry the name of the engine
/// operation that produced them, so callers can both log a readable message and match on the
/// underlying kind (see [`PoolError::remote_status`]).
#[derive(Debug, thiserror::Error)]
pub enum PoolError {
    #[error("repository can't be empty")]
    EmptyRepository,

    #[error("container not found: {0}")]
    ContainerNotFound(String),

    #[error("network not found: {0}")]
    NetworkNotFound(String),

    #[error("port {port} not found on container {container}")]
    PortNotFound { container: String, port: String },

    #[error("{op}: {source}")]
    Remote {
        op: &'static str,
        #[source]
        source: DockerError,
    },

    #[error("pull {image}: {message}")]
    Pull { image: String, message: String },

    #[error("create mount directory {}: {source}", path.display())]
    MountDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{op}: pool was closed")]
    Cancelled { op: &'static str },

    #[error("{op}: timed out after {timeout:?}")]
    Timeout { op: &'static str, timeout: Duration },

    #[error("docker client: {0}")]
    Client(#[source] DockerError),

    #[error("{op}: {reason}")]
    Descriptor { op: &'static str, reason: String },
}

impl PoolError {
    pub(crate) fn remote(op: &'static str, source: DockerError) -> Self {
        Self::Remote { op, source }
    }

    /// HTTP status returned by the engine, if this is a remote error the daemon answered.
    pub fn remote_status(&self) -> Option<u16> {
        match self {
            Self::Remote {
                source: DockerError::DockerResponseServerError { status_code, .. },
                ..
            } => Some(*status_code),
            _ => None,
        }
    }

    /// True for the lookup sentinels (`ContainerNotFound`, `NetworkNotFound`, `PortNotFound`).
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::ContainerNotFound(_) | Self::NetworkNotFound(_) | Self::PortNotFound { .. }
        )
    }
}

/// Engine answered 404 for the resource.
pub(crate) fn is_missing(err: &DockerError) -> bool {
    matches!(
        err,
        DockerError::DockerResponseServerError {
            status_code: 404,
            ..
        }
    )
}
