use thiserror::Error as ThisError;

use crate::instance_lock::InstanceLockError;

/// Startup failures. Everything past startup is recovered inside the run loop.
#[derive(ThisError, Debug)]
pub enum AgentError {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Failed to read {path}: {source}")]
    CredentialRead {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    InstanceLock(#[from] InstanceLockError),

    #[error(transparent)]
    IoError(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, AgentError>;
