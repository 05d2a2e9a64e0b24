use std::time::Duration;
use thiserror::Error;

/// Router control plane errors.
#[derive(Error, Debug)]
pub enum RouterError {
    #[error("commit failed: {0}")]
    Commit(String),

    #[error("commit timed out after {0:?}")]
    CommitTimeout(Duration),

    #[error("status write failed: {0}")]
    Status(#[source] kube::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
