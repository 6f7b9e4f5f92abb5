use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum SupervisorError {
    #[error("server is already running")]
    AlreadyRunning,

    #[error("server is not running")]
    NotRunning,

    #[error("working directory does not exist: `{0}`")]
    WorkingDirMissing(PathBuf),

    #[error("supervisor gate lock poisoned")]
    Poisoned,

    #[error("io error: `{0}`")]
    Io(#[from] std::io::Error),

    #[cfg(target_family = "unix")]
    #[error("signal error: `{0}`")]
    Signal(#[from] nix::errno::Errno),
}

impl<T> From<std::sync::PoisonError<T>> for SupervisorError {
    fn from(_: std::sync::PoisonError<T>) -> Self {
        SupervisorError::Poisoned
    }
}
