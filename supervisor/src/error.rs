use thiserror::Error;

#[derive(Error, Debug)]
pub enum SupervisorError {
    #[error("path too long ({len} bytes, limit {limit}): {path}")]
    PathTooLong {
        path: String,
        len: usize,
        limit: usize,
    },

    #[error("invalid path: {0}")]
    InvalidPath(String),

    #[error("fork failed: {0}")]
    Fork(nix::errno::Errno),

    #[error("process not running")]
    NotRunning,

    #[error("signal delivery failed: {0}")]
    Signal(nix::errno::Errno),

    #[error("wait failed: {0}")]
    Wait(nix::errno::Errno),
}
