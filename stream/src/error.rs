use thiserror::Error;

#[derive(Error, Debug)]
pub enum StreamError {
    #[error("bind failed on {address}: {source}")]
    Bind {
        address: String,
        source: std::io::Error,
    },

    #[error("invalid address: {0}")]
    InvalidAddress(String),

    #[error("invalid frame: {0}")]
    InvalidFrame(String),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
