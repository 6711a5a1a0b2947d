use thiserror::Error;

#[derive(Error, Debug)]
pub enum InputError {
    #[error("invalid device path: {0}")]
    InvalidPath(String),

    #[error("device socket bind failed: {0}")]
    Bind(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}
