use guesthost_input::InputError;
use guesthost_stream::StreamError;
use guesthost_supervisor::SupervisorError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum HostError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("invalid lifecycle state: expected {expected}, got {actual}")]
    InvalidState { expected: String, actual: String },

    #[error("runtime error: {0}")]
    Runtime(String),

    #[error("streaming error: {0}")]
    Stream(#[from] StreamError),

    #[error("guest pipe bind failed: {0}")]
    PipeBind(String),

    #[error("input device error: {0}")]
    Input(#[from] InputError),

    #[error("guest already running as pid {0}")]
    GuestRunning(i32),

    #[error("guest launch error: {0}")]
    Launch(#[from] SupervisorError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Error, Debug)]
pub enum RenderError {
    #[error("renderer unavailable: {0}")]
    Unavailable(String),

    #[error("surface error: {0}")]
    Surface(String),
}
