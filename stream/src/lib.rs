//! Network-facing collaborators of the host: the frame streaming service,
//! the remote-debug forwarder and the guest pipe connector.

mod error;
mod forwarder;
mod pipe;
pub mod protocol;
mod server;

pub use error::StreamError;
pub use forwarder::{DEFAULT_DEBUG_PORT, DebugForwarder};
pub use pipe::{DrainingHandler, PipeConnectionHandler, PipeConnector};
pub use protocol::{DisplayConfig, Frame, PixelFormat, TouchAction, TouchEvent};
pub use server::{DEFAULT_PORT, InputCallback, StreamingServer};
