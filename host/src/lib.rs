mod config;
mod context;
mod embed;
mod error;
mod lifecycle;
mod render;
mod service_loop;
mod services;
mod synthetic;

#[cfg(test)]
mod testing;

pub use config::*;
pub use context::HostContext;
pub use embed::EmbeddedHost;
pub use error::{HostError, RenderError};
pub use lifecycle::{LifecycleState, SubsystemLifecycle};
pub use render::{DrawingSurface, FrameCallback, HeadlessRenderer, LayerComposer, Renderer};
pub use service_loop::{FRAME_INTERVAL, IDLE_INTERVAL, ServiceLoop};
pub use services::{
    DefaultSubsystems, GuestPipe, RemoteDebugForwarder, StreamingService, SubsystemFactory,
};
pub use synthetic::TestPattern;
