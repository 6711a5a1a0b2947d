//! Collaborator handles the lifecycle drives, and the factory that builds
//! them.

use crate::config::{DebugForwardConfig, StreamConfig};
use crate::error::HostError;
use crate::render::{HeadlessRenderer, Renderer};
use guesthost_input::{DeviceDescriptor, EventSink, InputManager};
use guesthost_stream::{
    DebugForwarder, DrainingHandler, Frame, InputCallback, PipeConnectionHandler, PipeConnector,
    StreamingServer,
};
use guesthost_supervisor::{ForkExecSupervisor, ProcessSupervisor};
use std::path::Path;
use std::sync::Arc;
use tokio::runtime::Handle;

pub trait StreamingService: Send + Sync {
    fn set_display_config(&self, width: u32, height: u32, dpi: u32);

    /// Bind and start accepting. Bind errors come back synchronously.
    fn start(&self) -> Result<(), HostError>;

    fn stop(&self);

    fn send_frame(&self, frame: &Frame<'_>);

    fn has_clients(&self) -> bool;

    fn set_input_callback(&self, callback: Option<InputCallback>);
}

pub trait RemoteDebugForwarder: Send + Sync {
    fn start(&self) -> Result<(), HostError>;

    fn stop(&self);
}

pub trait GuestPipe: Send + Sync {
    fn stop(&self);
}

impl StreamingService for StreamingServer {
    fn set_display_config(&self, width: u32, height: u32, dpi: u32) {
        StreamingServer::set_display_config(self, width, height, dpi);
    }

    fn start(&self) -> Result<(), HostError> {
        StreamingServer::start(self)?;
        Ok(())
    }

    fn stop(&self) {
        StreamingServer::stop(self);
    }

    fn send_frame(&self, frame: &Frame<'_>) {
        StreamingServer::send_frame(self, frame);
    }

    fn has_clients(&self) -> bool {
        StreamingServer::has_clients(self)
    }

    fn set_input_callback(&self, callback: Option<InputCallback>) {
        StreamingServer::set_input_callback(self, callback);
    }
}

impl RemoteDebugForwarder for DebugForwarder {
    fn start(&self) -> Result<(), HostError> {
        DebugForwarder::start(self)?;
        Ok(())
    }

    fn stop(&self) {
        DebugForwarder::stop(self);
    }
}

impl GuestPipe for PipeConnector {
    fn stop(&self) {
        PipeConnector::stop(self);
    }
}

/// Builds every collaborator the lifecycle starts. Tests swap in fakes.
pub trait SubsystemFactory: Send + Sync {
    fn renderer(&self) -> Arc<dyn Renderer>;

    fn streaming_service(&self, runtime: &Handle, config: &StreamConfig)
    -> Arc<dyn StreamingService>;

    fn debug_forwarder(
        &self,
        runtime: &Handle,
        config: &DebugForwardConfig,
        guest_socket: &Path,
    ) -> Arc<dyn RemoteDebugForwarder>;

    fn digitizer(
        &self,
        input_dir: &Path,
        descriptor: DeviceDescriptor,
    ) -> Result<Arc<dyn EventSink>, HostError>;

    fn pipe_connector(
        &self,
        runtime: &Handle,
        socket_path: &Path,
    ) -> Result<Arc<dyn GuestPipe>, HostError>;

    fn supervisor(&self) -> Arc<dyn ProcessSupervisor>;
}

/// The production collaborators.
pub struct DefaultSubsystems {
    renderer: Arc<dyn Renderer>,
    pipe_handler: Arc<dyn PipeConnectionHandler>,
    supervisor: Arc<dyn ProcessSupervisor>,
}

impl DefaultSubsystems {
    pub fn new() -> Self {
        Self {
            renderer: Arc::new(HeadlessRenderer),
            pipe_handler: Arc::new(DrainingHandler),
            supervisor: Arc::new(ForkExecSupervisor::new()),
        }
    }

    pub fn with_renderer(mut self, renderer: Arc<dyn Renderer>) -> Self {
        self.renderer = renderer;
        self
    }

    pub fn with_pipe_handler(mut self, handler: Arc<dyn PipeConnectionHandler>) -> Self {
        self.pipe_handler = handler;
        self
    }
}

impl Default for DefaultSubsystems {
    fn default() -> Self {
        Self::new()
    }
}

impl SubsystemFactory for DefaultSubsystems {
    fn renderer(&self) -> Arc<dyn Renderer> {
        self.renderer.clone()
    }

    fn streaming_service(
        &self,
        runtime: &Handle,
        config: &StreamConfig,
    ) -> Arc<dyn StreamingService> {
        Arc::new(StreamingServer::new(
            runtime.clone(),
            &config.address,
            config.port,
        ))
    }

    fn debug_forwarder(
        &self,
        runtime: &Handle,
        config: &DebugForwardConfig,
        guest_socket: &Path,
    ) -> Arc<dyn RemoteDebugForwarder> {
        Arc::new(DebugForwarder::new(
            runtime.clone(),
            &config.address,
            config.port,
            guest_socket,
        ))
    }

    fn digitizer(
        &self,
        input_dir: &Path,
        descriptor: DeviceDescriptor,
    ) -> Result<Arc<dyn EventSink>, HostError> {
        let device = InputManager::new(input_dir).create_device(descriptor)?;
        Ok(Arc::new(device))
    }

    fn pipe_connector(
        &self,
        runtime: &Handle,
        socket_path: &Path,
    ) -> Result<Arc<dyn GuestPipe>, HostError> {
        let connector = PipeConnector::start(runtime, socket_path, self.pipe_handler.clone())
            .map_err(|e| HostError::PipeBind(e.to_string()))?;
        Ok(Arc::new(connector))
    }

    fn supervisor(&self) -> Arc<dyn ProcessSupervisor> {
        self.supervisor.clone()
    }
}
