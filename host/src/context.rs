use crate::config::DisplayGeometry;
use crate::render::{LayerComposer, Renderer};
use crate::services::{GuestPipe, RemoteDebugForwarder, StreamingService};
use guesthost_input::{EventSink, TouchSlotMultiplexer};
use guesthost_supervisor::{ProcessHandle, ProcessSupervisor};
use std::sync::Arc;
use tokio::runtime::{Handle, Runtime};

/// Every live subsystem handle. Written only by the lifecycle; callbacks get
/// clones of the handles they need.
pub struct HostContext {
    pub(crate) geometry: DisplayGeometry,
    pub(crate) runtime: Option<Runtime>,
    pub(crate) renderer: Option<Arc<dyn Renderer>>,
    pub(crate) compositor: Option<Arc<LayerComposer>>,
    pub(crate) streaming: Option<Arc<dyn StreamingService>>,
    pub(crate) forwarder: Option<Arc<dyn RemoteDebugForwarder>>,
    pub(crate) digitizer: Option<Arc<dyn EventSink>>,
    pub(crate) multiplexer: Option<Arc<TouchSlotMultiplexer>>,
    pub(crate) pipe: Option<Arc<dyn GuestPipe>>,
    pub(crate) supervisor: Arc<dyn ProcessSupervisor>,
    pub(crate) guest: ProcessHandle,
}

impl HostContext {
    pub(crate) fn new(geometry: DisplayGeometry, supervisor: Arc<dyn ProcessSupervisor>) -> Self {
        Self {
            geometry,
            runtime: None,
            renderer: None,
            compositor: None,
            streaming: None,
            forwarder: None,
            digitizer: None,
            multiplexer: None,
            pipe: None,
            supervisor,
            guest: ProcessHandle::not_started(),
        }
    }

    pub fn geometry(&self) -> DisplayGeometry {
        self.geometry
    }

    pub fn runtime_handle(&self) -> Option<Handle> {
        self.runtime.as_ref().map(|rt| rt.handle().clone())
    }

    /// True once a hardware renderer bound. Otherwise frames are synthetic.
    pub fn hardware_rendering(&self) -> bool {
        self.renderer.is_some()
    }

    pub fn renderer(&self) -> Option<&Arc<dyn Renderer>> {
        self.renderer.as_ref()
    }

    pub fn compositor(&self) -> Option<&Arc<LayerComposer>> {
        self.compositor.as_ref()
    }

    pub fn streaming(&self) -> Option<&Arc<dyn StreamingService>> {
        self.streaming.as_ref()
    }

    pub fn multiplexer(&self) -> Option<&Arc<TouchSlotMultiplexer>> {
        self.multiplexer.as_ref()
    }

    pub fn guest(&self) -> &ProcessHandle {
        &self.guest
    }

    pub fn has_forwarder(&self) -> bool {
        self.forwarder.is_some()
    }

    pub fn has_pipe(&self) -> bool {
        self.pipe.is_some()
    }

    pub fn has_digitizer(&self) -> bool {
        self.digitizer.is_some()
    }
}
