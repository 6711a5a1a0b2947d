//! Fake collaborators for lifecycle, loop and embedding tests.

use crate::config::{DebugForwardConfig, DisplayGeometry, StreamConfig};
use crate::error::{HostError, RenderError};
use crate::render::{DrawingSurface, Renderer};
use crate::services::{GuestPipe, RemoteDebugForwarder, StreamingService, SubsystemFactory};
use guesthost_input::{DeviceDescriptor, EventSink, InputEvent};
use guesthost_stream::{DrainingHandler, Frame, InputCallback, PipeConnector, StreamError, TouchEvent};
use guesthost_supervisor::{ForkExecSupervisor, ProcessSupervisor};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use tempfile::TempDir;
use tokio::runtime::Handle;

/// A base directory with an empty `rootfs`.
pub(crate) fn host_base() -> TempDir {
    let base = TempDir::new().unwrap();
    std::fs::create_dir(base.path().join("rootfs")).unwrap();
    base
}

#[derive(Default)]
pub(crate) struct CallLog(Mutex<Vec<String>>);

impl CallLog {
    fn record(&self, call: &str) {
        self.0.lock().unwrap().push(call.to_string());
    }

    pub(crate) fn snapshot(&self) -> Calls {
        Calls(self.0.lock().unwrap().clone())
    }
}

pub(crate) struct Calls(Vec<String>);

impl Calls {
    pub(crate) fn contains(&self, call: &str) -> bool {
        self.0.iter().any(|c| c == call)
    }

    pub(crate) fn position(&self, call: &str) -> Option<usize> {
        self.0.iter().position(|c| c == call)
    }

    pub(crate) fn count(&self, call: &str) -> usize {
        self.0.iter().filter(|c| *c == call).count()
    }
}

struct FakeRenderer {
    log: Arc<CallLog>,
    binds: bool,
}

impl Renderer for FakeRenderer {
    fn initialize(&self, _geometry: &DisplayGeometry) -> Result<(), RenderError> {
        self.log.record("renderer.initialize");
        if self.binds {
            Ok(())
        } else {
            Err(RenderError::Unavailable("fake".to_string()))
        }
    }

    fn create_native_window(&self, _surface: &Arc<dyn DrawingSurface>) -> Result<(), RenderError> {
        self.log.record("renderer.create_window");
        Ok(())
    }

    fn destroy_native_window(&self, _surface: &Arc<dyn DrawingSurface>) {
        self.log.record("renderer.destroy_window");
    }

    fn release(&self) {
        self.log.record("renderer.release");
    }
}

pub(crate) struct FakeStream {
    log: Arc<CallLog>,
    fail_bind: bool,
    clients: AtomicBool,
    frames: AtomicUsize,
    display: Mutex<Option<(u32, u32, u32)>>,
    callback: RwLock<Option<InputCallback>>,
}

impl FakeStream {
    pub(crate) fn set_clients(&self, connected: bool) {
        self.clients.store(connected, Ordering::SeqCst);
    }

    pub(crate) fn frames_sent(&self) -> usize {
        self.frames.load(Ordering::SeqCst)
    }

    pub(crate) fn display_config(&self) -> Option<(u32, u32, u32)> {
        *self.display.lock().unwrap()
    }

    /// Deliver a touch as if a client sent it. False when no callback is
    /// bound.
    pub(crate) fn inject(&self, event: TouchEvent) -> bool {
        let callback = self.callback.read().unwrap().clone();
        match callback {
            Some(callback) => {
                callback(event);
                true
            }
            None => false,
        }
    }
}

impl StreamingService for FakeStream {
    fn set_display_config(&self, width: u32, height: u32, dpi: u32) {
        *self.display.lock().unwrap() = Some((width, height, dpi));
    }

    fn start(&self) -> Result<(), HostError> {
        self.log.record("stream.start");
        if self.fail_bind {
            return Err(StreamError::Bind {
                address: "127.0.0.1:5558".to_string(),
                source: std::io::Error::from(std::io::ErrorKind::AddrInUse),
            }
            .into());
        }
        Ok(())
    }

    fn stop(&self) {
        self.log.record("stream.stop");
    }

    fn send_frame(&self, _frame: &Frame<'_>) {
        self.frames.fetch_add(1, Ordering::SeqCst);
    }

    fn has_clients(&self) -> bool {
        self.clients.load(Ordering::SeqCst)
    }

    fn set_input_callback(&self, callback: Option<InputCallback>) {
        if callback.is_none() {
            self.log.record("stream.input_callback.clear");
        }
        *self.callback.write().unwrap() = callback;
    }
}

struct FakeForwarder {
    log: Arc<CallLog>,
    fail: bool,
}

impl RemoteDebugForwarder for FakeForwarder {
    fn start(&self) -> Result<(), HostError> {
        self.log.record("forwarder.start");
        if self.fail {
            return Err(StreamError::InvalidAddress("fake".to_string()).into());
        }
        Ok(())
    }

    fn stop(&self) {
        self.log.record("forwarder.stop");
    }
}

#[derive(Default)]
pub(crate) struct RecordingSink {
    batches: Mutex<Vec<Vec<InputEvent>>>,
}

impl RecordingSink {
    pub(crate) fn batches(&self) -> Vec<Vec<InputEvent>> {
        self.batches.lock().unwrap().clone()
    }
}

impl EventSink for RecordingSink {
    fn send_events(&self, events: &[InputEvent]) {
        self.batches.lock().unwrap().push(events.to_vec());
    }
}

/// Fakes for the renderer, streaming service, forwarder and digitizer. The
/// pipe connector and supervisor are the real ones.
pub(crate) struct FakeFactory {
    log: Arc<CallLog>,
    renderer_binds: bool,
    stream_fails: bool,
    forwarder_fails: bool,
    stream: Mutex<Option<Arc<FakeStream>>>,
    forwarder_socket: Mutex<Option<PathBuf>>,
    sink: Arc<RecordingSink>,
    supervisor: Arc<dyn ProcessSupervisor>,
}

impl FakeFactory {
    pub(crate) fn new() -> Self {
        Self {
            log: Arc::new(CallLog::default()),
            renderer_binds: false,
            stream_fails: false,
            forwarder_fails: false,
            stream: Mutex::new(None),
            forwarder_socket: Mutex::new(None),
            sink: Arc::new(RecordingSink::default()),
            supervisor: Arc::new(ForkExecSupervisor::new()),
        }
    }

    pub(crate) fn with_renderer(mut self, binds: bool) -> Self {
        self.renderer_binds = binds;
        self
    }

    pub(crate) fn with_stream_failure(mut self) -> Self {
        self.stream_fails = true;
        self
    }

    pub(crate) fn with_forwarder_failure(mut self) -> Self {
        self.forwarder_fails = true;
        self
    }

    pub(crate) fn log(&self) -> Calls {
        self.log.snapshot()
    }

    pub(crate) fn stream(&self) -> Option<Arc<FakeStream>> {
        self.stream.lock().unwrap().clone()
    }

    pub(crate) fn forwarder_socket(&self) -> Option<PathBuf> {
        self.forwarder_socket.lock().unwrap().clone()
    }

    pub(crate) fn sink(&self) -> Arc<RecordingSink> {
        self.sink.clone()
    }
}

impl SubsystemFactory for FakeFactory {
    fn renderer(&self) -> Arc<dyn Renderer> {
        Arc::new(FakeRenderer {
            log: self.log.clone(),
            binds: self.renderer_binds,
        })
    }

    fn streaming_service(
        &self,
        _runtime: &Handle,
        _config: &StreamConfig,
    ) -> Arc<dyn StreamingService> {
        let stream = Arc::new(FakeStream {
            log: self.log.clone(),
            fail_bind: self.stream_fails,
            clients: AtomicBool::new(false),
            frames: AtomicUsize::new(0),
            display: Mutex::new(None),
            callback: RwLock::new(None),
        });
        *self.stream.lock().unwrap() = Some(stream.clone());
        stream
    }

    fn debug_forwarder(
        &self,
        _runtime: &Handle,
        _config: &DebugForwardConfig,
        guest_socket: &Path,
    ) -> Arc<dyn RemoteDebugForwarder> {
        *self.forwarder_socket.lock().unwrap() = Some(guest_socket.to_path_buf());
        Arc::new(FakeForwarder {
            log: self.log.clone(),
            fail: self.forwarder_fails,
        })
    }

    fn digitizer(
        &self,
        _input_dir: &Path,
        _descriptor: DeviceDescriptor,
    ) -> Result<Arc<dyn EventSink>, HostError> {
        let sink: Arc<dyn EventSink> = self.sink.clone();
        Ok(sink)
    }

    fn pipe_connector(
        &self,
        runtime: &Handle,
        socket_path: &Path,
    ) -> Result<Arc<dyn GuestPipe>, HostError> {
        let connector = PipeConnector::start(runtime, socket_path, Arc::new(DrainingHandler))?;
        Ok(Arc::new(connector))
    }

    fn supervisor(&self) -> Arc<dyn ProcessSupervisor> {
        self.supervisor.clone()
    }
}

/// Counts presented frames.
#[derive(Default)]
pub(crate) struct CountingSurface {
    presented: AtomicUsize,
}

impl CountingSurface {
    pub(crate) fn presented(&self) -> usize {
        self.presented.load(Ordering::SeqCst)
    }
}

impl DrawingSurface for CountingSurface {
    fn present(&self, _frame: &Frame<'_>) {
        self.presented.fetch_add(1, Ordering::SeqCst);
    }
}
