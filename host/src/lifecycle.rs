//! Ordered bring-up and teardown of the host subsystems.
//!
//! ```text
//! Uninitialized → DisplayConfigured → RenderingReady → NetworkingReady → Running
//!                                                                         ↓
//!                                              Stopped ← ShuttingDown ←───┘
//! ```
//!
//! A failure while starting networking or services tears down everything
//! already started and leaves the lifecycle `Stopped`.

use crate::config::{DIGITIZER_NAME, DisplayGeometry, HostConfig, LaunchSettings};
use crate::context::HostContext;
use crate::error::HostError;
use crate::render::LayerComposer;
use crate::services::SubsystemFactory;
use guesthost_input::{DeviceDescriptor, TouchContact, TouchPhase, TouchSlotMultiplexer};
use guesthost_stream::{Frame, TouchAction, TouchEvent};
use guesthost_supervisor::{ProcessState, ReapStatus, Signal};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;

const RUNTIME_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Uninitialized,
    DisplayConfigured,
    RenderingReady,
    NetworkingReady,
    Running,
    ShuttingDown,
    Stopped,
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LifecycleState::Uninitialized => "uninitialized",
            LifecycleState::DisplayConfigured => "display-configured",
            LifecycleState::RenderingReady => "rendering-ready",
            LifecycleState::NetworkingReady => "networking-ready",
            LifecycleState::Running => "running",
            LifecycleState::ShuttingDown => "shutting-down",
            LifecycleState::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

pub struct SubsystemLifecycle {
    config: HostConfig,
    factory: Arc<dyn SubsystemFactory>,
    state: LifecycleState,
    context: HostContext,
}

impl SubsystemLifecycle {
    pub fn new(config: HostConfig, factory: Arc<dyn SubsystemFactory>) -> Self {
        let context = HostContext::new(config.geometry, factory.supervisor());
        Self {
            config,
            factory,
            state: LifecycleState::Uninitialized,
            context,
        }
    }

    pub fn state(&self) -> LifecycleState {
        self.state
    }

    pub fn config(&self) -> &HostConfig {
        &self.config
    }

    pub fn context(&self) -> &HostContext {
        &self.context
    }

    /// Run every bring-up stage in order.
    pub fn bring_up(&mut self) -> Result<(), HostError> {
        self.configure_display()?;
        self.bind_renderer()?;
        self.start_networking()?;
        self.start_services()
    }

    pub fn configure_display(&mut self) -> Result<(), HostError> {
        self.expect_state(LifecycleState::Uninitialized)?;
        let g = self.config.geometry;
        self.context.geometry = DisplayGeometry::new(g.width, g.height, g.dpi)?;
        tracing::info!(
            width = g.width,
            height = g.height,
            dpi = g.dpi,
            "Display configured"
        );
        self.state = LifecycleState::DisplayConfigured;
        Ok(())
    }

    /// Bind the hardware renderer, or fall back to synthetic frames.
    pub fn bind_renderer(&mut self) -> Result<(), HostError> {
        self.expect_state(LifecycleState::DisplayConfigured)?;

        let renderer = self.factory.renderer();
        match renderer.initialize(&self.context.geometry) {
            Ok(()) => {
                tracing::info!("Hardware renderer bound");
                self.context.renderer = Some(renderer);
            }
            Err(e) => {
                tracing::warn!("Renderer unavailable, using software frames: {}", e);
            }
        }
        self.context.compositor = Some(Arc::new(LayerComposer::new()));

        self.state = LifecycleState::RenderingReady;
        Ok(())
    }

    pub fn start_networking(&mut self) -> Result<(), HostError> {
        self.expect_state(LifecycleState::RenderingReady)?;

        let runtime = match tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .thread_name("guesthost-worker")
            .build()
        {
            Ok(rt) => rt,
            Err(e) => {
                self.rollback();
                return Err(HostError::Runtime(e.to_string()));
            }
        };
        let handle = runtime.handle().clone();
        self.context.runtime = Some(runtime);

        if let Err(e) = self.start_network_services(&handle) {
            tracing::error!("Network bring-up failed, rolling back: {}", e);
            self.rollback();
            return Err(e);
        }

        self.state = LifecycleState::NetworkingReady;
        Ok(())
    }

    fn start_network_services(&mut self, handle: &Handle) -> Result<(), HostError> {
        if let Some(stream) = self.config.stream.clone() {
            let service = self.factory.streaming_service(handle, &stream);
            let g = self.context.geometry;
            service.set_display_config(g.width, g.height, g.dpi);
            service.start()?;
            self.context.streaming = Some(service);
        }

        if let Some(debug) = self.config.debug.clone() {
            if debug.port == 0 {
                tracing::info!("Debug forwarding disabled");
            } else {
                let guest_socket = self.config.guest_path(&debug.guest_socket);
                let forwarder = self.factory.debug_forwarder(handle, &debug, &guest_socket);
                forwarder.start()?;
                self.context.forwarder = Some(forwarder);
            }
        }
        Ok(())
    }

    pub fn start_services(&mut self) -> Result<(), HostError> {
        self.expect_state(LifecycleState::NetworkingReady)?;

        if let Err(e) = self.start_guest_services() {
            tracing::error!("Service bring-up failed, rolling back: {}", e);
            self.rollback();
            return Err(e);
        }

        self.state = LifecycleState::Running;
        tracing::info!("Host running");
        Ok(())
    }

    fn start_guest_services(&mut self) -> Result<(), HostError> {
        let handle = self
            .context
            .runtime_handle()
            .ok_or_else(|| HostError::Runtime("runtime not started".to_string()))?;

        if let (Some(compositor), Some(streaming)) =
            (&self.context.compositor, &self.context.streaming)
        {
            let streaming = streaming.clone();
            compositor.set_frame_callback(Box::new(move |frame: &Frame<'_>| {
                streaming.send_frame(frame)
            }));
        }

        let g = self.context.geometry;
        let descriptor = DeviceDescriptor::touchscreen(DIGITIZER_NAME, g.width, g.height);
        let digitizer = self.factory.digitizer(&self.config.input_dir(), descriptor)?;
        let multiplexer = Arc::new(TouchSlotMultiplexer::new(digitizer.clone()));
        self.context.digitizer = Some(digitizer);
        self.context.multiplexer = Some(multiplexer.clone());

        if let Some(streaming) = &self.context.streaming {
            streaming.set_input_callback(Some(Arc::new(move |event: TouchEvent| {
                multiplexer.apply(touch_contact(event));
            })));
        }

        let pipe = self
            .factory
            .pipe_connector(&handle, &self.config.pipe_socket_path())?;
        self.context.pipe = Some(pipe);

        if let Some(settings) = self.config.launch.clone() {
            if settings.startup_script.is_file() {
                self.launch_guest(&settings)?;
            } else {
                tracing::info!(
                    script = %settings.startup_script.display(),
                    "No startup script, guest not started"
                );
            }
        }
        Ok(())
    }

    /// Launch the guest on a running host.
    pub fn start_guest(&mut self, settings: &LaunchSettings) -> Result<(), HostError> {
        self.expect_state(LifecycleState::Running)?;
        self.launch_guest(settings)
    }

    fn launch_guest(&mut self, settings: &LaunchSettings) -> Result<(), HostError> {
        if let Some(pid) = self.context.guest.pid().filter(|_| self.context.guest.is_running()) {
            return Err(HostError::GuestRunning(pid.as_raw()));
        }
        let request = self.config.launch_request(settings);
        self.context.guest = self.context.supervisor.launch(&request)?;
        Ok(())
    }

    /// Non-blocking reap. Returns the exit code the first time the guest is
    /// seen exited.
    pub fn reap_guest(&mut self) -> Option<i32> {
        match self.context.supervisor.try_reap(&mut self.context.guest) {
            Ok(ReapStatus::Exited(code)) => Some(code),
            Ok(ReapStatus::Unchanged) => None,
            Err(e) => {
                tracing::warn!("Failed to reap guest: {}", e);
                None
            }
        }
    }

    pub fn signal_guest(&self, signal: Signal) -> Result<(), HostError> {
        self.context.supervisor.forward(&self.context.guest, signal)?;
        Ok(())
    }

    pub fn guest_state(&self) -> ProcessState {
        self.context.guest.state()
    }

    /// Tear everything down in reverse order, then signal the guest with
    /// `signal` (SIGTERM when `None`) and wait a bounded time for it.
    pub fn shutdown(&mut self, signal: Option<Signal>) {
        if self.state == LifecycleState::Stopped {
            return;
        }
        self.state = LifecycleState::ShuttingDown;
        tracing::info!("Shutting down host subsystems");

        self.teardown();

        let signal = signal.unwrap_or(Signal::SIGTERM);
        let guest = self.context.supervisor.terminate(
            &mut self.context.guest,
            signal,
            self.config.guest_shutdown_timeout,
        );

        self.state = LifecycleState::Stopped;
        tracing::info!(guest = %guest, "Host stopped");
    }

    fn rollback(&mut self) {
        self.teardown();
        self.state = LifecycleState::Stopped;
    }

    fn teardown(&mut self) {
        let ctx = &mut self.context;

        // Callbacks go first so nothing reaches a collaborator being stopped.
        if let Some(compositor) = ctx.compositor.take() {
            compositor.clear_frame_callback();
        }
        if let Some(streaming) = &ctx.streaming {
            streaming.set_input_callback(None);
        }

        if let Some(renderer) = ctx.renderer.take() {
            renderer.release();
            tracing::debug!("Renderer released");
        }
        if let Some(forwarder) = ctx.forwarder.take() {
            forwarder.stop();
        }
        if let Some(streaming) = ctx.streaming.take() {
            streaming.stop();
        }
        if let Some(pipe) = ctx.pipe.take() {
            pipe.stop();
        }
        ctx.multiplexer = None;
        ctx.digitizer = None;

        if let Some(runtime) = ctx.runtime.take() {
            runtime.shutdown_timeout(RUNTIME_SHUTDOWN_TIMEOUT);
            tracing::debug!("Runtime stopped");
        }
    }

    fn expect_state(&self, expected: LifecycleState) -> Result<(), HostError> {
        if self.state != expected {
            return Err(HostError::InvalidState {
                expected: expected.to_string(),
                actual: self.state.to_string(),
            });
        }
        Ok(())
    }
}

impl Drop for SubsystemLifecycle {
    fn drop(&mut self) {
        if self.state != LifecycleState::Uninitialized {
            self.shutdown(None);
        }
    }
}

pub(crate) fn touch_contact(event: TouchEvent) -> TouchContact {
    let phase = match event.action {
        TouchAction::Down => TouchPhase::Down,
        TouchAction::Move => TouchPhase::Move,
        TouchAction::Up => TouchPhase::Up,
    };
    TouchContact {
        external_id: event.finger_id,
        x: event.x,
        y: event.y,
        phase,
    }
}
