//! Entry points for an application that embeds the host in-process.
//!
//! There is no streaming service in this mode. Frames are presented on the
//! application's drawing surface and touches arrive through the
//! `push_finger_*` calls. Every call is synchronous and safe from any thread.

use crate::config::{DisplayGeometry, HostConfig};
use crate::error::HostError;
use crate::lifecycle::{LifecycleState, SubsystemLifecycle};
use crate::render::{DrawingSurface, LayerComposer};
use crate::services::{DefaultSubsystems, SubsystemFactory};
use guesthost_input::{TouchContact, TouchPhase, TouchSlotMultiplexer};
use guesthost_stream::Frame;
use guesthost_supervisor::{ProcessState, Signal, StopEscalation};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};

pub struct EmbeddedHost {
    factory: Arc<dyn SubsystemFactory>,
    base_path: Mutex<Option<PathBuf>>,
    lifecycle: Mutex<Option<SubsystemLifecycle>>,
    surface: Mutex<Option<Arc<dyn DrawingSurface>>>,
    escalation: StopEscalation,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl EmbeddedHost {
    pub fn new() -> Self {
        Self::with_factory(Arc::new(DefaultSubsystems::new()))
    }

    pub fn with_factory(factory: Arc<dyn SubsystemFactory>) -> Self {
        Self {
            factory,
            base_path: Mutex::new(None),
            lifecycle: Mutex::new(None),
            surface: Mutex::new(None),
            escalation: StopEscalation::new(),
        }
    }

    pub fn set_base_path(&self, path: impl Into<PathBuf>) {
        let path = path.into();
        tracing::info!(path = %path.display(), "Base path set");
        *lock(&self.base_path) = Some(path);
    }

    /// Configure the display and bind the renderer. False if already
    /// initialized, if no base path was set, or if the geometry is invalid.
    pub fn initialize(&self, width: u32, height: u32, dpi: u32) -> bool {
        let mut slot = lock(&self.lifecycle);
        if slot.is_some() {
            tracing::warn!("Host already initialized");
            return false;
        }
        let Some(base) = lock(&self.base_path).clone() else {
            tracing::error!("Cannot initialize before a base path is set");
            return false;
        };

        let result = DisplayGeometry::new(width, height, dpi).and_then(|geometry| {
            let mut lifecycle =
                SubsystemLifecycle::new(HostConfig::new(base, geometry), self.factory.clone());
            lifecycle.configure_display()?;
            lifecycle.bind_renderer()?;
            Ok(lifecycle)
        });

        match result {
            Ok(lifecycle) => {
                *slot = Some(lifecycle);
                true
            }
            Err(e) => {
                tracing::error!("Failed to initialize host: {}", e);
                false
            }
        }
    }

    pub fn is_initialized(&self) -> bool {
        lock(&self.lifecycle).is_some()
    }

    /// Start the runtime, the digitizer and the guest pipe. A failure tears
    /// the host down; `initialize` may then be called again.
    pub fn start_runtime(&self) -> bool {
        let mut slot = lock(&self.lifecycle);
        let Some(lifecycle) = slot.as_mut() else {
            tracing::error!("Cannot start runtime before initialize");
            return false;
        };

        let result = lifecycle
            .start_networking()
            .and_then(|()| lifecycle.start_services());
        match result {
            Ok(()) => true,
            Err(e) => {
                tracing::error!("Failed to start runtime: {}", e);
                *slot = None;
                false
            }
        }
    }

    pub fn stop_runtime(&self) {
        let lifecycle = lock(&self.lifecycle).take();
        if let Some(mut lifecycle) = lifecycle {
            lifecycle.shutdown(None);
        }
    }

    /// The compositor a renderer delivers finished frames to.
    pub fn compositor(&self) -> Option<Arc<LayerComposer>> {
        lock(&self.lifecycle)
            .as_ref()
            .and_then(|lc| lc.context().compositor().cloned())
    }

    /// Present composed frames on `surface`, replacing any previous one.
    pub fn create_surface(&self, surface: Arc<dyn DrawingSurface>) -> bool {
        let slot = lock(&self.lifecycle);
        let Some(lifecycle) = slot.as_ref() else {
            tracing::error!("Cannot create a surface before initialize");
            return false;
        };
        let ctx = lifecycle.context();
        let Some(compositor) = ctx.compositor() else {
            return false;
        };

        if let Some(renderer) = ctx.renderer() {
            if let Err(e) = renderer.create_native_window(&surface) {
                tracing::warn!("Failed to create native window: {}", e);
            }
        }
        let target = surface.clone();
        compositor.set_frame_callback(Box::new(move |frame: &Frame<'_>| target.present(frame)));
        *lock(&self.surface) = Some(surface);
        tracing::debug!("Drawing surface attached");
        true
    }

    pub fn destroy_surface(&self) {
        let Some(surface) = lock(&self.surface).take() else {
            return;
        };
        if let Some(lifecycle) = lock(&self.lifecycle).as_ref() {
            let ctx = lifecycle.context();
            if let Some(compositor) = ctx.compositor() {
                compositor.clear_frame_callback();
            }
            if let Some(renderer) = ctx.renderer() {
                renderer.destroy_native_window(&surface);
            }
        }
        tracing::debug!("Drawing surface destroyed");
    }

    pub fn push_finger_down(&self, x: i32, y: i32, finger_id: i32) {
        self.push_contact(finger_id, x, y, TouchPhase::Down);
    }

    pub fn push_finger_move(&self, x: i32, y: i32, finger_id: i32) {
        self.push_contact(finger_id, x, y, TouchPhase::Move);
    }

    pub fn push_finger_up(&self, finger_id: i32) {
        self.push_contact(finger_id, 0, 0, TouchPhase::Up);
    }

    fn push_contact(&self, external_id: i32, x: i32, y: i32, phase: TouchPhase) {
        let Some(multiplexer) = self.multiplexer() else {
            tracing::debug!(finger = external_id, "Touch dropped, runtime not started");
            return;
        };
        multiplexer.apply(TouchContact {
            external_id,
            x,
            y,
            phase,
        });
    }

    fn multiplexer(&self) -> Option<Arc<TouchSlotMultiplexer>> {
        lock(&self.lifecycle)
            .as_ref()
            .and_then(|lc| lc.context().multiplexer().cloned())
    }

    /// Launch the guest with the default startup script under the base path.
    pub fn start_container(&self, guest_binary: impl Into<PathBuf>) -> Result<(), HostError> {
        let mut slot = lock(&self.lifecycle);
        let lifecycle = slot.as_mut().ok_or_else(|| HostError::InvalidState {
            expected: LifecycleState::Running.to_string(),
            actual: LifecycleState::Uninitialized.to_string(),
        })?;

        let settings = lifecycle.config().launch_settings(guest_binary);
        std::fs::create_dir_all(&settings.temp_dir)?;
        lifecycle.start_guest(&settings)?;
        self.escalation.reset();
        Ok(())
    }

    /// Ask the guest to stop. Repeated calls escalate from SIGINT to SIGTERM
    /// to SIGKILL. Returns the signal sent.
    pub fn stop_container(&self) -> Signal {
        let signal = self.escalation.next_signal();
        match lock(&self.lifecycle).as_ref() {
            Some(lifecycle) => {
                if let Err(e) = lifecycle.signal_guest(signal) {
                    tracing::warn!(signal = %signal, "Failed to stop guest: {}", e);
                }
            }
            None => tracing::warn!("Cannot stop guest, host not initialized"),
        }
        signal
    }

    /// Non-blocking. Returns the exit code the first time the guest is seen
    /// exited.
    pub fn reap_container(&self) -> Option<i32> {
        lock(&self.lifecycle).as_mut().and_then(|lc| lc.reap_guest())
    }

    pub fn container_state(&self) -> ProcessState {
        lock(&self.lifecycle)
            .as_ref()
            .map(|lc| lc.guest_state())
            .unwrap_or(ProcessState::NotStarted)
    }
}

impl Default for EmbeddedHost {
    fn default() -> Self {
        Self::new()
    }
}
