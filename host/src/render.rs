//! Rendering seam: the GPU renderer is an external collaborator, the
//! compositor hands finished frames to whoever consumes them.

use crate::config::DisplayGeometry;
use crate::error::RenderError;
use guesthost_stream::Frame;
use std::sync::{Arc, RwLock};

pub trait Renderer: Send + Sync {
    /// Bind the hardware renderer. Failure leaves the host in software mode.
    fn initialize(&self, geometry: &DisplayGeometry) -> Result<(), RenderError>;

    fn create_native_window(&self, surface: &Arc<dyn DrawingSurface>) -> Result<(), RenderError>;

    fn destroy_native_window(&self, surface: &Arc<dyn DrawingSurface>);

    fn release(&self);
}

/// Renderer for hosts without a GPU backend. Never binds.
#[derive(Debug, Default)]
pub struct HeadlessRenderer;

impl Renderer for HeadlessRenderer {
    fn initialize(&self, _geometry: &DisplayGeometry) -> Result<(), RenderError> {
        Err(RenderError::Unavailable(
            "no hardware rendering backend".to_string(),
        ))
    }

    fn create_native_window(&self, _surface: &Arc<dyn DrawingSurface>) -> Result<(), RenderError> {
        Err(RenderError::Surface(
            "headless renderer has no native windows".to_string(),
        ))
    }

    fn destroy_native_window(&self, _surface: &Arc<dyn DrawingSurface>) {}

    fn release(&self) {}
}

/// A drawing surface supplied by an embedding application.
pub trait DrawingSurface: Send + Sync {
    fn present(&self, frame: &Frame<'_>);
}

pub type FrameCallback = Box<dyn Fn(&Frame<'_>) + Send + Sync>;

/// Holds the single frame-ready callback.
#[derive(Default)]
pub struct LayerComposer {
    callback: RwLock<Option<FrameCallback>>,
}

impl LayerComposer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_frame_callback(&self, callback: FrameCallback) {
        if let Ok(mut slot) = self.callback.write() {
            *slot = Some(callback);
        }
    }

    /// Returns once no frame is being delivered through the old callback.
    pub fn clear_frame_callback(&self) {
        if let Ok(mut slot) = self.callback.write() {
            *slot = None;
        }
    }

    pub fn has_frame_callback(&self) -> bool {
        self.callback.read().map(|c| c.is_some()).unwrap_or(false)
    }

    /// Deliver a finished frame. Returns false when nothing is bound.
    pub fn compose(&self, frame: &Frame<'_>) -> bool {
        let Ok(slot) = self.callback.read() else {
            return false;
        };
        match slot.as_ref() {
            Some(callback) => {
                callback(frame);
                true
            }
            None => false,
        }
    }
}
