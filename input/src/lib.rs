mod device;
mod error;
mod event;
mod touch;

pub use device::{AbsAxis, DeviceDescriptor, InputId, InputManager, VirtualInputDevice};
pub use error::InputError;
pub use event::*;
pub use touch::{MAX_SLOTS, TRACKING_ID_SPACE, TouchContact, TouchPhase, TouchSlotMultiplexer};
