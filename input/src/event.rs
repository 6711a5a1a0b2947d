//! Linux evdev event model shared by the multiplexer and the virtual device.
//!
//! Records written to the guest use the 64-bit `struct input_event` layout:
//! - seconds: 8 bytes (i64 LE)
//! - microseconds: 8 bytes (i64 LE)
//! - type: 2 bytes (u16 LE)
//! - code: 2 bytes (u16 LE)
//! - value: 4 bytes (i32 LE)

use std::time::{SystemTime, UNIX_EPOCH};

pub const EV_SYN: u16 = 0x00;
pub const EV_ABS: u16 = 0x03;

pub const SYN_REPORT: u16 = 0x00;

pub const ABS_MT_SLOT: u16 = 0x2f;
pub const ABS_MT_TOUCH_MAJOR: u16 = 0x30;
pub const ABS_MT_TOUCH_MINOR: u16 = 0x31;
pub const ABS_MT_POSITION_X: u16 = 0x35;
pub const ABS_MT_POSITION_Y: u16 = 0x36;
pub const ABS_MT_TRACKING_ID: u16 = 0x39;

pub const INPUT_PROP_DIRECT: u16 = 0x01;

pub const BUS_VIRTUAL: u16 = 0x06;

/// Tracking id value that tells the guest a slot no longer holds a contact.
pub const TRACKING_ID_RELEASED: i32 = -1;

pub const EVENT_RECORD_SIZE: usize = 24;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InputEvent {
    pub kind: u16,
    pub code: u16,
    pub value: i32,
}

impl InputEvent {
    pub const fn abs(code: u16, value: i32) -> Self {
        Self {
            kind: EV_ABS,
            code,
            value,
        }
    }

    pub const fn sync() -> Self {
        Self {
            kind: EV_SYN,
            code: SYN_REPORT,
            value: 0,
        }
    }

    pub fn is_slot_select(&self) -> bool {
        self.kind == EV_ABS && self.code == ABS_MT_SLOT
    }
}

/// Receiver of ordered event batches. Each batch ends with a sync event.
pub trait EventSink: Send + Sync {
    fn send_events(&self, events: &[InputEvent]);
}

/// Encode a batch as `input_event` records stamped with the current time.
pub fn encode_events(events: &[InputEvent]) -> Vec<u8> {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default();
    let sec = now.as_secs() as i64;
    let usec = now.subsec_micros() as i64;

    let mut buf = Vec::with_capacity(events.len() * EVENT_RECORD_SIZE);
    for event in events {
        buf.extend_from_slice(&sec.to_le_bytes());
        buf.extend_from_slice(&usec.to_le_bytes());
        buf.extend_from_slice(&event.kind.to_le_bytes());
        buf.extend_from_slice(&event.code.to_le_bytes());
        buf.extend_from_slice(&event.value.to_le_bytes());
    }
    buf
}
