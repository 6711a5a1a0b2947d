//! Multi-touch slot multiplexing.
//!
//! Clients report contacts by an arbitrary finger id. The guest digitizer
//! speaks the type B multi-touch protocol, where every contact lives in one of
//! a fixed number of slots and the last addressed slot is implicit. The
//! multiplexer binds finger ids to slots and emits the shortest event batch
//! that keeps the device in sync.

use crate::event::*;
use std::sync::{Arc, Mutex, MutexGuard};

pub const MAX_SLOTS: usize = 10;

/// Tracking ids are `finger_id mod TRACKING_ID_SPACE + 1`, which keeps them
/// inside the device's declared `0..=10` range.
pub const TRACKING_ID_SPACE: i32 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TouchPhase {
    Down,
    Move,
    Up,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TouchContact {
    pub external_id: i32,
    pub x: i32,
    pub y: i32,
    pub phase: TouchPhase,
}

#[derive(Debug, Default)]
struct SlotTable {
    slots: [Option<i32>; MAX_SLOTS],
    active_slot: Option<usize>,
}

impl SlotTable {
    fn find(&self, external_id: i32) -> Option<usize> {
        self.slots.iter().position(|s| *s == Some(external_id))
    }

    fn first_free(&self) -> Option<usize> {
        self.slots.iter().position(Option::is_none)
    }

    fn select(&mut self, events: &mut Vec<InputEvent>, slot: usize) {
        if self.active_slot != Some(slot) {
            events.push(InputEvent::abs(ABS_MT_SLOT, slot as i32));
            self.active_slot = Some(slot);
        }
    }

    fn release(&mut self, events: &mut Vec<InputEvent>, slot: usize) {
        self.select(events, slot);
        events.push(InputEvent::abs(ABS_MT_TRACKING_ID, TRACKING_ID_RELEASED));
        events.push(InputEvent::sync());
    }
}

pub fn tracking_id(external_id: i32) -> i32 {
    external_id.rem_euclid(TRACKING_ID_SPACE) + 1
}

/// Maps finger ids onto digitizer slots and forwards the resulting events.
///
/// Safe to call from any thread; calls are serialized by an internal lock
/// held for the duration of one batch.
pub struct TouchSlotMultiplexer {
    table: Mutex<SlotTable>,
    sink: Arc<dyn EventSink>,
}

impl TouchSlotMultiplexer {
    pub fn new(sink: Arc<dyn EventSink>) -> Self {
        Self {
            table: Mutex::new(SlotTable::default()),
            sink,
        }
    }

    fn table(&self) -> MutexGuard<'_, SlotTable> {
        // The table holds plain data, a panic elsewhere cannot leave it torn.
        self.table.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn apply(&self, contact: TouchContact) -> Option<usize> {
        match contact.phase {
            TouchPhase::Down => self.on_down(contact.external_id, contact.x, contact.y),
            TouchPhase::Move => self.on_move(contact.external_id, contact.x, contact.y),
            TouchPhase::Up => self.on_up(contact.external_id),
        }
    }

    /// Bind `external_id` to the lowest free slot. Returns the slot, or
    /// `None` when every slot is taken and the contact was dropped.
    pub fn on_down(&self, external_id: i32, x: i32, y: i32) -> Option<usize> {
        let mut table = self.table();
        let mut events = Vec::with_capacity(8);

        // A second Down for a live id means its Up was lost; close the old
        // contact so the id never occupies two slots.
        if let Some(stale) = table.find(external_id) {
            tracing::debug!(finger_id = external_id, slot = stale, "Releasing stale contact");
            table.release(&mut events, stale);
            table.slots[stale] = None;
        }

        // Releasing a stale contact always frees a slot, so nothing is
        // pending here.
        let Some(slot) = table.first_free() else {
            tracing::debug!(finger_id = external_id, "No free touch slot, dropping contact");
            return None;
        };

        table.slots[slot] = Some(external_id);
        table.select(&mut events, slot);
        events.push(InputEvent::abs(ABS_MT_TRACKING_ID, tracking_id(external_id)));
        events.push(InputEvent::abs(ABS_MT_POSITION_X, x));
        events.push(InputEvent::abs(ABS_MT_POSITION_Y, y));
        events.push(InputEvent::sync());

        self.sink.send_events(&events);
        Some(slot)
    }

    pub fn on_move(&self, external_id: i32, x: i32, y: i32) -> Option<usize> {
        let mut table = self.table();
        let slot = table.find(external_id)?;

        let mut events = Vec::with_capacity(4);
        table.select(&mut events, slot);
        events.push(InputEvent::abs(ABS_MT_POSITION_X, x));
        events.push(InputEvent::abs(ABS_MT_POSITION_Y, y));
        events.push(InputEvent::sync());

        self.sink.send_events(&events);
        Some(slot)
    }

    pub fn on_up(&self, external_id: i32) -> Option<usize> {
        let mut table = self.table();
        let Some(slot) = table.find(external_id) else {
            tracing::debug!(finger_id = external_id, "Up for unknown contact ignored");
            return None;
        };

        let mut events = Vec::with_capacity(3);
        table.release(&mut events, slot);
        self.sink.send_events(&events);

        table.slots[slot] = None;
        Some(slot)
    }

    /// Snapshot of the slot bindings, lowest slot first.
    pub fn slots(&self) -> [Option<i32>; MAX_SLOTS] {
        self.table().slots
    }

    pub fn active_contacts(&self) -> usize {
        self.table().slots.iter().filter(|s| s.is_some()).count()
    }
}
