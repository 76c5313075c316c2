//! Channel connecting a back-end interrupt half to the Emdali stack

use crate::internal;
use crate::phy::PhyEvent;

/// Producer of phy events for the stack's deferred context
///
/// `push` never blocks and is safe to call from interrupt context. Capture
/// events carry the latched edge timestamp, not the push instant, so deferred
/// delivery does not distort protocol timing.
///
/// An event that does not fit in the stack's queue is dropped; the bus
/// self-heals through the stop-bit and failure timeout paths, so a dropped
/// capture degrades one frame at worst.
#[derive(Clone, Copy)]
pub struct EventSink<'a>(&'a (dyn internal::DynamicEventSink + Sync));

impl<'a> EventSink<'a> {
    pub fn new(sink: &'a (dyn internal::DynamicEventSink + Sync)) -> Self {
        Self(sink)
    }

    /// Pushes an event. Returns `false` if it was dropped.
    pub fn push(&self, event: PhyEvent) -> bool {
        self.0.try_push(event)
    }
}
