//! Transmit slots and bus-access arbitration
//!
//! One pending transmission per direction: a forward slot for frames this
//! node originates and a backward slot for the reply to a received query.
//! The backward slot always wins because its settling window opens earlier
//! than any forward priority and closes hard; a reply that cannot start
//! inside its window is dropped rather than sent late.

use embassy_time::Instant;

use crate::core::{EventKind, Frame, Priority, timing};

/// Why a frame was not accepted for transmission
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SendError {
    /// The slot for this frame direction already holds a frame
    Busy,
    /// Priority code outside 1..=5
    InvalidPriority,
    /// The frame kind carries no payload and cannot be transmitted
    InvalidFrame,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub(crate) enum SlotKind {
    Forward,
    Backward,
}

/// A frame waiting for bus access
#[derive(Debug, Copy, Clone)]
pub(crate) struct TxRequest {
    pub frame: Frame,
    pub priority: Priority,
    pub is_query: bool,
    /// Bus idle required before this request may start, raised to the
    /// collision recovery interval on a retry
    pub min_idle_us: u32,
}

/// What the scheduler should do next
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub(crate) enum Decision {
    Idle,
    /// Arm the settling compare at this instant and re-evaluate when it fires
    Wait(Instant),
    Start(SlotKind),
}

pub(crate) struct Arbiter {
    forward: Option<TxRequest>,
    backward: Option<TxRequest>,
    active: Option<(SlotKind, TxRequest)>,
}

impl Arbiter {
    pub(crate) const fn new() -> Self {
        Self {
            forward: None,
            backward: None,
            active: None,
        }
    }

    /// Places `request` in the slot selected by its frame kind.
    pub(crate) fn submit(&mut self, request: TxRequest) -> Result<(), SendError> {
        let slot = match request.frame.kind() {
            EventKind::Backward => SlotKind::Backward,
            EventKind::Gear | EventKind::Device | EventKind::Firmware => SlotKind::Forward,
            _ => return Err(SendError::InvalidFrame),
        };
        if self.occupied(slot) {
            return Err(SendError::Busy);
        }
        match slot {
            SlotKind::Forward => self.forward = Some(request),
            SlotKind::Backward => self.backward = Some(request),
        }
        Ok(())
    }

    fn occupied(&self, slot: SlotKind) -> bool {
        let pending = match slot {
            SlotKind::Forward => self.forward.is_some(),
            SlotKind::Backward => self.backward.is_some(),
        };
        pending || self.active.as_ref().is_some_and(|(kind, _)| *kind == slot)
    }

    pub(crate) fn active(&self) -> Option<(SlotKind, &TxRequest)> {
        self.active.as_ref().map(|(kind, request)| (*kind, request))
    }

    /// Picks the next action given the current bus history.
    ///
    /// `last_activity` is the most recent observed bus edge; forward settling
    /// is measured from it. `last_frame_end` is the end of the most recent
    /// complete frame; the backward window is measured from it. The decision
    /// must be re-evaluated whenever either advances.
    pub(crate) fn decide(
        &mut self,
        now: Instant,
        last_activity: Option<Instant>,
        last_frame_end: Option<Instant>,
    ) -> Decision {
        if self.active.is_some() {
            return Decision::Idle;
        }

        if self.backward.is_some() {
            match backward_window(last_frame_end) {
                Some((earliest, latest)) if now <= latest => {
                    if now >= earliest {
                        return self.start(SlotKind::Backward);
                    }
                    return Decision::Wait(earliest);
                }
                _ => {
                    // Window missed or no frame to answer
                    warn!("backward frame dropped outside its settling window");
                    self.backward = None;
                }
            }
        }

        if let Some(request) = &self.forward {
            let settling =
                u32::max(timing::forward_settling_us(request.priority), request.min_idle_us);
            let earliest = match last_activity {
                Some(at) => at + embassy_time::Duration::from_micros(settling as u64),
                None => now,
            };
            if now >= earliest {
                return self.start(SlotKind::Forward);
            }
            return Decision::Wait(earliest);
        }

        Decision::Idle
    }

    fn start(&mut self, slot: SlotKind) -> Decision {
        let request = match slot {
            SlotKind::Forward => self.forward.take(),
            SlotKind::Backward => self.backward.take(),
        };
        self.active = Some((slot, unwrap!(request)));
        Decision::Start(slot)
    }

    /// Clears the active transmission, returning it.
    pub(crate) fn complete(&mut self) -> Option<(SlotKind, TxRequest)> {
        self.active.take()
    }

    /// Returns the active transmission to its slot for a retry, requiring
    /// `min_idle_us` of bus idle first.
    pub(crate) fn requeue(&mut self, min_idle_us: u32) {
        if let Some((slot, mut request)) = self.active.take() {
            request.min_idle_us = u32::max(request.min_idle_us, min_idle_us);
            match slot {
                SlotKind::Forward => self.forward = Some(request),
                SlotKind::Backward => self.backward = Some(request),
            }
        }
    }

    /// Drops everything, pending and active. Returns `true` if a transmission
    /// was in progress.
    pub(crate) fn abort_all(&mut self) -> bool {
        self.forward = None;
        self.backward = None;
        self.active.take().is_some()
    }
}

fn backward_window(last_frame_end: Option<Instant>) -> Option<(Instant, Instant)> {
    let end = last_frame_end?;
    Some((
        end + embassy_time::Duration::from_micros(timing::SETTLING_BACKWARD_MIN_US as u64),
        end + embassy_time::Duration::from_micros(timing::SETTLING_BACKWARD_MAX_US as u64),
    ))
}
