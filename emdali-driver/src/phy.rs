//! Timer back-end capability interface

use embassy_time::Instant;

use crate::waveform::{Edge, Level, Waveform};

/// Single-shot timeout classes; each maps to its own compare channel
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TimeoutKind {
    /// Frame boundary watch, re-armed after every bus edge
    StopBit,
    /// Bus settling before a deferred transmission
    Settling,
    /// Backward-frame answer watch after a transmitted query
    Query,
}

/// Event produced by a back-end for the deferred protocol context
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PhyEvent {
    /// A bus edge was captured (including locally driven edges)
    Capture(Edge),
    /// An armed compare fired
    Timeout { kind: TimeoutKind, at: Instant },
}

/// Hardware capability interface consumed by the Emdali stack
///
/// The stack calls these operations only from its deferred context; they must
/// not block. Waveform playback runs autonomously in the back-end: the
/// interrupt half consumes the schedule transition by transition and the stack
/// observes progress through the capture path.
pub trait Phy {
    /// Begins driving `waveform` with transition offsets relative to `start`.
    ///
    /// `start` is never earlier than the current instant by more than a
    /// scheduling latency; a back-end unable to delay may begin immediately.
    fn start_waveform(&mut self, start: Instant, waveform: &Waveform);

    /// Stops any waveform playback and releases the line high.
    fn abort_waveform(&mut self);

    /// Arms the compare channel of `kind` at the absolute instant `at`,
    /// replacing a pending deadline of the same kind.
    fn arm_timeout(&mut self, kind: TimeoutKind, at: Instant);

    /// Disarms the compare channel of `kind`. Disarming an idle channel is a
    /// no-op.
    fn cancel_timeout(&mut self, kind: TimeoutKind);

    /// Current bus level as seen by the receiver input.
    fn line_level(&self) -> Level;
}
