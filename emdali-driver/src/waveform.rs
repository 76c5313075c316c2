//! Output waveform object

use embassy_time::{Duration, Instant};
use heapless::Vec;

/// Bus line level
///
/// The bus idles high; a transmitter drives it low. `Level::High` therefore
/// also means "released".
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Level {
    Low,
    High,
}

impl core::ops::Not for Level {
    type Output = Level;

    fn not(self) -> Level {
        match self {
            Level::Low => Level::High,
            Level::High => Level::Low,
        }
    }
}

/// A captured bus edge. `level` is the line level after the transition.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Edge {
    pub at: Instant,
    pub level: Level,
}

/// One scheduled output transition, as an offset from waveform start
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Transition {
    pub at: Duration,
    pub level: Level,
}

/// Worst case: start bit plus 32 data bits, two transitions each, plus the
/// trailing release
pub const MAX_TRANSITIONS: usize = 70;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum WaveformError {
    /// Transition offsets must strictly increase and levels must alternate
    NonMonotonic,
    Overflow,
}

/// An ordered output transition schedule
///
/// Offsets strictly increase and levels alternate. The waveform ends `hold`
/// after the last transition without a further level change; the hold absorbs
/// the stop phase so the schedule never ends in an extra transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Waveform {
    transitions: Vec<Transition, MAX_TRANSITIONS>,
    hold: Duration,
}

impl Waveform {
    pub const fn new() -> Self {
        Self {
            transitions: Vec::new(),
            hold: Duration::from_ticks(0),
        }
    }

    pub fn push(&mut self, at: Duration, level: Level) -> Result<(), WaveformError> {
        if let Some(last) = self.transitions.last()
            && (at <= last.at || level == last.level)
        {
            return Err(WaveformError::NonMonotonic);
        }
        self.transitions
            .push(Transition { at, level })
            .map_err(|_| WaveformError::Overflow)
    }

    /// Sets the terminal phase duration past the last transition
    pub fn set_hold(&mut self, hold: Duration) {
        self.hold = hold;
    }

    pub fn transitions(&self) -> &[Transition] {
        &self.transitions
    }

    pub fn is_empty(&self) -> bool {
        self.transitions.is_empty()
    }

    pub fn hold(&self) -> Duration {
        self.hold
    }

    /// Offset at which the waveform ends and the line is released
    pub fn end(&self) -> Duration {
        match self.transitions.last() {
            Some(last) => last.at + self.hold,
            None => Duration::from_ticks(0),
        }
    }

    /// Level the transmitter drives at `offset`, given the level before the
    /// first transition
    pub fn level_at(&self, offset: Duration, prior: Level) -> Level {
        self.transitions
            .iter()
            .take_while(|t| t.at <= offset)
            .last()
            .map(|t| t.level)
            .unwrap_or(prior)
    }

    /// The most recent scheduled transition at or before `offset`
    pub fn last_transition_before(&self, offset: Duration) -> Option<&Transition> {
        self.transitions.iter().take_while(|t| t.at <= offset).last()
    }

    /// Level the line is left at after the waveform completes
    pub fn final_level(&self, prior: Level) -> Level {
        self.transitions.last().map(|t| t.level).unwrap_or(prior)
    }
}

impl Default for Waveform {
    fn default() -> Self {
        Self::new()
    }
}
