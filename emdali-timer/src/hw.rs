//! Timer peripheral capability interface

use emdali_driver::waveform::Level;

/// Compare channels of the bus timer
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum CompareChannel {
    /// Drives the transmit line through the waveform schedule
    Output,
    StopBit,
    Settling,
    Query,
}

impl CompareChannel {
    pub(crate) const fn index(self) -> usize {
        match self {
            CompareChannel::Output => 0,
            CompareChannel::StopBit => 1,
            CompareChannel::Settling => 2,
            CompareChannel::Query => 3,
        }
    }
}

/// A 16-bit free-running counter at 1 MHz with input capture on the bus
/// receive line and one compare per [`CompareChannel`].
///
/// All methods are called with interrupts of this timer masked; they must not
/// block. The capture channel must latch on both edges.
pub trait CaptureTimer {
    /// Current counter value.
    fn counter(&self) -> u16;

    /// Sets the match value of `channel`. A match raises the compare
    /// interrupt.
    fn set_compare(&mut self, channel: CompareChannel, at: u16);

    fn enable_compare(&mut self, channel: CompareChannel);

    fn disable_compare(&mut self, channel: CompareChannel);

    /// Drives the transmit line. `Level::High` releases the bus.
    fn set_output(&mut self, level: Level);

    /// Bus level at the receive input.
    fn input(&self) -> Level;

    /// Counter value latched at the most recent input edge and the level
    /// after that edge.
    fn capture(&self) -> (u16, Level);
}
