//! PWM and capture peripheral capability interfaces

use emdali_driver::waveform::Level;

/// Timeout compare channels of the capture counter
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum CompareChannel {
    StopBit,
    Settling,
    Query,
}

impl CompareChannel {
    pub(crate) const fn index(self) -> usize {
        match self {
            CompareChannel::StopBit => 0,
            CompareChannel::Settling => 1,
            CompareChannel::Query => 2,
        }
    }
}

/// A buffered PWM generator driving the bus transmit line.
///
/// Each cycle drives the line low for the duty time and releases it for the
/// rest of the period. `load` writes the preload registers: the values take
/// effect at the next update event, which also raises the update interrupt.
/// All methods are called with the peripheral's interrupts masked and must
/// not block.
pub trait WaveformTimer {
    /// Preloads the next cycle; microsecond units.
    fn load(&mut self, period_us: u16, duty_us: u16);

    /// Starts generation with the loaded cycle taking effect immediately.
    fn start(&mut self);

    /// Stops generation and releases the line high.
    fn stop(&mut self);
}

/// A 16-bit free-running counter at 1 MHz with input capture on the bus
/// receive line and one compare per [`CompareChannel`].
pub trait CaptureCounter {
    fn counter(&self) -> u16;

    /// Counter value latched at the most recent input edge and the level
    /// after that edge.
    fn capture(&self) -> (u16, Level);

    /// Bus level at the receive input.
    fn input(&self) -> Level;

    fn set_compare(&mut self, channel: CompareChannel, at: u16);

    fn enable_compare(&mut self, channel: CompareChannel);

    fn disable_compare(&mut self, channel: CompareChannel);
}
