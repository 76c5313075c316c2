//! Bit and bus timing of IEC 62386-101
//!
//! All values are in microseconds unless noted otherwise. Receivers compare
//! measured intervals through [`Window::contains`], which widens both bounds by
//! the configured grey-area tolerance to absorb hardware jitter and rise/fall
//! asymmetry.

use crate::Priority;

/// Inclusive microsecond interval, widened on both sides by a grey-area tolerance
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Window {
    pub min_us: u32,
    pub max_us: u32,
}

impl Window {
    pub const fn contains(&self, us: u32, grey_us: u32) -> bool {
        us >= self.min_us.saturating_sub(grey_us) && us <= self.max_us.saturating_add(grey_us)
    }
}

/// Nominal half-bit time Te [1; 8.1.2]
pub const HALF_BIT_NOMINAL_US: u32 = 417;

/// Nominal full-bit time 2Te
pub const FULL_BIT_NOMINAL_US: u32 = 833;

/// Accepted half-bit interval at the receiver [1; 8.2.2]
pub const HALF_BIT: Window = Window {
    min_us: 334,
    max_us: 500,
};

/// Accepted full-bit interval at the receiver [1; 8.2.2]
pub const FULL_BIT: Window = Window {
    min_us: 667,
    max_us: 1000,
};

/// Stop condition: the bus held high at least this long ends a frame [1; 8.1.2]
pub const STOP_CONDITION_US: u32 = 2450;

/// Maximum number of data bits in any frame
pub const MAX_FRAME_BITS: u8 = 32;

/// Low pulse widths that every receiver discards as a destroyed frame [1; 9.3]
///
/// A transmitter that detects a collision stretches one of its low phases into
/// one of these areas so that all contenders abandon the frame together.
pub const DESTROY_AREA_1: Window = Window {
    min_us: 100,
    max_us: 360,
};
pub const DESTROY_AREA_2: Window = Window {
    min_us: 640,
    max_us: 760,
};
/// Destroy area 3 is open-ended: any low pulse of at least this width
pub const DESTROY_AREA_3_MIN_US: u32 = 1300;

/// Break: the bus is held low this long after destroying a collided frame [1; 9.3]
pub const BREAK_MIN_US: u32 = 1200;
pub const BREAK_MAX_US: u32 = 1400;

/// Idle required before retrying a transmission aborted by a collision [1; 9.3]
pub const RECOVERY_MIN_US: u32 = 4000;
pub const RECOVERY_MAX_US: u32 = 4600;

/// Sustained bus low beyond this threshold is a system failure [1; 4.11.1]
pub const BUS_FAILURE_US: u32 = 500_000;

/// Settling before a backward frame, measured from the end of the preceding
/// forward frame [1; 8.1.2]
pub const SETTLING_BACKWARD_MIN_US: u32 = 5500;
pub const SETTLING_BACKWARD_MAX_US: u32 = 10_500;

/// Settling minimum before a forward frame of the given priority, measured
/// from the last observed bus edge [1; 8.1.2]
pub const fn forward_settling_us(priority: Priority) -> u32 {
    match priority {
        Priority::P1 => 13_500,
        Priority::P2 => 14_900,
        Priority::P3 => 16_200,
        Priority::P4 => 17_900,
        Priority::P5 => 19_500,
    }
}

/// Maximum gap between the end of a frame and the end of its send-twice repeat [2; 9.2]
pub const TWICE_WINDOW_US: u32 = 100_000;

/// A query is unanswered when no backward frame has started within this
/// interval after the forward frame completed
pub const NO_ANSWER_US: u32 = SETTLING_BACKWARD_MAX_US + 2 * FULL_BIT.max_us;
