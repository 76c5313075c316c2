//! Transceiver configuration

/// Per-instance tuning of the timing comparisons
///
/// Defaults conform to IEC 62386-101 with no hardware compensation. The grey
/// area widens every timing window on both sides; the skew values compensate
/// the rise/fall asymmetry of the bus driver and receiver stages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub struct Config {
    /// Tolerance added to both bounds of every timing window (µs)
    pub grey_area_us: u32,
    /// Bus drivers rise slower than they fall; scheduled rising transitions
    /// are advanced by this much (µs)
    pub tx_rise_skew_us: u32,
    /// Receiver-side rise delay; measured intervals are corrected by this
    /// much depending on edge direction (µs)
    pub rx_rise_skew_us: u32,
    /// Collision check: a capture closer than this to its scheduled
    /// transition is still propagating and is not judged (µs)
    pub prop_delay_min_us: u32,
    /// Collision check: a capture later than this after its scheduled
    /// transition cannot be our own edge (µs)
    pub prop_delay_max_us: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            grey_area_us: 35,
            tx_rise_skew_us: 0,
            rx_rise_skew_us: 0,
            prop_delay_min_us: 2,
            prop_delay_max_us: 100,
        }
    }
}
