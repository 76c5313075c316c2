//! Transmit-side collision detection
//!
//! While a slot drives the bus, every captured edge is matched against the
//! scheduled waveform. An edge is our own echo when it lands within the
//! propagation-delay band after a scheduled transition and carries that
//! transition's level. Anything else means another transmitter is on the
//! wire: a wrong level (the bus is wired-AND, a foreign low wins over our
//! high) or an edge where nothing was scheduled.

use embassy_time::Instant;

use crate::config::Config;
use crate::core::timing;
use crate::waveform::{Edge, Waveform};

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub(crate) enum Verdict {
    /// The echo of a transition we scheduled
    Own,
    Collision {
        /// Collisions inside the start bit abort without a destroy; nobody
        /// has decoded data yet
        in_start_bit: bool,
    },
}

/// Judges a captured edge against the waveform being driven since
/// `started_at`.
pub(crate) fn judge(
    edge: Edge,
    started_at: Instant,
    waveform: &Waveform,
    config: &Config,
) -> Verdict {
    let Some(offset) = edge.at.checked_duration_since(started_at) else {
        // Captured before we started driving: the bus was not ours
        return Verdict::Collision { in_start_bit: true };
    };
    let in_start_bit = offset.as_micros() <= timing::FULL_BIT_NOMINAL_US as u64 + 1;

    let Some(scheduled) = waveform.last_transition_before(offset) else {
        return Verdict::Collision { in_start_bit };
    };

    let delay_us = (offset - scheduled.at).as_micros().min(u32::MAX as u64) as u32;
    if delay_us < config.prop_delay_min_us {
        // Still inside the driver's own propagation; not judged
        return Verdict::Own;
    }
    if delay_us > config.prop_delay_max_us.saturating_add(config.grey_area_us) {
        return Verdict::Collision { in_start_bit };
    }
    if edge.level == scheduled.level {
        Verdict::Own
    } else {
        Verdict::Collision { in_start_bit }
    }
}
