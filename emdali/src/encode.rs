//! Bi-phase transmit waveform synthesis
//!
//! Every bit occupies two half-bit phases: a logical 1 drives low then high, a
//! logical 0 drives high then low [1; 8.1.2]. The mid-bit transition is always
//! present; a transition at the bit boundary occurs only when the new bit
//! repeats the previous one. The synthesized schedule therefore alternates
//! half-bit and full-bit phases exactly as the receiver's timing windows
//! expect.

use embassy_time::Duration;

use crate::config::Config;
use crate::core::{EventKind, Frame, timing};
use crate::waveform::{Level, Waveform};

#[derive(Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub(crate) struct InvalidFrame;

/// Synthesizes the output schedule for `frame`, seeded with the line level
/// left by the previous transmission.
///
/// Kinds without a bit length produce an empty schedule (a no-op send).
/// `Corrupt` is reserved for the collision path ([`destroy_waveform`]) and is
/// not encodable from user data.
pub(crate) fn encode(
    frame: &Frame,
    prior: Level,
    config: &Config,
) -> Result<Waveform, InvalidFrame> {
    let bits = match frame.kind() {
        EventKind::Corrupt => return Err(InvalidFrame),
        kind => match kind.bit_length() {
            Some(bits) => bits,
            None => return Ok(Waveform::new()),
        },
    };

    let half = Duration::from_micros(timing::HALF_BIT_NOMINAL_US as u64);
    let mut wf = Waveform::new();
    let mut level = prior;
    let mut t = Duration::from_micros(0);

    // Start bit is a fixed 1, then payload MSB-first
    for i in 0..=bits {
        let bit = i == 0 || frame.data() >> (bits - i) & 1 == 1;
        let first = if bit { Level::Low } else { Level::High };
        if level != first {
            push(&mut wf, t, first, config);
        }
        push(&mut wf, t + half, !first, config);
        level = !first;
        t += half + half;
    }

    // Stop phase: release high; the trailing entry is absorbed into the hold
    // so the schedule ends without an extra transition
    if level == Level::Low {
        push(&mut wf, t, Level::High, config);
    }
    let end = t + Duration::from_micros(timing::STOP_CONDITION_US as u64);
    let last_at = unwrap!(wf.transitions().last()).at;
    wf.set_hold(end - last_at);

    Ok(wf)
}

/// In-band corruption signal driven after a detected collision
///
/// One low phase stretched past destroy area 3, continued through the break,
/// so that every contending transmitter discards the frame and restarts from
/// the same settling baseline [1; 9.3].
pub(crate) fn destroy_waveform(config: &Config) -> Waveform {
    let destroy = timing::DESTROY_AREA_3_MIN_US + 2 * config.grey_area_us;
    let break_us = (timing::BREAK_MIN_US + timing::BREAK_MAX_US) / 2;

    let mut wf = Waveform::new();
    unwrap!(wf.push(Duration::from_micros(0), Level::Low));
    unwrap!(wf.push(Duration::from_micros((destroy + break_us) as u64), Level::High));
    wf.set_hold(Duration::from_micros(timing::STOP_CONDITION_US as u64));
    wf
}

fn push(wf: &mut Waveform, at: Duration, level: Level, config: &Config) {
    // The driver stage rises slower than it falls; advance rising transitions
    let at = match level {
        Level::High => at
            .checked_sub(Duration::from_micros(config.tx_rise_skew_us as u64))
            .unwrap_or(Duration::from_micros(0)),
        Level::Low => at,
    };
    unwrap!(wf.push(at, level));
}
