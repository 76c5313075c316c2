//! Waveform to duty-cycle compiler
//!
//! A transmit waveform always alternates low/high starting low (the bus
//! idles released) and ends released, so it decomposes into low/high pairs.
//! Each pair becomes one PWM cycle: low for the duty time, released until
//! the next pair begins. The final cycle gets a half-bit released tail so
//! the generator has a defined end.

use embassy_time::Duration;
use emdali_driver::waveform::{Level, MAX_TRANSITIONS, Waveform};
use heapless::Vec;

/// One PWM cycle: low for `duty_us`, released for the rest
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub(crate) struct DutyStep {
    pub period_us: u16,
    pub duty_us: u16,
}

pub(crate) const MAX_STEPS: usize = MAX_TRANSITIONS / 2 + 1;

/// Released tail appended to the final cycle
const TAIL_US: u16 = 417;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub(crate) enum StepError {
    /// The waveform does not start by driving low or does not end released
    Shape,
    /// An offset exceeds the 16-bit microsecond range
    Range,
}

pub(crate) fn compile(waveform: &Waveform) -> Result<Vec<DutyStep, MAX_STEPS>, StepError> {
    let transitions = waveform.transitions();
    let mut steps = Vec::new();
    if transitions.is_empty() {
        return Ok(steps);
    }
    if transitions.first().is_some_and(|t| t.level != Level::Low)
        || transitions.last().is_some_and(|t| t.level != Level::High)
    {
        return Err(StepError::Shape);
    }

    for pair in transitions.chunks(2) {
        let [low, high] = pair else {
            return Err(StepError::Shape);
        };
        let duty_us = offset_us(high.at - low.at)?;
        let next_at = transitions
            .iter()
            .find(|t| t.at > high.at && t.level == Level::Low)
            .map(|t| t.at);
        let period_us = match next_at {
            Some(at) => offset_us(at - low.at)?,
            None => duty_us + TAIL_US,
        };
        // The push cannot overflow: capacity covers a full-length waveform
        unwrap!(steps.push(DutyStep { period_us, duty_us }).ok());
    }
    Ok(steps)
}

fn offset_us(duration: Duration) -> Result<u16, StepError> {
    u16::try_from(duration.as_micros()).map_err(|_| StepError::Range)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn us(value: u64) -> Duration {
        Duration::from_micros(value)
    }

    fn waveform(transitions: &[(u64, Level)]) -> Waveform {
        let mut wf = Waveform::new();
        for &(at, level) in transitions {
            wf.push(us(at), level).unwrap();
        }
        wf
    }

    #[test]
    fn test_all_ones_bit_pattern() {
        // Three 1-bits: each a low half followed by a high half
        let wf = waveform(&[
            (0, Level::Low),
            (417, Level::High),
            (834, Level::Low),
            (1251, Level::High),
            (1668, Level::Low),
            (2085, Level::High),
        ]);
        let steps = compile(&wf).unwrap();
        assert_eq!(
            steps.as_slice(),
            [
                DutyStep { period_us: 834, duty_us: 417 },
                DutyStep { period_us: 834, duty_us: 417 },
                DutyStep { period_us: 834, duty_us: 417 },
            ]
        );
    }

    #[test]
    fn test_boundary_gap_stretches_period() {
        // 1-bit, then a 0-bit: the released stretch between the pairs lands
        // in the first cycle's period
        let wf = waveform(&[
            (0, Level::Low),
            (417, Level::High),
            (1251, Level::Low),
            (1668, Level::High),
        ]);
        let steps = compile(&wf).unwrap();
        assert_eq!(
            steps.as_slice(),
            [
                DutyStep { period_us: 1251, duty_us: 417 },
                DutyStep { period_us: 417 + 417, duty_us: 417 },
            ]
        );
    }

    #[test]
    fn test_destroy_pulse() {
        let wf = waveform(&[(0, Level::Low), (2670, Level::High)]);
        let steps = compile(&wf).unwrap();
        assert_eq!(
            steps.as_slice(),
            [DutyStep {
                period_us: 2670 + 417,
                duty_us: 2670,
            }]
        );
    }

    #[test]
    fn test_empty_waveform() {
        assert!(compile(&Waveform::new()).unwrap().is_empty());
    }

    #[test]
    fn test_rejects_high_first() {
        let wf = waveform(&[(0, Level::High)]);
        assert_eq!(compile(&wf), Err(StepError::Shape));
    }

    #[test]
    fn test_rejects_low_tail() {
        let wf = waveform(&[(0, Level::Low), (417, Level::High), (834, Level::Low)]);
        assert_eq!(compile(&wf), Err(StepError::Shape));
    }
}
