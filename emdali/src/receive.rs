//! Bi-phase receive state machine
//!
//! Decoding is driven by the interval between consecutive captured edges. A
//! half-bit interval after a mid-bit transition is a bit boundary and repeats
//! the previous bit; a full-bit interval is the next mid-bit transition and
//! toggles it. Any interval outside both windows poisons the frame until the
//! stop condition, where it is delivered as `Corrupt`. Low pulses stretched
//! into a destroy area fall outside the windows and take the same path, so
//! destroyed frames need no separate detection.
//!
//! Frames are delivered exclusively from the stop-bit timeout, never from an
//! edge: only the stop condition proves that the bit count is final.

use embassy_time::{Duration, Instant};

use crate::config::Config;
use crate::core::{EventKind, Frame, timing};
use crate::waveform::{Edge, Level};

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub(crate) enum RxStatus {
    Idle,
    StartBitFirstHalf,
    StartBitSecondHalf,
    /// A bit boundary was seen; its value is already appended, the mid-bit
    /// transition is still outstanding
    DataBitFirstHalf,
    DataBitSecondHalf,
    /// Invalid interval observed; sticky until the stop condition
    ErrorInFrame,
    /// A local slot is transmitting a frame; edges pass through undecoded
    StopTransmission,
    /// A local slot is transmitting the destroy waveform
    DestroyFrame,
    /// Bus low past the stop condition, failure deadline armed
    BusLow,
    /// Bus low past the failure threshold
    BusFailureDetect,
}

/// What the stop-bit timeout concluded
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum StopOutcome {
    /// A decoded frame or bus event to hand to the application
    Deliver(Frame),
    /// Keep watching: re-arm the stop-bit compare at this instant
    Rearm(Instant),
    /// The local transmission completed
    TxDone,
    /// The local destroy waveform completed
    DestroyDone,
    Ignore,
}

/// One previously delivered frame, kept for send-twice pairing
#[derive(Debug, Copy, Clone)]
struct Delivered {
    kind: EventKind,
    data: u32,
    end: Instant,
}

pub(crate) struct Receiver {
    status: RxStatus,
    /// Skew-corrected timestamp of the previous edge
    last_edge: Option<Instant>,
    /// Uncorrected timestamp of the last falling edge
    low_since: Instant,
    data: u32,
    bits: u8,
    last_bit: bool,
    history: Option<Delivered>,
    last_frame_end: Option<Instant>,
}

impl Receiver {
    pub(crate) const fn new() -> Self {
        Self {
            status: RxStatus::Idle,
            last_edge: None,
            low_since: Instant::from_ticks(0),
            data: 0,
            bits: 0,
            last_bit: false,
            history: None,
            last_frame_end: None,
        }
    }

    pub(crate) fn status(&self) -> RxStatus {
        self.status
    }

    /// A remote frame is currently on the wire
    pub(crate) fn receiving(&self) -> bool {
        matches!(
            self.status,
            RxStatus::StartBitFirstHalf
                | RxStatus::StartBitSecondHalf
                | RxStatus::DataBitFirstHalf
                | RxStatus::DataBitSecondHalf
                | RxStatus::ErrorInFrame
        )
    }

    pub(crate) fn bus_failed(&self) -> bool {
        matches!(self.status, RxStatus::BusLow | RxStatus::BusFailureDetect)
    }

    /// End of the most recent complete frame, local or remote. Backward
    /// settling is measured from here.
    pub(crate) fn last_frame_end(&self) -> Option<Instant> {
        self.last_frame_end
    }

    /// Switches edge processing to pass-through while a local slot drives the
    /// bus. Collision checking happens outside the receiver.
    pub(crate) fn set_transmitting(&mut self, destroy: bool) {
        self.status = if destroy {
            RxStatus::DestroyFrame
        } else {
            RxStatus::StopTransmission
        };
    }

    /// Marks whatever is on the wire as lost; the eventual stop condition
    /// delivers it as `Corrupt`.
    pub(crate) fn poison(&mut self) {
        self.status = RxStatus::ErrorInFrame;
    }

    pub(crate) fn reset(&mut self) {
        self.status = RxStatus::Idle;
        self.data = 0;
        self.bits = 0;
    }

    pub(crate) fn on_edge(&mut self, edge: Edge, config: &Config) {
        // The receiver input reports rising edges late by the opto/driver
        // recovery time; shift them back so intervals compare cleanly
        let at = match edge.level {
            Level::High => edge
                .at
                .checked_sub(Duration::from_micros(config.rx_rise_skew_us as u64))
                .unwrap_or(edge.at),
            Level::Low => edge.at,
        };
        let delta_us = match self.last_edge {
            Some(prev) => (at - prev).as_micros().min(u32::MAX as u64) as u32,
            None => u32::MAX,
        };
        let half = timing::HALF_BIT.contains(delta_us, config.grey_area_us);
        let full = timing::FULL_BIT.contains(delta_us, config.grey_area_us);

        self.status = match self.status {
            RxStatus::Idle | RxStatus::BusFailureDetect => match edge.level {
                Level::Low => {
                    self.data = 0;
                    self.bits = 0;
                    self.last_bit = true;
                    RxStatus::StartBitFirstHalf
                }
                Level::High => RxStatus::Idle,
            },
            RxStatus::StartBitFirstHalf => {
                if half {
                    RxStatus::StartBitSecondHalf
                } else {
                    RxStatus::ErrorInFrame
                }
            }
            RxStatus::StartBitSecondHalf | RxStatus::DataBitSecondHalf => {
                if half {
                    // Bit boundary: the next bit repeats; appended now,
                    // confirmed by its mid-bit transition
                    if self.append(self.last_bit) {
                        RxStatus::DataBitFirstHalf
                    } else {
                        RxStatus::ErrorInFrame
                    }
                } else if full {
                    self.last_bit = !self.last_bit;
                    if self.append(self.last_bit) {
                        RxStatus::DataBitSecondHalf
                    } else {
                        RxStatus::ErrorInFrame
                    }
                } else {
                    RxStatus::ErrorInFrame
                }
            }
            RxStatus::DataBitFirstHalf => {
                if half {
                    RxStatus::DataBitSecondHalf
                } else {
                    RxStatus::ErrorInFrame
                }
            }
            RxStatus::ErrorInFrame => RxStatus::ErrorInFrame,
            // The long low pulse ended; whatever it belonged to is lost
            RxStatus::BusLow => RxStatus::ErrorInFrame,
            RxStatus::StopTransmission => RxStatus::StopTransmission,
            RxStatus::DestroyFrame => RxStatus::DestroyFrame,
        };

        self.last_edge = Some(at);
        if edge.level == Level::Low {
            self.low_since = edge.at;
        }
    }

    /// Handles the stop-bit compare firing at `now` with the bus at `line`.
    pub(crate) fn on_stop_timeout(&mut self, now: Instant, line: Level) -> StopOutcome {
        if line == Level::Low {
            let deadline =
                self.low_since + Duration::from_micros(timing::BUS_FAILURE_US as u64);
            return match self.status {
                RxStatus::BusLow => {
                    self.status = RxStatus::BusFailureDetect;
                    StopOutcome::Deliver(unwrap!(Frame::bus_event(EventKind::BusFailure)))
                }
                RxStatus::BusFailureDetect => StopOutcome::Ignore,
                // A transmitted destroy holds the bus low past the stop
                // condition; keep the pass-through status while watching for
                // a stuck bus underneath
                RxStatus::StopTransmission | RxStatus::DestroyFrame => {
                    if now >= deadline {
                        self.status = RxStatus::BusFailureDetect;
                        StopOutcome::Deliver(unwrap!(Frame::bus_event(EventKind::BusFailure)))
                    } else {
                        StopOutcome::Rearm(deadline)
                    }
                }
                _ => {
                    self.status = RxStatus::BusLow;
                    StopOutcome::Rearm(deadline)
                }
            };
        }

        match self.status {
            RxStatus::Idle => StopOutcome::Deliver(unwrap!(Frame::bus_event(EventKind::BusIdle))),
            RxStatus::StopTransmission => {
                self.status = RxStatus::Idle;
                self.last_frame_end = self.last_edge;
                StopOutcome::TxDone
            }
            RxStatus::DestroyFrame => {
                self.status = RxStatus::Idle;
                StopOutcome::DestroyDone
            }
            RxStatus::ErrorInFrame => {
                self.status = RxStatus::Idle;
                StopOutcome::Deliver(unwrap!(Frame::bus_event(EventKind::Corrupt)))
            }
            RxStatus::StartBitFirstHalf | RxStatus::StartBitSecondHalf => {
                self.status = RxStatus::Idle;
                StopOutcome::Deliver(unwrap!(Frame::bus_event(EventKind::Corrupt)))
            }
            RxStatus::DataBitFirstHalf | RxStatus::DataBitSecondHalf => {
                // The trailing release edge of a frame ending in a 0 bit looks
                // like a bit boundary; drop that speculative append
                if self.status == RxStatus::DataBitFirstHalf {
                    self.bits -= 1;
                    self.data >>= 1;
                }
                self.status = RxStatus::Idle;
                self.deliver()
            }
            RxStatus::BusLow | RxStatus::BusFailureDetect => StopOutcome::Ignore,
        }
    }

    fn deliver(&mut self) -> StopOutcome {
        let kind = EventKind::from_bit_count(self.bits);
        if kind == EventKind::Corrupt {
            return StopOutcome::Deliver(unwrap!(Frame::bus_event(EventKind::Corrupt)));
        }

        let end = unwrap!(self.last_edge);
        self.last_frame_end = Some(end);
        let mut frame = unwrap!(Frame::new(kind, self.data));

        // Send-twice pairing: forward frames only, and each repeat pairs with
        // the frame immediately before it [2; 9.2]
        let pairable = matches!(
            kind,
            EventKind::Gear | EventKind::Device | EventKind::Firmware
        );
        let is_repeat = pairable
            && self.history.is_some_and(|prev| {
                prev.kind == kind
                    && prev.data == self.data
                    && end - prev.end
                        <= Duration::from_micros(timing::TWICE_WINDOW_US as u64)
            });
        if is_repeat {
            frame = frame.into_twice();
            self.history = None;
        } else if pairable {
            self.history = Some(Delivered {
                kind,
                data: self.data,
                end,
            });
        }

        StopOutcome::Deliver(frame)
    }

    fn append(&mut self, bit: bool) -> bool {
        if self.bits >= timing::MAX_FRAME_BITS {
            return false;
        }
        self.data = self.data << 1 | bit as u32;
        self.bits += 1;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encode::encode;
    use crate::waveform::Waveform;

    fn at(us: u64) -> Instant {
        Instant::from_micros(us)
    }

    fn edge(us: u64, level: Level) -> Edge {
        Edge {
            at: at(us),
            level,
        }
    }

    /// Feeds a transmit schedule back as captured edges and fires the stop
    /// timeout; returns the outcome.
    fn play(rx: &mut Receiver, wf: &Waveform, start_us: u64, config: &Config) -> StopOutcome {
        let mut last = start_us;
        for t in wf.transitions() {
            last = start_us + t.at.as_micros();
            rx.on_edge(edge(last, t.level), config);
        }
        rx.on_stop_timeout(at(last + 2450), Level::High)
    }

    #[test]
    fn test_round_trip_all_lengths() {
        let config = Config::default();
        let frames = [
            Frame::backward(0xa5),
            Frame::gear(0x1234),
            Frame::device(0xabcdef).unwrap(),
            Frame::firmware(0xdead_beef),
        ];
        for frame in frames {
            let wf = encode(&frame, Level::High, &config).unwrap();
            let mut rx = Receiver::new();
            assert_eq!(
                play(&mut rx, &wf, 10_000, &config),
                StopOutcome::Deliver(frame),
                "{frame:?}"
            );
            assert_eq!(rx.status(), RxStatus::Idle);
            assert!(rx.last_frame_end().is_some());
        }
    }

    #[test]
    fn test_half_bit_window_bounds() {
        let config = Config {
            grey_area_us: 0,
            ..Config::default()
        };
        for (delta, ok) in [(334, true), (500, true), (333, false), (501, false)] {
            let mut rx = Receiver::new();
            rx.on_edge(edge(1000, Level::Low), &config);
            rx.on_edge(edge(1000 + delta, Level::High), &config);
            let expect = if ok {
                RxStatus::StartBitSecondHalf
            } else {
                RxStatus::ErrorInFrame
            };
            assert_eq!(rx.status(), expect, "delta {delta}");
        }
    }

    #[test]
    fn test_grey_area_widens_windows() {
        let config = Config {
            grey_area_us: 10,
            ..Config::default()
        };
        let mut rx = Receiver::new();
        rx.on_edge(edge(1000, Level::Low), &config);
        rx.on_edge(edge(1000 + 329, Level::High), &config);
        assert_eq!(rx.status(), RxStatus::StartBitSecondHalf);
    }

    #[test]
    fn test_invalid_frame_is_delivered_corrupt() {
        let config = Config::default();
        let mut rx = Receiver::new();
        rx.on_edge(edge(0, Level::Low), &config);
        rx.on_edge(edge(600, Level::High), &config);
        assert_eq!(rx.status(), RxStatus::ErrorInFrame);
        assert_eq!(
            rx.on_stop_timeout(at(600 + 2450), Level::High),
            StopOutcome::Deliver(Frame::bus_event(EventKind::Corrupt).unwrap())
        );
        assert_eq!(rx.status(), RxStatus::Idle);
    }

    #[test]
    fn test_bit_overflow_is_corrupt() {
        let config = Config::default();
        let mut rx = Receiver::new();
        // Start bit, then 33 alternating data bits as pure mid-bit transitions
        rx.on_edge(edge(0, Level::Low), &config);
        rx.on_edge(edge(417, Level::High), &config);
        let mut t = 417;
        let mut level = Level::High;
        for _ in 0..33 {
            t += 834;
            level = !level;
            rx.on_edge(edge(t, level), &config);
        }
        assert_eq!(rx.status(), RxStatus::ErrorInFrame);
        assert_eq!(
            rx.on_stop_timeout(at(t + 2450), Level::High),
            StopOutcome::Deliver(Frame::bus_event(EventKind::Corrupt).unwrap())
        );
    }

    #[test]
    fn test_twice_detection() {
        let config = Config::default();
        // Every forward length pairs, 16-bit gear through 32-bit firmware
        for frame in [
            Frame::gear(0x1234),
            Frame::device(0xabcdef).unwrap(),
            Frame::firmware(0xdead_beef),
        ] {
            let wf = encode(&frame, Level::High, &config).unwrap();
            let mut rx = Receiver::new();

            assert_eq!(
                play(&mut rx, &wf, 0, &config),
                StopOutcome::Deliver(frame),
                "{frame:?}"
            );
            // Repeat well inside the pairing window
            assert_eq!(
                play(&mut rx, &wf, 40_000, &config),
                StopOutcome::Deliver(frame.into_twice()),
                "{frame:?}"
            );
            // A third identical frame starts a new pair
            assert_eq!(
                play(&mut rx, &wf, 80_000, &config),
                StopOutcome::Deliver(frame),
                "{frame:?}"
            );
        }
    }

    #[test]
    fn test_twice_rejects_late_repeat() {
        let config = Config::default();
        let frame = Frame::gear(0x1234);
        let wf = encode(&frame, Level::High, &config).unwrap();
        let mut rx = Receiver::new();

        assert_eq!(play(&mut rx, &wf, 0, &config), StopOutcome::Deliver(frame));
        // Ends more than 100 ms after the first frame ended
        assert_eq!(
            play(&mut rx, &wf, 120_000, &config),
            StopOutcome::Deliver(frame)
        );
    }

    #[test]
    fn test_twice_rejects_different_payload() {
        let config = Config::default();
        let mut rx = Receiver::new();
        let first = Frame::gear(0x1234);
        let second = Frame::gear(0x1235);
        let wf1 = encode(&first, Level::High, &config).unwrap();
        let wf2 = encode(&second, Level::High, &config).unwrap();

        assert_eq!(play(&mut rx, &wf1, 0, &config), StopOutcome::Deliver(first));
        assert_eq!(
            play(&mut rx, &wf2, 40_000, &config),
            StopOutcome::Deliver(second)
        );
    }

    #[test]
    fn test_backward_frames_do_not_pair() {
        let config = Config::default();
        let frame = Frame::backward(0xff);
        let wf = encode(&frame, Level::High, &config).unwrap();
        let mut rx = Receiver::new();

        assert_eq!(play(&mut rx, &wf, 0, &config), StopOutcome::Deliver(frame));
        assert_eq!(
            play(&mut rx, &wf, 30_000, &config),
            StopOutcome::Deliver(frame)
        );
    }

    #[test]
    fn test_bus_idle_on_quiet_timeout() {
        let mut rx = Receiver::new();
        assert_eq!(
            rx.on_stop_timeout(at(2450), Level::High),
            StopOutcome::Deliver(Frame::bus_event(EventKind::BusIdle).unwrap())
        );
        assert_eq!(rx.status(), RxStatus::Idle);
    }

    #[test]
    fn test_bus_failure_path() {
        let config = Config::default();
        let mut rx = Receiver::new();
        rx.on_edge(edge(0, Level::Low), &config);

        // Stop condition elapses with the bus still low
        assert_eq!(
            rx.on_stop_timeout(at(2450), Level::Low),
            StopOutcome::Rearm(at(500_000))
        );
        assert_eq!(rx.status(), RxStatus::BusLow);
        assert!(rx.bus_failed());

        // Failure deadline elapses
        assert_eq!(
            rx.on_stop_timeout(at(500_000), Level::Low),
            StopOutcome::Deliver(Frame::bus_event(EventKind::BusFailure).unwrap())
        );
        assert_eq!(rx.status(), RxStatus::BusFailureDetect);

        // Bus recovers
        rx.on_edge(edge(600_000, Level::High), &config);
        assert_eq!(rx.status(), RxStatus::Idle);
        assert!(!rx.bus_failed());
    }

    #[test]
    fn test_long_low_pulse_is_corrupt() {
        let config = Config::default();
        let mut rx = Receiver::new();
        rx.on_edge(edge(0, Level::Low), &config);
        assert_eq!(
            rx.on_stop_timeout(at(2450), Level::Low),
            StopOutcome::Rearm(at(500_000))
        );
        // The low ends before the failure threshold
        rx.on_edge(edge(3000, Level::High), &config);
        assert_eq!(rx.status(), RxStatus::ErrorInFrame);
        assert_eq!(
            rx.on_stop_timeout(at(3000 + 2450), Level::High),
            StopOutcome::Deliver(Frame::bus_event(EventKind::Corrupt).unwrap())
        );
    }

    #[test]
    fn test_transmit_passthrough() {
        let config = Config::default();
        let frame = Frame::gear(0xffff);
        let wf = encode(&frame, Level::High, &config).unwrap();
        let mut rx = Receiver::new();
        rx.set_transmitting(false);

        // Own edges are observed but not decoded
        assert_eq!(play(&mut rx, &wf, 0, &config), StopOutcome::TxDone);
        assert_eq!(rx.status(), RxStatus::Idle);
        assert!(rx.last_frame_end().is_some());
    }

    #[test]
    fn test_destroy_passthrough() {
        let config = Config::default();
        let mut rx = Receiver::new();
        rx.set_transmitting(true);
        rx.on_edge(edge(0, Level::Low), &config);
        // The destroy low phase outlasts the stop condition; the watch is
        // pushed out to the failure deadline without losing the status
        assert_eq!(
            rx.on_stop_timeout(at(2450), Level::Low),
            StopOutcome::Rearm(at(500_000))
        );
        assert_eq!(rx.status(), RxStatus::DestroyFrame);
        rx.on_edge(edge(2670, Level::High), &config);
        assert_eq!(
            rx.on_stop_timeout(at(2670 + 2450), Level::High),
            StopOutcome::DestroyDone
        );
    }
}
