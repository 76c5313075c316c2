//! Phy implementation over a [`CaptureTimer`]

use core::cell::RefCell;

use embassy_sync::blocking_mutex::Mutex;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_time::{Duration, Instant};
use emdali_driver::link::EventSink;
use emdali_driver::phy::{Phy, PhyEvent, TimeoutKind};
use emdali_driver::waveform::{Edge, Level, MAX_TRANSITIONS, Transition, Waveform};
use heapless::Vec;

use crate::hw::{CaptureTimer, CompareChannel};

/// Longest single compare hop. Deadlines further out than the counter horizon
/// are reached in hops so a wrap never passes a match unnoticed.
const MAX_HOP_US: u64 = 32_000;

const fn channel_of(kind: TimeoutKind) -> CompareChannel {
    match kind {
        TimeoutKind::StopBit => CompareChannel::StopBit,
        TimeoutKind::Settling => CompareChannel::Settling,
        TimeoutKind::Query => CompareChannel::Query,
    }
}

const fn kind_of(channel: CompareChannel) -> Option<TimeoutKind> {
    match channel {
        CompareChannel::Output => None,
        CompareChannel::StopBit => Some(TimeoutKind::StopBit),
        CompareChannel::Settling => Some(TimeoutKind::Settling),
        CompareChannel::Query => Some(TimeoutKind::Query),
    }
}

struct Playback {
    transitions: Vec<Transition, MAX_TRANSITIONS>,
    start: Instant,
    next: usize,
}

struct Inner<T: CaptureTimer> {
    timer: T,
    /// `counter - instant ticks`, sampled once at bind
    counter_offset: u16,
    playback: Option<Playback>,
    deadlines: [Option<Instant>; 3],
}

impl<T: CaptureTimer> Inner<T> {
    fn counter_at(&self, instant: Instant) -> u16 {
        (instant.as_ticks() as u16).wrapping_add(self.counter_offset)
    }

    /// Arms `channel` for `deadline`, hopping if it lies beyond the horizon.
    fn arm_hop(&mut self, channel: CompareChannel, deadline: Instant) {
        let now = Instant::now();
        let target = if deadline <= now {
            // Already due; match as soon as the counter moves
            now + Duration::from_micros(2)
        } else {
            deadline.min(now + Duration::from_micros(MAX_HOP_US))
        };
        let at = self.counter_at(target);
        self.timer.set_compare(channel, at);
        self.timer.enable_compare(channel);
    }
}

/// Shared state of one bound timer peripheral
///
/// Place in a `static` and pass to [`bind`].
pub struct State<T: CaptureTimer> {
    inner: Mutex<CriticalSectionRawMutex, RefCell<Option<Inner<T>>>>,
}

impl<T: CaptureTimer> State<T> {
    pub const fn new() -> Self {
        Self {
            inner: Mutex::new(RefCell::new(None)),
        }
    }

    fn with<R>(&self, f: impl FnOnce(&mut Inner<T>) -> R) -> R {
        self.inner.lock(|cell| {
            let mut slot = cell.borrow_mut();
            f(unwrap!(slot.as_mut()))
        })
    }
}

impl<T: CaptureTimer> Default for State<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Splits `timer` into the stack-facing driver and the interrupt-facing
/// handle.
///
/// Panics if `state` is already bound.
pub fn bind<'a, T: CaptureTimer>(
    state: &'a State<T>,
    timer: T,
    sink: EventSink<'a>,
) -> (Driver<'a, T>, Isr<'a, T>) {
    let (instant, counter) = critical_section::with(|_| {
        // sample instant first to avoid underestimation
        (Instant::now(), timer.counter())
    });
    let counter_offset = counter.wrapping_sub(instant.as_ticks() as u16);

    state.inner.lock(|cell| {
        let mut slot = cell.borrow_mut();
        assert!(slot.is_none(), "timer state already bound");
        *slot = Some(Inner {
            timer,
            counter_offset,
            playback: None,
            deadlines: [None; 3],
        });
    });

    (Driver { state }, Isr { state, sink })
}

/// Deferred-context half; implements [`Phy`] for the stack
pub struct Driver<'a, T: CaptureTimer> {
    state: &'a State<T>,
}

impl<T: CaptureTimer> Phy for Driver<'_, T> {
    fn start_waveform(&mut self, start: Instant, waveform: &Waveform) {
        self.state.with(|inner| {
            let mut transitions = Vec::new();
            unwrap!(transitions.extend_from_slice(waveform.transitions()).ok());
            let Some(first) = transitions.first() else {
                return;
            };
            let at = inner.counter_at(start + first.at);
            inner.playback = Some(Playback {
                transitions,
                start,
                next: 0,
            });
            inner.timer.set_compare(CompareChannel::Output, at);
            inner.timer.enable_compare(CompareChannel::Output);
        });
    }

    fn abort_waveform(&mut self) {
        self.state.with(|inner| {
            inner.playback = None;
            inner.timer.disable_compare(CompareChannel::Output);
            inner.timer.set_output(Level::High);
        });
    }

    fn arm_timeout(&mut self, kind: TimeoutKind, at: Instant) {
        self.state.with(|inner| {
            inner.deadlines[kind as usize] = Some(at);
            inner.arm_hop(channel_of(kind), at);
        });
    }

    fn cancel_timeout(&mut self, kind: TimeoutKind) {
        self.state.with(|inner| {
            inner.deadlines[kind as usize] = None;
            inner.timer.disable_compare(channel_of(kind));
        });
    }

    fn line_level(&self) -> Level {
        self.state.with(|inner| inner.timer.input())
    }
}

/// Interrupt-context half
///
/// The peripheral's interrupt handler calls [`Isr::on_capture`] for input
/// edges and [`Isr::on_compare`] for compare matches, after clearing the
/// hardware flags.
pub struct Isr<'a, T: CaptureTimer> {
    state: &'a State<T>,
    sink: EventSink<'a>,
}

impl<T: CaptureTimer> Isr<'_, T> {
    pub fn on_capture(&self) {
        let edge = self.state.with(|inner| {
            let (raw, level) = inner.timer.capture();
            let at = make_timestamp(Instant::now(), raw.wrapping_sub(inner.counter_offset));
            Edge { at, level }
        });
        self.sink.push(PhyEvent::Capture(edge));
    }

    pub fn on_compare(&self, channel: CompareChannel) {
        match kind_of(channel) {
            None => self.advance_playback(),
            Some(kind) => self.check_deadline(kind),
        }
    }

    fn advance_playback(&self) {
        self.state.with(|inner| {
            let Some(playback) = inner.playback.as_mut() else {
                inner.timer.disable_compare(CompareChannel::Output);
                return;
            };
            let transition = playback.transitions[playback.next];
            inner.timer.set_output(transition.level);
            playback.next += 1;
            if let Some(next) = playback.transitions.get(playback.next) {
                let at = playback.start + next.at;
                let at = inner.counter_at(at);
                inner.timer.set_compare(CompareChannel::Output, at);
            } else {
                inner.playback = None;
                inner.timer.disable_compare(CompareChannel::Output);
            }
        });
    }

    fn check_deadline(&self, kind: TimeoutKind) {
        let fired = self.state.with(|inner| {
            let Some(deadline) = inner.deadlines[kind as usize] else {
                inner.timer.disable_compare(channel_of(kind));
                return None;
            };
            if deadline <= Instant::now() {
                inner.deadlines[kind as usize] = None;
                inner.timer.disable_compare(channel_of(kind));
                Some(deadline)
            } else {
                // Intermediate hop; keep going
                inner.arm_hop(channel_of(kind), deadline);
                None
            }
        });
        if let Some(at) = fired {
            self.sink.push(PhyEvent::Timeout { kind, at });
        }
    }
}

/// Make timestamp from counter and epoch instant.
/// The instant of the counter value should lie in `[epoch - u16::MAX, epoch]`.
fn make_timestamp(epoch: Instant, counter: u16) -> Instant {
    let offset = (epoch.as_ticks() as u16).wrapping_sub(counter);
    Instant::from_ticks(epoch.as_ticks().saturating_sub(offset.into()))
}
