//! Phy implementation over a [`WaveformTimer`] and [`CaptureCounter`]

use core::cell::RefCell;

use embassy_sync::blocking_mutex::Mutex;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_time::{Duration, Instant};
use emdali_driver::link::EventSink;
use emdali_driver::phy::{Phy, PhyEvent, TimeoutKind};
use emdali_driver::waveform::{Edge, Level, Waveform};
use heapless::Vec;

use crate::hw::{CaptureCounter, CompareChannel, WaveformTimer};
use crate::steps::{self, DutyStep, MAX_STEPS};

/// Longest single compare hop. Deadlines further out than the counter horizon
/// are reached in hops so a wrap never passes a match unnoticed.
const MAX_HOP_US: u64 = 32_000;

/// Preloaded after the last data cycle so a repeated cycle cannot re-drive
/// the bus before the stop lands
const IDLE_STEP: DutyStep = DutyStep {
    period_us: 417,
    duty_us: 0,
};

const fn channel_of(kind: TimeoutKind) -> CompareChannel {
    match kind {
        TimeoutKind::StopBit => CompareChannel::StopBit,
        TimeoutKind::Settling => CompareChannel::Settling,
        TimeoutKind::Query => CompareChannel::Query,
    }
}

struct Inner<W: WaveformTimer, C: CaptureCounter> {
    pwm: W,
    counter: C,
    /// `counter - instant ticks`, sampled once at bind
    counter_offset: u16,
    steps: Vec<DutyStep, MAX_STEPS>,
    /// Next step to preload
    next: usize,
    /// Data cycles still to finish before the generator stops
    remaining: usize,
    deadlines: [Option<Instant>; 3],
}

impl<W: WaveformTimer, C: CaptureCounter> Inner<W, C> {
    fn counter_at(&self, instant: Instant) -> u16 {
        (instant.as_ticks() as u16).wrapping_add(self.counter_offset)
    }

    fn arm_hop(&mut self, channel: CompareChannel, deadline: Instant) {
        let now = Instant::now();
        let target = if deadline <= now {
            now + Duration::from_micros(2)
        } else {
            deadline.min(now + Duration::from_micros(MAX_HOP_US))
        };
        let at = self.counter_at(target);
        self.counter.set_compare(channel, at);
        self.counter.enable_compare(channel);
    }
}

/// Shared state of one bound peripheral pair
///
/// Place in a `static` and pass to [`bind`].
pub struct State<W: WaveformTimer, C: CaptureCounter> {
    inner: Mutex<CriticalSectionRawMutex, RefCell<Option<Inner<W, C>>>>,
}

impl<W: WaveformTimer, C: CaptureCounter> State<W, C> {
    pub const fn new() -> Self {
        Self {
            inner: Mutex::new(RefCell::new(None)),
        }
    }

    fn with<R>(&self, f: impl FnOnce(&mut Inner<W, C>) -> R) -> R {
        self.inner.lock(|cell| {
            let mut slot = cell.borrow_mut();
            f(unwrap!(slot.as_mut()))
        })
    }
}

impl<W: WaveformTimer, C: CaptureCounter> Default for State<W, C> {
    fn default() -> Self {
        Self::new()
    }
}

/// Splits the peripherals into the stack-facing driver and the
/// interrupt-facing handle.
///
/// Panics if `state` is already bound.
pub fn bind<'a, W: WaveformTimer, C: CaptureCounter>(
    state: &'a State<W, C>,
    pwm: W,
    counter: C,
    sink: EventSink<'a>,
) -> (Driver<'a, W, C>, Isr<'a, W, C>) {
    let (instant, count) = critical_section::with(|_| {
        // sample instant first to avoid underestimation
        (Instant::now(), counter.counter())
    });
    let counter_offset = count.wrapping_sub(instant.as_ticks() as u16);

    state.inner.lock(|cell| {
        let mut slot = cell.borrow_mut();
        assert!(slot.is_none(), "pwm state already bound");
        *slot = Some(Inner {
            pwm,
            counter,
            counter_offset,
            steps: Vec::new(),
            next: 0,
            remaining: 0,
            deadlines: [None; 3],
        });
    });

    (Driver { state }, Isr { state, sink })
}

/// Deferred-context half; implements [`Phy`] for the stack
pub struct Driver<'a, W: WaveformTimer, C: CaptureCounter> {
    state: &'a State<W, C>,
}

impl<W: WaveformTimer, C: CaptureCounter> Phy for Driver<'_, W, C> {
    /// Begins immediately; the generator cannot hold a programmed start
    /// instant.
    fn start_waveform(&mut self, _start: Instant, waveform: &Waveform) {
        let steps = unwrap!(steps::compile(waveform).ok());
        if steps.is_empty() {
            return;
        }
        self.state.with(|inner| {
            inner.remaining = steps.len();
            inner.pwm.load(steps[0].period_us, steps[0].duty_us);
            inner.pwm.start();
            // Preload the cycle after the active one
            match steps.get(1) {
                Some(step) => {
                    inner.pwm.load(step.period_us, step.duty_us);
                    inner.next = 2;
                }
                None => {
                    inner.pwm.load(IDLE_STEP.period_us, IDLE_STEP.duty_us);
                    inner.next = 1;
                }
            }
            inner.steps = steps;
        });
    }

    fn abort_waveform(&mut self) {
        self.state.with(|inner| {
            inner.pwm.stop();
            inner.steps.clear();
            inner.remaining = 0;
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
            inner.counter.disable_compare(channel_of(kind));
        });
    }

    fn line_level(&self) -> Level {
        self.state.with(|inner| inner.counter.input())
    }
}

/// Interrupt-context half
///
/// The PWM update handler calls [`Isr::on_update`]; the capture counter's
/// handler calls [`Isr::on_capture`] for input edges and [`Isr::on_compare`]
/// for compare matches, after clearing the hardware flags.
pub struct Isr<'a, W: WaveformTimer, C: CaptureCounter> {
    state: &'a State<W, C>,
    sink: EventSink<'a>,
}

impl<W: WaveformTimer, C: CaptureCounter> Isr<'_, W, C> {
    /// One cycle finished; the preloaded one just became active.
    pub fn on_update(&self) {
        self.state.with(|inner| {
            if inner.remaining == 0 {
                return;
            }
            inner.remaining -= 1;
            if inner.remaining == 0 {
                inner.pwm.stop();
                inner.steps.clear();
                return;
            }
            match inner.steps.get(inner.next) {
                Some(step) => {
                    let (period, duty) = (step.period_us, step.duty_us);
                    inner.pwm.load(period, duty);
                    inner.next += 1;
                }
                // Past the end: keep the released idle cycle loaded
                None => inner.pwm.load(IDLE_STEP.period_us, IDLE_STEP.duty_us),
            }
        });
    }

    pub fn on_capture(&self) {
        let edge = self.state.with(|inner| {
            let (raw, level) = inner.counter.capture();
            let at = make_timestamp(Instant::now(), raw.wrapping_sub(inner.counter_offset));
            Edge { at, level }
        });
        self.sink.push(PhyEvent::Capture(edge));
    }

    pub fn on_compare(&self, channel: CompareChannel) {
        let kind = match channel {
            CompareChannel::StopBit => TimeoutKind::StopBit,
            CompareChannel::Settling => TimeoutKind::Settling,
            CompareChannel::Query => TimeoutKind::Query,
        };
        let fired = self.state.with(|inner| {
            let Some(deadline) = inner.deadlines[kind as usize] else {
                inner.counter.disable_compare(channel);
                return None;
            };
            if deadline <= Instant::now() {
                inner.deadlines[kind as usize] = None;
                inner.counter.disable_compare(channel);
                Some(deadline)
            } else {
                inner.arm_hop(channel, deadline);
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
