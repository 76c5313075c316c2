//! Transceiver context, user port and background runner
//!
//! A [`Transceiver`] owns all per-bus state. [`Transceiver::split`] hands out
//! the three faces of it: a [`Port`] for the application, an
//! [`EventSink`](crate::link::EventSink) for the back-end interrupt half, and
//! the [`Runner`] that must be polled for the bus to operate.

use core::cell::RefCell;

use embassy_futures::select::{Either, select};
use embassy_sync::blocking_mutex::Mutex;
use embassy_sync::blocking_mutex::raw::RawMutex;
use embassy_sync::channel::{Channel, DynamicReceiver};
use embassy_sync::signal::Signal;
use embassy_time::{Duration, Instant, with_timeout};

use crate::arbiter::{Arbiter, Decision, SlotKind, TxRequest};
use crate::collision::{self, Verdict};
use crate::config::Config;
use crate::core::{EventKind, Frame, Priority, timing};
use crate::encode;
use crate::link::EventSink;
use crate::phy::{Phy, PhyEvent, TimeoutKind};
use crate::receive::{Receiver, StopOutcome};
use crate::waveform::{Edge, Level, Waveform};

pub use crate::arbiter::SendError;

/// `Port::receive` timed out with the queue empty
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct NoFrameAvailable;

/// Capacity of the phy event queue. Sized for a full frame worth of captures
/// in flight plus the three compares.
const EVENT_QUEUE_DEPTH: usize = 16;

struct Shared {
    arbiter: Arbiter,
    rx_overflow: u32,
    abort: bool,
}

/// DALI bus transceiver state
///
/// `RX_DEPTH` bounds the decoded-frame queue; when the application does not
/// drain it in time further frames are dropped and counted, never blocking
/// the bus.
pub struct Transceiver<M: RawMutex, const RX_DEPTH: usize = 8> {
    config: Config,
    events: Channel<M, PhyEvent, EVENT_QUEUE_DEPTH>,
    frames: Channel<M, Frame, RX_DEPTH>,
    kick: Signal<M, ()>,
    shared: Mutex<M, RefCell<Shared>>,
}

trait DynamicPort {
    fn send(&self, frame: Frame, priority: u8, is_query: bool) -> Result<(), SendError>;
    fn abort(&self);
    fn rx_overflow(&self) -> u32;
}

impl<M: RawMutex + Sync, const RX_DEPTH: usize> Transceiver<M, RX_DEPTH> {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            events: Channel::new(),
            frames: Channel::new(),
            kick: Signal::new(),
            shared: Mutex::new(RefCell::new(Shared {
                arbiter: Arbiter::new(),
                rx_overflow: 0,
                abort: false,
            })),
        }
    }

    /// Splits the transceiver into its application, interrupt and runner
    /// faces. `backend` is the deferred-context half of the bus peripheral.
    pub fn split<B: Phy>(
        &mut self,
        backend: B,
    ) -> (Port<'_>, EventSink<'_>, Runner<'_, M, B, RX_DEPTH>) {
        let this = &*self;
        let port = Port {
            state: this,
            frames: this.frames.dyn_receiver(),
        };
        let sink = EventSink::new(this);
        let runner = Runner {
            state: this,
            backend,
            receiver: Receiver::new(),
            tx: None,
            last_edge: None,
            pending_query: false,
        };
        (port, sink, runner)
    }

    fn with_shared<R>(&self, f: impl FnOnce(&mut Shared) -> R) -> R {
        self.shared.lock(|cell| f(&mut cell.borrow_mut()))
    }
}

impl<M: RawMutex, const RX_DEPTH: usize> emdali_driver::internal::DynamicEventSink
    for Transceiver<M, RX_DEPTH>
{
    fn try_push(&self, event: PhyEvent) -> bool {
        self.events.try_send(event).is_ok()
    }
}

impl<M: RawMutex + Sync, const RX_DEPTH: usize> DynamicPort for Transceiver<M, RX_DEPTH> {
    fn send(&self, frame: Frame, priority: u8, is_query: bool) -> Result<(), SendError> {
        let priority = Priority::try_from_u8(priority).ok_or(SendError::InvalidPriority)?;
        // Backward frames are scheduled by the reply window, not by class
        let priority = match frame.kind() {
            EventKind::Backward => Priority::MIN,
            _ => priority,
        };
        self.with_shared(|shared| {
            shared.arbiter.submit(TxRequest {
                frame,
                priority,
                is_query,
                min_idle_us: 0,
            })
        })?;
        self.kick.signal(());
        Ok(())
    }

    fn abort(&self) {
        self.with_shared(|shared| {
            shared.arbiter.abort_all();
            shared.abort = true;
        });
        self.kick.signal(());
    }

    fn rx_overflow(&self) -> u32 {
        self.with_shared(|shared| shared.rx_overflow)
    }
}

/// Application handle of a [`Transceiver`]
pub struct Port<'a> {
    state: &'a (dyn DynamicPort + Sync),
    frames: DynamicReceiver<'a, Frame>,
}

impl Port<'_> {
    /// Queues `frame` for transmission.
    ///
    /// `priority` must be a settling class 1..=5; backward frames are
    /// scheduled by the reply window and the class carries no further
    /// meaning for them. `is_query` arms the no-answer watch once the frame
    /// completes. Returns synchronously; completion is observable on the bus
    /// only.
    pub fn send(&self, frame: Frame, priority: u8, is_query: bool) -> Result<(), SendError> {
        self.state.send(frame, priority, is_query)
    }

    /// Waits up to `timeout` for the next decoded frame or bus event.
    pub async fn receive(&self, timeout: Duration) -> Result<Frame, NoFrameAvailable> {
        with_timeout(timeout, self.frames.receive())
            .await
            .map_err(|_| NoFrameAvailable)
    }

    /// Drops all pending transmissions and stops an in-progress one.
    ///
    /// The slots free immediately; the bus itself is released when the runner
    /// processes the request.
    pub fn abort(&self) {
        self.state.abort();
    }

    /// Frames dropped because the receive queue was full.
    pub fn rx_overflow(&self) -> u32 {
        self.state.rx_overflow()
    }
}

/// An in-progress local transmission
struct ActiveTx {
    waveform: Waveform,
    started_at: Instant,
    is_query: bool,
    destroy: bool,
}

/// Background task driving a [`Transceiver`]
///
/// All protocol logic runs here, one event at a time, so the rest of the
/// stack needs no locking beyond the slot bookkeeping.
pub struct Runner<'a, M: RawMutex, B: Phy, const RX_DEPTH: usize> {
    state: &'a Transceiver<M, RX_DEPTH>,
    backend: B,
    receiver: Receiver,
    tx: Option<ActiveTx>,
    last_edge: Option<Instant>,
    pending_query: bool,
}

impl<M: RawMutex + Sync, B: Phy, const RX_DEPTH: usize> Runner<'_, M, B, RX_DEPTH> {
    pub async fn run(&mut self) -> ! {
        // The first quiet stop interval reports BusIdle to the application
        self.backend
            .arm_timeout(TimeoutKind::StopBit, Instant::now() + stop_condition());

        loop {
            match select(self.state.events.receive(), self.state.kick.wait()).await {
                Either::First(event) => self.handle_event(event),
                Either::Second(()) => {}
            }
            if self.state.with_shared(|shared| core::mem::take(&mut shared.abort)) {
                self.handle_abort();
            }
            self.reschedule();
        }
    }

    fn handle_event(&mut self, event: PhyEvent) {
        match event {
            PhyEvent::Capture(edge) => self.on_capture(edge),
            PhyEvent::Timeout {
                kind: TimeoutKind::StopBit,
                at,
            } => self.on_stop_timeout(at),
            // Settling is re-validated by the reschedule pass that follows
            // every event
            PhyEvent::Timeout {
                kind: TimeoutKind::Settling,
                ..
            } => {}
            PhyEvent::Timeout {
                kind: TimeoutKind::Query,
                ..
            } => self.on_query_timeout(),
        }
    }

    fn on_capture(&mut self, edge: Edge) {
        trace!("capture {:?}", edge);
        self.last_edge = Some(edge.at);
        self.backend
            .arm_timeout(TimeoutKind::StopBit, edge.at + stop_condition());

        if let Some(tx) = &self.tx
            && !tx.destroy
        {
            match collision::judge(edge, tx.started_at, &tx.waveform, &self.state.config) {
                Verdict::Own => {}
                Verdict::Collision { in_start_bit } => {
                    self.on_collision(in_start_bit);
                    return;
                }
            }
        }
        self.receiver.on_edge(edge, &self.state.config);
    }

    fn on_collision(&mut self, in_start_bit: bool) {
        warn!("collision detected, in_start_bit={}", in_start_bit);
        self.backend.abort_waveform();
        let _ = unwrap!(self.tx.take());

        // A collided backward frame is dropped: its window will have passed.
        // A forward frame retries after the recovery interval.
        self.state.with_shared(|shared| {
            match shared.arbiter.active() {
                Some((SlotKind::Forward, _)) => shared.arbiter.requeue(timing::RECOVERY_MIN_US),
                _ => {
                    shared.arbiter.complete();
                }
            };
        });

        if in_start_bit {
            // Nobody decoded data yet; release and let the winner proceed
            self.receiver.poison();
        } else {
            // Data is compromised; corrupt it for every listener
            let wf = encode::destroy_waveform(&self.state.config);
            let now = Instant::now();
            self.backend.start_waveform(now, &wf);
            self.receiver.set_transmitting(true);
            self.tx = Some(ActiveTx {
                waveform: wf,
                started_at: now,
                is_query: false,
                destroy: true,
            });
        }
    }

    fn on_stop_timeout(&mut self, at: Instant) {
        let line = self.backend.line_level();
        match self.receiver.on_stop_timeout(at, line) {
            StopOutcome::Deliver(frame) => self.deliver(frame),
            StopOutcome::Rearm(deadline) => {
                self.backend.arm_timeout(TimeoutKind::StopBit, deadline)
            }
            StopOutcome::TxDone => {
                // A stop compare armed before the transmission started may
                // fire mid-waveform; the echo captures re-arm the real one
                if self.tx_still_running(at) {
                    self.receiver.set_transmitting(false);
                    return;
                }
                let tx = unwrap!(self.tx.take());
                self.state.with_shared(|shared| {
                    shared.arbiter.complete();
                });
                trace!("transmission complete");
                if tx.is_query
                    && let Some(end) = self.receiver.last_frame_end()
                {
                    self.pending_query = true;
                    self.backend.arm_timeout(
                        TimeoutKind::Query,
                        end + Duration::from_micros(timing::NO_ANSWER_US as u64),
                    );
                }
            }
            StopOutcome::DestroyDone => {
                if self.tx_still_running(at) {
                    self.receiver.set_transmitting(true);
                    return;
                }
                let _ = unwrap!(self.tx.take());
                self.deliver(unwrap!(Frame::bus_event(EventKind::Corrupt)));
            }
            StopOutcome::Ignore => {}
        }
    }

    fn tx_still_running(&self, at: Instant) -> bool {
        self.tx.as_ref().is_some_and(|tx| {
            at + Duration::from_micros(1) < tx.started_at + tx.waveform.end()
        })
    }

    fn on_query_timeout(&mut self) {
        if !self.pending_query {
            return;
        }
        if self.receiver.receiving() {
            // An answer is on the wire; its delivery settles the query
            return;
        }
        self.pending_query = false;
        self.deliver(unwrap!(Frame::bus_event(EventKind::NoAnswer)));
    }

    fn deliver(&mut self, frame: Frame) {
        if self.pending_query && frame.kind() != EventKind::NoAnswer {
            // Whatever arrived first resolves the query, a valid backward
            // frame or anything corrupt
            self.pending_query = false;
            self.backend.cancel_timeout(TimeoutKind::Query);
        }
        if self.state.frames.try_send(frame).is_err() {
            warn!("receive queue full, frame dropped");
            self.state.with_shared(|shared| shared.rx_overflow += 1);
        }
    }

    fn handle_abort(&mut self) {
        self.backend.abort_waveform();
        self.backend.cancel_timeout(TimeoutKind::Settling);
        self.backend.cancel_timeout(TimeoutKind::Query);
        self.tx = None;
        self.pending_query = false;
        self.receiver.reset();
    }

    fn reschedule(&mut self) {
        if self.tx.is_some() || self.receiver.receiving() || self.receiver.bus_failed() {
            return;
        }
        let now = Instant::now();
        let last_edge = self.last_edge;
        let last_frame_end = self.receiver.last_frame_end();
        let decision = self.state.with_shared(|shared| {
            shared.arbiter.decide(now, last_edge, last_frame_end)
        });
        match decision {
            Decision::Idle => {}
            Decision::Wait(at) => self.backend.arm_timeout(TimeoutKind::Settling, at),
            Decision::Start(_) => self.begin_transmission(),
        }
    }

    fn begin_transmission(&mut self) {
        let request = self
            .state
            .with_shared(|shared| shared.arbiter.active().map(|(_, request)| *request));
        let request = unwrap!(request);
        // The bus idles high between frames
        let wf = unwrap!(encode::encode(&request.frame, Level::High, &self.state.config));
        let now = Instant::now();
        trace!("starting transmission of {:?}", request.frame);
        self.backend.start_waveform(now, &wf);
        self.receiver.set_transmitting(false);
        self.tx = Some(ActiveTx {
            waveform: wf,
            started_at: now,
            is_query: request.is_query,
            destroy: false,
        });
    }
}

fn stop_condition() -> Duration {
    Duration::from_micros(timing::STOP_CONDITION_US as u64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;

    struct NullPhy;

    impl Phy for NullPhy {
        fn start_waveform(&mut self, _start: Instant, _waveform: &Waveform) {}
        fn abort_waveform(&mut self) {}
        fn arm_timeout(&mut self, _kind: TimeoutKind, _at: Instant) {}
        fn cancel_timeout(&mut self, _kind: TimeoutKind) {}
        fn line_level(&self) -> Level {
            Level::High
        }
    }

    #[test]
    fn test_send_validation() {
        let mut tr = Transceiver::<CriticalSectionRawMutex, 4>::new(Config::default());
        let (port, _sink, _runner) = tr.split(NullPhy);

        assert_eq!(
            port.send(Frame::gear(0x1234), 0, false),
            Err(SendError::InvalidPriority)
        );
        assert_eq!(
            port.send(Frame::gear(0x1234), 6, false),
            Err(SendError::InvalidPriority)
        );
        assert_eq!(
            port.send(Frame::bus_event(EventKind::BusIdle).unwrap(), 1, false),
            Err(SendError::InvalidFrame)
        );

        port.send(Frame::gear(0x1234), 3, false).unwrap();
        assert_eq!(
            port.send(Frame::gear(0x5678), 3, false),
            Err(SendError::Busy)
        );
        // The class is checked for backward frames too, even though their
        // scheduling never uses it
        assert_eq!(
            port.send(Frame::backward(0xff), 0, false),
            Err(SendError::InvalidPriority)
        );
        port.send(Frame::backward(0xff), 5, false).unwrap();

        assert_eq!(port.rx_overflow(), 0);
    }

    #[test]
    fn test_abort_frees_slots() {
        let mut tr = Transceiver::<CriticalSectionRawMutex, 4>::new(Config::default());
        let (port, _sink, _runner) = tr.split(NullPhy);

        port.send(Frame::gear(0x1234), 1, false).unwrap();
        port.abort();
        port.send(Frame::gear(0x1234), 1, false).unwrap();
    }

    #[test]
    fn test_event_sink_overflow() {
        let tr = Transceiver::<CriticalSectionRawMutex, 4>::new(Config::default());
        let sink = EventSink::new(&tr);
        let event = PhyEvent::Timeout {
            kind: TimeoutKind::StopBit,
            at: Instant::from_micros(0),
        };
        for _ in 0..EVENT_QUEUE_DEPTH {
            assert!(sink.push(event));
        }
        assert!(!sink.push(event));
    }
}
