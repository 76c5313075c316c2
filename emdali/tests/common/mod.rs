//! Simulated single-node bus for end-to-end tests
//!
//! The simulator implements [`Phy`] over shared state. Started waveforms are
//! replayed back to the stack as edge captures, because a transmitter always
//! hears its own edges on the bus, and armed compares fire when the pump
//! advances mock time past their deadline. Remote bus traffic is injected as
//! pre-computed edge lists.

use std::boxed::Box;
use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;
use std::sync::{Mutex, MutexGuard};
use std::vec::Vec;

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_time::{Duration, Instant, MockDriver};
use emdali::config::Config;
use emdali::core::Frame;
use emdali::link::EventSink;
use emdali::phy::{Phy, PhyEvent, TimeoutKind};
use emdali::transceiver::{Port, Runner, Transceiver};
use emdali::waveform::{Edge, Level, Waveform};
use futures_executor::LocalPool;
use futures_task::LocalSpawn;

struct PlayedWaveform {
    start: Instant,
    points: Vec<(Duration, Level)>,
    /// Next point to replay as a capture
    next: usize,
}

pub struct SimState {
    tx: Option<PlayedWaveform>,
    remote: VecDeque<Edge>,
    timeouts: [Option<Instant>; 3],
    pub line: Level,
    /// Waveforms started, the destroy waveform included
    pub starts: u32,
    pub aborts: u32,
}

impl SimState {
    fn new() -> Self {
        Self {
            tx: None,
            remote: VecDeque::new(),
            timeouts: [None; 3],
            line: Level::High,
            starts: 0,
            aborts: 0,
        }
    }

    pub fn tx_start(&self) -> Option<Instant> {
        self.tx.as_ref().map(|tx| tx.start)
    }

    pub fn tx_len(&self) -> Option<usize> {
        self.tx.as_ref().map(|tx| tx.points.len())
    }

    /// Instant of the last transition of the most recently started waveform
    pub fn tx_end(&self) -> Option<Instant> {
        let tx = self.tx.as_ref()?;
        let (offset, _) = tx.points.last()?;
        Some(tx.start + *offset)
    }
}

#[derive(Clone)]
pub struct SimPhy(Rc<RefCell<SimState>>);

impl Phy for SimPhy {
    fn start_waveform(&mut self, start: Instant, waveform: &Waveform) {
        let mut sim = self.0.borrow_mut();
        sim.starts += 1;
        sim.tx = Some(PlayedWaveform {
            start,
            points: waveform
                .transitions()
                .iter()
                .map(|t| (t.at, t.level))
                .collect(),
            next: 0,
        });
    }

    fn abort_waveform(&mut self) {
        let mut sim = self.0.borrow_mut();
        sim.aborts += 1;
        sim.tx = None;
        sim.line = Level::High;
    }

    fn arm_timeout(&mut self, kind: TimeoutKind, at: Instant) {
        self.0.borrow_mut().timeouts[kind as usize] = Some(at);
    }

    fn cancel_timeout(&mut self, kind: TimeoutKind) {
        self.0.borrow_mut().timeouts[kind as usize] = None;
    }

    fn line_level(&self) -> Level {
        self.0.borrow().line
    }
}

enum Action {
    Echo,
    Remote,
    Fire(TimeoutKind),
}

pub struct Bus {
    pub pool: LocalPool,
    pub sim: Rc<RefCell<SimState>>,
    pub port: Port<'static>,
    sink: EventSink<'static>,
    _time: MutexGuard<'static, ()>,
}

/// Leaks a transceiver bound to a fresh simulator and spawns its runner.
pub fn bus() -> Bus {
    let _time = time_lock();
    let sim = Rc::new(RefCell::new(SimState::new()));
    let transceiver = Box::leak(Box::new(Transceiver::<CriticalSectionRawMutex>::new(
        Config::default(),
    )));
    let (port, sink, runner) = transceiver.split(SimPhy(sim.clone()));

    let pool = LocalPool::new();
    pool.spawner()
        .spawn_local_obj(Box::new(drive(runner)).into())
        .unwrap();

    Bus {
        pool,
        sim,
        port,
        sink,
        _time,
    }
}

async fn drive(mut runner: Runner<'static, CriticalSectionRawMutex, SimPhy, 8>) {
    runner.run().await
}

impl Bus {
    /// Queues remote bus traffic; edges replay in timestamp order.
    pub fn inject(&mut self, edges: impl IntoIterator<Item = Edge>) {
        self.sim.borrow_mut().remote.extend(edges);
    }

    pub fn pump_for(&mut self, duration: Duration) {
        self.pump_until(Instant::now() + duration);
    }

    /// Replays simulator events in time order up to `deadline`, letting the
    /// runner react between each.
    pub fn pump_until(&mut self, deadline: Instant) {
        loop {
            self.pool.run_until_stalled();
            let Some((at, action)) = self.next_action() else {
                break;
            };
            if at > deadline {
                break;
            }
            advance_to(at);
            self.apply(at, action);
        }
        advance_to(deadline);
        self.pool.run_until_stalled();
    }

    /// Collects everything currently queued for the application.
    pub fn drain(&mut self) -> Vec<Frame> {
        let mut frames = Vec::new();
        while let Ok(frame) = self
            .pool
            .run_until(self.port.receive(Duration::from_ticks(0)))
        {
            frames.push(frame);
        }
        frames
    }

    fn next_action(&self) -> Option<(Instant, Action)> {
        let sim = self.sim.borrow();
        let mut best: Option<(Instant, Action)> = None;
        let mut consider = |at: Instant, action: Action| {
            if best.as_ref().is_none_or(|(t, _)| at < *t) {
                best = Some((at, action));
            }
        };
        if let Some(tx) = &sim.tx
            && let Some((offset, _)) = tx.points.get(tx.next)
        {
            consider(tx.start + *offset, Action::Echo);
        }
        if let Some(edge) = sim.remote.front() {
            consider(edge.at, Action::Remote);
        }
        for kind in [TimeoutKind::StopBit, TimeoutKind::Settling, TimeoutKind::Query] {
            if let Some(at) = sim.timeouts[kind as usize] {
                consider(at, Action::Fire(kind));
            }
        }
        best
    }

    fn apply(&mut self, at: Instant, action: Action) {
        let event = {
            let mut sim = self.sim.borrow_mut();
            match action {
                Action::Echo => {
                    let level = {
                        let tx = sim.tx.as_mut().unwrap();
                        let (_, level) = tx.points[tx.next];
                        tx.next += 1;
                        level
                    };
                    sim.line = level;
                    PhyEvent::Capture(Edge { at, level })
                }
                Action::Remote => {
                    let edge = sim.remote.pop_front().unwrap();
                    sim.line = edge.level;
                    PhyEvent::Capture(edge)
                }
                Action::Fire(kind) => {
                    sim.timeouts[kind as usize] = None;
                    PhyEvent::Timeout { kind, at }
                }
            }
        };
        assert!(self.sink.push(event));
    }
}

fn advance_to(at: Instant) {
    let now = Instant::now();
    if at > now {
        MockDriver::get().advance(at - now);
    }
}

/// Bi-phase edge schedule of a remote frame, nominal 417 µs half bits
pub fn frame_edges(start: Instant, data: u32, bits: u8) -> Vec<Edge> {
    let mut edges = Vec::new();
    let mut level = Level::High;
    let mut base = start;
    for i in 0..=bits {
        // i == 0 is the start bit, always 1
        let bit = i == 0 || data >> (bits - i) & 1 == 1;
        let first = if bit { Level::Low } else { Level::High };
        if level != first {
            edges.push(Edge { at: base, level: first });
            level = first;
        }
        let mid = !first;
        edges.push(Edge {
            at: base + Duration::from_micros(417),
            level: mid,
        });
        level = mid;
        base += Duration::from_micros(834);
    }
    if level == Level::Low {
        edges.push(Edge {
            at: base,
            level: Level::High,
        });
    }
    edges
}

// The embassy mock time driver is process-global and time only moves
// forward; tests that advance it must not interleave
fn time_lock() -> MutexGuard<'static, ()> {
    static LOCK: Mutex<()> = Mutex::new(());
    LOCK.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
