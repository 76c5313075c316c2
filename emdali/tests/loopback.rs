mod common;

use embassy_time::{Duration, Instant};
use emdali::core::{EventKind, Frame};
use emdali::transceiver::SendError;
use emdali::waveform::{Edge, Level};

fn us(value: u64) -> Duration {
    Duration::from_micros(value)
}

#[test]
fn test_transmit_on_idle_bus() {
    let mut bus = common::bus();

    // The first quiet stop interval reports an idle bus
    bus.pump_for(us(3000));
    assert_eq!(
        bus.drain(),
        [Frame::bus_event(EventKind::BusIdle).unwrap()]
    );

    bus.port.send(Frame::gear(0x1234), 3, false).unwrap();
    assert_eq!(
        bus.port.send(Frame::gear(0x5678), 3, false),
        Err(SendError::Busy)
    );

    bus.pump_for(us(20_000));
    assert_eq!(bus.sim.borrow().starts, 1);
    // Own frames are not looped back to the local port
    assert!(bus.drain().is_empty());
    // The slot frees once the stop condition confirms completion
    bus.port.send(Frame::gear(0x5678), 3, false).unwrap();
}

#[test]
fn test_receive_remote_frames() {
    let mut bus = common::bus();
    bus.pump_for(us(3000));
    bus.drain();

    let start = Instant::now() + us(1000);
    bus.inject(common::frame_edges(start, 0x00ab_cdef, 24));
    bus.pump_for(us(30_000));
    assert_eq!(bus.drain(), [Frame::device(0xabcdef).unwrap()]);

    // An identical repeat inside the pairing window is flagged
    let start = Instant::now() + us(1000);
    bus.inject(common::frame_edges(start, 0x00ab_cdef, 24));
    bus.pump_for(us(30_000));
    assert_eq!(
        bus.drain(),
        [Frame::device(0xabcdef).unwrap().into_twice()]
    );
}

#[test]
fn test_query_without_answer() {
    let mut bus = common::bus();
    bus.pump_for(us(3000));
    bus.drain();

    bus.port.send(Frame::gear(0x1900), 2, true).unwrap();
    // Transmission, then the full no-answer interval with a silent bus
    bus.pump_for(us(40_000));
    assert_eq!(
        bus.drain(),
        [Frame::bus_event(EventKind::NoAnswer).unwrap()]
    );
}

#[test]
fn test_query_answered_in_window() {
    let mut bus = common::bus();
    bus.pump_for(us(3000));
    bus.drain();

    bus.port.send(Frame::gear(0x1900), 2, true).unwrap();
    bus.pump_for(us(18_000));
    let end = bus.sim.borrow().tx_end().unwrap();

    // The reply starts inside the backward settling window
    bus.inject(common::frame_edges(end + us(7000), 0x42, 8));
    bus.pump_for(us(40_000));
    assert_eq!(bus.drain(), [Frame::backward(0x42)]);
}

#[test]
fn test_collision_destroys_and_retries() {
    let mut bus = common::bus();
    bus.pump_for(us(3000));
    bus.drain();

    bus.port.send(Frame::gear(0xffff), 1, false).unwrap();
    bus.pool.run_until_stalled();
    let start = bus.sim.borrow().tx_start().unwrap();

    // Another node drives low between two of our scheduled transitions
    bus.inject([Edge {
        at: start + us(2285),
        level: Level::Low,
    }]);
    bus.pump_for(us(10_000));

    assert_eq!(bus.sim.borrow().aborts, 1);
    // The destroy waveform made the frame unreadable for everyone
    assert_eq!(
        bus.drain(),
        [Frame::bus_event(EventKind::Corrupt).unwrap()]
    );

    // The forward frame retries once the recovery interval and its settling
    // time have passed
    bus.pump_for(us(20_000));
    assert_eq!(bus.sim.borrow().starts, 3);
    assert!(bus.sim.borrow().tx_len().unwrap() > 2);
}
