//! # Emdali
//!
//! This library implements the physical/data-link layer of the DALI bus
//! (IEC 62386-101 \[1\]) in no_std environments: bi-phase frame encoding and
//! decoding, multi-master bus arbitration with priority-based settling,
//! collision detection with deliberate frame destruction, and bus failure
//! supervision. It moves opaque frames of 8/16/24/32 bits; command semantics
//! live above this crate.
//!
//! The protocol core is hardware-agnostic. A timer back-end implements the
//! small capability interface of `emdali-driver` and can be realized on very
//! different peripherals; see the `emdali-timer` (capture/compare counter) and
//! `emdali-pwm` (periodic waveform generator) adapter crates.
//!
//! ## Architecture
//!
//! ```text
//!  ┌──────┐     ┌─────────────┐     ┌────────┐
//!  │ Port │────►│ Transceiver │◄────│ Runner │
//!  └──────┘     │  (context)  │     └───┬────┘
//!   send        └──────▲──────┘         │ Phy ops
//!   receive            │ events     ┌───▼─────┐
//!   abort        ┌─────┴─────┐      │ Back-end│
//!                │ EventSink │◄─────┤  (ISR)  │
//!                └───────────┘      └─────────┘
//! ```
//!
//! * _Transceiver_ owns the per-bus state: the two transmit slots, the receive
//!   state machine, the event queue, and the decoded-frame delivery queue.
//! * _Port_ is the user handle: `send`, `receive`, `abort`.
//! * _EventSink_ is consumed by the back-end interrupt half to report edge
//!   captures and fired compares.
//! * _Runner_ is the single deferred-processing task. It drains events in
//!   arrival order and runs all protocol logic to completion, one event at a
//!   time.
//!
//! ## Concurrency model
//!
//! Two execution contexts touch a transceiver:
//! * the back-end interrupt context, which only timestamps edges and re-arms
//!   compares; it pushes into a bounded queue and never blocks,
//! * the runner task, which exclusively owns the receive and transmit state
//!   machines.
//!
//! Protocol decisions happen only in the runner, so no locking is needed
//! beyond the event channel and a short blocking mutex around the transmit
//! slot bookkeeping that `Port::send` must inspect synchronously.
//!
//! Wire-level anomalies (bit timing violations, collisions, bus failure) are
//! routine on a shared multi-master bus. They are delivered as events through
//! the same receive path as valid frames and never surface as `Err`.
//!
//! # References
//!
//! * \[1\] IEC 62386-101, Digital addressable lighting interface —
//!   Part 101: General requirements — System components
//! * \[2\] IEC 62386-102, Part 102: General requirements — Control gear
#![no_std]

pub use emdali_core as core;
pub use emdali_driver::{link, phy, time, waveform};

// This mod MUST go first, so that the others see its macros.
pub(crate) mod fmt;

mod arbiter;
mod collision;
pub mod config;
mod encode;
mod receive;
pub mod transceiver;
