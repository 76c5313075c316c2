//! Emdali back-end on a capture/compare timer
//!
//! Maps the Emdali phy interface onto a classic general-purpose timer: one
//! 16-bit free-running counter at 1 MHz with an input capture channel on the
//! bus receive line and four compare channels, one driving the transmit line
//! through the scheduled waveform and one per timeout kind.
//!
//! The register-level peripheral stays behind the [`hw::CaptureTimer`] trait;
//! an implementation for a concrete chip wires its timer registers and
//! interrupt to it. [`driver::bind`] splits the peripheral into the
//! [`driver::Driver`] half the stack polls and the [`driver::Isr`] half the
//! interrupt handler calls.
//!
//! The embassy time driver must tick at 1 MHz so counter values and instants
//! share a unit.
//!
//! # Limitations
//!
//! * deadlines beyond the 16-bit counter horizon (about 65 ms) are reached in
//!   compare hops, adding one interrupt per 32 ms of wait
//! * output transitions are applied in the compare interrupt, so transmit
//!   edges carry the interrupt latency; the stack's propagation-delay window
//!   absorbs it

#![no_std]

// This mod MUST go first, so that the others see its macros.
pub(crate) mod fmt;

pub mod driver;
pub mod hw;
