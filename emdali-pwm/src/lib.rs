//! Emdali back-end on a PWM waveform generator
//!
//! Some timers offer no free compare channel for scheduled output
//! transitions but do offer buffered PWM: period and duty registers that
//! latch at each update event. This back-end compiles the transmit waveform
//! into a sequence of duty-coded cycles (line low for the duty time, then
//! released) and feeds the next cycle from the update interrupt.
//!
//! Receive edges are timestamped by a separate free-running
//! [`hw::CaptureCounter`], which also provides the three timeout compares.
//!
//! The embassy time driver must tick at 1 MHz so counter values and instants
//! share a unit.
//!
//! # Limitations
//!
//! * transmission begins when the stack requests it, not at the requested
//!   instant; the settling compare fires close enough that the extra latency
//!   stays inside the transmit jitter budget
//! * the generator must survive one idle cycle after the last data cycle;
//!   the compiler appends an all-released cycle so a late stop cannot
//!   re-drive the bus

#![no_std]

// This mod MUST go first, so that the others see its macros.
pub(crate) mod fmt;

pub mod driver;
pub mod hw;
mod steps;
