//! Emdali back-end interface
//!
//! The crate provides an interface between a timer/PWM back-end and the Emdali stack.
//! Limited scope facilitates compatibility across versions.
//! Back-end crates should depend on this crate. Emdali stack users should depend on
//! the `emdali` crate instead.
//!
//! A back-end realizes two halves of the same peripheral:
//! * a [`phy::Phy`] implementation the stack calls from its deferred context to
//!   drive output waveforms and to arm single-shot timeout compares
//! * an interrupt half that timestamps bus edges and reports fired compares
//!   through an [`link::EventSink`]
//!
//! The capture path must report **all** bus edges, including those driven by the
//! local transmitter. The DALI bus is half-duplex and self-observing: the stack
//! relies on seeing its own transitions to detect collisions and to terminate
//! its own frames on the stop-bit timeout.
//!
//! Each [`phy::TimeoutKind`] maps to its own compare channel; arming a kind that
//! is already armed replaces the pending deadline. The interrupt half must never
//! block: an event that does not fit in the stack's queue is dropped and the
//! condition resolves through the regular timeout paths.

#![no_std]

// This mod MUST go first, so that the others see its macros.
pub(crate) mod fmt;

pub mod internal;
pub mod link;
pub mod phy;
pub mod waveform;

pub mod time {
    pub use embassy_time::{Duration, Instant};
}
