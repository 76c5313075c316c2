//! DALI protocol core data types
//!
//! This crate provides basic data type definitions used by other Emdali crates.
//! Emdali users should not depend on this crate directly. Use the `emdali::core` reexport instead.
#![no_std]

pub mod timing;

#[derive(Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct InvalidValue;

/// Frame and bus-event taxonomy of the 62386-101 data link layer [1; 7.3]
///
/// The first four kinds carry a payload of fixed bit length. `Corrupt` marks a frame
/// that violated bit timing or was destroyed on collision. The remaining kinds are
/// pure bus conditions reported through the receive path and carry no payload.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum EventKind {
    /// 8-bit reply frame sent by gear in response to a query
    Backward,
    /// 16-bit forward frame addressed to control gear
    Gear,
    /// 24-bit forward frame addressed to control devices
    Device,
    /// 32-bit firmware update frame
    Firmware,
    /// Frame with invalid bit timing or length
    Corrupt,
    /// A query elapsed without a backward frame
    NoAnswer,
    /// No bus activity observed
    BusIdle,
    /// Bus held low past the failure threshold
    BusFailure,
}

impl EventKind {
    /// Payload bit length; `None` for kinds without payload
    pub const fn bit_length(self) -> Option<u8> {
        match self {
            EventKind::Backward => Some(8),
            EventKind::Gear => Some(16),
            EventKind::Device => Some(24),
            EventKind::Firmware => Some(32),
            EventKind::Corrupt
            | EventKind::NoAnswer
            | EventKind::BusIdle
            | EventKind::BusFailure => None,
        }
    }

    /// Event kind selected by a received data bit count [1; 7.4]
    pub const fn from_bit_count(bits: u8) -> EventKind {
        match bits {
            8 => EventKind::Backward,
            16 => EventKind::Gear,
            24 => EventKind::Device,
            32 => EventKind::Firmware,
            _ => EventKind::Corrupt,
        }
    }
}

/// A wire-level DALI frame or bus event
///
/// Immutable once constructed. Produced by the receive path and consumed through
/// `Port::receive`; constructed from user data on the transmit path.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Frame {
    kind: EventKind,
    data: u32,
    twice: bool,
}

impl Frame {
    /// Creates a frame, rejecting payloads wider than the kind's bit length
    /// and non-zero payloads on kinds without one.
    pub const fn new(kind: EventKind, data: u32) -> Result<Frame, InvalidValue> {
        let valid = match kind.bit_length() {
            Some(32) => true,
            Some(bits) => data < 1u32 << bits,
            None => data == 0,
        };
        if valid {
            Ok(Frame {
                kind,
                data,
                twice: false,
            })
        } else {
            Err(InvalidValue)
        }
    }

    pub const fn backward(data: u8) -> Frame {
        Frame {
            kind: EventKind::Backward,
            data: data as u32,
            twice: false,
        }
    }

    pub const fn gear(data: u16) -> Frame {
        Frame {
            kind: EventKind::Gear,
            data: data as u32,
            twice: false,
        }
    }

    pub const fn device(data: u32) -> Result<Frame, InvalidValue> {
        Frame::new(EventKind::Device, data)
    }

    pub const fn firmware(data: u32) -> Frame {
        Frame {
            kind: EventKind::Firmware,
            data,
            twice: false,
        }
    }

    /// Creates a payload-less bus event
    pub const fn bus_event(kind: EventKind) -> Result<Frame, InvalidValue> {
        Frame::new(kind, 0)
    }

    /// Marks the frame as the repeat of an identical frame within the pairing window
    pub const fn into_twice(self) -> Frame {
        Frame {
            twice: true,
            ..self
        }
    }

    pub const fn kind(&self) -> EventKind {
        self.kind
    }

    pub const fn data(&self) -> u32 {
        self.data
    }

    pub const fn twice(&self) -> bool {
        self.twice
    }

    pub const fn bit_length(&self) -> Option<u8> {
        self.kind.bit_length()
    }
}

/// Forward-frame transmission priority [1; 8.1.2]
///
/// The numeric encoding matches the standard's priority classes. A lower value
/// settles earlier and therefore wins bus access against a higher one.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum Priority {
    P1 = 1,
    P2 = 2,
    P3 = 3,
    P4 = 4,
    P5 = 5,
}

impl Priority {
    pub const MIN: Priority = Priority::P1;
    pub const MAX: Priority = Priority::P5;

    pub const fn try_from_u8(code: u8) -> Option<Priority> {
        match code {
            1 => Some(Priority::P1),
            2 => Some(Priority::P2),
            3 => Some(Priority::P3),
            4 => Some(Priority::P4),
            5 => Some(Priority::P5),
            _ => None,
        }
    }

    pub const fn into_u8(self) -> u8 {
        self as u8
    }
}

impl From<Priority> for u8 {
    fn from(value: Priority) -> Self {
        value.into_u8()
    }
}

impl From<Priority> for usize {
    fn from(value: Priority) -> Self {
        u8::from(value).into()
    }
}

impl TryFrom<u8> for Priority {
    type Error = InvalidValue;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Self::try_from_u8(value).ok_or(InvalidValue)
    }
}
