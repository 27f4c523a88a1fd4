use std::{error::Error as StdError, fmt::Display, io, ops::RangeInclusive, time::Duration};

use leep_protocol::error::DecodeError;

pub type Result<T> = std::result::Result<T, Error>;

/// Errors reported by device handles.
#[derive(Debug)]
pub enum Error {
    IoError(io::Error),
    /// No matching reply arrived within the configured timeout
    Timeout(Duration),
    /// The ROM could not be decoded, or its register schema is unusable
    Rom(DecodeError),
    /// No register matches the name pattern
    UnknownRegister { pattern: String },
    /// More than one register matches the name pattern
    AmbiguousRegister {
        pattern: String,
        matches: Vec<String>,
    },
    /// A write does not carry exactly one value per register element
    RegisterSizeMismatch {
        name: String,
        expected: usize,
        got: usize,
    },
    /// A value written does not fit the width and sign of the register
    ValueOutOfRange {
        name: String,
        value: i64,
        range: RangeInclusive<i64>,
    },
    /// A requested channel is not enabled in the channel keep mask
    ChannelDisabled { channel: usize, mask: u32 },
    /// The end tag of an acquisition passed the expected tag, meaning another client
    /// advanced the tag while the acquisition was running
    AcquisitionCollision { expected: u32, begin: u32, end: u32 },
    /// A sequencer program is malformed at instruction `index`
    SequencerAssembly { index: usize, reason: String },
    InvalidArgument(String),
    /// The device address names a backend this crate does not implement
    UnsupportedBackend(String),
    /// A polling operation observed the interrupt flag
    Interrupted,
}

impl From<io::Error> for Error {
    fn from(value: io::Error) -> Self {
        Error::IoError(value)
    }
}

impl From<DecodeError> for Error {
    fn from(value: DecodeError) -> Self {
        Error::Rom(value)
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::IoError(error) => write!(f, "{}", error),
            Error::Timeout(timeout) => write!(f, "No reply within {:?}", timeout),
            Error::Rom(error) => write!(f, "{}", error),
            Error::UnknownRegister { pattern } => {
                write!(f, "No match for register pattern {}", pattern)
            }
            Error::AmbiguousRegister { pattern, matches } => write!(
                f,
                "{} matches more than one register: {}",
                pattern,
                matches.join(" ")
            ),
            Error::RegisterSizeMismatch {
                name,
                expected,
                got,
            } => write!(
                f,
                "Register {} has {} elements, but {} values were given",
                name, expected, got
            ),
            Error::ValueOutOfRange { name, value, range } => write!(
                f,
                "Value {} does not fit register {} ({}..={})",
                value,
                name,
                range.start(),
                range.end()
            ),
            Error::ChannelDisabled { channel, mask } => write!(
                f,
                "Channel {} is not enabled in channel mask {:#05x}",
                channel, mask
            ),
            Error::AcquisitionCollision {
                expected,
                begin,
                end,
            } => write!(
                f,
                "Acquisition for tag {} ended with tag {} (began with {})",
                expected, end, begin
            ),
            Error::SequencerAssembly { index, reason } => {
                write!(f, "Instruction {}: {}", index, reason)
            }
            Error::InvalidArgument(reason) => write!(f, "{}", reason),
            Error::UnsupportedBackend(addr) => write!(f, "Unsupported device address '{}'", addr),
            Error::Interrupted => write!(f, "Interrupted"),
        }
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            Error::IoError(error) => Some(error),
            Error::Rom(error) => Some(error),
            _ => None,
        }
    }
}
