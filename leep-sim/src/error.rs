use std::{error::Error, fmt::Display, io};

use leep_protocol::error::{DecodeError, EncodeError};

/// Errors raised while setting up a simulated device.
#[derive(Debug)]
pub enum SimError {
    IoError(io::Error),
    /// The register schema is unusable
    Schema(DecodeError),
    /// The ROM image could not be built
    Rom(EncodeError),
    /// Registers overlap each other or the ROM window
    AddressConflict { name: String, addr: u32 },
    /// A register the acquisition model depends on is missing or too small
    MissingRegister(String),
}

impl From<io::Error> for SimError {
    fn from(value: io::Error) -> Self {
        SimError::IoError(value)
    }
}

impl From<DecodeError> for SimError {
    fn from(value: DecodeError) -> Self {
        SimError::Schema(value)
    }
}

impl From<EncodeError> for SimError {
    fn from(value: EncodeError) -> Self {
        SimError::Rom(value)
    }
}

impl Display for SimError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SimError::IoError(error) => write!(f, "{}", error),
            SimError::Schema(error) => write!(f, "{}", error),
            SimError::Rom(error) => write!(f, "{}", error),
            SimError::AddressConflict { name, addr } => {
                write!(f, "Register {} overlaps address {:#08x}", name, addr)
            }
            SimError::MissingRegister(reason) => write!(f, "{}", reason),
        }
    }
}

impl Error for SimError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            SimError::IoError(error) => Some(error),
            SimError::Schema(error) => Some(error),
            SimError::Rom(error) => Some(error),
            _ => None,
        }
    }
}
