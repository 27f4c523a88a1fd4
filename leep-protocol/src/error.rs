use std::{error::Error, fmt::Display, io};

/// Errors that may occur when decoding datagrams, ROM contents or the register schema.
#[derive(Debug)]
pub enum DecodeError {
    IoError(io::Error),
    /// A datagram shorter than its header
    ShortDatagram(usize),
    /// A ROM record declares more payload words than remain in the ROM window
    RomTruncated {
        offset: usize,
        declared: usize,
        available: usize,
    },
    /// The ROM ended without a register schema record
    RomMissingSchema,
    /// The compressed schema could not be inflated
    SchemaCompression(io::Error),
    /// The schema is not valid JSON
    SchemaSyntax(serde_json::Error),
    /// A register definition is missing a field or carries an unusable value
    InvalidRegister { name: String, reason: String },
}

impl From<io::Error> for DecodeError {
    fn from(value: io::Error) -> Self {
        DecodeError::IoError(value)
    }
}

impl From<serde_json::Error> for DecodeError {
    fn from(value: serde_json::Error) -> Self {
        DecodeError::SchemaSyntax(value)
    }
}

impl Display for DecodeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DecodeError::IoError(error) => write!(f, "{}", error),
            DecodeError::ShortDatagram(len) => {
                write!(f, "Datagram of {} bytes is shorter than its header", len)
            }
            DecodeError::RomTruncated {
                offset,
                declared,
                available,
            } => write!(
                f,
                "Truncated ROM descriptor at word {}: declares {} words, {} remain",
                offset, declared, available
            ),
            DecodeError::RomMissingSchema => write!(f, "ROM contains no register map"),
            DecodeError::SchemaCompression(error) => {
                write!(f, "Unable to inflate register map: {}", error)
            }
            DecodeError::SchemaSyntax(error) => write!(f, "Invalid register map JSON: {}", error),
            DecodeError::InvalidRegister { name, reason } => {
                write!(f, "Invalid definition of register '{}': {}", name, reason)
            }
        }
    }
}

impl Error for DecodeError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            DecodeError::IoError(error) | DecodeError::SchemaCompression(error) => Some(error),
            DecodeError::SchemaSyntax(error) => Some(error),
            _ => None,
        }
    }
}

/// Errors that may occur when building a ROM image.
#[derive(Debug)]
pub enum EncodeError {
    IoError(io::Error),
    /// A record payload does not fit the 14 bit size field
    RecordTooLarge { words: usize },
    /// The records and terminator do not fit the ROM window
    RomOverflow { needed: usize, available: usize },
    /// A hash record contains a non hexadecimal character
    InvalidHash(String),
}

impl From<io::Error> for EncodeError {
    fn from(value: io::Error) -> Self {
        EncodeError::IoError(value)
    }
}

impl Display for EncodeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EncodeError::IoError(error) => write!(f, "{}", error),
            EncodeError::RecordTooLarge { words } => {
                write!(f, "ROM descriptor of {} words is too large", words)
            }
            EncodeError::RomOverflow { needed, available } => write!(
                f,
                "ROM contents need {} words, but only {} are available",
                needed, available
            ),
            EncodeError::InvalidHash(hash) => write!(f, "Invalid hexadecimal hash '{}'", hash),
        }
    }
}

impl Error for EncodeError {}
