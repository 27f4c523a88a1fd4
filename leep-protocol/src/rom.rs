//! Self describing ROM contents.
//!
//! Every device exposes a fixed window of [`ROM_WORDS`] registers starting at [`ROM_BASE`].
//! Only the lower 16 bits of each register are used; together they form a stream of
//! big-endian 16 bit words holding a sequence of type/length/value records:
//!
//! ```text
//! ┌────────────┬───────────────┬──────────────────────────┐
//! │ type (2b)  │ size (14b)    │ size payload words       │
//! └────────────┴───────────────┴──────────────────────────┘
//! ```
//!
//! | type | contents                                   |
//! |------|--------------------------------------------|
//! | 0    | end of ROM                                 |
//! | 1    | description text                           |
//! | 2    | hash, rendered as hex (schema, then code)  |
//! | 3    | zlib compressed JSON register schema       |
use std::io::{Read, Write};
use std::ops::Range;

use flate2::{Compression, read::ZlibDecoder, write::ZlibEncoder};

use crate::error::{DecodeError, EncodeError};

/// First register address of the ROM window
pub const ROM_BASE: u32 = 0x800;
/// Number of registers in the ROM window
pub const ROM_WORDS: usize = 2048;

const TYPE_END: u16 = 0;
const TYPE_TEXT: u16 = 1;
const TYPE_HASH: u16 = 2;
const TYPE_SCHEMA: u16 = 3;
const MAX_RECORD_WORDS: usize = 0x3fff;

/// The decoded contents of a device ROM.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct RomInfo {
    /// Free form description of the firmware build
    pub description: Option<String>,
    /// Hash of the register schema
    pub schema_hash: Option<String>,
    /// Hash of the firmware sources
    pub firmware_hash: Option<String>,
    /// The inflated JSON register schema
    pub schema: String,
}

fn payload_bytes(blob: &[u16]) -> Vec<u8> {
    blob.iter().flat_map(|word| word.to_be_bytes()).collect()
}

fn decode_text(blob: &[u16]) -> String {
    let bytes = payload_bytes(blob);
    let end = bytes.iter().position(|b| *b == 0).unwrap_or(bytes.len());
    String::from_utf8_lossy(&bytes[..end]).into_owned()
}

fn decode_hash(blob: &[u16]) -> String {
    blob.iter().map(|word| format!("{:04x}", word)).collect()
}

fn inflate(blob: &[u16]) -> Result<String, DecodeError> {
    let bytes = payload_bytes(blob);
    let mut json = String::new();
    ZlibDecoder::new(&bytes[..])
        .read_to_string(&mut json)
        .map_err(DecodeError::SchemaCompression)?;
    Ok(json)
}

impl RomInfo {
    /// The register addresses that must be read to obtain the raw ROM contents.
    pub fn addresses() -> Range<u32> {
        ROM_BASE..ROM_BASE + ROM_WORDS as u32
    }

    /// Decodes the register values read from the ROM window.
    ///
    /// The upper 16 bits of every value are ignored.
    pub fn decode(raw: &[u32]) -> Result<RomInfo, DecodeError> {
        let words: Vec<u16> = raw.iter().map(|value| (value & 0xffff) as u16).collect();
        if let Some(first) = raw.first() {
            log::debug!("ROM[0] {:08x}", first);
        }

        let mut info = RomInfo::default();
        let mut schema = None;
        let mut pos = 0;

        while pos < words.len() {
            let header = words[pos];
            let kind = header >> 14;
            let size = (header & 0x3fff) as usize;
            log::debug!("ROM descriptor type={} size={}", kind, size);

            if kind == TYPE_END {
                break;
            }

            let start = pos + 1;
            let available = words.len() - start;
            if size > available {
                return Err(DecodeError::RomTruncated {
                    offset: pos,
                    declared: size,
                    available,
                });
            }
            let blob = &words[start..start + size];
            pos = start + size;

            match kind {
                TYPE_TEXT => {
                    let text = decode_text(blob);
                    if info.description.is_none() {
                        info.description = Some(text);
                    } else {
                        log::info!("Extra ROM text '{}'", text);
                    }
                }
                TYPE_HASH => {
                    let hash = decode_hash(blob);
                    if info.schema_hash.is_none() {
                        info.schema_hash = Some(hash);
                    } else if info.firmware_hash.is_none() {
                        info.firmware_hash = Some(hash);
                    } else {
                        log::info!("Extra ROM hash {}", hash);
                    }
                }
                _ => {
                    if schema.is_some() {
                        log::error!("Ignoring additional register map in ROM");
                    } else {
                        schema = Some(inflate(blob)?);
                    }
                }
            }
        }

        info.schema = schema.ok_or(DecodeError::RomMissingSchema)?;
        Ok(info)
    }
}

/// Builder for a ROM image, the inverse of [`RomInfo::decode`].
///
/// # Example
///
/// ```
/// use leep_protocol::rom::{RomBuilder, RomInfo, ROM_WORDS};
///
/// let image = RomBuilder::new()
///     .text("demo firmware")
///     .schema(r#"{"reg_a": {"base_addr": 0, "data_width": 32}}"#)
///     .unwrap()
///     .build()
///     .unwrap();
/// assert_eq!(image.len(), ROM_WORDS);
///
/// let info = RomInfo::decode(&image).unwrap();
/// assert_eq!(info.description.as_deref(), Some("demo firmware"));
/// ```
#[derive(Default, Clone, Debug)]
pub struct RomBuilder {
    records: Vec<(u16, Vec<u8>)>,
}

impl RomBuilder {
    pub fn new() -> RomBuilder {
        RomBuilder::default()
    }

    /// Append a text record
    pub fn text(mut self, text: &str) -> Self {
        self.records.push((TYPE_TEXT, text.as_bytes().to_vec()));
        self
    }

    /// Append a hash record given as a hexadecimal string.
    /// The first hash describes the schema, the second the firmware.
    pub fn hash(mut self, hex: &str) -> Result<Self, EncodeError> {
        let mut bytes = vec![0u8; hex.len().div_ceil(2)];
        for (i, c) in hex.chars().enumerate() {
            let nibble = c
                .to_digit(16)
                .ok_or_else(|| EncodeError::InvalidHash(hex.to_string()))?
                as u8;
            bytes[i / 2] |= if i % 2 == 0 { nibble << 4 } else { nibble };
        }
        self.records.push((TYPE_HASH, bytes));
        Ok(self)
    }

    /// Append the register schema, compressed with zlib.
    pub fn schema(mut self, json: &str) -> Result<Self, EncodeError> {
        let mut encoder = ZlibEncoder::new(Vec::new(), Compression::best());
        encoder.write_all(json.as_bytes())?;
        self.records.push((TYPE_SCHEMA, encoder.finish()?));
        Ok(self)
    }

    /// Lay out all records followed by the terminator in a [`ROM_WORDS`] sized image.
    pub fn build(self) -> Result<Vec<u32>, EncodeError> {
        let mut image = Vec::with_capacity(ROM_WORDS);
        for (kind, mut bytes) in self.records {
            if bytes.len() % 2 != 0 {
                bytes.push(0);
            }
            let words = bytes.len() / 2;
            if words > MAX_RECORD_WORDS {
                return Err(EncodeError::RecordTooLarge { words });
            }
            image.push(u32::from(kind << 14) | words as u32);
            image.extend(
                bytes
                    .chunks_exact(2)
                    .map(|pair| u32::from(u16::from_be_bytes([pair[0], pair[1]]))),
            );
        }
        // room for the terminator
        if image.len() + 1 > ROM_WORDS {
            return Err(EncodeError::RomOverflow {
                needed: image.len() + 1,
                available: ROM_WORDS,
            });
        }
        image.resize(ROM_WORDS, 0);
        Ok(image)
    }
}
