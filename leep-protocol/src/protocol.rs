use std::fmt::Display;

/// UDP port a device listens on unless told otherwise.
pub const DEFAULT_PORT: u16 = 50006;

/// Bits 0-23 of an address word carry the register address.
pub const ADDR_MASK: u32 = 0x00ff_ffff;
/// Bit 28 of an address word marks the pair as a read.
pub const READ_FLAG: u32 = 0x1000_0000;
/// Bits that must be zero in an address word sent to a device.
pub const RESERVED_MASK: u32 = !(ADDR_MASK | READ_FLAG);

/// Most (address, value) pairs a single datagram may carry.
pub const MAX_PAIRS: usize = 127;
/// Fewest (address, value) pairs a single datagram may carry.
pub const MIN_PAIRS: usize = 3;
/// Size of the nonce header in bytes.
pub const HEADER_LEN: usize = 8;
/// Size of one (address, value) pair in bytes.
pub const PAIR_LEN: usize = 8;
/// Largest datagram a well behaved peer will ever send.
pub const MAX_DATAGRAM_LEN: usize = HEADER_LEN + MAX_PAIRS * PAIR_LEN;

/// Revision of the anti-spoof scheme.
///
/// Both revisions carry a random nonce in the first header word. They differ in how the
/// second header word is derived from it, so a client and a device must agree on the
/// revision or every reply is rejected as foreign.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub enum Version {
    /// The companion word is a masked copy of the nonce.
    V1,
    /// The companion word is the bitwise complement of the nonce.
    V2,
}

impl Version {
    /// Returns the latest supported version
    pub fn latest() -> Version {
        Version::V2
    }

    /// Computes the second header word for `nonce`.
    pub fn companion(&self, nonce: u32) -> u32 {
        match self {
            Version::V1 => nonce,
            Version::V2 => !nonce,
        }
    }
}

#[test]
fn companion_words() {
    assert_eq!(Version::V1.companion(0x1234_5678), 0x1234_5678);
    assert_eq!(Version::V2.companion(0x1234_5678), 0xedcb_a987);
    assert_eq!(Version::V2.companion(0), 0xffff_ffff);
}

impl Default for Version {
    fn default() -> Self {
        Self::latest()
    }
}

impl Display for Version {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Version::V1 => write!(f, "1"),
            Version::V2 => write!(f, "2"),
        }
    }
}

/// One (address, value) pair as it appears on the wire.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Pair {
    /// Address word: register address in bits 0-23, read flag in bit 28.
    pub address: u32,
    /// Value to write, or the value read back in a reply.
    pub value: u32,
}

impl Pair {
    /// A read of `addr`. Only the lower 24 bits of the address are used.
    pub fn read(addr: u32) -> Pair {
        Pair {
            address: (addr & ADDR_MASK) | READ_FLAG,
            value: 0,
        }
    }

    /// A write of `value` to `addr`. Only the lower 24 bits of the address are used.
    pub fn write(addr: u32, value: u32) -> Pair {
        Pair {
            address: addr & ADDR_MASK,
            value,
        }
    }

    pub fn is_read(&self) -> bool {
        self.address & READ_FLAG != 0
    }

    /// The register address without flags
    pub fn register_address(&self) -> u32 {
        self.address & ADDR_MASK
    }

    /// Whether any bit outside the address and read flag is set.
    pub fn has_reserved_bits(&self) -> bool {
        self.address & RESERVED_MASK != 0
    }
}

/// A single request or reply.
///
/// A reply mirrors its request: the same header words, the same address words in the same
/// order, with values replaced by the register contents for reads.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Datagram {
    pub nonce: u32,
    pub companion: u32,
    pub pairs: Vec<Pair>,
}

/// Why a reply does not belong to a request.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Mismatch {
    Length { expected: usize, got: usize },
    Nonce { expected: (u32, u32), got: (u32, u32) },
    Address { index: usize, expected: u32, got: u32 },
}

impl Display for Mismatch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Mismatch::Length { expected, got } => {
                write!(f, "reply length {} does not match request length {}", got, expected)
            }
            Mismatch::Nonce { expected, got } => write!(
                f,
                "reply nonce {:08x}:{:08x} does not match {:08x}:{:08x}",
                got.0, got.1, expected.0, expected.1
            ),
            Mismatch::Address {
                index,
                expected,
                got,
            } => write!(
                f,
                "reply address {:08x} at pair {} does not match {:08x}",
                got, index, expected
            ),
        }
    }
}

impl Datagram {
    /// Builds a request for `pairs` with the header derived from `nonce`.
    pub fn request(version: Version, nonce: u32, pairs: Vec<Pair>) -> Datagram {
        Datagram {
            nonce,
            companion: version.companion(nonce),
            pairs,
        }
    }

    /// Encoded size in bytes
    pub fn byte_len(&self) -> usize {
        HEADER_LEN + self.pairs.len() * PAIR_LEN
    }

    /// The reply a device produces for this request, given the value of each pair after
    /// processing.
    pub fn reply_with(&self, values: impl IntoIterator<Item = u32>) -> Datagram {
        Datagram {
            nonce: self.nonce,
            companion: self.companion,
            pairs: self
                .pairs
                .iter()
                .zip(values)
                .map(|(pair, value)| Pair {
                    address: pair.address,
                    value,
                })
                .collect(),
        }
    }

    /// Checks that `reply` answers this request.
    pub fn check_reply(&self, reply: &Datagram) -> Result<(), Mismatch> {
        if self.pairs.len() != reply.pairs.len() {
            return Err(Mismatch::Length {
                expected: self.byte_len(),
                got: reply.byte_len(),
            });
        }
        if (self.nonce, self.companion) != (reply.nonce, reply.companion) {
            return Err(Mismatch::Nonce {
                expected: (self.nonce, self.companion),
                got: (reply.nonce, reply.companion),
            });
        }
        for (index, (sent, got)) in self.pairs.iter().zip(&reply.pairs).enumerate() {
            if sent.address != got.address {
                return Err(Mismatch::Address {
                    index,
                    expected: sent.address,
                    got: got.address,
                });
            }
        }
        Ok(())
    }

    /// The values carried by the pairs, in order.
    pub fn values(&self) -> impl Iterator<Item = u32> + '_ {
        self.pairs.iter().map(|pair| pair.value)
    }
}
