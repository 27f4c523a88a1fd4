/// Read and write implementations for datagrams
use std::io::{self, Write};

use crate::{
    error::DecodeError,
    protocol::{Datagram, HEADER_LEN, PAIR_LEN, Pair},
};

fn be_word(buf: &[u8], offset: usize) -> u32 {
    u32::from_be_bytes([
        buf[offset],
        buf[offset + 1],
        buf[offset + 2],
        buf[offset + 3],
    ])
}

impl Datagram {
    /// Writes the datagram as a sequence of big-endian 32 bit words.
    pub fn write_to(&self, writer: &mut impl Write) -> io::Result<()> {
        writer.write_all(&self.nonce.to_be_bytes())?;
        writer.write_all(&self.companion.to_be_bytes())?;
        for pair in &self.pairs {
            writer.write_all(&pair.address.to_be_bytes())?;
            writer.write_all(&pair.value.to_be_bytes())?;
        }
        Ok(())
    }

    /// Encodes the datagram into a freshly allocated buffer
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.byte_len());
        // Writing into a Vec cannot fail
        let _ = self.write_to(&mut out);
        out
    }

    /// Decodes a datagram.
    ///
    /// Trailing bytes that do not form a complete (address, value) pair are ignored.
    pub fn from_bytes(buf: &[u8]) -> Result<Datagram, DecodeError> {
        if buf.len() < HEADER_LEN {
            return Err(DecodeError::ShortDatagram(buf.len()));
        }
        let trailing = (buf.len() - HEADER_LEN) % PAIR_LEN;
        if trailing != 0 {
            log::debug!("Ignoring {} trailing bytes in datagram", trailing);
        }
        let body = &buf[HEADER_LEN..buf.len() - trailing];
        let pairs = body
            .chunks_exact(PAIR_LEN)
            .map(|chunk| Pair {
                address: be_word(chunk, 0),
                value: be_word(chunk, 4),
            })
            .collect();
        Ok(Datagram {
            nonce: be_word(buf, 0),
            companion: be_word(buf, 4),
            pairs,
        })
    }
}

#[cfg(feature = "tokio")]
pub use framed::DatagramCodec;

#[cfg(feature = "tokio")]
mod framed {
    use bytes::{BufMut, BytesMut};
    use tokio_util::codec::{Decoder, Encoder};

    use crate::{error::DecodeError, protocol::Datagram};

    /// Codec for message oriented transports where every frame is one complete datagram,
    /// such as `tokio_util::udp::UdpFramed`.
    #[derive(Debug, Default, Clone, Copy)]
    pub struct DatagramCodec;

    impl Decoder for DatagramCodec {
        type Item = Datagram;
        type Error = DecodeError;

        fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Datagram>, DecodeError> {
            if src.is_empty() {
                return Ok(None);
            }
            let frame = src.split_to(src.len());
            Datagram::from_bytes(&frame).map(Some)
        }
    }

    impl Encoder<Datagram> for DatagramCodec {
        type Error = std::io::Error;

        fn encode(&mut self, item: Datagram, dst: &mut BytesMut) -> Result<(), std::io::Error> {
            dst.reserve(item.byte_len());
            item.write_to(&mut dst.writer())
        }
    }
}

#[cfg(test)]
mod test {
    use crate::error::DecodeError;
    use crate::protocol::{Datagram, Pair, Version};

    #[test]
    fn write_request() {
        let req = Datagram::request(
            Version::V2,
            0x0102_0304,
            vec![Pair::read(0x800), Pair::write(0x12, 0xaabb_ccdd), Pair::read(0)],
        );
        let out = req.to_bytes();
        assert_eq!(
            out,
            vec![
                0x01, 0x02, 0x03, 0x04, 0xfe, 0xfd, 0xfc, 0xfb, // header
                0x10, 0x00, 0x08, 0x00, 0x00, 0x00, 0x00, 0x00, // read 0x800
                0x00, 0x00, 0x00, 0x12, 0xaa, 0xbb, 0xcc, 0xdd, // write 0x12
                0x10, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, // read 0
            ]
        );
        assert_eq!(out.len(), req.byte_len());
    }

    #[test]
    fn read_reply() {
        let data = [
            0x00, 0x00, 0x00, 0x2a, 0xff, 0xff, 0xff, 0xd5, //
            0x10, 0x00, 0x00, 0x05, 0x00, 0x00, 0x01, 0x00,
        ];
        let reply = Datagram::from_bytes(&data).unwrap();
        assert_eq!(reply.nonce, 42);
        assert_eq!(reply.companion, !42);
        assert_eq!(reply.pairs, vec![Pair { address: 0x1000_0005, value: 0x100 }]);
    }

    #[test]
    fn trailing_junk_is_dropped() {
        let mut data = Datagram::request(Version::V1, 7, vec![Pair::read(1); 3]).to_bytes();
        data.extend_from_slice(&[0xff; 5]);
        let reply = Datagram::from_bytes(&data).unwrap();
        assert_eq!(reply.pairs.len(), 3);
    }

    #[test]
    fn short_datagram() {
        match Datagram::from_bytes(&[0, 1, 2]) {
            Err(DecodeError::ShortDatagram(3)) => {}
            other => panic!("expected ShortDatagram, got {:?}", other),
        }
    }
}
