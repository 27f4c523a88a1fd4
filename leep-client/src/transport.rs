//! Request/reply exchange with a single device.
//!
//! A [`Transport`] owns one UDP socket and has at most one datagram in flight. Replies
//! that do not answer the outstanding request (wrong length, foreign nonce or addresses
//! out of order) are logged and dropped while waiting continues. The wait for each
//! datagram is bounded by the configured timeout; there is no resend. A timeout too
//! large to add to the current [`Instant`] waits without bound.
use std::{
    io::ErrorKind,
    net::{SocketAddr, ToSocketAddrs, UdpSocket},
    time::{Duration, Instant},
};

use leep_protocol::{Datagram, MAX_PAIRS, MIN_PAIRS, Pair, Version};

use crate::{
    config::Config,
    error::{Error, Result},
};

// Larger than any valid reply so oversized foreign datagrams are seen whole and rejected
const RECV_BUFFER_LEN: usize = 2048;

pub struct Transport {
    socket: UdpSocket,
    dest: SocketAddr,
    timeout: Duration,
    version: Version,
}

impl Transport {
    /// Opens a socket for talking to the device at `addr`.
    pub fn connect(addr: impl ToSocketAddrs, config: &Config) -> Result<Transport> {
        let dest = addr
            .to_socket_addrs()?
            .next()
            .ok_or_else(|| Error::InvalidArgument("Device address does not resolve".into()))?;
        let socket = if dest.is_ipv4() {
            UdpSocket::bind("0.0.0.0:0")?
        } else {
            UdpSocket::bind("[::]:0")?
        };
        log::debug!(
            "Opened transport {} -> {} (timeout={:?}, version={})",
            socket.local_addr()?,
            dest,
            config.timeout,
            config.version
        );
        Ok(Transport {
            socket,
            dest,
            timeout: config.timeout,
            version: config.version,
        })
    }

    /// The device address
    pub fn dest(&self) -> SocketAddr {
        self.dest
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn set_timeout(&mut self, timeout: Duration) {
        self.timeout = timeout;
    }

    /// Exchanges any number of pairs with the device.
    ///
    /// Pairs are split into datagrams of at most [`MAX_PAIRS`]. The returned values are
    /// in the order of `pairs`: the register contents for reads, the echoed value for
    /// writes.
    pub fn exchange(&mut self, pairs: &[Pair]) -> Result<Vec<u32>> {
        let mut values = Vec::with_capacity(pairs.len());
        for chunk in pairs.chunks(MAX_PAIRS) {
            values.extend(self.exchange_datagram(chunk)?);
        }
        Ok(values)
    }

    /// Reads the given addresses.
    pub fn read(&mut self, addrs: impl IntoIterator<Item = u32>) -> Result<Vec<u32>> {
        let pairs: Vec<Pair> = addrs.into_iter().map(Pair::read).collect();
        self.exchange(&pairs)
    }

    fn exchange_datagram(&mut self, chunk: &[Pair]) -> Result<Vec<u32>> {
        let mut pairs = chunk.to_vec();
        if pairs.len() < MIN_PAIRS {
            pairs.resize(MIN_PAIRS, Pair::read(0));
        }
        let request = Datagram::request(self.version, rand::random(), pairs);
        let bytes = request.to_bytes();

        log::debug!("{} Send ({})", self.dest, bytes.len());
        log::trace!("{} Send {:02x?}", self.dest, bytes);
        self.socket.send_to(&bytes, self.dest)?;

        let deadline = Instant::now().checked_add(self.timeout);
        let mut buf = [0u8; RECV_BUFFER_LEN];
        loop {
            let remaining = match deadline {
                Some(deadline) => {
                    let remaining = deadline.saturating_duration_since(Instant::now());
                    if remaining.is_zero() {
                        return Err(Error::Timeout(self.timeout));
                    }
                    Some(remaining)
                }
                None => None,
            };
            self.socket.set_read_timeout(remaining)?;

            let (len, src) = match self.socket.recv_from(&mut buf) {
                Ok(received) => received,
                Err(err) if matches!(err.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {
                    return Err(Error::Timeout(self.timeout));
                }
                Err(err) => return Err(err.into()),
            };
            log::debug!("{} Recv ({})", src, len);
            log::trace!("{} Recv {:02x?}", src, &buf[..len]);

            let reply = match Datagram::from_bytes(&buf[..len]) {
                Ok(reply) => reply,
                Err(err) => {
                    log::error!("Ignoring reply from {}: {}", src, err);
                    continue;
                }
            };
            if let Err(mismatch) = request.check_reply(&reply) {
                log::error!("Ignoring reply from {}: {}", src, mismatch);
                continue;
            }

            return Ok(reply.values().take(chunk.len()).collect());
        }
    }
}
