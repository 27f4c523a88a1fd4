use std::{io, net::SocketAddr, time::Duration};

use futures::{SinkExt, StreamExt};
use leep_protocol::{Datagram, MAX_PAIRS, MIN_PAIRS, codec::DatagramCodec};
use tokio::net::{ToSocketAddrs, UdpSocket};
use tokio_util::{sync::CancellationToken, udp::UdpFramed};

use crate::RegisterBackend;

#[derive(Debug, Clone)]
pub struct Config {
    /// Requests with more pairs are dropped without reply
    pub max_pairs: usize,
    /// Interval at which [`RegisterBackend::tick`] is called
    pub tick: Option<Duration>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_pairs: MAX_PAIRS,
            tick: None,
        }
    }
}

#[derive(Debug)]
pub struct Server<T: RegisterBackend> {
    backend: T,
    config: Config,
}

/// Builder to create a [Server] instance and modify configuration options
///
/// # Example
///
/// ```ignore
/// use leep_sim::server::Builder;
/// use std::time::Duration;
///
/// let server = Builder::new()
///     .tick(Duration::from_millis(100))
///     .build(backend);
/// ```
#[derive(Default)]
pub struct Builder {
    config: Config,
}

impl Builder {
    pub fn new() -> Builder {
        Builder::default()
    }

    /// Set the largest number of pairs accepted in one request
    pub fn max_pairs(mut self, pairs: usize) -> Self {
        self.config.max_pairs = pairs;
        self
    }

    /// Call the backend's tick method periodically
    pub fn tick(mut self, interval: Duration) -> Self {
        self.config.tick = Some(interval);
        self
    }

    /// Build and return the server
    pub fn build<T: RegisterBackend>(self, backend: T) -> Server<T> {
        Server::new(backend, self.config)
    }
}

async fn next_tick(ticker: &mut Option<tokio::time::Interval>) {
    match ticker {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => std::future::pending().await,
    }
}

impl<T: RegisterBackend> Server<T> {
    pub fn new(backend: T, config: Config) -> Server<T> {
        Server { backend, config }
    }

    pub fn backend(&self) -> &T {
        &self.backend
    }

    /// Binds to `addr` and serves requests until `token` is cancelled.
    pub async fn listen(&self, addr: impl ToSocketAddrs, token: CancellationToken) -> io::Result<()> {
        let socket = UdpSocket::bind(addr).await?;
        log::info!("Simulator listening on {}", socket.local_addr()?);
        self.serve(socket, token).await
    }

    /// Serves requests arriving on `socket` until `token` is cancelled.
    pub async fn serve(&self, socket: UdpSocket, token: CancellationToken) -> io::Result<()> {
        let mut framed = UdpFramed::new(socket, DatagramCodec);
        let mut ticker = self
            .config
            .tick
            .filter(|interval| !interval.is_zero())
            .map(tokio::time::interval);

        loop {
            tokio::select! {
                _ = token.cancelled() => {
                    log::info!("Simulator stopped");
                    return Ok(());
                }
                _ = next_tick(&mut ticker) => self.backend.tick(),
                frame = framed.next() => match frame {
                    Some(Ok((request, peer))) => {
                        if let Some(reply) = self.process(&request, peer) {
                            framed.send((reply, peer)).await?;
                        }
                    }
                    Some(Err(err)) => log::error!("Dropping request: {}", err),
                    None => return Ok(()),
                },
            }
        }
    }

    /// Applies every pair of `request` in order and builds the reply.
    pub fn process(&self, request: &Datagram, peer: SocketAddr) -> Option<Datagram> {
        log::debug!("{} Recv {} pairs", peer, request.pairs.len());
        if request.pairs.len() > self.config.max_pairs {
            log::error!(
                "{}: request with {} pairs exceeds limit of {}",
                peer,
                request.pairs.len(),
                self.config.max_pairs
            );
            return None;
        }
        if request.pairs.len() < MIN_PAIRS {
            log::warn!("{}: request with only {} pairs", peer, request.pairs.len());
        }

        let values = request.pairs.iter().map(|pair| {
            if pair.has_reserved_bits() {
                log::warn!("{}: unused bits set in address {:08x}", peer, pair.address);
            }
            let addr = pair.register_address();
            if pair.is_read() {
                let value = self.backend.read(addr);
                log::trace!("read {:06x} -> {:08x}", addr, value);
                value
            } else {
                log::trace!("write {:06x} <- {:08x}", addr, pair.value);
                self.backend.write(addr, pair.value);
                pair.value
            }
        });
        Some(request.reply_with(values))
    }
}
