//! # LEEP Device Simulator
//!
//! This crate serves simulated LEEP devices over UDP, for testing clients without
//! hardware.
//!
//! ## Architecture
//!
//! The crate is built around two main components:
//!
//! - **[`RegisterBackend`] Trait**: The register contents of a simulated device
//! - **[`server::Server`]**: Receives request datagrams, applies every read and write to
//!   the backend and sends back the reply
//!
//! Two backends are provided:
//!
//! - [`backends::regfile::RegisterFile`]: plain storage for every register of a schema,
//!   plus the ROM image describing that schema
//! - [`backends::rfs::RfsBackend`]: a register file with a model of the waveform
//!   acquisition engine. Writing a channel group's bit to `circle_buf_flip` captures a
//!   synthetic waveform into the group's circle buffer and stamps the slow buffer.
//!
//! ## Basic Usage
//!
//! ```ignore
//! use leep_sim::backends::regfile::RegisterFile;
//! use leep_sim::server::{Builder, Server};
//! use tokio_util::sync::CancellationToken;
//!
//! let backend = RegisterFile::from_json(&std::fs::read_to_string("regmap.json")?, "test")?;
//! let server = Builder::new().build(backend);
//! server.listen("127.0.0.1:50006", CancellationToken::new()).await?;
//! ```
//!
//! ## Logging
//!
//! This crate uses the `log` crate. Malformed requests, reserved address bits and accesses
//! of unknown addresses are reported as errors and warnings; every datagram is logged at
//! `debug` level.
pub mod backends;
pub mod error;
pub mod server;

/// Register storage of a simulated device.
///
/// Methods take `&self`; implementations use interior mutability.
pub trait RegisterBackend {
    /// Returns the contents of the register at `addr`.
    fn read(&self, addr: u32) -> u32;

    /// Writes `value` to the register at `addr`.
    fn write(&self, addr: u32, value: u32);

    /// Called periodically when the server is configured with a tick interval.
    fn tick(&self) {}
}

impl<T: RegisterBackend + ?Sized> RegisterBackend for std::sync::Arc<T> {
    fn read(&self, addr: u32) -> u32 {
        (**self).read(addr)
    }

    fn write(&self, addr: u32, value: u32) {
        (**self).write(addr, value)
    }

    fn tick(&self) {
        (**self).tick()
    }
}
