//! # LEEP Client
//!
//! A Rust client library for FPGA based low level RF controllers speaking the LEEP
//! register access protocol.
//!
//! ## Overview
//!
//! A device publishes the description of all of its registers in a ROM. On connect, the
//! client reads and decodes the ROM, after which registers are accessed by name. Names of
//! registers belonging to repeated blocks of firmware are resolved with instance tokens,
//! so `("dsp_tag", [1])` addresses `shell_1_dsp_tag`.
//!
//! Besides plain register access, this crate provides:
//!
//! - Synchronization with the waveform acquisition engine of the device ([`acquire`])
//! - Assembly of programs for the on-device write sequencer ([`sequencer`])
//! - A registry that closes all open devices together ([`registry`])
//!
//! For the wire format, see the [`leep_protocol`](https://docs.rs/leep-protocol/) crate.
//!
//! ## Basic Usage
//!
//! ### Connecting to a Device
//!
//! ```ignore
//! use leep_client::{config::Config, registry};
//!
//! let mut dev = registry::open("leep://192.168.1.10", Config::default())?;
//! ```
//!
//! ### Reading and Writing Registers
//!
//! ```ignore
//! use leep_client::access::Value;
//!
//! dev.reg_write(&[("dsp_chan_keep", Value::from(0xc00u32))], &[0.into()])?;
//! let values = dev.reg_read(&["dsp_chan_keep", "slow_data"], &[0.into()])?;
//! ```
//!
//! ### Waiting for Fresh Waveforms
//!
//! ```ignore
//! use leep_client::acquire::WaitOptions;
//!
//! dev.reg_write(&[("proc_setmp", Value::from(1000))], &[0.into()])?;
//! // Returns once a capture started after the write above
//! dev.wait_for_acq(&WaitOptions::default().tagged(true), &[0.into()])?;
//! let waveforms = dev.get_channels(&[0, 1], &[0.into()])?;
//! ```
//!
//! ## Thread Model
//!
//! All operations are blocking. A device handle has at most one request in flight and must
//! not be shared between threads without external locking. Several handles to the same
//! device are safe on the wire, but nothing prevents them from interleaving register
//! updates.
//!
//! ## Related Crates
//!
//! - [`leep_protocol`](https://docs.rs/leep-protocol/) - Wire format, ROM and schema
//! - [`leep_sim`](https://docs.rs/leep-sim/) - Device simulator
pub mod access;
pub mod acquire;
pub mod config;
pub mod device;
pub mod error;
pub mod registry;
pub mod regmap;
pub mod sequencer;
pub mod transport;

pub use device::{Device, LeepDevice, RegisterAccess};
pub use error::{Error, Result};
