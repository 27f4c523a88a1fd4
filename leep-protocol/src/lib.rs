//! # LEEP Protocol Library
//!
//! This crate implements the wire format of LEEP, the lightweight UDP protocol used to
//! access the 32 bit memory mapped registers of FPGA based low level RF controllers.
//!
//! ## Overview
//!
//! A client talks to a device by exchanging datagrams. Each request carries a random nonce
//! and a batch of register reads and writes; the device answers with a reply of the same
//! shape. On top of this, every device publishes a self describing ROM that holds a
//! compressed JSON description of all of its registers.
//!
//! This library provides:
//!
//! - Encoding and decoding of request and reply datagrams ([`Datagram`])
//! - Validation of replies against their request ([`Datagram::check_reply`])
//! - Decoding and building of ROM images ([`rom`])
//! - A validated, strongly typed register schema ([`schema`])
//!
//! ## Message Format
//!
//! All words are big-endian 32 bit integers:
//!
//! ```text
//! ┌─────────┬───────────┬──────────┬─────────┬─────┬──────────┬─────────┐
//! │ nonce   │ companion │ address0 │ value0  │ ... │ addressN │ valueN  │
//! └─────────┴───────────┴──────────┴─────────┴─────┴──────────┴─────────┘
//! ```
//!
//! - **companion**: derived from the nonce, see [`Version`]
//! - **address**: bits 0-23 hold the register address, bit 28 marks a read
//! - **value**: the value to write; ignored for reads and replaced by the register
//!   contents in the reply
//!
//! A datagram carries between [`MIN_PAIRS`] and [`MAX_PAIRS`] pairs.
//!
//! ## Basic Usage
//!
//! ```
//! use leep_protocol::{Datagram, Pair, Version};
//!
//! let request = Datagram::request(
//!     Version::V2,
//!     0x1234_5678,
//!     vec![Pair::read(0x800), Pair::read(0x801), Pair::write(0x10, 42)],
//! );
//! let bytes = request.to_bytes();
//! assert_eq!(bytes.len(), 32);
//!
//! // A device echoes the request with values filled in
//! let reply = request.reply_with([0x4005, 0x6c6c, 42]);
//! let decoded = Datagram::from_bytes(&reply.to_bytes()).unwrap();
//! assert!(request.check_reply(&decoded).is_ok());
//! ```
//!
//! ## Thread Safety
//!
//! The types in this library are plain data and can be shared across threads.
//! I/O is left to the caller.

pub mod protocol;
pub use protocol::*;
pub mod codec;
pub mod error;
pub mod rom;
pub mod schema;
