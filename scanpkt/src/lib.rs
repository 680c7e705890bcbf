#![warn(missing_docs, missing_debug_implementations, rust_2018_idioms)]

//! Provide utilities for crafting and parsing raw tcp segments.
//!
//! The crate is a pure value codec: [`tcp::TcpPacket::to_bytes`] produces a
//! checksum-correct wire segment and [`tcp::TcpPacket::from_bytes`] decodes
//! captured bytes back into structured form. The network layer supplying
//! pseudo-header inputs stays behind the [`IpLayer`] contract.

#[macro_use]
mod macros;

mod bits;
pub use bits::{BitFlags, Bits};

mod error;
pub use error::PacketError;

mod layer;
pub use layer::{IpLayer, IpLayerRef};

pub mod checksum_utils;

pub mod ipv4;
pub mod tcp;
