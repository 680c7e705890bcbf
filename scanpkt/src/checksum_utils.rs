//! Provide utility functions for calculating the RFC 1071 internet checksum.
//!
//! The same one's-complement sum underpins the IPv4, TCP and UDP checksums,
//! so it lives here once and the codecs share it.

use byteorder::{ByteOrder, NetworkEndian};

/// Compute an RFC 1071 compliant checksum (without the final complement).
pub fn from_slice(mut data: &[u8]) -> u16 {
    let mut accum: u32 = 0;

    // Take by 2 bytes and sum them.
    while data.len() >= 2 {
        accum += u32::from(NetworkEndian::read_u16(data));
        data = &data[2..];
    }

    // An odd trailing byte occupies the high half of its 16-bit word.
    if let Some(&byte) = data.first() {
        accum += u32::from(byte) << 8;
    }

    propagate_carries(accum)
}

/// Combine several RFC 1071 compliant checksums.
///
/// Only valid when every summed slice started at an even offset of the
/// logical byte stream.
pub fn combine(checksums: &[u16]) -> u16 {
    let mut accum: u32 = 0;
    for &word in checksums {
        accum += u32::from(word);
    }
    propagate_carries(accum)
}

/// The complemented checksum of `data`, as transmitted on the wire.
pub fn checksum(data: &[u8]) -> u16 {
    !from_slice(data)
}

fn propagate_carries(word: u32) -> u16 {
    let sum = (word >> 16) + (word & 0xffff);
    ((sum >> 16) as u16) + (sum as u16)
}
