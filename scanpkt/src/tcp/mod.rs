//! Tcp segment codec.

mod control_bits;
pub use control_bits::TcpControlBits;

mod options;
pub use options::{TcpOption, TcpOptions};

mod packet;
pub use packet::{
    verify_ipv4_checksum, PseudoHeader, TcpPacket, TcpPacketBuilder, TCP_HEADER_LEN,
};
