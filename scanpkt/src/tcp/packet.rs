use std::fmt;

use byteorder::{ByteOrder, NetworkEndian};
use bytes::{BufMut, Bytes, BytesMut};

use crate::checksum_utils;
use crate::layer::{IpLayer, IpLayerRef};
use crate::PacketError;

use super::control_bits::TcpControlBits;
use super::options::TcpOptions;

/// Byte length of the fixed tcp header.
pub const TCP_HEADER_LEN: usize = 20;

// Data offset of a bare header, in 32-bit words.
const OFFSET_WORDS_MIN: u16 = 5;

// Bits 9-11 of the offset/flags field; must be zero on the wire.
const RESERVED_MASK: u16 = 0x0e00;
const FLAGS_MASK: u16 = 0x01ff;

/// One tcp segment as a pure value.
///
/// The packet owns its options and payload; the checksum is never stored and
/// is recomputed on every [`to_bytes`](TcpPacket::to_bytes) call. The
/// lower-layer packet behind [`IpLayer`] is attached by the orchestration
/// layer after construction and is read only to build the checksum
/// pseudo-header.
#[derive(Debug, Clone)]
pub struct TcpPacket {
    source_port: u16,
    dest_port: u16,
    seq_number: u32,
    ack_number: u32,
    flags: TcpControlBits,
    window_size: u16,
    urgent_ptr: u16,
    options: TcpOptions,
    payload: Bytes,
    underlying: Option<IpLayerRef>,
}

impl TcpPacket {
    /// Start building a segment from `source_port` to `dest_port`.
    ///
    /// Everything else defaults to zero/empty, except the window size, which
    /// starts at 65535.
    pub fn builder(source_port: u16, dest_port: u16) -> TcpPacketBuilder {
        TcpPacketBuilder {
            packet: TcpPacket {
                source_port,
                dest_port,
                seq_number: 0,
                ack_number: 0,
                flags: TcpControlBits::new(),
                window_size: 65535,
                urgent_ptr: 0,
                options: TcpOptions::empty(),
                payload: Bytes::new(),
                underlying: None,
            },
        }
    }

    /// Source port.
    #[inline]
    pub fn source_port(&self) -> u16 {
        self.source_port
    }

    /// Destination port.
    #[inline]
    pub fn dest_port(&self) -> u16 {
        self.dest_port
    }

    /// Sequence number.
    #[inline]
    pub fn seq_number(&self) -> u32 {
        self.seq_number
    }

    /// Acknowledgment number.
    #[inline]
    pub fn ack_number(&self) -> u32 {
        self.ack_number
    }

    /// Control bits.
    #[inline]
    pub fn flags(&self) -> TcpControlBits {
        self.flags
    }

    /// Window size.
    #[inline]
    pub fn window_size(&self) -> u16 {
        self.window_size
    }

    /// Urgent pointer.
    #[inline]
    pub fn urgent_ptr(&self) -> u16 {
        self.urgent_ptr
    }

    /// Option list.
    #[inline]
    pub fn options(&self) -> &TcpOptions {
        &self.options
    }

    /// Payload bytes.
    #[inline]
    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    /// The lower-layer packet this segment is composed over, if attached.
    #[inline]
    pub fn underlying_packet(&self) -> Option<&IpLayerRef> {
        self.underlying.as_ref()
    }

    /// Attach the lower-layer packet used for pseudo-header construction.
    ///
    /// The handle is shared, not owned; it must stay alive across the next
    /// [`to_bytes`](TcpPacket::to_bytes) call.
    pub fn set_underlying_packet(&mut self, ip: IpLayerRef) {
        self.underlying = Some(ip);
    }

    /// Serialize the segment, computing the checksum over the pseudo-header,
    /// header, options and payload.
    pub fn to_bytes(&self) -> Result<Bytes, PacketError> {
        let ip = self.underlying.as_deref().ok_or(
            PacketError::PreconditionViolation("no underlying ip packet attached"),
        )?;

        let options_bytes = self.options.to_bytes();
        // alignment is established by the options codec; a violation here is
        // a codec bug, not a user error
        debug_assert!(options_bytes.len() % 4 == 0);

        let data_offset = OFFSET_WORDS_MIN + (options_bytes.len() / 4) as u16;
        let offset_flags = data_offset << 12 | self.flags.packed();

        let segment_len = usize::from(data_offset) * 4 + self.payload.len();
        ip.validate_length(segment_len)?;

        let mut header = [0u8; TCP_HEADER_LEN];
        NetworkEndian::write_u16(&mut header[0..2], self.source_port);
        NetworkEndian::write_u16(&mut header[2..4], self.dest_port);
        NetworkEndian::write_u32(&mut header[4..8], self.seq_number);
        NetworkEndian::write_u32(&mut header[8..12], self.ack_number);
        NetworkEndian::write_u16(&mut header[12..14], offset_flags);
        NetworkEndian::write_u16(&mut header[14..16], self.window_size);
        // bytes 16-17 stay zero until the checksum is known
        NetworkEndian::write_u16(&mut header[18..20], self.urgent_ptr);

        let phdr = PseudoHeader::new(ip, segment_len as u16);
        let cksum = !checksum_utils::combine(&[
            phdr.calc_checksum(),
            checksum_utils::from_slice(&header[..]),
            checksum_utils::from_slice(&options_bytes[..]),
            checksum_utils::from_slice(&self.payload[..]),
        ]);
        NetworkEndian::write_u16(&mut header[16..18], cksum);

        let mut out = BytesMut::with_capacity(segment_len);
        out.put_slice(&header[..]);
        out.put_slice(&options_bytes[..]);
        out.put_slice(&self.payload[..]);
        Ok(out.freeze())
    }

    /// Parse a captured segment.
    ///
    /// The returned packet carries no lower-layer reference; attach one with
    /// [`set_underlying_packet`](TcpPacket::set_underlying_packet) before
    /// serializing it again. The received checksum is not verified here (see
    /// [`verify_ipv4_checksum`]).
    pub fn from_bytes(bytes: &[u8]) -> Result<TcpPacket, PacketError> {
        if bytes.len() < TCP_HEADER_LEN {
            return Err(PacketError::MalformedHeader("truncated fixed header"));
        }
        let (header, rest) = bytes.split_at(TCP_HEADER_LEN);

        let source_port = NetworkEndian::read_u16(&header[0..2]);
        let dest_port = NetworkEndian::read_u16(&header[2..4]);
        let seq_number = NetworkEndian::read_u32(&header[4..8]);
        let ack_number = NetworkEndian::read_u32(&header[8..12]);
        let offset_flags = NetworkEndian::read_u16(&header[12..14]);
        let window_size = NetworkEndian::read_u16(&header[14..16]);
        // bytes 16-17 carry the received checksum, which is recomputed on
        // the next serialization rather than stored
        let urgent_ptr = NetworkEndian::read_u16(&header[18..20]);

        if offset_flags & RESERVED_MASK != 0 {
            return Err(PacketError::MalformedHeader("reserved bits set"));
        }
        let data_offset = offset_flags >> 12;
        if data_offset < OFFSET_WORDS_MIN {
            return Err(PacketError::MalformedHeader(
                "data offset below the 5-word minimum",
            ));
        }
        let flags = TcpControlBits::from_packed(offset_flags & FLAGS_MASK);

        let options_len = usize::from(data_offset - OFFSET_WORDS_MIN) * 4;
        if options_len > rest.len() {
            return Err(PacketError::MalformedHeader(
                "data offset runs past the end of the segment",
            ));
        }
        let options = TcpOptions::from_bytes(&rest[..options_len])?;
        let payload = Bytes::copy_from_slice(&rest[options_len..]);

        Ok(TcpPacket {
            source_port,
            dest_port,
            seq_number,
            ack_number,
            flags,
            window_size,
            urgent_ptr,
            options,
            payload,
            underlying: None,
        })
    }
}

impl PartialEq for TcpPacket {
    fn eq(&self, other: &Self) -> bool {
        // the lower layer compares by value through its contract, never by
        // handle identity
        let layers_eq = match (&self.underlying, &other.underlying) {
            (None, None) => true,
            (Some(a), Some(b)) => {
                a.source_addr() == b.source_addr()
                    && a.dest_addr() == b.dest_addr()
                    && a.protocol() == b.protocol()
            }
            _ => false,
        };

        layers_eq
            && self.source_port == other.source_port
            && self.dest_port == other.dest_port
            && self.seq_number == other.seq_number
            && self.ack_number == other.ack_number
            && self.flags == other.flags
            && self.window_size == other.window_size
            && self.urgent_ptr == other.urgent_ptr
            && self.options == other.options
            && self.payload == other.payload
    }
}

impl Eq for TcpPacket {}

impl fmt::Display for TcpPacket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "tcp src_port={} dst_port={} seq={} ack={} flags=({}) win={} urg={} options={} payload={}b",
            self.source_port,
            self.dest_port,
            self.seq_number,
            self.ack_number,
            self.flags,
            self.window_size,
            self.urgent_ptr,
            self.options.options().len(),
            self.payload.len(),
        )
    }
}

/// Builder for [`TcpPacket`], obtained from [`TcpPacket::builder`].
#[derive(Debug)]
pub struct TcpPacketBuilder {
    packet: TcpPacket,
}

impl TcpPacketBuilder {
    /// Sequence number.
    pub fn seq_number(mut self, value: u32) -> Self {
        self.packet.seq_number = value;
        self
    }

    /// Acknowledgment number.
    pub fn ack_number(mut self, value: u32) -> Self {
        self.packet.ack_number = value;
        self
    }

    /// Control bits.
    pub fn flags(mut self, value: TcpControlBits) -> Self {
        self.packet.flags = value;
        self
    }

    /// Window size.
    pub fn window_size(mut self, value: u16) -> Self {
        self.packet.window_size = value;
        self
    }

    /// Urgent pointer.
    pub fn urgent_ptr(mut self, value: u16) -> Self {
        self.packet.urgent_ptr = value;
        self
    }

    /// Option list.
    pub fn options(mut self, value: TcpOptions) -> Self {
        self.packet.options = value;
        self
    }

    /// Payload bytes.
    pub fn payload(mut self, value: impl Into<Bytes>) -> Self {
        self.packet.payload = value.into();
        self
    }

    /// Finish the packet. The lower-layer reference is attached separately
    /// by the orchestration layer.
    pub fn build(self) -> TcpPacket {
        self.packet
    }
}

/// The synthetic structure summed into the checksum and never transmitted:
/// source address, destination address, one zero byte, protocol number and
/// the total segment length.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PseudoHeader {
    bytes: Vec<u8>,
}

impl PseudoHeader {
    /// Assemble from the lower layer and the total tcp segment length.
    pub fn new(ip: &dyn IpLayer, segment_len: u16) -> Self {
        let src = ip.source_addr();
        let dst = ip.dest_addr();

        let mut bytes = Vec::with_capacity(src.len() + dst.len() + 4);
        bytes.extend_from_slice(src);
        bytes.extend_from_slice(dst);
        bytes.push(0);
        bytes.push(ip.protocol().raw());
        let mut len = [0; 2];
        NetworkEndian::write_u16(&mut len, segment_len);
        bytes.extend_from_slice(&len);

        Self { bytes }
    }

    /// The assembled bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// RFC 1071 partial sum of the pseudo-header, for
    /// [`checksum_utils::combine`].
    pub fn calc_checksum(&self) -> u16 {
        checksum_utils::from_slice(&self.bytes)
    }
}

/// Whether the received checksum of a captured segment verifies against the
/// addressing in `ip`.
///
/// [`TcpPacket::from_bytes`] never runs this check itself; whether a failed
/// check discards a capture is caller policy.
pub fn verify_ipv4_checksum(segment: &[u8], ip: &dyn IpLayer) -> bool {
    if segment.len() < TCP_HEADER_LEN {
        return false;
    }
    let phdr = PseudoHeader::new(ip, segment.len() as u16);
    checksum_utils::combine(&[phdr.calc_checksum(), checksum_utils::from_slice(segment)]) == !0
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::ipv4::{IpProtocol, Ipv4Addr, Ipv4Flow, MAX_SEGMENT_LEN};
    use crate::tcp::options::TcpOption;

    // Ack probe of a 192.168.1.32 -> 35.160.240.60:443 exchange; the stack
    // padded the timestamps option with two leading nops, checksum 0x9156.
    static SEGMENT_BYTES: [u8; 32] = [
        0xe9, 0x34, 0x01, 0xbb, 0x53, 0xe4, 0xd8, 0x3d, 0xdb, 0x26, 0x22, 0xdf, 0x80, 0x10, 0x01,
        0xf5, 0x91, 0x56, 0x00, 0x00, 0x01, 0x01, 0x08, 0x0a, 0xc1, 0xdd, 0x08, 0x35, 0x15, 0xc5,
        0x18, 0xdd,
    ];

    fn probe_flow() -> Ipv4Flow {
        Ipv4Flow::new(
            Ipv4Addr([192, 168, 1, 32]),
            Ipv4Addr([35, 160, 240, 60]),
            IpProtocol::TCP,
        )
    }

    fn ack_probe() -> TcpPacket {
        let options = TcpOptions::new(vec![
            TcpOption::Nop,
            TcpOption::Nop,
            TcpOption::timestamps(3252488245, 365238493),
        ])
        .unwrap();

        let mut packet = TcpPacket::builder(59700, 443)
            .seq_number(1407506493)
            .ack_number(3676709599)
            .flags(TcpControlBits::new().with_ack(true))
            .window_size(501)
            .options(options)
            .build();
        packet.set_underlying_packet(Arc::new(probe_flow()));
        packet
    }

    #[test]
    fn segment_build() {
        let bytes = ack_probe().to_bytes().unwrap();
        assert_eq!(&bytes[..], &SEGMENT_BYTES[..]);
    }

    #[test]
    fn segment_parse() {
        let packet = TcpPacket::from_bytes(&SEGMENT_BYTES[..]).unwrap();

        assert_eq!(packet.source_port(), 59700);
        assert_eq!(packet.dest_port(), 443);
        assert_eq!(packet.seq_number(), 1407506493);
        assert_eq!(packet.ack_number(), 3676709599);
        assert_eq!(packet.flags(), TcpControlBits::new().with_ack(true));
        assert_eq!(packet.window_size(), 501);
        assert_eq!(packet.urgent_ptr(), 0);
        assert_eq!(
            packet.options().options(),
            &[
                TcpOption::Nop,
                TcpOption::Nop,
                TcpOption::timestamps(3252488245, 365238493),
            ]
        );
        assert!(packet.payload().is_empty());
        assert!(packet.underlying_packet().is_none());
    }

    #[test]
    fn round_trip() {
        let built = ack_probe();
        let wire = built.to_bytes().unwrap();

        let mut parsed = TcpPacket::from_bytes(&wire[..]).unwrap();
        assert!(parsed.underlying_packet().is_none());

        parsed.set_underlying_packet(Arc::new(probe_flow()));
        assert_eq!(parsed, built);
        assert_eq!(parsed.to_bytes().unwrap(), wire);
    }

    #[test]
    fn round_trip_with_payload() {
        // odd payload length exercises the checksum's trailing-byte path;
        // ports sit at both ends of their range
        let mut packet = TcpPacket::builder(0, 65535)
            .seq_number(0xdeadbeef)
            .flags(TcpControlBits::new().with_psh(true).with_ack(true))
            .window_size(1024)
            .payload(&b"probe payload\n!"[..])
            .build();
        packet.set_underlying_packet(Arc::new(probe_flow()));

        let wire = packet.to_bytes().unwrap();
        assert_eq!(wire.len(), TCP_HEADER_LEN + 15);
        assert!(verify_ipv4_checksum(&wire[..], &probe_flow()));

        let parsed = TcpPacket::from_bytes(&wire[..]).unwrap();
        assert_eq!(parsed.source_port(), 0);
        assert_eq!(parsed.dest_port(), 65535);
        assert_eq!(&parsed.payload()[..], b"probe payload\n!");
    }

    #[test]
    fn clone_compares_equal() {
        let packet = ack_probe();
        assert_eq!(packet.clone(), packet);
    }

    #[test]
    fn reserved_bits_rejected() {
        for bit in 9..12 {
            let mut bytes = SEGMENT_BYTES;
            let raw = NetworkEndian::read_u16(&bytes[12..14]) | (1 << bit);
            NetworkEndian::write_u16(&mut bytes[12..14], raw);

            assert_eq!(
                TcpPacket::from_bytes(&bytes[..]),
                Err(PacketError::MalformedHeader("reserved bits set"))
            );
        }
    }

    #[test]
    fn truncated_header_rejected() {
        assert_eq!(
            TcpPacket::from_bytes(&SEGMENT_BYTES[..TCP_HEADER_LEN - 1]),
            Err(PacketError::MalformedHeader("truncated fixed header"))
        );
    }

    #[test]
    fn bad_data_offset_rejected() {
        // data offset 4 words: below the fixed-header minimum
        let mut bytes = SEGMENT_BYTES;
        bytes[12] = 0x40 | (bytes[12] & 0x0f);
        assert_eq!(
            TcpPacket::from_bytes(&bytes[..]),
            Err(PacketError::MalformedHeader(
                "data offset below the 5-word minimum"
            ))
        );

        // data offset 15 words on a 32-byte capture: options overrun
        let mut bytes = SEGMENT_BYTES;
        bytes[12] = 0xf0 | (bytes[12] & 0x0f);
        assert_eq!(
            TcpPacket::from_bytes(&bytes[..]),
            Err(PacketError::MalformedHeader(
                "data offset runs past the end of the segment"
            ))
        );
    }

    #[test]
    fn malformed_options_propagate() {
        // data offset 6: one option word, holding kind 5 with length 10
        let mut bytes = [0u8; 24];
        bytes[..20].copy_from_slice(&SEGMENT_BYTES[..20]);
        bytes[12] = 0x60;
        bytes[13] = 0x10;
        bytes[20..24].copy_from_slice(&[0x05, 0x0a, 0x00, 0x00]);

        assert_eq!(
            TcpPacket::from_bytes(&bytes[..]),
            Err(PacketError::MalformedOptions(
                "option length runs past the end of the field"
            ))
        );
    }

    #[test]
    fn serialize_without_ip_layer_fails() {
        let packet = TcpPacket::builder(59700, 443).build();
        assert!(matches!(
            packet.to_bytes(),
            Err(PacketError::PreconditionViolation(_))
        ));
    }

    #[test]
    fn oversized_segment_rejected() {
        let mut packet = TcpPacket::builder(59700, 443)
            .payload(vec![0u8; MAX_SEGMENT_LEN - TCP_HEADER_LEN + 1])
            .build();
        packet.set_underlying_packet(Arc::new(probe_flow()));

        assert!(matches!(
            packet.to_bytes(),
            Err(PacketError::LengthConstraintViolation { .. })
        ));
    }

    #[test]
    fn checksum_verification_is_caller_policy() {
        assert!(verify_ipv4_checksum(&SEGMENT_BYTES[..], &probe_flow()));

        let mut corrupted = SEGMENT_BYTES;
        corrupted[5] ^= 0x01;
        assert!(!verify_ipv4_checksum(&corrupted[..], &probe_flow()));

        // a wrong flow fails verification the same way
        let other = Ipv4Flow::new(
            Ipv4Addr([192, 168, 1, 33]),
            Ipv4Addr([35, 160, 240, 60]),
            IpProtocol::TCP,
        );
        assert!(!verify_ipv4_checksum(&SEGMENT_BYTES[..], &other));

        // parsing still succeeds on a corrupted checksum
        assert!(TcpPacket::from_bytes(&corrupted[..]).is_ok());
    }

    #[test]
    fn pseudo_header_layout() {
        let phdr = PseudoHeader::new(&probe_flow(), 32);
        assert_eq!(
            phdr.as_bytes(),
            &[192, 168, 1, 32, 35, 160, 240, 60, 0, 6, 0, 32]
        );
    }

    #[test]
    fn display_form() {
        let packet = ack_probe();
        assert_eq!(
            packet.to_string(),
            "tcp src_port=59700 dst_port=443 seq=1407506493 ack=3676709599 \
             flags=(ack) win=501 urg=0 options=3 payload=0b"
        );
    }

    #[test]
    fn pnet_cross_check() {
        use pnet::packet::tcp::{self, TcpPacket as PnetTcp};
        use pnet::packet::Packet;

        let bytes = ack_probe().to_bytes().unwrap();
        let pkt = PnetTcp::new(&bytes[..]).unwrap();

        assert_eq!(pkt.get_source(), 59700);
        assert_eq!(pkt.get_destination(), 443);
        assert_eq!(pkt.get_sequence(), 1407506493);
        assert_eq!(pkt.get_acknowledgement(), 3676709599);
        assert_eq!(pkt.get_data_offset(), 8);
        assert_eq!(pkt.get_window(), 501);
        assert_eq!(pkt.get_urgent_ptr(), 0);
        assert_eq!(pkt.get_checksum(), 0x9156);
        assert!(pkt.payload().is_empty());

        let expected = tcp::ipv4_checksum(
            &pkt,
            &std::net::Ipv4Addr::new(192, 168, 1, 32),
            &std::net::Ipv4Addr::new(35, 160, 240, 60),
        );
        assert_eq!(pkt.get_checksum(), expected);
    }
}
