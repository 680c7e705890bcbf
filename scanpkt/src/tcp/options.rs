use byteorder::{ByteOrder, NetworkEndian};

use crate::PacketError;

const END_OF_LIST: u8 = 0;
const NOP: u8 = 1;
const MAX_SEG_SIZE: u8 = 2;
const WINDOW_SCALE: u8 = 3;
const SACK_PERMITTED: u8 = 4;
const TIMESTAMPS: u8 = 8;

// Most option bytes a header can carry: data offset tops out at 15 words.
const MAX_OPTIONS_LEN: usize = 40;

/// One tcp option.
///
/// Beyond the two single-byte markers, options are tag-length-value encoded.
/// Kinds with a fixed 32-bit word structure (timestamps) decode into
/// [`TcpOption::Sized`]; everything else is carried opaquely so options this
/// codec does not interpret still survive a round trip.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TcpOption {
    /// End of the option list (kind 0); the bytes behind it are padding.
    Eol,
    /// Single-byte no-op (kind 1), commonly used to align later options.
    Nop,
    /// A TLV option whose payload is a run of 32-bit big-endian words.
    Sized {
        /// Option kind byte.
        kind: u8,
        /// Payload words in wire order.
        values: Vec<u32>,
    },
    /// A TLV option carried opaquely.
    Raw {
        /// Option kind byte.
        kind: u8,
        /// Raw payload bytes.
        data: Vec<u8>,
    },
}

impl TcpOption {
    /// Timestamps option (kind 8) with value `ts` and echo reply `ts_echo`.
    pub fn timestamps(ts: u32, ts_echo: u32) -> Self {
        TcpOption::Sized {
            kind: TIMESTAMPS,
            values: vec![ts, ts_echo],
        }
    }

    /// Maximum segment size option (kind 2).
    pub fn mss(mss: u16) -> Self {
        let mut data = vec![0; 2];
        NetworkEndian::write_u16(&mut data, mss);
        TcpOption::Raw {
            kind: MAX_SEG_SIZE,
            data,
        }
    }

    /// Window scale option (kind 3).
    pub fn window_scale(shift: u8) -> Self {
        TcpOption::Raw {
            kind: WINDOW_SCALE,
            data: vec![shift],
        }
    }

    /// Sack-permitted option (kind 4).
    pub fn sack_permitted() -> Self {
        TcpOption::Raw {
            kind: SACK_PERMITTED,
            data: Vec::new(),
        }
    }

    fn encoded_len(&self) -> usize {
        match self {
            TcpOption::Eol | TcpOption::Nop => 1,
            TcpOption::Sized { values, .. } => 2 + 4 * values.len(),
            TcpOption::Raw { data, .. } => 2 + data.len(),
        }
    }

    fn write(&self, out: &mut Vec<u8>) {
        match self {
            TcpOption::Eol => out.push(END_OF_LIST),
            TcpOption::Nop => out.push(NOP),
            TcpOption::Sized { kind, values } => {
                out.push(*kind);
                out.push((2 + 4 * values.len()) as u8);
                for value in values {
                    let mut word = [0; 4];
                    NetworkEndian::write_u32(&mut word, *value);
                    out.extend_from_slice(&word);
                }
            }
            TcpOption::Raw { kind, data } => {
                out.push(*kind);
                out.push((2 + data.len()) as u8);
                out.extend_from_slice(data);
            }
        }
    }
}

/// The ordered option list of one tcp segment.
///
/// Encoding pads the list with end-of-list bytes until the total length is a
/// multiple of 4, so the data offset always lands on a word boundary.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TcpOptions {
    options: Vec<TcpOption>,
}

impl TcpOptions {
    /// Take ownership of `options`, rejecting lists the 4-bit data-offset
    /// field cannot describe.
    pub fn new(options: Vec<TcpOption>) -> Result<Self, PacketError> {
        let mut raw_len = 0;
        for option in &options {
            let encoded = option.encoded_len();
            if encoded > usize::from(u8::MAX) {
                return Err(PacketError::InvalidArgument(
                    "option payload overflows its length byte",
                ));
            }
            raw_len += encoded;
        }
        if aligned_len(raw_len) > MAX_OPTIONS_LEN {
            return Err(PacketError::InvalidArgument(
                "encoded options exceed 40 bytes",
            ));
        }
        Ok(Self { options })
    }

    /// An empty option list.
    pub fn empty() -> Self {
        Self::default()
    }

    /// The options, in wire order.
    pub fn options(&self) -> &[TcpOption] {
        &self.options
    }

    /// Byte length of the encoded field, padding included.
    pub fn byte_len(&self) -> usize {
        aligned_len(self.options.iter().map(TcpOption::encoded_len).sum())
    }

    /// Encode the list, padded to 32-bit alignment.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.byte_len());
        for option in &self.options {
            option.write(&mut out);
        }
        while out.len() % 4 != 0 {
            out.push(END_OF_LIST);
        }
        out
    }

    /// Decode the byte range selected by the header's data-offset field.
    pub fn from_bytes(buf: &[u8]) -> Result<Self, PacketError> {
        let mut options = Vec::new();
        let mut rest = buf;
        while let Some(&kind) = rest.first() {
            match kind {
                END_OF_LIST => {
                    // whatever follows is padding
                    options.push(TcpOption::Eol);
                    break;
                }
                NOP => {
                    options.push(TcpOption::Nop);
                    rest = &rest[1..];
                }
                _ => {
                    if rest.len() < 2 {
                        return Err(PacketError::MalformedOptions(
                            "option truncated before its length byte",
                        ));
                    }
                    let len = usize::from(rest[1]);
                    if len < 2 {
                        return Err(PacketError::MalformedOptions(
                            "option length below the 2-byte minimum",
                        ));
                    }
                    if len > rest.len() {
                        return Err(PacketError::MalformedOptions(
                            "option length runs past the end of the field",
                        ));
                    }
                    options.push(decode_sized(kind, &rest[2..len]));
                    rest = &rest[len..];
                }
            }
        }
        Ok(Self { options })
    }
}

fn aligned_len(len: usize) -> usize {
    (len + 3) & !3
}

// Timestamps is the only kind with a fixed word arity; everything else stays
// opaque so unknown kinds round-trip untouched.
fn decode_sized(kind: u8, data: &[u8]) -> TcpOption {
    if kind == TIMESTAMPS && data.len() == 8 {
        TcpOption::Sized {
            kind,
            values: vec![
                NetworkEndian::read_u32(&data[0..4]),
                NetworkEndian::read_u32(&data[4..8]),
            ],
        }
    } else {
        TcpOption::Raw {
            kind,
            data: data.to_vec(),
        }
    }
}
