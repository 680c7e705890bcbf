use thiserror::Error;

/// Errors produced by the segment codecs.
///
/// Every failure is local, synchronous and terminal for the call that raised
/// it; no partial results are ever returned.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PacketError {
    /// A value supplied at construction time cannot be represented on the
    /// wire.
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),

    /// The fixed header is truncated or carries an illegal field encoding.
    #[error("malformed header: {0}")]
    MalformedHeader(&'static str),

    /// The options field cannot be decoded.
    #[error("malformed options: {0}")]
    MalformedOptions(&'static str),

    /// An operation ran before its inputs were in place.
    #[error("precondition violation: {0}")]
    PreconditionViolation(&'static str),

    /// The serialized segment does not fit the medium's length window.
    #[error("segment length {len} outside [{min}, {max}]")]
    LengthConstraintViolation {
        /// Rejected total length.
        len: usize,
        /// Smallest admissible length.
        min: usize,
        /// Largest admissible length.
        max: usize,
    },
}
