use std::fmt;
use std::sync::Arc;

use crate::ipv4::IpProtocol;
use crate::PacketError;

/// Contract the lower-layer (network) packet must satisfy so a transport
/// segment can be composed over it.
///
/// The segment codec only ever reads through this trait: addresses and the
/// protocol number feed the checksum pseudo-header, and the length check runs
/// once over the final serialized segment. Address width follows the
/// implementor's address family and must be consistent between the two
/// accessors.
pub trait IpLayer: fmt::Debug + Send + Sync {
    /// Raw source address bytes (4 for IPv4, 16 for IPv6).
    fn source_addr(&self) -> &[u8];

    /// Raw destination address bytes.
    fn dest_addr(&self) -> &[u8];

    /// Protocol number carried into the pseudo-header.
    fn protocol(&self) -> IpProtocol;

    /// Check a total segment length against the medium's constraints,
    /// returning it unchanged when admissible.
    fn validate_length(&self, len: usize) -> Result<usize, PacketError>;
}

/// Shared handle to a lower-layer packet.
///
/// The transport packet holds this without owning the network layer: the
/// link is resolved by the orchestration layer at composition time, and the
/// network side never gets an owned pointer back, so no reference cycle can
/// form.
pub type IpLayerRef = Arc<dyn IpLayer>;
