//! Contains the [`Network`] trait and supporting types. A network is the
//! unreliable datagram service the transport runs on top of.

use crate::protocols::Ipv4Address;
use std::sync::Arc;

/// A segment in transit, as handed to the transport by the network layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    /// The address of the machine that sent the segment.
    pub source: Ipv4Address,
    /// The address the segment was sent to.
    pub destination: Ipv4Address,
    /// The raw segment, header included.
    pub segment: Vec<u8>,
}

/// Models the raw network-layer delivery service. Delivery is best effort:
/// segments may be dropped, duplicated, reordered or corrupted on the way.
///
/// Inbound segments flow the other way, as [`Delivery`] records fed to
/// [`Listener::run`](crate::protocols::Listener::run) in arrival order.
pub trait Network: Send + Sync {
    /// Hands a fully formed, checksummed segment to the network for delivery to
    /// `destination`. Must not block.
    fn send(&self, segment: Vec<u8>, destination: Ipv4Address);
}

/// A network shared between the listener and its connections.
pub type SharedNetwork = Arc<dyn Network>;
