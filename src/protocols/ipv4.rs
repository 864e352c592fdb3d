//! Network-layer addressing used by the transport.

mod ipv4_address;
pub use ipv4_address::Ipv4Address;

/// The IP protocol number carried in the pseudo-header of TCP checksums.
pub const TCP_PROTOCOL_NUMBER: u8 = 6;
