//! Protocol implementations: the network-layer address type, the TCP
//! listener and connections, and shared utilities.

pub mod ipv4;
pub mod tcp;
pub mod utility;

pub use ipv4::Ipv4Address;
pub use tcp::{Connection, ConnectionId, Listener};
pub use utility::Endpoint;
