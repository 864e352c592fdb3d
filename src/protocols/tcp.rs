//! A minimal implementation of the [Transmission Control
//! Protocol](https://www.rfc-editor.org/rfc/rfc9293.html).
//!
//! Only passive opens are supported. A [`Listener`] answers every SYN on its
//! port with a SYN+ACK and considers the connection established at once. Each
//! [`Connection`] delivers the peer's bytes strictly in order, retransmits
//! unacknowledged data on a timeout derived from measured round-trip times,
//! and paces outstanding data with a congestion window counted in segments.

use self::tcp_parsing::{verify_checksum, TcpHeader, TcpHeaderBuilder};
use super::{utility::Endpoint, Ipv4Address};
use crate::{
    config::Config,
    logging::{segment_event, Direction},
    network::{Delivery, SharedNetwork},
};
use dashmap::DashMap;
use rand::{rngs::SmallRng, Rng, SeedableRng};
use std::{
    fmt::{self, Display, Formatter},
    sync::{Arc, Mutex, RwLock},
};
use tokio::sync::mpsc::UnboundedReceiver;

pub mod connection;
mod rtt;
mod tcb;
pub mod tcp_parsing;
mod timer;

pub use connection::{Connection, ConnectionError, ConnectionStats};
pub use tcb::State;

use tcb::Tcb;

/// Called with each newly accepted connection
pub type AcceptCallback = Arc<dyn Fn(Arc<Connection>) + Send + Sync>;
/// Called with each in-order payload a connection receives
pub type ReceiveCallback = Arc<dyn Fn(&Arc<Connection>, &[u8]) + Send + Sync>;

/// Accepts connections on one port and routes inbound segments to them.
pub struct Listener {
    config: Config,
    network: SharedNetwork,
    /// A lookup table for connections based on their endpoints
    connections: DashMap<ConnectionId, Arc<Connection>>,
    on_accept: RwLock<Option<AcceptCallback>>,
    /// Source of initial sequence numbers
    isn: Mutex<SmallRng>,
}

impl Listener {
    /// Creates a listener that sends through `network`. Nothing is received
    /// until the listener is [run](Listener::run) or fed segments by hand.
    pub fn new(config: Config, network: SharedNetwork) -> Arc<Self> {
        let isn = match config.isn_seed {
            Some(seed) => SmallRng::seed_from_u64(seed),
            None => SmallRng::from_entropy(),
        };
        Arc::new(Self {
            config,
            network,
            connections: Default::default(),
            on_accept: Default::default(),
            isn: Mutex::new(isn),
        })
    }

    /// The port this listener accepts segments on
    pub fn port(&self) -> u16 {
        self.config.port
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Sets the function called once for every accepted connection. Replaces
    /// any callback registered earlier.
    pub fn register_accept<F>(&self, on_accept: F)
    where
        F: Fn(Arc<Connection>) + Send + Sync + 'static,
    {
        *self.on_accept.write().unwrap() = Some(Arc::new(on_accept));
    }

    /// Handles deliveries in arrival order until the network hangs up.
    pub async fn run(self: Arc<Self>, mut deliveries: UnboundedReceiver<Delivery>) {
        while let Some(delivery) = deliveries.recv().await {
            self.handle_segment(delivery.source, delivery.destination, &delivery.segment);
        }
        tracing::debug!(port = self.config.port, "Network closed, listener stopping");
    }

    /// Processes one raw segment sent from `source` to `destination`.
    pub fn handle_segment(
        self: &Arc<Self>,
        source: Ipv4Address,
        destination: Ipv4Address,
        segment: &[u8],
    ) {
        let header = match TcpHeader::from_bytes(segment) {
            Ok(header) => header,
            Err(e) => {
                tracing::warn!("Dropping malformed segment from {}: {}", source, e);
                return;
            }
        };

        if header.dst_port != self.config.port {
            tracing::debug!(
                port = self.config.port,
                "Dropping segment for port {}",
                header.dst_port
            );
            return;
        }

        if !self.config.ignore_checksum {
            if let Err(e) = verify_checksum(segment, source, destination) {
                tracing::warn!("Dropping segment with incorrect checksum: {}", e);
                return;
            }
        }

        let text = &segment[header.bytes()..];
        let id = ConnectionId {
            local: Endpoint::new(destination, header.dst_port),
            remote: Endpoint::new(source, header.src_port),
        };

        if header.ctl.syn() {
            segment_event(Direction::Incoming, id.local, id.remote, &header, text.len());
            self.accept(id, &header);
            return;
        }

        // Cloned out so that no table lock is held while the connection runs
        // application callbacks
        let connection = self.connections.get(&id).map(|entry| entry.value().clone());
        match connection {
            Some(connection) => connection.segment_arrives(&header, text),
            None => tracing::info!(connection = %id, "Dropping segment for unknown connection"),
        }
    }

    /// Completes the passive open for a SYN, replacing any connection that
    /// already had the same identifier.
    fn accept(self: &Arc<Self>, id: ConnectionId, syn: &TcpHeader) {
        let iss = self.isn.lock().unwrap().gen::<u32>() >> 1;
        let ack = syn.seq.wrapping_add(1);

        let reply = TcpHeaderBuilder::new(id.local.port, id.remote.port, iss)
            .syn()
            .ack(ack)
            .wnd(self.config.window_size)
            .build(id.local.address, id.remote.address, &[]);
        let reply = match reply {
            Ok(reply) => reply,
            Err(e) => {
                tracing::error!("Failed to build SYN+ACK: {}", e);
                return;
            }
        };

        let tcb = Tcb::new(id, iss, ack, &self.config);
        let connection = Connection::new(tcb, self.network.clone(), Arc::downgrade(self));
        if let Some(stale) = self.connections.insert(id, connection.clone()) {
            tracing::debug!(connection = %id, "SYN replaced a live connection");
            stale.reset();
        }

        segment_event(Direction::Outgoing, id.local, id.remote, &reply, 0);
        self.network.send(reply.serialize(), id.remote.address);
        tracing::info!(connection = %id, iss, "Accepted connection");

        let on_accept = self.on_accept.read().unwrap().clone();
        if let Some(on_accept) = on_accept {
            on_accept(connection);
        }
    }

    /// Closes the connection with the given identifier, as if by
    /// [`Connection::close`].
    pub fn close(&self, id: ConnectionId) -> Result<(), CloseError> {
        let connection = self.connections.get(&id).map(|entry| entry.value().clone());
        match connection {
            Some(connection) => Ok(connection.close()?),
            None => Err(CloseError::UnknownConnection(id)),
        }
    }

    /// Stops routing segments to `connection` if it is still the table entry
    /// for its identifier.
    pub(crate) fn release(&self, connection: &Arc<Connection>) {
        self.connections
            .remove_if(&connection.id(), |_, entry| Arc::ptr_eq(entry, connection));
    }

    /// The live connection with the given identifier
    pub fn connection(&self, id: ConnectionId) -> Option<Arc<Connection>> {
        self.connections.get(&id).map(|entry| entry.value().clone())
    }

    /// The number of connections in the table
    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }
}

/// An error that occurred during [`Listener::close`]
#[derive(Debug, thiserror::Error)]
pub enum CloseError {
    #[error("No connection is open for {0}")]
    UnknownConnection(ConnectionId),
    #[error("{0}")]
    Connection(#[from] ConnectionError),
}

/// A pair of endpoints that uniquely identifies a TCP connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct ConnectionId {
    /// The local endpoint
    pub local: Endpoint,
    /// The remote endpoint
    pub remote: Endpoint,
}

impl ConnectionId {
    /// Create a new connection ID from a pair of endpoints
    pub const fn new(local: Endpoint, remote: Endpoint) -> Self {
        Self { local, remote }
    }

    /// Get a matching connection ID for the remote TCP.
    pub const fn reverse(self) -> Self {
        Self {
            local: self.remote,
            remote: self.local,
        }
    }
}

impl Display for ConnectionId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{} <-> {}", self.local, self.remote)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::networks::Capture;
    use tracing_test::traced_test;

    const LOCAL: Endpoint = Endpoint::new(Ipv4Address::new([10, 0, 0, 1]), 80);
    const REMOTE: Endpoint = Endpoint::new(Ipv4Address::new([10, 0, 0, 2]), 4000);

    fn listener() -> (Arc<Listener>, Arc<Capture>) {
        let capture = Arc::new(Capture::new());
        let listener = Listener::new(Config::new(LOCAL.port).isn_seed(1), capture.clone());
        (listener, capture)
    }

    fn syn(seq: u32) -> Vec<u8> {
        TcpHeaderBuilder::new(REMOTE.port, LOCAL.port, seq)
            .syn()
            .build(REMOTE.address, LOCAL.address, &[])
            .unwrap()
            .serialize()
    }

    #[test]
    fn connection_ids_reverse() {
        let id = ConnectionId::new(LOCAL, REMOTE);
        assert_eq!(id.reverse().local, REMOTE);
        assert_eq!(id.reverse().reverse(), id);
        assert_eq!(id.to_string(), "10.0.0.1:80 <-> 10.0.0.2:4000");
    }

    #[traced_test]
    #[tokio::test]
    async fn corrupted_segments_are_logged_and_dropped() {
        let (listener, capture) = listener();
        let mut segment = syn(100);
        segment[4] ^= 0xff;
        listener.handle_segment(REMOTE.address, LOCAL.address, &segment);
        assert!(capture.is_empty());
        assert_eq!(listener.connection_count(), 0);
        assert!(logs_contain("incorrect checksum"));
    }

    #[traced_test]
    #[tokio::test]
    async fn truncated_segments_are_logged_and_dropped() {
        let (listener, capture) = listener();
        listener.handle_segment(REMOTE.address, LOCAL.address, &syn(100)[..12]);
        assert!(capture.is_empty());
        assert!(logs_contain("malformed segment"));
    }

    #[traced_test]
    #[tokio::test]
    async fn segments_for_unknown_connections_are_dropped() {
        let (listener, capture) = listener();
        let segment = TcpHeaderBuilder::new(REMOTE.port, LOCAL.port, 5)
            .ack(6)
            .build(REMOTE.address, LOCAL.address, b"hi")
            .unwrap();
        let mut bytes = segment.serialize();
        bytes.extend_from_slice(b"hi");
        listener.handle_segment(REMOTE.address, LOCAL.address, &bytes);
        assert!(capture.is_empty());
        assert!(logs_contain("unknown connection"));
    }

    #[tokio::test]
    async fn initial_sequence_numbers_fit_in_31_bits() {
        let (listener, capture) = listener();
        for port in 1..200u16 {
            let segment = TcpHeaderBuilder::new(port, LOCAL.port, 0)
                .syn()
                .build(REMOTE.address, LOCAL.address, &[])
                .unwrap()
                .serialize();
            listener.handle_segment(REMOTE.address, LOCAL.address, &segment);
        }
        let replies = capture.take_segments().unwrap();
        assert_eq!(replies.len(), 199);
        assert!(replies.iter().all(|(header, _)| header.seq < 1 << 31));
        assert_eq!(listener.connection_count(), 199);
    }

    #[tokio::test]
    async fn closing_an_unknown_connection_fails() {
        let (listener, _capture) = listener();
        let id = ConnectionId::new(LOCAL, REMOTE);
        assert!(matches!(
            listener.close(id),
            Err(CloseError::UnknownConnection(unknown)) if unknown == id
        ));
    }
}
