#![allow(dead_code)]

use minitcp::{
    networks::Capture,
    protocols::{
        tcp::tcp_parsing::{TcpHeader, TcpHeaderBuilder},
        Connection, ConnectionId, Endpoint, Ipv4Address, Listener,
    },
    Config,
};
use std::sync::{Arc, Mutex};

pub const SERVER: Endpoint = Endpoint::new(Ipv4Address::new([10, 0, 0, 1]), 80);
pub const CLIENT: Endpoint = Endpoint::new(Ipv4Address::new([10, 0, 0, 2]), 4000);
/// The sequence number on the client's SYN
pub const CLIENT_ISS: u32 = 100;
/// The identifier the server files the client's connection under
pub const ID: ConnectionId = ConnectionId::new(SERVER, CLIENT);

/// A listener on a capturing network, with applications recording every
/// accepted connection and received payload.
pub struct Harness {
    pub listener: Arc<Listener>,
    pub capture: Arc<Capture>,
    pub accepted: Arc<Mutex<Vec<Arc<Connection>>>>,
    received: Arc<Mutex<Vec<Vec<u8>>>>,
}

impl Harness {
    pub fn new(config: Config) -> Self {
        let capture = Arc::new(Capture::new());
        let listener = Listener::new(config, capture.clone());
        let accepted = Arc::new(Mutex::new(vec![]));
        let received = Arc::new(Mutex::new(vec![]));

        let on_accept = accepted.clone();
        let on_receive = received.clone();
        listener.register_accept(move |connection| {
            let on_receive = on_receive.clone();
            connection.register_receiver(move |_, payload| {
                on_receive.lock().unwrap().push(payload.to_vec())
            });
            on_accept.lock().unwrap().push(connection);
        });

        Self {
            listener,
            capture,
            accepted,
            received,
        }
    }

    /// Hands the listener a segment from the client.
    pub fn deliver(&self, header: TcpHeaderBuilder, text: &[u8]) {
        self.deliver_raw(&segment(header, text));
    }

    pub fn deliver_raw(&self, segment: &[u8]) {
        self.listener
            .handle_segment(CLIENT.address, SERVER.address, segment);
    }

    /// Sends the client's SYN. Returns the accepted connection and the
    /// server's initial sequence number.
    pub fn connect(&self) -> (Arc<Connection>, u32) {
        self.deliver(from_client(CLIENT_ISS).syn(), &[]);
        let replies = self.sent();
        assert_eq!(replies.len(), 1);
        let connection = self.accepted.lock().unwrap().last().unwrap().clone();
        (connection, replies[0].0.seq)
    }

    /// Everything the server sent since the last call
    pub fn sent(&self) -> Vec<(TcpHeader, Vec<u8>)> {
        self.capture.take_segments().unwrap()
    }

    /// Everything delivered to the application since the last call
    pub fn received(&self) -> Vec<Vec<u8>> {
        std::mem::take(&mut *self.received.lock().unwrap())
    }
}

pub fn from_client(seq: u32) -> TcpHeaderBuilder {
    TcpHeaderBuilder::new(CLIENT.port, SERVER.port, seq)
}

/// Serializes a checksummed client segment.
pub fn segment(header: TcpHeaderBuilder, text: &[u8]) -> Vec<u8> {
    let header = header.build(CLIENT.address, SERVER.address, text).unwrap();
    let mut segment = header.serialize();
    segment.extend_from_slice(text);
    segment
}
