use crate::{
    network::Network,
    protocols::{
        tcp::tcp_parsing::{ParseError, TcpHeader},
        Ipv4Address,
    },
};
use std::sync::Mutex;

/// A network that delivers nothing and instead records every segment handed
/// to it, in order.
#[derive(Debug, Default)]
pub struct Capture {
    sent: Mutex<Vec<(Vec<u8>, Ipv4Address)>>,
}

impl Capture {
    pub fn new() -> Self {
        Self::default()
    }

    /// The number of segments sent so far
    pub fn len(&self) -> usize {
        self.sent.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Removes and returns everything captured so far.
    pub fn take(&self) -> Vec<(Vec<u8>, Ipv4Address)> {
        std::mem::take(&mut *self.sent.lock().unwrap())
    }

    /// Removes everything captured so far and splits each segment into its
    /// decoded header and its payload.
    pub fn take_segments(&self) -> Result<Vec<(TcpHeader, Vec<u8>)>, ParseError> {
        self.take()
            .into_iter()
            .map(|(segment, _)| {
                let header = TcpHeader::from_bytes(&segment)?;
                Ok((header, segment[header.bytes()..].to_vec()))
            })
            .collect()
    }
}

impl Network for Capture {
    fn send(&self, segment: Vec<u8>, destination: Ipv4Address) {
        self.sent.lock().unwrap().push((segment, destination));
    }
}
