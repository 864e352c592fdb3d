use crate::protocols::tcp::tcp_parsing::TcpHeader;

/// A header together with the payload it was checksummed over
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    pub header: TcpHeader,
    pub text: Vec<u8>,
}

impl Segment {
    pub fn new(header: TcpHeader, text: Vec<u8>) -> Self {
        Self { header, text }
    }

    /// The sequence number of the first octet of the segment
    pub fn seq(&self) -> u32 {
        self.header.seq
    }

    /// Header and payload laid out as they go on the wire
    pub fn serialize(&self) -> Vec<u8> {
        let mut out = self.header.serialize();
        out.extend_from_slice(&self.text);
        out
    }
}
