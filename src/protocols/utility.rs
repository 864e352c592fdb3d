//! Contains utilities shared by the protocol implementations.

use super::ipv4::Ipv4Address;
use std::fmt::{self, Display};

/// A calculator for the one's-complement checksum used by TCP.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Checksum(u16);

impl Checksum {
    /// Creates a new checksum calculator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a `u16` to the checksum value with end-around carry.
    pub fn add_u16(&mut self, value: u16) {
        let (sum, carry) = self.0.overflowing_add(value);
        self.0 = sum + carry as u16;
    }

    /// Adds `u16` formed by two `u8`s to the checksum value.
    pub fn add_u8(&mut self, a: u8, b: u8) {
        self.add_u16(u16::from_be_bytes([a, b]));
    }

    /// Adds two `u16`s to the checksum value by splitting a `u32` in half.
    pub fn add_u32(&mut self, value: [u8; 4]) {
        self.add_u8(value[0], value[1]);
        self.add_u8(value[2], value[3]);
    }

    /// Adds every byte of `bytes` as a sequence of big-endian `u16`s. An odd
    /// trailing byte is padded with zero.
    pub fn add_bytes(&mut self, bytes: &[u8]) {
        let mut chunks = bytes.chunks_exact(2);
        for pair in &mut chunks {
            self.add_u8(pair[0], pair[1]);
        }
        if let [last] = chunks.remainder() {
            self.add_u8(*last, 0);
        }
    }

    /// Adds the pseudo-header TCP and UDP prepend to their checksummed bytes.
    pub fn add_pseudo_header(
        &mut self,
        src_address: Ipv4Address,
        dst_address: Ipv4Address,
        protocol: u8,
        length: u16,
    ) {
        self.add_u32(src_address.to_bytes());
        self.add_u32(dst_address.to_bytes());
        self.add_u8(0, protocol);
        self.add_u16(length);
    }

    /// The one's complement of the running sum. Over a segment that already
    /// carries a correct checksum this is zero.
    pub fn complement(&self) -> u16 {
        !self.0
    }

    /// Computes the value to store in a checksum field.
    pub fn as_u16(&self) -> u16 {
        match self.0 {
            // Use that there are two one's complement representations of zero
            // and pick the nonzero one to differentiate from an unused
            // checksum.
            0xffff => 0xffff,
            sum => !sum,
        }
    }
}

/// An address and port pair naming one end of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Endpoint {
    pub address: Ipv4Address,
    pub port: u16,
}

impl Endpoint {
    pub const fn new(address: Ipv4Address, port: u16) -> Self {
        Self { address, port }
    }
}

impl Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.address, self.port)
    }
}
