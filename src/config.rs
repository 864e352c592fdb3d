//! Tunables for a [`Listener`](crate::protocols::Listener) and the connections
//! it accepts.

use crate::protocols::tcp::tcp_parsing::BASE_HEADER_OCTETS;
use std::time::Duration;

/// The maximum segment size used when none is configured. Matches an Ethernet
/// MTU less the IPv4 and TCP base headers.
pub const DEFAULT_MSS: usize = 1460;

/// The largest payload a segment can carry, since the TCP length in the
/// checksum pseudo-header is 16 bits wide.
pub const MAX_MSS: usize = u16::MAX as usize - BASE_HEADER_OCTETS;

/// Configuration for a listener and its connections.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// The local port the listener accepts segments on
    pub port: u16,
    /// Skip checksum verification of inbound segments
    pub ignore_checksum: bool,
    /// The maximum number of payload bytes per segment
    pub mss: usize,
    /// The retransmission timeout before any round-trip sample is taken
    pub initial_timeout: Duration,
    /// The smallest retransmission timeout round-trip samples may produce
    pub min_timeout: Duration,
    /// The congestion window of a fresh connection, in segments
    pub initial_window: usize,
    /// The receive window advertised in every emitted header
    pub window_size: u16,
    /// Answer an out-of-order segment that carries data or FIN with a
    /// duplicate ACK of the current receive cursor
    pub reack_out_of_order: bool,
    /// Seed for initial sequence numbers. Drawn from entropy when `None`.
    pub isn_seed: Option<u64>,
}

impl Config {
    /// A configuration listening on `port` with every other setting at its
    /// default.
    pub fn new(port: u16) -> Self {
        Self {
            port,
            ..Default::default()
        }
    }

    pub fn ignore_checksum(mut self, ignore: bool) -> Self {
        self.ignore_checksum = ignore;
        self
    }

    /// Sets the maximum segment size, clamped to between one and [`MAX_MSS`].
    pub fn mss(mut self, mss: usize) -> Self {
        self.mss = mss.clamp(1, MAX_MSS);
        self
    }

    pub fn initial_timeout(mut self, timeout: Duration) -> Self {
        self.initial_timeout = timeout;
        self
    }

    pub fn min_timeout(mut self, timeout: Duration) -> Self {
        self.min_timeout = timeout;
        self
    }

    /// Sets the initial congestion window. Values below one are raised to one.
    pub fn initial_window(mut self, segments: usize) -> Self {
        self.initial_window = segments.max(1);
        self
    }

    pub fn window_size(mut self, window: u16) -> Self {
        self.window_size = window;
        self
    }

    pub fn reack_out_of_order(mut self, reack: bool) -> Self {
        self.reack_out_of_order = reack;
        self
    }

    pub fn isn_seed(mut self, seed: u64) -> Self {
        self.isn_seed = Some(seed);
        self
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 0,
            ignore_checksum: false,
            mss: DEFAULT_MSS,
            initial_timeout: Duration::from_secs(1),
            min_timeout: Duration::ZERO,
            initial_window: 1,
            window_size: u16::MAX,
            reack_out_of_order: false,
            isn_seed: None,
        }
    }
}
