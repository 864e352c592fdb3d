//! A minimal reliable transport, a simplified TCP, running over an unreliable
//! datagram service.
//!
//! # Organization
//! - [`Listener`](protocols::Listener) accepts connections on a port and
//!   routes inbound segments to them
//! - [`Connection`](protocols::Connection) delivers bytes reliably and in
//!   order, with adaptive retransmission and a congestion window
//! - [`Network`] is the datagram service underneath; [`networks`] holds a
//!   capturing network for tests and a lossy one for simulation
//! - [`applications`] holds an echo server and a scripted client
//!
//! # Data flow
//!
//! The network hands each raw segment to [`Listener::run`](protocols::Listener::run),
//! which checks the port and checksum and demultiplexes on the pair of
//! endpoints. The connection updates its state, acknowledges, and calls the
//! application's receive callback. Application calls to `send` and `close`
//! flow the opposite way, down to [`Network::send`].

pub mod applications;
pub mod cli;

pub mod config;
pub use config::Config;

pub mod logging;

pub mod network;
pub use network::{Delivery, Network, SharedNetwork};

pub mod networks;
pub mod protocols;
