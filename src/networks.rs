//! Implementations of [`Network`](crate::Network).

mod capture;
pub use capture::Capture;

mod unreliable;
pub use unreliable::{Faults, Unreliable};
