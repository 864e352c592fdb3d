//! User-level applications used to exercise the transport over a simulated
//! network.

mod echo;
pub use echo::Echo;

mod stop_and_wait;
pub use stop_and_wait::{ClientError, StopAndWait};
