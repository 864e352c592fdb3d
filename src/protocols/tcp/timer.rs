use std::time::Duration;
use tokio::task::JoinHandle;

/// A one-shot retransmission timer backed by a spawned sleep.
///
/// Every arming bumps a generation number that is passed to the expiry
/// callback. A callback that raced a cancellation or re-arm presents a stale
/// generation to [`fired`](RetransmitTimer::fired) and should be ignored.
#[derive(Debug, Default)]
pub struct RetransmitTimer {
    handle: Option<JoinHandle<()>>,
    generation: u64,
}

impl RetransmitTimer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cancels any pending expiry, then schedules `on_expiry` to run after
    /// `delay`. Must be called from within a Tokio runtime.
    pub fn arm<F>(&mut self, delay: Duration, on_expiry: F)
    where
        F: FnOnce(u64) + Send + 'static,
    {
        self.cancel();
        self.generation = self.generation.wrapping_add(1);
        let generation = self.generation;
        self.handle = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            on_expiry(generation);
        }));
    }

    /// Cancels the pending expiry, if any. Calling this on an idle timer does
    /// nothing.
    pub fn cancel(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
        self.generation = self.generation.wrapping_add(1);
    }

    /// Called by an expiry callback. Returns whether `generation` is the
    /// current arming, in which case the timer is now idle.
    pub fn fired(&mut self, generation: u64) -> bool {
        if self.handle.is_some() && generation == self.generation {
            self.handle = None;
            true
        } else {
            false
        }
    }

    pub fn is_armed(&self) -> bool {
        self.handle.is_some()
    }
}

impl Drop for RetransmitTimer {
    fn drop(&mut self) {
        self.cancel();
    }
}
