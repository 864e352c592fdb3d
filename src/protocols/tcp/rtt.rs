//! Round-trip time estimation and the retransmission timeout derived from it.

use std::time::Duration;

/// Weight given to a new sample when smoothing the round-trip time.
const ALPHA: f64 = 0.125;
/// Weight given to a new deviation when smoothing the round-trip variation.
const BETA: f64 = 0.25;

/// A Jacobson/Karels estimator. Holds the smoothed round-trip time, its
/// deviation, and the retransmission timeout both imply.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RttEstimator {
    /// Smoothed round-trip time in seconds. `None` until the first sample.
    estimated: Option<f64>,
    /// Smoothed mean deviation in seconds. `None` until the first sample.
    deviation: Option<f64>,
    /// The current retransmission timeout in seconds
    timeout: f64,
    /// The smallest timeout a sample may produce, in seconds
    floor: f64,
}

impl RttEstimator {
    /// Creates an estimator that has not been sampled yet and times out after
    /// `initial_timeout`.
    pub fn new(initial_timeout: Duration) -> Self {
        Self {
            estimated: None,
            deviation: None,
            timeout: initial_timeout.as_secs_f64(),
            floor: 0.0,
        }
    }

    /// Keeps sampled timeouts at or above `floor`. Without one, a path with a
    /// steady round-trip time drives the timeout towards that time itself.
    pub fn with_floor(mut self, floor: Duration) -> Self {
        self.floor = floor.as_secs_f64();
        self
    }

    /// Folds a fresh round-trip sample into the estimate and returns the new
    /// retransmission timeout.
    pub fn sample(&mut self, rtt: Duration) -> Duration {
        let sample = rtt.as_secs_f64();
        let (estimated, deviation) = match (self.estimated, self.deviation) {
            (Some(estimated), Some(deviation)) => {
                let estimated = (1.0 - ALPHA) * estimated + ALPHA * sample;
                let deviation = (1.0 - BETA) * deviation + BETA * (sample - estimated).abs();
                (estimated, deviation)
            }
            _ => (sample, sample / 2.0),
        };
        self.estimated = Some(estimated);
        self.deviation = Some(deviation);
        self.timeout = (estimated + 4.0 * deviation).max(self.floor);
        self.timeout()
    }

    /// The current retransmission timeout
    pub fn timeout(&self) -> Duration {
        Duration::from_secs_f64(self.timeout)
    }

    /// The smoothed round-trip time, if any sample has been taken
    pub fn estimated(&self) -> Option<Duration> {
        self.estimated.map(Duration::from_secs_f64)
    }

    /// The smoothed round-trip deviation, if any sample has been taken
    pub fn deviation(&self) -> Option<Duration> {
        self.deviation.map(Duration::from_secs_f64)
    }
}
