use super::Segment;
use tokio::time::Instant;

/// A segment awaiting acknowledgment. Records when it was sent so that an
/// acknowledgment can yield a round-trip sample.
#[derive(Debug, Clone)]
pub struct Transmit {
    pub segment: Segment,
    /// When the segment was first sent. Cleared once the segment may have
    /// been retransmitted, since a sample taken from it would be ambiguous.
    pub sent_at: Option<Instant>,
}

impl Transmit {
    pub fn new(segment: Segment, sent_at: Instant) -> Self {
        Self {
            segment,
            sent_at: Some(sent_at),
        }
    }
}
