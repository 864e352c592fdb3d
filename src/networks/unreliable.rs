use crate::{
    network::{Delivery, Network, SharedNetwork},
    protocols::Ipv4Address,
};
use dashmap::DashMap;
use rand::{rngs::SmallRng, Rng, SeedableRng};
use std::{
    sync::{Arc, Mutex},
    time::Duration,
};
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};

/// How badly an [`Unreliable`] network treats the segments it carries. Each
/// probability is in the range [0, 1] and applies per segment.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Faults {
    /// Chance that a segment is dropped
    pub loss: f64,
    /// Chance that a segment is delivered twice
    pub duplicate: f64,
    /// Chance that one byte of a segment is flipped
    pub corrupt: f64,
    /// Upper bound on a uniformly random delivery delay. Unequal delays
    /// reorder segments.
    pub max_delay: Duration,
}

impl Faults {
    /// The same faults with every probability forced into [0, 1]. NaN counts
    /// as zero.
    pub fn clamped(self) -> Self {
        let probability = |p: f64| if p.is_nan() { 0.0 } else { p.clamp(0.0, 1.0) };
        Self {
            loss: probability(self.loss),
            duplicate: probability(self.duplicate),
            corrupt: probability(self.corrupt),
            max_delay: self.max_delay,
        }
    }
}

/// A simulated network with unreliable delivery between attached addresses.
pub struct Unreliable {
    inner: Arc<Inner>,
}

struct Inner {
    /// A random number generator to decide the fate of each segment
    rng: Mutex<SmallRng>,
    faults: Faults,
    /// Where to deliver segments for each attached address
    mailboxes: DashMap<Ipv4Address, UnboundedSender<Delivery>>,
}

impl Unreliable {
    /// Creates a new network. The same `seed` yields the same pattern of
    /// faults for the same traffic. Probabilities outside [0, 1] are clamped.
    pub fn new(faults: Faults, seed: u64) -> Self {
        Self {
            inner: Arc::new(Inner {
                rng: Mutex::new(SmallRng::seed_from_u64(seed)),
                faults: faults.clamped(),
                mailboxes: Default::default(),
            }),
        }
    }

    /// Attaches a machine with the given address. Returns the handle the
    /// machine sends with and the receiving end of its deliveries.
    pub fn attach(&self, address: Ipv4Address) -> (SharedNetwork, UnboundedReceiver<Delivery>) {
        let (send, recv) = unbounded_channel();
        self.inner.mailboxes.insert(address, send);
        let handle = Arc::new(Attachment {
            address,
            inner: self.inner.clone(),
        });
        (handle, recv)
    }
}

/// One machine's view of an [`Unreliable`] network
struct Attachment {
    address: Ipv4Address,
    inner: Arc<Inner>,
}

impl Network for Attachment {
    fn send(&self, mut segment: Vec<u8>, destination: Ipv4Address) {
        let mailbox = match self.inner.mailboxes.get(&destination) {
            Some(mailbox) => mailbox.clone(),
            None => {
                tracing::debug!("No machine attached at {}, dropping segment", destination);
                return;
            }
        };

        let faults = self.inner.faults;
        let (copies, delays) = {
            let mut rng = self.inner.rng.lock().unwrap();
            if rng.gen_bool(faults.loss) {
                tracing::trace!("Dropping segment to {}", destination);
                return;
            }
            if !segment.is_empty() && rng.gen_bool(faults.corrupt) {
                let i = rng.gen_range(0..segment.len());
                segment[i] ^= 1 << rng.gen_range(0..8);
                tracing::trace!("Corrupting byte {} of segment to {}", i, destination);
            }
            let copies = if rng.gen_bool(faults.duplicate) { 2 } else { 1 };
            let mut delay = || {
                if faults.max_delay.is_zero() {
                    Duration::ZERO
                } else {
                    faults.max_delay.mul_f64(rng.gen::<f64>())
                }
            };
            (copies, [delay(), delay()])
        };

        for delay in delays.into_iter().take(copies) {
            let delivery = Delivery {
                source: self.address,
                destination,
                segment: segment.clone(),
            };
            if delay.is_zero() {
                // The receiver may already be gone if its machine shut down
                let _ = mailbox.send(delivery);
            } else {
                let mailbox = mailbox.clone();
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    let _ = mailbox.send(delivery);
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const A: Ipv4Address = Ipv4Address::new([10, 0, 0, 1]);
    const B: Ipv4Address = Ipv4Address::new([10, 0, 0, 2]);

    #[tokio::test]
    async fn perfect_network_delivers_in_order() {
        let network = Unreliable::new(Faults::default(), 0);
        let (a, _a_recv) = network.attach(A);
        let (_b, mut b_recv) = network.attach(B);

        for i in 0..10u8 {
            a.send(vec![i], B);
        }
        for i in 0..10u8 {
            let delivery = b_recv.recv().await.unwrap();
            assert_eq!(delivery.source, A);
            assert_eq!(delivery.destination, B);
            assert_eq!(delivery.segment, vec![i]);
        }
    }

    #[tokio::test]
    async fn total_loss_delivers_nothing() {
        let faults = Faults {
            loss: 1.0,
            ..Default::default()
        };
        let network = Unreliable::new(faults, 0);
        let (a, _a_recv) = network.attach(A);
        let (_b, mut b_recv) = network.attach(B);

        a.send(vec![1, 2, 3], B);
        assert!(b_recv.try_recv().is_err());
    }

    #[tokio::test]
    async fn duplicates_and_corrupts() {
        let faults = Faults {
            duplicate: 1.0,
            corrupt: 1.0,
            ..Default::default()
        };
        let network = Unreliable::new(faults, 7);
        let (a, _a_recv) = network.attach(A);
        let (_b, mut b_recv) = network.attach(B);

        a.send(vec![0; 8], B);
        let first = b_recv.recv().await.unwrap();
        let second = b_recv.recv().await.unwrap();
        assert_eq!(first, second);
        assert_eq!(first.segment.iter().filter(|b| **b != 0).count(), 1);
    }

    #[tokio::test]
    async fn out_of_range_probabilities_are_clamped() {
        let faults = Faults {
            loss: -0.5,
            duplicate: 7.0,
            corrupt: f64::NAN,
            ..Default::default()
        };
        assert_eq!(
            faults.clamped(),
            Faults {
                loss: 0.0,
                duplicate: 1.0,
                corrupt: 0.0,
                ..Default::default()
            }
        );

        let network = Unreliable::new(faults, 0);
        let (a, _a_recv) = network.attach(A);
        let (_b, mut b_recv) = network.attach(B);
        a.send(vec![5; 4], B);
        assert_eq!(b_recv.recv().await.unwrap().segment, vec![5; 4]);
        assert_eq!(b_recv.recv().await.unwrap().segment, vec![5; 4]);
    }

    #[tokio::test(start_paused = true)]
    async fn delays_can_reorder() {
        let faults = Faults {
            max_delay: Duration::from_millis(100),
            ..Default::default()
        };
        let network = Unreliable::new(faults, 3);
        let (a, _a_recv) = network.attach(A);
        let (_b, mut b_recv) = network.attach(B);

        for i in 0..32u8 {
            a.send(vec![i], B);
        }
        let mut received = vec![];
        for _ in 0..32 {
            received.push(b_recv.recv().await.unwrap().segment[0]);
        }
        let mut sorted = received.clone();
        sorted.sort();
        assert_eq!(sorted, (0..32).collect::<Vec<_>>());
        assert_ne!(received, sorted);
    }
}
