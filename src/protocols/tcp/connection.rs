use super::{
    tcb::{Arrival, State, Tcb, TimerRequest},
    tcp_parsing::{BuildHeaderError, TcpHeader},
    timer::RetransmitTimer,
    ConnectionId, Listener, ReceiveCallback,
};
use crate::{
    logging::{segment_event, Direction},
    network::SharedNetwork,
};
use std::{
    sync::{Arc, Mutex, RwLock, Weak},
    time::Duration,
};
use tokio::time::Instant;

/// One passively opened connection. Created by a [`Listener`] when a SYN
/// arrives and handed to the application through the accept callback.
///
/// Inbound segments, application calls and timer expiries are serialized on
/// the connection's lock. Methods that may transmit must be called from
/// within a Tokio runtime, since transmitting arms the retransmission timer.
///
/// Inbound segments are additionally processed one at a time through to the
/// end of their receive callbacks, so payloads reach the application in
/// sequence order even when segments are handed over on several threads. A
/// receive callback must therefore not pass segments for its own connection
/// back into the listener.
pub struct Connection {
    id: ConnectionId,
    network: SharedNetwork,
    listener: Weak<Listener>,
    inner: Mutex<Inner>,
    /// Held from engine update until the last receive callback returns
    delivering: Mutex<()>,
    receiver: RwLock<Option<ReceiveCallback>>,
}

struct Inner {
    tcb: Tcb,
    timer: RetransmitTimer,
}

impl Connection {
    pub(crate) fn new(tcb: Tcb, network: SharedNetwork, listener: Weak<Listener>) -> Arc<Self> {
        Arc::new(Self {
            id: tcb.id(),
            network,
            listener,
            inner: Mutex::new(Inner {
                tcb,
                timer: RetransmitTimer::new(),
            }),
            delivering: Mutex::new(()),
            receiver: Default::default(),
        })
    }

    /// The endpoints identifying this connection
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Sets the function called with each in-order payload the peer sends.
    /// An empty payload means the peer has closed its side. Replaces any
    /// receiver registered earlier.
    pub fn register_receiver<F>(&self, receiver: F)
    where
        F: Fn(&Arc<Connection>, &[u8]) + Send + Sync + 'static,
    {
        *self.receiver.write().unwrap() = Some(Arc::new(receiver));
    }

    /// Queues `text` for reliable delivery, split into segments of at most
    /// one MSS, and transmits whatever the congestion window allows.
    pub fn send(self: &Arc<Self>, text: &[u8]) -> Result<(), ConnectionError> {
        let mut inner = self.inner.lock().unwrap();
        let result = inner.tcb.send(text, Instant::now());
        self.flush(&mut inner);
        result
    }

    /// Sends FIN and forgets the connection. Data still queued or awaiting
    /// acknowledgment is dropped and the owning listener stops routing
    /// segments here.
    pub fn close(self: &Arc<Self>) -> Result<(), ConnectionError> {
        {
            let mut inner = self.inner.lock().unwrap();
            inner.tcb.close()?;
            self.flush(&mut inner);
        }
        if let Some(listener) = self.listener.upgrade() {
            listener.release(self);
        }
        tracing::debug!(connection = %self.id, "Connection closed");
        Ok(())
    }

    /// A snapshot of the connection's sending and receiving state
    pub fn stats(&self) -> ConnectionStats {
        let inner = self.inner.lock().unwrap();
        let tcb = &inner.tcb;
        ConnectionStats {
            state: tcb.state(),
            peer_closed: tcb.peer_closed(),
            seq_no: tcb.seq_no(),
            ack_no: tcb.ack_no(),
            cwnd: tcb.cwnd(),
            timeout_interval: tcb.rtt().timeout(),
            estimated_rtt: tcb.rtt().estimated(),
            dev_rtt: tcb.rtt().deviation(),
            in_flight: tcb.in_flight(),
            queued: tcb.queued(),
            timer_armed: inner.timer.is_armed(),
        }
    }

    /// Processes a segment the listener routed here. `text` is the payload
    /// that followed `header` on the wire.
    pub(crate) fn segment_arrives(self: &Arc<Self>, header: &TcpHeader, text: &[u8]) {
        segment_event(
            Direction::Incoming,
            self.id.local,
            self.id.remote,
            header,
            text.len(),
        );

        // Taken before `inner`, which the callbacks may take themselves
        let _delivering = self.delivering.lock().unwrap();
        let received = {
            let mut inner = self.inner.lock().unwrap();
            let arrival = inner.tcb.segment_arrives(
                header.seq,
                header.ack,
                header.ctl,
                text,
                Instant::now(),
            );
            match arrival {
                Ok(Arrival::Accepted) => {}
                Ok(Arrival::OutOfOrder { expected, actual }) => {
                    tracing::debug!(
                        connection = %self.id,
                        expected,
                        actual,
                        "Discarding out-of-order segment"
                    );
                }
                Ok(Arrival::Closed) => {
                    tracing::debug!(connection = %self.id, "Ignoring segment on closed connection");
                }
                Err(e) => tracing::error!("Failed to build acknowledgment: {}", e),
            }
            self.flush(&mut inner);
            inner.tcb.received()
        };

        if received.is_empty() {
            return;
        }
        // Cloned out so the callback may re-register or call back into us
        let receiver = self.receiver.read().unwrap().clone();
        match receiver {
            Some(receiver) => {
                for payload in received {
                    receiver(self, &payload);
                }
            }
            None => tracing::warn!(
                connection = %self.id,
                "No receiver registered, dropping {} payloads",
                received.len()
            ),
        }
    }

    /// Abandons the connection without notifying the peer. Used when a new
    /// connection replaces this one.
    pub(crate) fn reset(self: &Arc<Self>) {
        let mut inner = self.inner.lock().unwrap();
        inner.tcb.reset();
        self.flush(&mut inner);
    }

    fn retransmit_timeout(self: &Arc<Self>, generation: u64) {
        let mut inner = self.inner.lock().unwrap();
        if !inner.timer.fired(generation) {
            return;
        }
        if let Some(seq) = inner.tcb.retransmit_timeout() {
            tracing::debug!(
                connection = %self.id,
                seq,
                cwnd = inner.tcb.cwnd(),
                timeout = ?inner.tcb.rtt().timeout(),
                "Retransmission timeout"
            );
        }
        self.flush(&mut inner);
    }

    /// Applies the timer change the engine asked for and hands its pending
    /// segments to the network.
    fn flush(self: &Arc<Self>, inner: &mut Inner) {
        match inner.tcb.take_timer_request() {
            Some(TimerRequest::Arm(delay)) => {
                let connection = Arc::downgrade(self);
                inner.timer.arm(delay, move |generation| {
                    if let Some(connection) = connection.upgrade() {
                        connection.retransmit_timeout(generation);
                    }
                });
            }
            Some(TimerRequest::Cancel) => inner.timer.cancel(),
            None => {}
        }
        debug_assert_eq!(inner.tcb.timer_armed(), inner.timer.is_armed());

        for segment in inner.tcb.segments() {
            segment_event(
                Direction::Outgoing,
                self.id.local,
                self.id.remote,
                &segment.header,
                segment.text.len(),
            );
            self.network
                .send(segment.serialize(), self.id.remote.address);
        }
    }
}

/// Observable connection state, as returned by [`Connection::stats`]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConnectionStats {
    pub state: State,
    /// Whether the peer's FIN has arrived
    pub peer_closed: bool,
    /// The highest sequence number used so far
    pub seq_no: u32,
    /// The next sequence number expected from the peer
    pub ack_no: u32,
    /// The congestion window, in segments
    pub cwnd: usize,
    /// The current retransmission timeout
    pub timeout_interval: Duration,
    pub estimated_rtt: Option<Duration>,
    pub dev_rtt: Option<Duration>,
    /// Segments sent and awaiting acknowledgment
    pub in_flight: usize,
    /// Segments waiting for room in the window
    pub queued: usize,
    pub timer_armed: bool,
}

/// An error that occurred while using a [`Connection`]
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    #[error("The connection is closed")]
    Closed,
    #[error("{0}")]
    Header(#[from] BuildHeaderError),
}
