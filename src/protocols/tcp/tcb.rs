//! The transmission control block: the per-connection reliability engine.
//!
//! A [`Tcb`] performs no I/O. Segments it wants sent, payloads it wants
//! delivered, and changes it wants made to the retransmission timer are
//! queued up and drained by the owning
//! [`Connection`](super::connection::Connection).

use super::{
    connection::ConnectionError,
    rtt::RttEstimator,
    tcp_parsing::{BuildHeaderError, Control, TcpHeaderBuilder},
    ConnectionId,
};
use crate::config::{Config, MAX_MSS};
use std::{collections::VecDeque, time::Duration};
use tokio::time::Instant;

mod modular_cmp;
mod segment;
mod transmit;

use modular_cmp::mod_le;
pub use segment::Segment;
pub use transmit::Transmit;


/// The states a passively opened connection moves through. The handshake is
/// complete as soon as the connection exists, so there are no SYN states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum State {
    /// An open connection. Data flows both ways.
    Established,
    /// The remote TCP has sent FIN. Data can still be sent until the local
    /// user closes.
    CloseWait,
    /// The local user has closed the connection, or it was replaced by a new
    /// connection with the same identifier. Nothing is sent or received.
    Closed,
}

/// A change the engine wants made to the retransmission timer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerRequest {
    /// Cancel any pending timer, then schedule one to fire after the duration
    Arm(Duration),
    /// Cancel any pending timer
    Cancel,
}

/// What became of an arriving segment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arrival {
    /// The segment was in order and has been processed
    Accepted,
    /// The segment did not start at the receive cursor and was discarded
    OutOfOrder { expected: u32, actual: u32 },
    /// The connection is closed and ignores everything
    Closed,
}

#[derive(Debug, Clone)]
pub struct Tcb {
    id: ConnectionId,
    state: State,
    mss: usize,
    wnd: u16,
    reack_out_of_order: bool,
    /// Set once the peer's FIN has been accepted
    peer_closed: bool,
    /// The highest sequence number used so far. New data starts at
    /// `seq_no + 1`; the SYN consumed the initial sequence number.
    seq_no: u32,
    /// The next sequence number expected from the peer
    ack_no: u32,
    /// Segments built from application writes but not yet transmitted
    send_queue: VecDeque<Segment>,
    /// Transmitted segments awaiting acknowledgment, oldest first
    in_flight: VecDeque<Transmit>,
    /// The congestion window, in segments
    cwnd: usize,
    rtt: RttEstimator,
    timer_armed: bool,
    timer_request: Option<TimerRequest>,
    outgoing: Vec<Segment>,
    received: Vec<Vec<u8>>,
}

impl Tcb {
    /// Creates the control block for a connection whose SYN+ACK carries `iss`
    /// and acknowledges up to `ack_no`.
    pub fn new(id: ConnectionId, iss: u32, ack_no: u32, config: &Config) -> Self {
        Self {
            id,
            state: State::Established,
            mss: config.mss.clamp(1, MAX_MSS),
            wnd: config.window_size,
            reack_out_of_order: config.reack_out_of_order,
            peer_closed: false,
            seq_no: iss,
            ack_no,
            send_queue: Default::default(),
            in_flight: Default::default(),
            cwnd: config.initial_window.max(1),
            rtt: RttEstimator::new(config.initial_timeout).with_floor(config.min_timeout),
            timer_armed: false,
            timer_request: None,
            outgoing: vec![],
            received: vec![],
        }
    }

    /// Handles a segment the listener routed to this connection.
    pub fn segment_arrives(
        &mut self,
        seq: u32,
        ack: u32,
        ctl: Control,
        text: &[u8],
        now: Instant,
    ) -> Result<Arrival, BuildHeaderError> {
        if self.state == State::Closed {
            return Ok(Arrival::Closed);
        }

        // Strictly in-order receiver: anything else waits for a retransmission
        if seq != self.ack_no {
            if self.reack_out_of_order && (ctl.fin() || !text.is_empty()) {
                self.enqueue_ack()?;
            }
            return Ok(Arrival::OutOfOrder {
                expected: self.ack_no,
                actual: seq,
            });
        }

        if ctl.fin() {
            self.ack_no = self.ack_no.wrapping_add(1);
            self.state = State::CloseWait;
            self.peer_closed = true;
            self.enqueue_ack()?;
            self.received.push(vec![]);
        } else if !text.is_empty() {
            self.ack_no = self.ack_no.wrapping_add(text.len() as u32);
            self.enqueue_ack()?;
            self.received.push(text.to_vec());
        }

        if !self.in_flight.is_empty() {
            self.acknowledge(ack, now);
        }

        Ok(Arrival::Accepted)
    }

    /// Retires every in-flight segment a cumulative acknowledgment covers.
    fn acknowledge(&mut self, ack: u32, now: Instant) {
        let newest_acked = match self
            .in_flight
            .iter()
            .rposition(|transmit| mod_le(transmit.segment.seq(), ack))
        {
            Some(i) => i,
            None => return,
        };

        self.cwnd += 1;
        let newest = self.in_flight.drain(..=newest_acked).last();
        if let Some(Transmit {
            sent_at: Some(sent_at),
            ..
        }) = newest
        {
            self.rtt.sample(now.saturating_duration_since(sent_at));
        }

        if self.in_flight.is_empty() {
            self.cancel_timer();
            self.send_window(now);
        }
    }

    /// Splits `text` into segments of at most one MSS, queues them, and
    /// transmits as many as the congestion window allows.
    pub fn send(&mut self, text: &[u8], now: Instant) -> Result<(), ConnectionError> {
        if self.state == State::Closed {
            Err(ConnectionError::Closed)?
        }
        for chunk in text.chunks(self.mss) {
            let segment = self.build(
                self.header_builder(self.seq_no.wrapping_add(1)).ack(self.ack_no),
                chunk,
            )?;
            self.send_queue.push_back(segment);
            self.seq_no = self.seq_no.wrapping_add(chunk.len() as u32);
        }
        self.send_window(now);
        Ok(())
    }

    /// Moves queued segments into flight while the window has room.
    fn send_window(&mut self, now: Instant) {
        let mut sent = false;
        while self.in_flight.len() < self.cwnd {
            let segment = match self.send_queue.pop_front() {
                Some(segment) => segment,
                None => break,
            };
            self.outgoing.push(segment.clone());
            self.in_flight.push_back(Transmit::new(segment, now));
            sent = true;
        }
        if sent {
            self.arm_timer();
        }
    }

    /// Handles expiry of the retransmission timer. Returns the sequence number
    /// of the retransmitted segment, if any.
    pub fn retransmit_timeout(&mut self) -> Option<u32> {
        self.timer_armed = false;
        let head = self.in_flight.front()?.segment.clone();
        self.cwnd = (self.cwnd / 2).max(1);
        for transmit in self.in_flight.iter_mut() {
            transmit.sent_at = None;
        }
        let seq = head.seq();
        self.outgoing.push(head);
        self.arm_timer();
        Some(seq)
    }

    /// Sends FIN and drops everything still queued or in flight.
    pub fn close(&mut self) -> Result<(), ConnectionError> {
        if self.state == State::Closed {
            Err(ConnectionError::Closed)?
        }
        let fin = self.build(
            self.header_builder(self.seq_no.wrapping_add(1))
                .fin()
                .ack(self.ack_no),
            &[],
        )?;
        self.outgoing.push(fin);
        self.reset();
        Ok(())
    }

    /// Abandons the connection without telling the peer.
    pub fn reset(&mut self) {
        self.state = State::Closed;
        self.send_queue.clear();
        self.in_flight.clear();
        self.cancel_timer();
    }

    fn enqueue_ack(&mut self) -> Result<(), BuildHeaderError> {
        let ack = self.build(
            self.header_builder(self.seq_no.wrapping_add(1)).ack(self.ack_no),
            &[],
        )?;
        self.outgoing.push(ack);
        Ok(())
    }

    fn header_builder(&self, seq: u32) -> TcpHeaderBuilder {
        TcpHeaderBuilder::new(self.id.local.port, self.id.remote.port, seq).wnd(self.wnd)
    }

    fn build(
        &self,
        header_builder: TcpHeaderBuilder,
        text: &[u8],
    ) -> Result<Segment, BuildHeaderError> {
        let header = header_builder.build(self.id.local.address, self.id.remote.address, text)?;
        Ok(Segment::new(header, text.to_vec()))
    }

    fn arm_timer(&mut self) {
        self.timer_armed = true;
        self.timer_request = Some(TimerRequest::Arm(self.rtt.timeout()));
    }

    fn cancel_timer(&mut self) {
        self.timer_armed = false;
        self.timer_request = Some(TimerRequest::Cancel);
    }

    /// Drains the segments waiting to be handed to the network.
    pub fn segments(&mut self) -> Vec<Segment> {
        std::mem::take(&mut self.outgoing)
    }

    /// Drains the payloads waiting to be handed to the application. An empty
    /// payload marks the end of the peer's stream.
    pub fn received(&mut self) -> Vec<Vec<u8>> {
        std::mem::take(&mut self.received)
    }

    /// Takes the latest timer change requested since the last call.
    pub fn take_timer_request(&mut self) -> Option<TimerRequest> {
        self.timer_request.take()
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn state(&self) -> State {
        self.state
    }

    pub fn peer_closed(&self) -> bool {
        self.peer_closed
    }

    pub fn seq_no(&self) -> u32 {
        self.seq_no
    }

    pub fn ack_no(&self) -> u32 {
        self.ack_no
    }

    pub fn cwnd(&self) -> usize {
        self.cwnd
    }

    pub fn rtt(&self) -> &RttEstimator {
        &self.rtt
    }

    /// The number of segments awaiting acknowledgment
    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    /// The number of segments waiting for room in the window
    pub fn queued(&self) -> usize {
        self.send_queue.len()
    }

    /// Whether the engine expects a retransmission timer to be pending
    pub fn timer_armed(&self) -> bool {
        self.timer_armed
    }
}
