use crate::{
    network::{Delivery, SharedNetwork},
    protocols::{
        tcp::tcp_parsing::{verify_checksum, BuildHeaderError, TcpHeader, TcpHeaderBuilder},
        ConnectionId,
    },
};
use std::{collections::HashSet, time::Duration};
use tokio::{sync::mpsc::UnboundedReceiver, time::Instant};

/// A scripted client that talks raw segments to an echo server. It keeps one
/// message outstanding at a time and resends it until the whole echo of it
/// has arrived in order.
///
/// A SYN+ACK with an unseen initial sequence number that shows up after the
/// handshake means a late duplicate of the SYN replaced the server's
/// connection. The client then adopts the new connection and starts the script
/// over.
pub struct StopAndWait {
    network: SharedNetwork,
    deliveries: UnboundedReceiver<Delivery>,
    /// `local` is the client, `remote` the server
    id: ConnectionId,
    verify_checksum: bool,
    retry: Duration,
    max_attempts: usize,
    iss: u32,
    /// The next sequence number expected from the server
    server_next: u32,
    /// Initial sequence numbers of every server connection seen so far
    server_isns: HashSet<u32>,
    restarts: usize,
}

impl StopAndWait {
    pub fn new(
        network: SharedNetwork,
        deliveries: UnboundedReceiver<Delivery>,
        id: ConnectionId,
        iss: u32,
    ) -> Self {
        Self {
            network,
            deliveries,
            id,
            verify_checksum: true,
            retry: Duration::from_millis(200),
            max_attempts: 50,
            iss,
            server_next: 0,
            server_isns: Default::default(),
            restarts: 0,
        }
    }

    /// How long to wait for a reply before resending
    pub fn retry(mut self, retry: Duration) -> Self {
        self.retry = retry;
        self
    }

    /// How many silent waits to tolerate on one step of the script
    pub fn max_attempts(mut self, attempts: usize) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }

    pub fn verify_checksum(mut self, verify: bool) -> Self {
        self.verify_checksum = verify;
        self
    }

    /// The number of times the script was restarted on a new connection
    pub fn restarts(&self) -> usize {
        self.restarts
    }

    /// Performs the handshake.
    pub async fn connect(&mut self) -> Result<(), ClientError> {
        for _ in 0..self.max_attempts {
            let syn = TcpHeaderBuilder::new(self.id.local.port, self.id.remote.port, self.iss).syn();
            self.transmit(syn, &[])?;

            let deadline = Instant::now() + self.retry;
            while let Some((header, _)) = self.next_segment(deadline).await? {
                if header.ctl.syn() && header.ctl.ack() && header.ack == self.iss.wrapping_add(1) {
                    self.server_next = header.seq.wrapping_add(1);
                    self.server_isns.insert(header.seq);
                    self.acknowledge(self.iss.wrapping_add(1))?;
                    tracing::info!(connection = %self.id, "Connected");
                    return Ok(());
                }
            }
        }
        Err(ClientError::Unreachable(self.max_attempts))
    }

    /// Sends each message in turn and returns everything echoed back.
    pub async fn echo(&mut self, messages: &[Vec<u8>]) -> Result<Vec<u8>, ClientError> {
        'restart: loop {
            let mut seq = self.iss.wrapping_add(1);
            let mut echoed = vec![];

            for (index, message) in messages.iter().enumerate() {
                let target = echoed.len() + message.len();
                let after = seq.wrapping_add(message.len() as u32);
                let mut acked = message.is_empty();
                let mut waits = 0;

                while echoed.len() < target {
                    if waits == self.max_attempts {
                        Err(ClientError::Timeout(index))?
                    }
                    waits += 1;
                    if !acked {
                        let data = TcpHeaderBuilder::new(self.id.local.port, self.id.remote.port, seq)
                            .ack(self.server_next);
                        self.transmit(data, message)?;
                    }

                    let deadline = Instant::now() + self.retry;
                    while let Some((header, text)) = self.next_segment(deadline).await? {
                        if header.ctl.syn() {
                            if !self.server_isns.insert(header.seq) {
                                continue;
                            }
                            self.server_next = header.seq.wrapping_add(1);
                            self.restarts += 1;
                            tracing::info!(connection = %self.id, "Server restarted the connection");
                            self.acknowledge(self.iss.wrapping_add(1))?;
                            continue 'restart;
                        }
                        if header.ctl.ack() && covers(seq, header.ack, message.len()) {
                            acked = true;
                        }
                        if !text.is_empty() {
                            if header.seq == self.server_next {
                                echoed.extend_from_slice(&text);
                                self.server_next = self.server_next.wrapping_add(text.len() as u32);
                            }
                            self.acknowledge(if acked { after } else { seq })?;
                        }
                        if echoed.len() >= target {
                            break;
                        }
                    }
                }
                seq = after;
            }
            return Ok(echoed);
        }
    }

    /// Sends FIN after the last message and waits for the server's FIN.
    /// Returns whether the server's FIN arrived.
    pub async fn close(&mut self, messages: &[Vec<u8>]) -> Result<bool, ClientError> {
        let sent: usize = messages.iter().map(Vec::len).sum();
        let seq = self.iss.wrapping_add(1).wrapping_add(sent as u32);

        for _ in 0..self.max_attempts {
            let fin = TcpHeaderBuilder::new(self.id.local.port, self.id.remote.port, seq)
                .fin()
                .ack(self.server_next);
            self.transmit(fin, &[])?;

            let deadline = Instant::now() + self.retry;
            while let Some((header, _)) = self.next_segment(deadline).await? {
                if header.ctl.fin() {
                    self.server_next = header.seq.wrapping_add(1);
                    self.acknowledge(seq.wrapping_add(1))?;
                    return Ok(true);
                }
            }
        }
        Ok(false)
    }

    fn acknowledge(&self, seq: u32) -> Result<(), ClientError> {
        let ack = TcpHeaderBuilder::new(self.id.local.port, self.id.remote.port, seq)
            .ack(self.server_next);
        self.transmit(ack, &[])
    }

    fn transmit(&self, header: TcpHeaderBuilder, text: &[u8]) -> Result<(), ClientError> {
        let header = header
            .wnd(u16::MAX)
            .build(self.id.local.address, self.id.remote.address, text)?;
        let mut segment = header.serialize();
        segment.extend_from_slice(text);
        self.network.send(segment, self.id.remote.address);
        Ok(())
    }

    /// Waits until `deadline` for an intact segment from the server. Returns
    /// `None` once the deadline passes.
    async fn next_segment(
        &mut self,
        deadline: Instant,
    ) -> Result<Option<(TcpHeader, Vec<u8>)>, ClientError> {
        loop {
            let delivery = match tokio::time::timeout_at(deadline, self.deliveries.recv()).await {
                Ok(Some(delivery)) => delivery,
                Ok(None) => Err(ClientError::NetworkClosed)?,
                Err(_) => return Ok(None),
            };
            let header = match TcpHeader::from_bytes(&delivery.segment) {
                Ok(header) => header,
                Err(_) => continue,
            };
            if header.src_port != self.id.remote.port || header.dst_port != self.id.local.port {
                continue;
            }
            if self.verify_checksum
                && verify_checksum(&delivery.segment, delivery.source, delivery.destination)
                    .is_err()
            {
                tracing::debug!(connection = %self.id, "Client dropping corrupted segment");
                continue;
            }
            let text = delivery.segment[header.bytes()..].to_vec();
            return Ok(Some((header, text)));
        }
    }
}

/// Whether `ack` acknowledges all `len` octets starting at `seq`
fn covers(seq: u32, ack: u32, len: usize) -> bool {
    let advanced = ack.wrapping_sub(seq);
    advanced as usize >= len && advanced < 1 << 31
}

/// An error that ends a [`StopAndWait`] script
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("No SYN+ACK after {0} attempts")]
    Unreachable(usize),
    #[error("Message {0} was never fully echoed")]
    Timeout(usize),
    #[error("The network hung up")]
    NetworkClosed,
    #[error("{0}")]
    Header(#[from] BuildHeaderError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        networks::{Faults, Unreliable},
        protocols::{Endpoint, Ipv4Address},
    };

    const CLIENT: Endpoint = Endpoint::new(Ipv4Address::new([10, 0, 0, 2]), 5000);
    const SERVER: Endpoint = Endpoint::new(Ipv4Address::new([10, 0, 0, 1]), 7);

    #[tokio::test(start_paused = true)]
    async fn gives_up_after_the_configured_attempts() {
        let network = Unreliable::new(Faults::default(), 0);
        let (handle, deliveries) = network.attach(CLIENT.address);
        let mut client = StopAndWait::new(handle, deliveries, ConnectionId::new(CLIENT, SERVER), 1)
            .retry(Duration::from_millis(10))
            .max_attempts(3);

        let start = Instant::now();
        let result = client.connect().await;
        assert!(matches!(result, Err(ClientError::Unreachable(3))));
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(30));
        assert!(elapsed < Duration::from_millis(40));
    }

    #[test]
    fn coverage_accounts_for_wrapping() {
        assert!(covers(10, 15, 5));
        assert!(covers(10, 20, 5));
        assert!(!covers(10, 14, 5));
        assert!(!covers(10, 9, 0));
        assert!(covers(u32::MAX - 1, 3, 5));
    }
}
