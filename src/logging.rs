//! Logging holds wrapper functions for logging events. The library itself
//! only emits events; installing a subscriber is left to the binary.

use crate::protocols::{tcp::tcp_parsing::TcpHeader, Endpoint};
use std::io;
use tracing::{event, Level, Subscriber};
use tracing_subscriber::{fmt::MakeWriter, FmtSubscriber};

/// Whether a logged segment was leaving or arriving
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Outgoing,
    Incoming,
}

/// Installs a global subscriber writing to `writer`, as JSON when `json` is
/// set. Should only be called once per process.
pub fn init_events<W>(writer: W, json: bool, level: Level) -> Result<(), LoggingError>
where
    W: for<'a> MakeWriter<'a> + Send + Sync + 'static,
{
    // set the global default so all events go to the same subscriber
    tracing::subscriber::set_global_default(subscriber(writer, json, level))?;
    Ok(())
}

/// Builds the subscriber [`init_events`] installs.
pub fn subscriber<W>(writer: W, json: bool, level: Level) -> Box<dyn Subscriber + Send + Sync>
where
    W: for<'a> MakeWriter<'a> + Send + Sync + 'static,
{
    let builder = FmtSubscriber::builder()
        .with_writer(writer)
        .with_ansi(false)
        .with_max_level(level);
    if json {
        Box::new(builder.json().finish())
    } else {
        Box::new(builder.finish())
    }
}

/// Installs a subscriber printing to standard output.
pub fn init_stdout_events(json: bool, level: Level) -> Result<(), LoggingError> {
    init_events(io::stdout, json, level)
}

/// An error that occurred while installing a subscriber
#[derive(Debug, thiserror::Error)]
pub enum LoggingError {
    #[error("A global subscriber was already installed: {0}")]
    AlreadyInstalled(#[from] tracing::subscriber::SetGlobalDefaultError),
}

/// Segment event handler. Records one segment crossing the boundary between
/// the transport and the network: both endpoints, the sequence and
/// acknowledgment numbers, the control bits and the payload length.
pub fn segment_event(
    direction: Direction,
    local: Endpoint,
    remote: Endpoint,
    header: &TcpHeader,
    payload_len: usize,
) {
    event!(
        target: "SEGMENT",
        Level::TRACE,
        direction = ?direction,
        local = %local,
        remote = %remote,
        seq = header.seq,
        ack = header.ack,
        ctl = ?header.ctl,
        payload_len,
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocols::{tcp::tcp_parsing::TcpHeaderBuilder, Ipv4Address};
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Default)]
    struct Buffer(Arc<Mutex<Vec<u8>>>);

    impl io::Write for Buffer {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn log_segment(json: bool, level: Level) -> String {
        let buffer = Buffer::default();
        let writer = buffer.clone();
        let local = Endpoint::new(Ipv4Address::new([10, 0, 0, 1]), 80);
        let remote = Endpoint::new(Ipv4Address::new([10, 0, 0, 2]), 4000);
        let header = TcpHeaderBuilder::new(80, 4000, 7)
            .ack(9)
            .fin()
            .build(local.address, remote.address, &[])
            .unwrap();

        tracing::subscriber::with_default(subscriber(move || writer.clone(), json, level), || {
            segment_event(Direction::Outgoing, local, remote, &header, 0)
        });
        let bytes = buffer.0.lock().unwrap().clone();
        String::from_utf8(bytes).unwrap()
    }

    #[test]
    fn segment_events_record_the_header() {
        let line = log_segment(false, Level::TRACE);
        assert!(line.contains("SEGMENT"));
        assert!(line.contains("local=10.0.0.1:80"));
        assert!(line.contains("remote=10.0.0.2:4000"));
        assert!(line.contains("seq=7"));
        assert!(line.contains("ack=9"));
        assert!(line.contains("Control(ACK, FIN)"));
    }

    #[test]
    fn segment_events_can_be_json() {
        let line = log_segment(true, Level::TRACE);
        assert!(line.trim_start().starts_with('{'));
        assert!(line.contains("\"seq\":7"));
        assert!(line.contains("\"target\":\"SEGMENT\""));
    }

    #[test]
    fn segment_events_are_trace_level() {
        assert!(log_segment(false, Level::DEBUG).is_empty());
    }
}
