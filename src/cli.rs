//! Parses the command line arguments and runs the echo demonstration: an echo
//! server behind a [`Listener`] and a scripted client, talking over an
//! [`Unreliable`] network.
//!
//! Basic usage with a tenth of all segments lost and logging on:
//!
//! ```cargo run -- --loss 0.1 --log```

use crate::{
    applications::{ClientError, Echo, StopAndWait},
    config::Config,
    logging::init_stdout_events,
    networks::{Faults, Unreliable},
    protocols::{ConnectionId, Endpoint, Ipv4Address, Listener},
};
use clap::Parser;
use rand::{rngs::SmallRng, Rng, SeedableRng};
use std::{
    fmt::{self, Display, Formatter},
    time::Duration,
};
use tokio::time::Instant;
use tracing::Level;

const SERVER: Endpoint = Endpoint::new(Ipv4Address::new([10, 0, 0, 1]), 7);
const CLIENT: Endpoint = Endpoint::new(Ipv4Address::new([10, 0, 0, 2]), 49152);

/// Stores the different command line arguments.
#[derive(Parser, Debug, Clone)]
#[command(version, about)]
pub struct Args {
    /// Chance that a segment is dropped
    #[arg(long, default_value_t = 0.0, value_parser = probability)]
    pub loss: f64,
    /// Chance that a segment is delivered twice
    #[arg(long, default_value_t = 0.0, value_parser = probability)]
    pub duplicate: f64,
    /// Chance that a bit of a segment is flipped in transit
    #[arg(long, default_value_t = 0.0, value_parser = probability)]
    pub corrupt: f64,
    /// Upper bound on the random delivery delay, in milliseconds
    #[arg(long, default_value_t = 0)]
    pub max_delay_ms: u64,
    /// Number of messages the client sends
    #[arg(short, long, default_value_t = 10)]
    pub messages: usize,
    /// Seed for the network's faults and the initial sequence numbers
    #[arg(long, default_value_t = 0)]
    pub seed: u64,
    /// Accept segments without verifying their checksums
    #[arg(long)]
    pub ignore_checksum: bool,
    /// Initial retransmission timeout, in milliseconds
    #[arg(long, default_value_t = 200)]
    pub rto_ms: u64,
    /// Silent waits the client tolerates on any one step before giving up
    #[arg(long, default_value_t = 50)]
    pub attempts: usize,
    /// Logging flag. Writes JSON events to standard output.
    #[arg(short, long)]
    pub log: bool,
}

fn probability(s: &str) -> Result<f64, String> {
    let p: f64 = s.parse().map_err(|e| format!("{e}"))?;
    if (0.0..=1.0).contains(&p) {
        Ok(p)
    } else {
        Err(format!("{p} is not a probability"))
    }
}

/// The outcome of one run of the demonstration
#[derive(Debug, Clone, PartialEq)]
pub struct Summary {
    /// Bytes the client sent
    pub sent: usize,
    /// Bytes the client got back
    pub echoed: usize,
    /// Whether the echo matched what was sent, byte for byte
    pub matched: bool,
    /// Bytes the server application handed back to its connection
    pub server_echoed: usize,
    /// Whether the server's FIN reached the client
    pub closed: bool,
    /// Times the client had to start over on a replacement connection
    pub restarts: usize,
    pub elapsed: Duration,
}

impl Display for Summary {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        writeln!(f, "sent {} bytes, {} echoed back", self.sent, self.echoed)?;
        writeln!(f, "server echoed {} bytes", self.server_echoed)?;
        writeln!(
            f,
            "echo {}, close {}, {} restarts, {:?}",
            if self.matched { "matched" } else { "MISMATCHED" },
            if self.closed { "confirmed" } else { "unconfirmed" },
            self.restarts,
            self.elapsed
        )
    }
}

/// Parses the arguments, runs the demonstration and prints its summary.
/// Returns whether the echo came back intact.
pub async fn initialize_from_arguments() -> bool {
    let args = Args::parse();
    if args.log {
        if let Err(e) = init_stdout_events(true, Level::TRACE) {
            eprintln!("{e}");
        }
    }
    match simulate(&args).await {
        Ok(summary) => {
            print!("{summary}");
            summary.matched
        }
        Err(e) => {
            eprintln!("Demonstration failed: {e}");
            false
        }
    }
}

/// Runs the client's script against an echo server once.
pub async fn simulate(args: &Args) -> Result<Summary, ClientError> {
    let faults = Faults {
        loss: args.loss,
        duplicate: args.duplicate,
        corrupt: args.corrupt,
        max_delay: Duration::from_millis(args.max_delay_ms),
    };
    let network = Unreliable::new(faults, args.seed);
    let (server_network, server_deliveries) = network.attach(SERVER.address);
    let (client_network, client_deliveries) = network.attach(CLIENT.address);

    let rto = Duration::from_millis(args.rto_ms.max(1));
    let config = Config::new(SERVER.port)
        .ignore_checksum(args.ignore_checksum)
        .initial_timeout(rto)
        .min_timeout(Duration::from_millis(10))
        .isn_seed(args.seed);
    let listener = Listener::new(config, server_network);
    let echo = Echo::attach(&listener);
    let server = tokio::spawn(listener.clone().run(server_deliveries));

    let iss = SmallRng::seed_from_u64(args.seed.wrapping_add(1)).gen::<u32>() >> 1;
    let mut client = StopAndWait::new(
        client_network,
        client_deliveries,
        ConnectionId::new(CLIENT, SERVER),
        iss,
    )
    .retry(rto)
    .max_attempts(args.attempts)
    .verify_checksum(!args.ignore_checksum);

    let messages = script(args.messages);
    let expected = messages.concat();
    let start = Instant::now();

    let result = async {
        client.connect().await?;
        let echoed = client.echo(&messages).await?;
        let closed = client.close(&messages).await?;
        Ok::<_, ClientError>((echoed, closed))
    }
    .await;
    server.abort();
    let (echoed, closed) = result?;

    Ok(Summary {
        sent: expected.len(),
        echoed: echoed.len(),
        matched: echoed == expected,
        server_echoed: echo.echoed(),
        closed,
        restarts: client.restarts(),
        elapsed: start.elapsed(),
    })
}

/// The messages the client sends, in order
pub fn script(count: usize) -> Vec<Vec<u8>> {
    (0..count)
        .map(|i| format!("message {i}: {}", "echo ".repeat(i % 7 + 1)).into_bytes())
        .collect()
}
