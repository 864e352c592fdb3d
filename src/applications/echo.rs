use crate::protocols::{Connection, Listener};
use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};

/// A server application that sends every payload back on the connection it
/// arrived on, and closes the connection once the peer closes its side.
#[derive(Debug, Default)]
pub struct Echo {
    connections: AtomicUsize,
    echoed: AtomicUsize,
}

impl Echo {
    /// Creates an echo application and installs it as the accept callback of
    /// `listener`.
    pub fn attach(listener: &Listener) -> Arc<Self> {
        let echo = Arc::new(Self::default());
        let app = echo.clone();
        listener.register_accept(move |connection| {
            app.connections.fetch_add(1, Ordering::Relaxed);
            let app = app.clone();
            connection.register_receiver(move |connection, payload| app.receive(connection, payload));
        });
        echo
    }

    fn receive(&self, connection: &Arc<Connection>, payload: &[u8]) {
        if payload.is_empty() {
            if let Err(e) = connection.close() {
                tracing::warn!(connection = %connection.id(), "Echo close failed: {}", e);
            }
            return;
        }
        match connection.send(payload) {
            Ok(_) => {
                self.echoed.fetch_add(payload.len(), Ordering::Relaxed);
            }
            Err(e) => tracing::warn!(connection = %connection.id(), "Echo send failed: {}", e),
        }
    }

    /// The number of connections accepted so far
    pub fn connections(&self) -> usize {
        self.connections.load(Ordering::Relaxed)
    }

    /// The number of payload bytes handed back to connections so far
    pub fn echoed(&self) -> usize {
        self.echoed.load(Ordering::Relaxed)
    }
}
