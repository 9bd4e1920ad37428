//! Connection dispatch.
//!
//! The dispatcher owns the listener and runs the blocking accept loop.
//! Every accepted connection is handed to its own named session thread and
//! the loop returns to accepting immediately. A failed thread spawn closes
//! that one connection and the loop keeps going: one misbehaving client
//! must never stop the server from taking new ones. Only a failed accept
//! is fatal.

use crate::listener::Listener;
use crate::session;
use std::fmt;
use std::io;
use std::net::{SocketAddr, TcpStream};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Fatal dispatcher failure.
#[derive(Debug)]
pub enum ServeError {
    /// The accept call failed.
    Accept(io::Error),
}

impl fmt::Display for ServeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServeError::Accept(e) => write!(f, "accept failed: {e}"),
        }
    }
}

impl std::error::Error for ServeError {}

/// Accept loop over an active listener.
pub struct Server {
    listener: Listener,
    idle_timeout: Option<Duration>,
    live_sessions: Arc<AtomicUsize>,
}

impl Server {
    /// Wrap an active listener.
    pub fn new(listener: Listener, idle_timeout: Option<Duration>) -> Server {
        Server {
            listener,
            idle_timeout,
            live_sessions: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Accept clients until accepting itself fails.
    pub fn run(&mut self) -> Result<(), ServeError> {
        info!(port = self.listener.port(), "Waiting for clients");

        loop {
            let (stream, peer) = match self.listener.accept() {
                Ok(pair) => pair,
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(ServeError::Accept(e)),
            };

            debug!(%peer, live = self.live_sessions(), "Got client");
            self.spawn_session(stream, peer);
        }
    }

    /// Close the listening socket.
    pub fn shutdown(&mut self) {
        self.listener.end();
    }

    /// Number of sessions currently running.
    pub fn live_sessions(&self) -> usize {
        self.live_sessions.load(Ordering::SeqCst)
    }

    fn spawn_session(&self, stream: TcpStream, peer: SocketAddr) {
        let idle_timeout = self.idle_timeout;
        let live = Arc::clone(&self.live_sessions);

        let spawned = thread::Builder::new()
            .name(format!("session-{peer}"))
            .spawn(move || {
                let active = live.fetch_add(1, Ordering::SeqCst) + 1;
                debug!(%peer, active, "Session started");

                match session::run(stream, peer, idle_timeout) {
                    Ok(end) => debug!(%peer, ?end, "Session ended"),
                    Err(e) => warn!(%peer, error = %e, "Session failed"),
                }

                live.fetch_sub(1, Ordering::SeqCst);
            });

        // The unstarted closure still owns the stream, so dropping it
        // closes this connection; accepting continues.
        if let Err(e) = spawned {
            warn!(%peer, error = %e, "Could not spawn session thread");
        }
    }
}
