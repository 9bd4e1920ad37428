//! Listening-socket lifecycle.
//!
//! `Listener` owns the server's bound, listening socket as an explicit
//! resource. Starting an already-active listener first closes the old
//! socket, so repeated `start()` calls converge on a single descriptor;
//! `end()` is idempotent. The socket listens on `0.0.0.0:<port>` with a
//! small pending-connection backlog.

use socket2::{Domain, Protocol, Socket, Type};
use std::fmt;
use std::io;
use std::net::{Ipv4Addr, SocketAddr, TcpListener, TcpStream};
use tracing::debug;

/// Pending-connection backlog for the listening socket.
const LISTEN_BACKLOG: i32 = 5;

/// Failure to bring the listening socket up.
#[derive(Debug)]
pub enum ListenerError {
    /// Socket creation failed (OS resource exhaustion).
    Create(io::Error),
    /// The port is already in use or privileged.
    Bind(u16, io::Error),
    /// The bound socket could not enter listening state.
    Listen(io::Error),
}

impl fmt::Display for ListenerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ListenerError::Create(e) => write!(f, "socket creation failed: {e}"),
            ListenerError::Bind(port, e) => write!(f, "cannot bind port {port}: {e}"),
            ListenerError::Listen(e) => write!(f, "listen failed: {e}"),
        }
    }
}

impl std::error::Error for ListenerError {}

/// The server's listening endpoint.
pub struct Listener {
    port: u16,
    socket: Option<TcpListener>,
}

impl Listener {
    /// Create an inactive listener for the given port.
    pub fn new(port: u16) -> Listener {
        Listener { port, socket: None }
    }

    /// Bind `0.0.0.0:<port>` and start listening.
    ///
    /// An already-active listener is closed first, so this doubles as a
    /// restart. On failure nothing is left open.
    pub fn start(&mut self) -> Result<(), ListenerError> {
        if self.active() {
            self.end();
        }

        let socket = Socket::new(Domain::IPV4, Type::STREAM, Some(Protocol::TCP))
            .map_err(ListenerError::Create)?;

        let addr = SocketAddr::from((Ipv4Addr::UNSPECIFIED, self.port));
        socket
            .bind(&addr.into())
            .map_err(|e| ListenerError::Bind(self.port, e))?;
        socket.listen(LISTEN_BACKLOG).map_err(ListenerError::Listen)?;

        self.socket = Some(socket.into());
        debug!(port = self.port, "Listener started");
        Ok(())
    }

    /// Close the listening socket if open. Safe to call repeatedly.
    pub fn end(&mut self) {
        if self.socket.take().is_some() {
            debug!(port = self.port, "Listener closed");
        }
    }

    /// Whether a socket is currently open.
    pub fn active(&self) -> bool {
        self.socket.is_some()
    }

    /// Configured port.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Address actually bound, once active.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.socket.as_ref().and_then(|s| s.local_addr().ok())
    }

    /// Block until a client connects.
    pub fn accept(&self) -> io::Result<(TcpStream, SocketAddr)> {
        match &self.socket {
            Some(listener) => listener.accept(),
            None => Err(io::Error::new(
                io::ErrorKind::NotConnected,
                "listener is not active",
            )),
        }
    }
}

impl Drop for Listener {
    fn drop(&mut self) {
        self.end();
    }
}
