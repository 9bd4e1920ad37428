//! Per-connection session handling.
//!
//! Each accepted connection is served by exactly one session running on its
//! own thread. The stream is switched to non-blocking mode and watched with
//! a per-session `mio::Poll`; every time it turns readable the session
//! first writes the fixed `200 OK` acknowledgement and only then reads and
//! decodes the payload. The acknowledgement deliberately precedes payload
//! inspection: the protocol is not a strict request-reply rendezvous, and
//! the ack arrives once per report regardless of content.
//!
//! A session ends when the peer disconnects, a hard I/O error occurs, or
//! the optional idle timeout expires. The stream is owned by the session
//! and closed exactly once, when `run` returns.

use crate::protocol::{self, Tag};
use mio::{Events, Interest, Poll, Token};
use std::fmt;
use std::io::{self, Read, Write};
use std::net::{SocketAddr, TcpStream};
use std::time::Duration;
use tracing::{debug, info, warn};

const SESSION_TOKEN: Token = Token(0);

/// How a session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEnd {
    /// The idle timeout expired with no traffic.
    Idle,
    /// The peer disconnected.
    Closed,
}

/// Failure that tears down a single session.
///
/// Never affects the listener or other sessions.
#[derive(Debug)]
pub enum SessionError {
    /// The stream could not be switched to non-blocking mode or
    /// registered for readiness events.
    Setup(io::Error),
    /// Read or write failed mid-session.
    Io(io::Error),
}

impl fmt::Display for SessionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionError::Setup(e) => write!(f, "session setup failed: {e}"),
            SessionError::Io(e) => write!(f, "session i/o failed: {e}"),
        }
    }
}

impl std::error::Error for SessionError {}

/// Serve one client connection until it ends.
///
/// `idle_timeout` of `None` waits for input indefinitely.
pub fn run(
    stream: TcpStream,
    peer: SocketAddr,
    idle_timeout: Option<Duration>,
) -> Result<SessionEnd, SessionError> {
    stream.set_nonblocking(true).map_err(SessionError::Setup)?;
    let mut stream = mio::net::TcpStream::from_std(stream);

    let mut poll = Poll::new().map_err(SessionError::Setup)?;
    poll.registry()
        .register(&mut stream, SESSION_TOKEN, Interest::READABLE)
        .map_err(SessionError::Setup)?;
    let mut events = Events::with_capacity(4);

    let mut buf = [0u8; protocol::MAX_MESSAGE_LEN];

    debug!(%peer, "Waiting for input");

    loop {
        match poll.poll(&mut events, idle_timeout) {
            Ok(()) => {}
            Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(SessionError::Io(e)),
        }

        if events.is_empty() {
            // Poll can wake spuriously; an empty wake-up means timeout only
            // when a timeout is actually configured.
            if idle_timeout.is_some() {
                debug!(%peer, "Session idle");
                return Ok(SessionEnd::Idle);
            }
            continue;
        }

        // Ack first; the payload is inspected afterwards.
        match stream.write(protocol::ACK) {
            Ok(_) => {}
            Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => {}
            Err(ref e) if is_disconnect(e) => {
                debug!(%peer, "Peer disconnected");
                return Ok(SessionEnd::Closed);
            }
            Err(e) => return Err(SessionError::Io(e)),
        }

        // The readiness notification is edge-triggered: drain the socket
        // before the next wait, or a payload arriving together with the
        // peer's close would never wake us again.
        loop {
            match stream.read(&mut buf) {
                Ok(0) => {
                    debug!(%peer, "Peer disconnected");
                    return Ok(SessionEnd::Closed);
                }
                Ok(n) => handle_payload(peer, &buf[..n]),
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(ref e) if is_disconnect(e) => {
                    debug!(%peer, "Peer disconnected");
                    return Ok(SessionEnd::Closed);
                }
                Err(e) => return Err(SessionError::Io(e)),
            }
        }
    }
}

/// A reset or broken pipe is the peer going away, not a server fault.
fn is_disconnect(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::ConnectionReset | io::ErrorKind::BrokenPipe
    )
}

/// Decode a raw read and log the reported event.
fn handle_payload(peer: SocketAddr, payload: &[u8]) {
    debug!(%peer, read = %String::from_utf8_lossy(payload), "Read");

    match protocol::decode(payload) {
        Ok(msg) => log_report(peer, &msg),
        Err(e) => warn!(%peer, error = %e, "Discarding malformed report"),
    }
}

/// One log line per decoded report, with its typed fields.
fn log_report(peer: SocketAddr, msg: &protocol::Message) {
    match msg.tag() {
        Tag::Beg => info!(
            %peer,
            version = msg.version().unwrap_or(""),
            pid = msg.pid(),
            client_port = msg.client_port(),
            rows = msg.rows(),
            cols = msg.cols(),
            length = msg.initial_length(),
            keyboard_timeout = msg.keyboard_timeout(),
            user = msg.user().unwrap_or(""),
            hash = msg.session_hash().unwrap_or(""),
            "Game started"
        ),
        Tag::End => {
            let failure = msg.failure().map(|f| f.to_string());
            info!(
                %peer,
                score = msg.score(),
                signal = msg.signal(),
                failure = failure.as_deref().unwrap_or(""),
                pid = msg.pid(),
                client_port = msg.client_port(),
                user = msg.user().unwrap_or(""),
                hash = msg.session_hash().unwrap_or(""),
                "Game over"
            );
        }
        Tag::Mrk => debug!(
            %peer,
            row = msg.row(),
            col = msg.col(),
            object = msg.object(),
            "Cell marked"
        ),
        Tag::Unm => debug!(
            %peer,
            row = msg.row(),
            col = msg.col(),
            object = msg.object(),
            "Cell cleared"
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{Ipv4Addr, TcpListener};
    use std::thread;

    /// Connected (client, server-side stream, peer address) triple.
    fn socket_pair() -> (TcpStream, TcpStream, SocketAddr) {
        let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).unwrap();
        let addr = listener.local_addr().unwrap();
        let client = TcpStream::connect(addr).unwrap();
        let (server_side, peer) = listener.accept().unwrap();
        (client, server_side, peer)
    }

    fn read_ack(client: &mut TcpStream) -> Vec<u8> {
        let mut ack = vec![0u8; protocol::ACK.len()];
        client.read_exact(&mut ack).unwrap();
        ack
    }

    /// Give the session a moment to consume the previous payload, so two
    /// sends do not coalesce into one read.
    fn settle() {
        thread::sleep(Duration::from_millis(30));
    }

    #[test]
    fn test_silent_disconnect_ends_closed() {
        let (client, server_side, peer) = socket_pair();
        let handle = thread::spawn(move || run(server_side, peer, None));

        // Send nothing at all.
        drop(client);

        let end = handle.join().unwrap().unwrap();
        assert_eq!(end, SessionEnd::Closed);
    }

    #[test]
    fn test_ack_precedes_payload_inspection() {
        let (mut client, server_side, peer) = socket_pair();
        let handle = thread::spawn(move || run(server_side, peer, None));

        // Garbage is acked all the same; the session survives it.
        client.write_all(b"not a report").unwrap();
        assert_eq!(read_ack(&mut client), protocol::ACK);

        // And a well-formed report afterwards is acked too.
        settle();
        client.write_all(b"G>MRK,ROW:1,COL:2,WAT:4").unwrap();
        assert_eq!(read_ack(&mut client), protocol::ACK);

        drop(client);
        assert_eq!(handle.join().unwrap().unwrap(), SessionEnd::Closed);
    }

    #[test]
    fn test_idle_timeout_ends_idle() {
        let (mut client, server_side, peer) = socket_pair();
        let handle =
            thread::spawn(move || run(server_side, peer, Some(Duration::from_millis(50))));

        let end = handle.join().unwrap().unwrap();
        assert_eq!(end, SessionEnd::Idle);

        // The session closed its socket: the client sees EOF.
        let mut rest = Vec::new();
        client.read_to_end(&mut rest).unwrap();
        assert!(rest.is_empty());
    }

    #[test]
    fn test_concurrent_sessions_are_isolated() {
        let (mut client_a, server_a, peer_a) = socket_pair();
        let (mut client_b, server_b, peer_b) = socket_pair();

        let handle_a = thread::spawn(move || run(server_a, peer_a, None));
        let handle_b = thread::spawn(move || run(server_b, peer_b, None));

        client_a.write_all(b"G>MRK,ROW:1,COL:1,WAT:2").unwrap();
        client_b.write_all(b"G>MRK,ROW:8,COL:3,WAT:4").unwrap();

        // Each client gets its own ack.
        assert_eq!(read_ack(&mut client_a), protocol::ACK);
        assert_eq!(read_ack(&mut client_b), protocol::ACK);

        // Ending one session has no effect on the other.
        drop(client_a);
        assert_eq!(handle_a.join().unwrap().unwrap(), SessionEnd::Closed);

        settle();
        client_b.write_all(b"G>UNM,ROW:8,COL:3,WAT:4").unwrap();
        assert_eq!(read_ack(&mut client_b), protocol::ACK);

        drop(client_b);
        assert_eq!(handle_b.join().unwrap().unwrap(), SessionEnd::Closed);
    }
}
