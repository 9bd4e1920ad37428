//! Session server for networked Snake game clients.
//!
//! Clients connect over TCP and report game lifecycle and playfield
//! mutation events as `G>TAG,KEY:VAL,...` lines; every report is answered
//! with a fixed `200 OK` acknowledgement and logged. Each connection is
//! served in isolation on its own thread.

pub mod config;
pub mod listener;
pub mod protocol;
pub mod server;
pub mod session;

pub use config::{CliArgs, Config, ConfigError};
pub use listener::{Listener, ListenerError};
pub use protocol::{DecodeError, Message, SessionIdentity, Tag};
pub use server::{ServeError, Server};
pub use session::{SessionEnd, SessionError};
