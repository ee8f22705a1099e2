//! Host-side driver core for talking to cellular modems over the V.25ter /
//! 3GPP TS 27.007 "AT command" dialect.
//!
//! This crate implements only the reusable core described by the AT
//! channel design: a streaming line parser, a bounded response buffer, a
//! single-in-flight-command arbiter, and the pluggable line classifier
//! used to extend the grammar per modem family or per command. Modem
//! personalities (SIM800, Telit, generic 3GPP), PDP/socket/FTP/clock
//! features and CLI tooling build on top of this crate and are out of
//! scope here.
//!
//! # Example
//! ```no_run
//! use atchannel::{Channel, SerialTransport};
//!
//! # fn example() -> atchannel::Result<()> {
//! let channel = Channel::new(SerialTransport::new("/dev/ttyUSB0", 115_200));
//! channel.open()?;
//! let response = channel.command(b"AT\r\n")?;
//! println!("{}", String::from_utf8_lossy(&response));
//! # Ok(())
//! # }
//! ```

mod buffer;
pub mod channel;
pub mod config;
pub mod line;
mod parser;
pub mod port;

pub use channel::Channel;
pub use line::{prefix_in_table, Callbacks, ClassifierFn, LineKind};
pub use port::{Port, ReadError};

#[cfg(feature = "serial")]
pub use port::SerialTransport;

use thiserror::Error;

/// Errors surfaced to a `Channel` caller (spec section 7).
#[derive(Error, Debug)]
pub enum Error {
    /// Channel not open, or closed while a command was in flight.
    #[error("no device")]
    NoDevice,
    /// Deadline reached with no terminal line observed. The parser is
    /// reset before this is returned; the channel remains usable.
    #[error("command timed out")]
    Timeout,
    /// Transport read/write failure. Fatal to the channel; subsequent
    /// commands observe `NoDevice`.
    #[error(transparent)]
    Io(#[from] std::io::Error),
    /// Allocation failure. Only ever produced by construction helpers.
    #[error("out of memory")]
    NoMemory,
    /// A custom classifier announced a payload the buffer couldn't hold,
    /// or another protocol-level inconsistency the caller should know
    /// about. The response is still delivered, truncated.
    #[error("protocol error: {0}")]
    Protocol(String),
}

/// Result alias used throughout this crate.
pub type Result<T> = std::result::Result<T, Error>;

/// An owned snapshot of a finished command response (spec section 6). The
/// underlying buffer is reused for the next command as soon as this copy
/// is handed back, so callers get an owned value rather than a pointer
/// valid only until the next `command()` call.
pub type Response = Vec<u8>;
