//! The transport abstraction (spec section 6): byte-in/byte-out port the
//! core drives the reader thread over. Everything below the `Port` trait
//! (baud rate, termios, flow control) is the concrete transport's concern,
//! not the core's.

use std::io;
use std::time::Duration;

/// Distinguishes a cancelled read from a genuine I/O error so the reader
/// thread can loop instead of tearing the channel down (spec section 4.5:
/// "An interruption signal causes the read to return with `Interrupted`").
#[derive(Debug)]
pub enum ReadError {
    /// `Port::cancel` unblocked this read; no data was read.
    Interrupted,
    /// The transport reached end-of-stream.
    Eof,
    Io(io::Error),
}

impl From<io::Error> for ReadError {
    fn from(e: io::Error) -> Self {
        ReadError::Io(e)
    }
}

/// Byte-oriented transport driving an AT channel.
///
/// Implementations must make `read` cancellable via `cancel()` without a
/// process-wide signal handler (spec design note: "thread + blocking read
/// + signal-to-interrupt -> cancellable read loop").
pub trait Port: Send {
    fn open(&mut self) -> io::Result<()>;
    fn close(&mut self) -> io::Result<()>;

    /// Read into `out`, returning the number of bytes read. Implementations
    /// are expected to block (optionally up to some internal poll
    /// interval) until at least one byte is available, cancellation is
    /// requested, or the stream ends.
    fn read(&mut self, out: &mut [u8]) -> Result<usize, ReadError>;

    fn write(&mut self, buf: &[u8]) -> io::Result<usize>;

    /// Unblock a read in progress on another thread. Implementations that
    /// poll with a bounded timeout can satisfy this as a no-op, relying on
    /// the next poll iteration to observe cancellation through some other
    /// shared flag; implementations with a genuinely blocking read should
    /// use a self-pipe or platform cancellation primitive.
    fn cancel(&mut self);
}

#[cfg(feature = "serial")]
mod serial_transport {
    use super::*;
    use serial2::SerialPort;
    use std::io::{Read, Write};

    /// Reference `Port` implementation over a real serial device, grounded
    /// in the teacher's `serial2`-backed transport (`BufClear`/`Connection`
    /// in the teacher's `src/transport.rs`). Reads use a bounded timeout
    /// so `cancel()` only has to flip a flag the next poll observes,
    /// rather than interrupt a truly blocking syscall.
    pub struct SerialTransport {
        path: String,
        baud_rate: u32,
        poll_interval: Duration,
        port: Option<SerialPort>,
        cancelled: bool,
    }

    impl SerialTransport {
        pub fn new(path: impl Into<String>, baud_rate: u32) -> Self {
            Self {
                path: path.into(),
                baud_rate,
                poll_interval: Duration::from_millis(200),
                port: None,
                cancelled: false,
            }
        }
    }

    impl Port for SerialTransport {
        fn open(&mut self) -> io::Result<()> {
            let port = SerialPort::open(&self.path, self.baud_rate)?;
            port.set_read_timeout(self.poll_interval)?;
            self.port = Some(port);
            self.cancelled = false;
            Ok(())
        }

        fn close(&mut self) -> io::Result<()> {
            self.port = None;
            Ok(())
        }

        fn read(&mut self, out: &mut [u8]) -> Result<usize, ReadError> {
            let port = self.port.as_mut().ok_or(ReadError::Eof)?;
            if self.cancelled {
                self.cancelled = false;
                return Err(ReadError::Interrupted);
            }
            match port.read(out) {
                Ok(0) => Err(ReadError::Eof),
                Ok(n) => Ok(n),
                Err(e) if e.kind() == io::ErrorKind::TimedOut => Err(ReadError::Interrupted),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => Err(ReadError::Interrupted),
                Err(e) => Err(e.into()),
            }
        }

        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            let port = self
                .port
                .as_mut()
                .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "port not open"))?;
            port.write(buf)
        }

        fn cancel(&mut self) {
            self.cancelled = true;
        }
    }
}

#[cfg(feature = "serial")]
pub use serial_transport::SerialTransport;

#[cfg(test)]
pub(crate) mod loopback {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};

    /// In-memory duplex byte pipe used to simulate a modem in tests. The
    /// "modem" side is a plain `VecDeque<u8>` the test feeds directly;
    /// writes from the channel land in a separate queue the test can
    /// inspect.
    #[derive(Clone, Default)]
    pub struct LoopbackPort {
        inbound: Arc<Mutex<VecDeque<u8>>>,
        outbound: Arc<Mutex<Vec<u8>>>,
        open: Arc<Mutex<bool>>,
    }

    impl LoopbackPort {
        pub fn new() -> Self {
            Self::default()
        }

        /// Push bytes as if the modem sent them.
        pub fn push_inbound(&self, bytes: &[u8]) {
            self.inbound.lock().unwrap().extend(bytes.iter().copied());
        }

        /// Everything the channel has written so far.
        pub fn written(&self) -> Vec<u8> {
            self.outbound.lock().unwrap().clone()
        }
    }

    impl Port for LoopbackPort {
        fn open(&mut self) -> io::Result<()> {
            *self.open.lock().unwrap() = true;
            Ok(())
        }

        fn close(&mut self) -> io::Result<()> {
            *self.open.lock().unwrap() = false;
            Ok(())
        }

        fn read(&mut self, out: &mut [u8]) -> Result<usize, ReadError> {
            if !*self.open.lock().unwrap() {
                return Err(ReadError::Eof);
            }
            let mut inbound = self.inbound.lock().unwrap();
            if let Some(b) = inbound.pop_front() {
                out[0] = b;
                Ok(1)
            } else {
                drop(inbound);
                std::thread::sleep(Duration::from_millis(1));
                Err(ReadError::Interrupted)
            }
        }

        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.outbound.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn cancel(&mut self) {
            // Polling loop already wakes up on its own short sleep.
        }
    }
}
