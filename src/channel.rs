//! The command arbiter and reader-thread glue (spec sections 4.4, 4.5 and
//! 5): one `Channel` owns exactly one `Port`, one reader thread, and a
//! single command slot. Only one command may be in flight at a time;
//! `command()` blocks the calling thread until the reader thread
//! classifies a terminal line, the deadline passes, or the channel closes.

use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use bytes::BytesMut;
use tracing::{debug, info, warn};

use crate::config::{DEFAULT_BUFFER_CAPACITY, DEFAULT_COMMAND_TIMEOUT, READ_CHUNK_SIZE};
use crate::line::{Callbacks, ClassifierFn, LineKind};
use crate::parser::Parser;
use crate::port::{Port, ReadError};
use crate::{Error, Response, Result};

/// Everything the reader thread and a `command()` caller touch together,
/// guarded by one mutex plus a condvar (spec section 5: "one channel mutex,
/// one condvar, two participants").
struct State {
    parser: Parser,
    /// Reader thread keeps running while `true`; cleared by `Drop`/`close`
    /// to ask it to exit.
    running: bool,
    /// Set once `open()` succeeds, cleared on `close()` or a fatal
    /// transport error observed by the reader thread.
    open: bool,
    /// `true` while the reader thread is blocked inside `Port::read`
    /// (spec section 4.5). `close()` waits for this to go `false` before
    /// touching the port.
    busy: bool,
    /// `true` while a `command()` call is waiting for a terminal line.
    waiting: bool,
    /// The finished response, populated by the reader thread and taken by
    /// the waiting caller.
    response: Option<Response>,
    /// One-shot classifier for the in-flight command only.
    command_hook: Option<ClassifierFn>,
    /// One-shot request to arm `DataPrompt` mode for the next command.
    pending_expect_dataprompt: bool,
    /// Persistent per-channel hooks (spec section 3, `ChannelCallbacks`).
    callbacks: Callbacks,
    /// `None` means wait forever (spec.md `set_timeout(0)`).
    timeout: Option<Duration>,
}

impl State {
    fn new() -> Self {
        Self {
            parser: Parser::new(DEFAULT_BUFFER_CAPACITY),
            running: true,
            open: false,
            busy: false,
            waiting: false,
            response: None,
            command_hook: None,
            pending_expect_dataprompt: false,
            callbacks: Callbacks::new(),
            timeout: Some(DEFAULT_COMMAND_TIMEOUT),
        }
    }
}

/// State shared between the `Channel` handle and its reader thread.
///
/// The port and the rest of the state are guarded by *separate* mutexes
/// (a deliberate deviation from spec.md's single-mutex description,
/// recorded in DESIGN.md): a blocking `Port::read` must not be held under
/// the same lock a `command()` caller needs to arm the next command, or a
/// slow/idle modem would stall every other channel operation for the
/// length of one read poll.
struct Shared {
    port: Mutex<Box<dyn Port>>,
    state: Mutex<State>,
    cond: Condvar,
}

/// A single AT command channel: one transport, one reader thread, one
/// command in flight at a time.
pub struct Channel {
    shared: Arc<Shared>,
    reader: Mutex<Option<JoinHandle<()>>>,
}

impl Channel {
    /// Build a channel over `port` and start its reader thread. The port is
    /// not opened yet; call [`Channel::open`].
    pub fn new(port: impl Port + 'static) -> Self {
        let shared = Arc::new(Shared {
            port: Mutex::new(Box::new(port)),
            state: Mutex::new(State::new()),
            cond: Condvar::new(),
        });
        let reader_shared = Arc::clone(&shared);
        let handle = std::thread::spawn(move || reader_loop(reader_shared));

        Self {
            shared,
            reader: Mutex::new(Some(handle)),
        }
    }

    /// Open the underlying port and let the reader thread start reading.
    pub fn open(&self) -> Result<()> {
        self.shared.port.lock().unwrap().open()?;
        let mut state = self.shared.state.lock().unwrap();
        state.open = true;
        self.shared.cond.notify_all();
        info!("channel open");
        Ok(())
    }

    /// Close the underlying port. Any in-flight `command()` observes
    /// `Error::NoDevice`. Idempotent.
    ///
    /// Waits for the reader thread's current read to finish (spec section
    /// 4.5: "waits for `busy := false`, then closes the underlying
    /// descriptor") before touching the port, so the descriptor is
    /// genuinely closed by the time this returns rather than racing the
    /// reader thread for it. The wait is bounded because every `Port`
    /// implementation here reads with an internal poll timeout
    /// (`SerialTransport`: 200ms, `LoopbackPort`: 1ms) instead of blocking
    /// forever.
    pub fn close(&self) -> Result<()> {
        let mut state = self.shared.state.lock().unwrap();
        state.open = false;
        self.shared.cond.notify_all();
        while state.busy {
            state = self.shared.cond.wait(state).unwrap();
        }
        drop(state);

        let mut port = self.shared.port.lock().unwrap();
        port.cancel();
        port.close()?;
        info!("channel closed");
        Ok(())
    }

    /// Install the persistent per-channel line classifier and URC handler
    /// (spec section 3).
    pub fn set_callbacks(&self, callbacks: Callbacks) {
        self.shared.state.lock().unwrap().callbacks = callbacks;
    }

    /// Arm a one-shot classifier for the next [`Channel::command`] call
    /// only (spec section 4.4: "per-command one-shot hooks").
    pub fn set_command_classifier(&self, hook: impl FnMut(&str) -> LineKind + Send + 'static) {
        self.shared.state.lock().unwrap().command_hook = Some(Box::new(hook));
    }

    /// Arm `DataPrompt` mode for the next command only (spec section 4.3).
    pub fn expect_dataprompt(&self) {
        self.shared.state.lock().unwrap().pending_expect_dataprompt = true;
    }

    /// Set the command deadline; `0` disables it (spec.md `at_set_timeout`).
    pub fn set_timeout(&self, secs: u32) {
        let mut state = self.shared.state.lock().unwrap();
        state.timeout = if secs == 0 {
            None
        } else {
            Some(Duration::from_secs(secs as u64))
        };
    }

    /// Lines silently truncated over the channel's lifetime because a
    /// response exceeded the buffer capacity.
    pub fn truncated_line_count(&self) -> u64 {
        self.shared.state.lock().unwrap().parser.truncated_line_count()
    }

    /// Send `bytes` and block until a terminal line arrives, the deadline
    /// passes, or the channel closes (spec section 4.4).
    pub fn command(&self, bytes: &[u8]) -> Result<Response> {
        let deadline = {
            let mut state = self.shared.state.lock().unwrap();
            if !state.open {
                return Err(Error::NoDevice);
            }

            state.parser.reset();
            if state.pending_expect_dataprompt {
                state.pending_expect_dataprompt = false;
                state.parser.expect_dataprompt();
            }
            state.parser.await_response();

            state.response = None;
            state.waiting = true;

            state.timeout.map(|d| Instant::now() + d)
        };

        debug!(len = bytes.len(), "writing command");
        self.shared.port.lock().unwrap().write(bytes)?;

        let mut state = self.shared.state.lock().unwrap();
        while state.waiting && state.open {
            state = match deadline {
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        break;
                    }
                    let (guard, _timed_out) =
                        self.shared.cond.wait_timeout(state, deadline - now).unwrap();
                    guard
                }
                None => self.shared.cond.wait(state).unwrap(),
            };
        }

        let outcome = if !state.open {
            Err(Error::NoDevice)
        } else if state.waiting {
            // Deadline reached with the slot still armed: give up and
            // resynchronize the parser so the next command starts clean
            // (spec section 4.4, timeout path).
            state.waiting = false;
            state.parser.reset();
            warn!("command timed out");
            Err(Error::Timeout)
        } else {
            Ok(state.response.take().unwrap_or_default())
        };

        state.command_hook = None;
        outcome
    }

    /// `command()` with a preformatted argument list, for callers building
    /// commands with `format_args!`. Appends `"\r\n"` before sending (spec
    /// section 6).
    pub fn command_formatted(&self, args: std::fmt::Arguments<'_>) -> Result<Response> {
        self.command(format!("{}\r\n", args).as_bytes())
    }
}

impl Drop for Channel {
    fn drop(&mut self) {
        let _ = self.close();
        {
            let mut state = self.shared.state.lock().unwrap();
            state.running = false;
            self.shared.cond.notify_all();
        }
        if let Some(handle) = self.reader.lock().unwrap().take() {
            let _ = handle.join();
        }
    }
}

/// The reader thread body (spec section 4.5): wait for the channel to be
/// open, read a chunk, feed it to the parser under the state lock, repeat
/// until told to stop or the transport reports end-of-stream.
fn reader_loop(shared: Arc<Shared>) {
    // Grounded in the teacher's `read_buf: BytesMut` field in its
    // transport connection handling: a reusable scratch buffer the
    // transport reads straight into, rather than an on-stack array that
    // gets copied again afterwards.
    let mut chunk = BytesMut::zeroed(READ_CHUNK_SIZE);
    loop {
        {
            let mut state = shared.state.lock().unwrap();
            while state.running && !state.open {
                state = shared.cond.wait(state).unwrap();
            }
            if !state.running {
                return;
            }
            state.busy = true;
        }

        let read_result = {
            let mut port = shared.port.lock().unwrap();
            port.read(&mut chunk)
        };

        let mut state = shared.state.lock().unwrap();
        state.busy = false;
        shared.cond.notify_all();

        if !state.running {
            return;
        }

        match read_result {
            Ok(0) => {}
            Ok(n) => feed_and_dispatch(&mut state, &chunk[..n], &shared.cond),
            Err(ReadError::Interrupted) => {}
            Err(ReadError::Eof) | Err(ReadError::Io(_)) => {
                warn!("transport closed, marking channel unusable");
                state.open = false;
                state.waiting = false;
                shared.cond.notify_all();
            }
        }
    }
}

/// Feed `bytes` through the parser, disjointly borrowing `State`'s fields
/// so the response/URC callbacks can each mutate their own piece of state
/// without fighting the borrow checker over `&mut state` as a whole.
fn feed_and_dispatch(state: &mut State, bytes: &[u8], cond: &Condvar) {
    let State {
        parser,
        command_hook,
        callbacks,
        response,
        waiting,
        ..
    } = state;

    let mut channel_hook = callbacks.scan_line.take();
    let handle_urc = &mut callbacks.handle_urc;

    parser.feed(
        bytes,
        command_hook,
        &mut channel_hook,
        |bytes| {
            debug!(len = bytes.len(), "response delivered");
            *response = Some(bytes.to_vec());
            *waiting = false;
        },
        |line| {
            debug!(%line, "urc");
            if let Some(handler) = handle_urc.as_mut() {
                handler(line);
            }
        },
    );

    callbacks.scan_line = channel_hook;
    cond.notify_all();
}
