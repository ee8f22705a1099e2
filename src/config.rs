//! Crate-wide defaults and bounds.

use std::time::Duration;

/// Default response buffer capacity, matching the historical `attentive`
/// parser's default of 256 bytes (one byte is always reserved for the
/// terminating NUL, see [`crate::buffer::ResponseBuffer`]).
pub const DEFAULT_BUFFER_CAPACITY: usize = 256;

/// Default command timeout. `0` disables the deadline entirely
/// (`Channel::set_timeout`); this is only the value a freshly built
/// channel starts with.
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(5);

/// Number of bytes read from the transport per reader-thread iteration.
/// The parser is defined over a byte-at-a-time feed; reading in chunks is
/// purely a throughput optimization and must not change observable
/// behavior (spec design note: "byte-at-a-time feeding").
pub(crate) const READ_CHUNK_SIZE: usize = 64;
