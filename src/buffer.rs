//! Bounded response buffer with the `line_start`/`end` cursor pair
//! described in spec section 4.2.

/// A fixed-capacity byte buffer holding the response collected so far for
/// the in-flight command, plus whatever partial line is currently being
/// assembled.
///
/// Invariant (spec I1): `0 <= line_start <= end <= capacity - 1`. One byte
/// of capacity is always reserved for the NUL terminator written by
/// [`ResponseBuffer::finalize`].
#[derive(Debug)]
pub struct ResponseBuffer {
    buf: Vec<u8>,
    end: usize,
    line_start: usize,
    /// Lines that overflowed capacity and were silently truncated. Exposed
    /// so higher layers can warn without the channel treating it as fatal
    /// (spec design note: "silent buffer overflow").
    truncated_lines: u64,
}

impl ResponseBuffer {
    pub fn new(capacity: usize) -> Self {
        assert!(capacity >= 2, "buffer capacity must fit at least one byte plus a NUL");
        Self {
            buf: vec![0u8; capacity],
            end: 0,
            line_start: 0,
            truncated_lines: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.buf.len()
    }

    /// Reset to the empty state, ready for a new command. Does not clear
    /// the truncation counter — that is a channel-lifetime statistic.
    pub fn reset(&mut self) {
        self.end = 0;
        self.line_start = 0;
    }

    pub fn truncated_line_count(&self) -> u64 {
        self.truncated_lines
    }

    /// Append one byte, silently dropping it if the buffer is full
    /// (reserving the last slot for the NUL terminator).
    pub fn append(&mut self, b: u8) {
        if self.end < self.buf.len() - 1 {
            self.buf[self.end] = b;
            self.end += 1;
        } else {
            self.truncated_lines += 1;
        }
    }

    /// Append a trailing `'\n'` and advance `line_start` past it, keeping
    /// the line in the response.
    pub fn commit_line(&mut self) {
        self.append(b'\n');
        self.line_start = self.end;
    }

    /// Rewind `end` back to `line_start`, discarding the current line
    /// (used for `FinalOk` and for URC lines).
    pub fn discard_line(&mut self) {
        self.end = self.line_start;
    }

    /// The bytes of the line currently being assembled, i.e. `[line_start,
    /// end)`.
    pub fn current_line(&self) -> &[u8] {
        &self.buf[self.line_start..self.end]
    }

    pub fn current_line_is_empty(&self) -> bool {
        self.end == self.line_start
    }

    /// Drop a trailing newline if present and NUL-terminate. Returns the
    /// finalized slice `[0, end)` (without the NUL).
    pub fn finalize(&mut self) -> &[u8] {
        if self.end > 0 && self.buf[self.end - 1] == b'\n' {
            self.end -= 1;
        }
        self.buf[self.end] = 0;
        &self.buf[..self.end]
    }
}
