//! Byte-at-a-time parser state machine (spec section 4.3).
//!
//! Consumes raw modem bytes and drives transitions between `Idle`,
//! `ReadLine`, `DataPrompt`, `RawData` and `HexData`, classifying each
//! completed line and firing either the response callback (terminal
//! line) or the URC callback (unsolicited line).

use derive_more::Display;
use tracing::trace;

use crate::buffer::ResponseBuffer;
use crate::line::{as_hook_mut, classify, ClassifierFn, LineKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub(crate) enum ParserState {
    Idle,
    ReadLine,
    DataPrompt,
    #[display("RawData({_0})")]
    RawData(usize),
    #[display("HexData({_0})")]
    HexData(usize),
}

/// The AT line/record parser. Owns the response buffer; does not own the
/// classifier hooks, which are supplied per `feed()` call by the channel
/// (they live in the arbiter's shared state, spec section 3).
pub struct Parser {
    state: ParserState,
    expect_dataprompt: bool,
    /// High nibble carried over between two hex digits, `None` between
    /// pairs (spec: "half-nibble carry").
    nibble: Option<u8>,
    buffer: ResponseBuffer,
}

impl Parser {
    pub fn new(capacity: usize) -> Self {
        Self {
            state: ParserState::Idle,
            expect_dataprompt: false,
            nibble: None,
            buffer: ResponseBuffer::new(capacity),
        }
    }

    /// Reset to the idle state (spec I4's boundary: on command completion
    /// or timeout).
    pub fn reset(&mut self) {
        self.state = ParserState::Idle;
        self.expect_dataprompt = false;
        self.nibble = None;
        self.buffer.reset();
    }

    /// One-shot: use `DataPrompt` instead of `ReadLine` for the next
    /// command.
    pub fn expect_dataprompt(&mut self) {
        self.expect_dataprompt = true;
    }

    /// Arm the parser to start collecting a response (spec I3).
    pub fn await_response(&mut self) {
        self.state = if self.expect_dataprompt {
            ParserState::DataPrompt
        } else {
            ParserState::ReadLine
        };
    }

    pub fn truncated_line_count(&self) -> u64 {
        self.buffer.truncated_line_count()
    }

    /// Feed a chunk of bytes through the state machine. `command_hook` and
    /// `channel_hook` are consulted in that order ahead of the built-in
    /// classifier (spec section 4.1); `on_response`/`on_urc` are invoked
    /// synchronously, under whatever lock the caller is already holding
    /// (spec section 5: reader thread holds the channel mutex around
    /// `feed`).
    pub fn feed(
        &mut self,
        bytes: &[u8],
        command_hook: &mut Option<ClassifierFn>,
        channel_hook: &mut Option<ClassifierFn>,
        mut on_response: impl FnMut(&[u8]),
        mut on_urc: impl FnMut(&str),
    ) {
        for &b in bytes {
            self.feed_byte(b, command_hook, channel_hook, &mut on_response, &mut on_urc);
        }
    }

    fn feed_byte(
        &mut self,
        b: u8,
        command_hook: &mut Option<ClassifierFn>,
        channel_hook: &mut Option<ClassifierFn>,
        on_response: &mut dyn FnMut(&[u8]),
        on_urc: &mut dyn FnMut(&str),
    ) {
        match self.state {
            ParserState::Idle | ParserState::ReadLine | ParserState::DataPrompt => {
                let is_terminator = b == b'\r' || b == b'\n';
                if !is_terminator {
                    self.buffer.append(b);
                }
                let dataprompt_immediate = self.state == ParserState::DataPrompt
                    && self.buffer.current_line() == b"> ";
                if is_terminator || dataprompt_immediate {
                    self.handle_line(command_hook, channel_hook, on_response, on_urc);
                }
            }
            ParserState::RawData(mut remaining) => {
                if remaining > 0 {
                    self.buffer.append(b);
                    remaining -= 1;
                }
                if remaining == 0 {
                    self.buffer.commit_line();
                    self.state = ParserState::ReadLine;
                } else {
                    self.state = ParserState::RawData(remaining);
                }
            }
            ParserState::HexData(mut remaining) => {
                if remaining > 0 {
                    if let Some(value) = hex_digit(b) {
                        match self.nibble.take() {
                            None => self.nibble = Some(value),
                            Some(high) => {
                                self.buffer.append((high << 4) | value);
                                remaining -= 1;
                            }
                        }
                    }
                }
                if remaining == 0 {
                    self.buffer.commit_line();
                    self.state = ParserState::ReadLine;
                } else {
                    self.state = ParserState::HexData(remaining);
                }
            }
        }
    }

    /// "Handle current line" procedure (spec section 4.3).
    fn handle_line(
        &mut self,
        command_hook: &mut Option<ClassifierFn>,
        channel_hook: &mut Option<ClassifierFn>,
        on_response: &mut dyn FnMut(&[u8]),
        on_urc: &mut dyn FnMut(&str),
    ) {
        if self.buffer.current_line_is_empty() {
            return;
        }

        let in_dataprompt = self.state == ParserState::DataPrompt;
        let line = String::from_utf8_lossy(self.buffer.current_line()).into_owned();
        let kind = classify(
            &line,
            in_dataprompt,
            as_hook_mut(command_hook),
            as_hook_mut(channel_hook),
        );
        trace!(%line, ?kind, state = %self.state, "at line");

        if kind == LineKind::Urc || self.state == ParserState::Idle {
            on_urc(&line);
            self.buffer.discard_line();
            return;
        }

        match kind {
            LineKind::FinalOk => {
                // The data prompt is a terminal line like "OK", but unlike
                // "OK" its two bytes *are* the payload the caller asked
                // for (spec section 8, scenario 5) - keep it instead of
                // discarding it.
                if in_dataprompt && line == "> " {
                    self.buffer.commit_line();
                } else {
                    self.buffer.discard_line();
                }
                let response = self.buffer.finalize();
                on_response(response);
                self.reset();
            }
            LineKind::Final => {
                self.buffer.commit_line();
                let response = self.buffer.finalize();
                on_response(response);
                self.reset();
            }
            LineKind::Intermediate | LineKind::Unknown => {
                self.buffer.commit_line();
            }
            LineKind::RawDataFollows(n) => {
                self.buffer.commit_line();
                self.nibble = None;
                self.state = ParserState::RawData(n);
            }
            LineKind::HexDataFollows(n) => {
                self.buffer.commit_line();
                self.nibble = None;
                self.state = ParserState::HexData(n);
            }
            LineKind::Urc => unreachable!("handled above"),
        }
    }
}

fn hex_digit(b: u8) -> Option<u8> {
    match b {
        b'0'..=b'9' => Some(b - b'0'),
        b'A'..=b'F' => Some(b - b'A' + 10),
        b'a'..=b'f' => Some(b - b'a' + 10),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feed_collect(parser: &mut Parser, bytes: &[u8]) -> (Vec<Vec<u8>>, Vec<String>) {
        let mut responses = Vec::new();
        let mut urcs = Vec::new();
        let mut no_hook = None;
        let mut no_channel_hook = None;
        parser.feed(
            bytes,
            &mut no_hook,
            &mut no_channel_hook,
            |r| responses.push(r.to_vec()),
            |u| urcs.push(u.to_string()),
        );
        (responses, urcs)
    }

    #[test]
    fn plain_ok() {
        let mut p = Parser::new(256);
        p.await_response();
        let (responses, _) = feed_collect(&mut p, b"OK\r\n");
        assert_eq!(responses, vec![b"".to_vec()]);
    }

    #[test]
    fn intermediate_then_ok() {
        let mut p = Parser::new(256);
        p.await_response();
        let (responses, _) = feed_collect(&mut p, b"123456789\r\nOK\r\n");
        assert_eq!(responses, vec![b"123456789".to_vec()]);
    }

    #[test]
    fn error_is_retained() {
        let mut p = Parser::new(256);
        p.await_response();
        let (responses, _) = feed_collect(&mut p, b"ERROR\r\n");
        assert_eq!(responses, vec![b"ERROR".to_vec()]);
    }

    #[test]
    fn interleaved_urcs() {
        let mut p = Parser::new(256);
        p.await_response();
        let (responses, urcs) = feed_collect(
            &mut p,
            b"\r\n12345\r\nRING\r\n67890\r\nRING\r\nOK\r\n\r\nRING\r\n",
        );
        assert_eq!(responses, vec![b"12345\n67890".to_vec()]);
        assert_eq!(urcs, vec!["RING", "RING", "RING"]);
    }

    #[test]
    fn data_prompt_is_armed_only() {
        let mut p = Parser::new(256);
        p.expect_dataprompt();
        p.await_response();
        let (responses, _) = feed_collect(&mut p, b"\r\n> ");
        assert_eq!(responses, vec![b"> ".to_vec()]);
    }

    #[test]
    fn data_prompt_without_arming_is_intermediate() {
        let mut p = Parser::new(256);
        p.await_response();
        let (responses, _) = feed_collect(&mut p, b"\r\n> \r\nOK\r\n");
        assert_eq!(responses, vec![b"> ".to_vec()]);
    }

    #[test]
    fn raw_data_follows_custom_classifier() {
        let mut p = Parser::new(256);
        p.await_response();
        let mut command_hook: Option<ClassifierFn> = Some(Box::new(|line: &str| {
            if let Some(rest) = line.strip_prefix("+RAWDATA: ") {
                if let Ok(n) = rest.trim().parse::<usize>() {
                    return LineKind::RawDataFollows(n);
                }
            }
            LineKind::Unknown
        }));
        let mut channel_hook: Option<ClassifierFn> = None;

        let mut responses = Vec::new();
        let mut urcs = Vec::new();
        let payload: &[u8] = b"\r\nRING\r\n+RAWDATA: 10\r\nabcd\x01\xffxyzp\r\nRING\r\nOK\r\nRING\r\n";
        p.feed(
            payload,
            &mut command_hook,
            &mut channel_hook,
            |r| responses.push(r.to_vec()),
            |u| urcs.push(u.to_string()),
        );

        let mut expected = b"+RAWDATA: 10\n".to_vec();
        expected.extend_from_slice(b"abcd\x01\xffxyzp");
        assert_eq!(responses, vec![expected]);
        assert_eq!(urcs, vec!["RING", "RING", "RING"]);
    }

    #[test]
    fn overflow_tolerance_keeps_channel_usable() {
        let mut p = Parser::new(8);
        p.await_response();
        let (responses, _) = feed_collect(&mut p, b"1234\r\nOK\r\n");
        assert_eq!(responses, vec![b"1234".to_vec()]);

        p.await_response();
        let (responses, _) = feed_collect(&mut p, b"12345\r\nOK\r\n");
        // Truncated, but the parser resynchronizes on the next command.
        assert!(responses[0].len() < 5);

        p.await_response();
        let (responses, _) = feed_collect(&mut p, b"ok\r\nOK\r\n");
        assert_eq!(responses, vec![b"ok".to_vec()]);
    }

    #[test]
    fn hex_data_follows_pairs_nibbles_big_endian() {
        let mut p = Parser::new(256);
        p.await_response();
        let mut command_hook: Option<ClassifierFn> = Some(Box::new(|line: &str| {
            if let Some(rest) = line.strip_prefix("+HEXDATA: ") {
                if let Ok(n) = rest.trim().parse::<usize>() {
                    return LineKind::HexDataFollows(n);
                }
            }
            LineKind::Unknown
        }));
        let mut channel_hook: Option<ClassifierFn> = None;
        let mut responses = Vec::new();
        let mut urcs = Vec::new();
        p.feed(
            b"+HEXDATA: 2\r\nFF00\r\nOK\r\n",
            &mut command_hook,
            &mut channel_hook,
            |r| responses.push(r.to_vec()),
            |u| urcs.push(u.to_string()),
        );
        let mut expected = b"+HEXDATA: 2\n".to_vec();
        expected.extend_from_slice(&[0xFF, 0x00]);
        assert_eq!(responses, vec![expected]);
        assert!(urcs.is_empty());
    }

    #[test]
    fn empty_lines_are_skipped() {
        let mut p = Parser::new(256);
        p.await_response();
        let (responses, _) = feed_collect(&mut p, b"\r\n\r\nfoo\r\n\r\nOK\r\n");
        assert_eq!(responses, vec![b"foo".to_vec()]);
    }

    #[test]
    fn mixed_terminators_all_end_a_line() {
        let mut p = Parser::new(256);
        p.await_response();
        let (responses, _) = feed_collect(&mut p, b"foo\rbar\nOK\r\n");
        assert_eq!(responses, vec![b"foo\nbar".to_vec()]);
    }
}
