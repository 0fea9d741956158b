//! Core output framing and classification
//!
//! The core writes free-form log lines to stdout and stderr. Lines are
//! framed with [`OutputLineCodec`] and classified with [`classify`] so the
//! front-end can style them.

use std::io;

use bytes::BytesMut;
use tokio_util::codec::Decoder;

/// Lines longer than this are split rather than buffered without bound
pub const MAX_LINE_LENGTH: usize = 64 * 1024;

/// How a core output line should be presented
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Severity {
    /// The tunnel reports a working connection
    Success,
    /// The core reports an error or crashed
    Failure,
    /// Anything else
    Info,
}

impl Severity {
    /// Short tag for sinks that style by name
    pub fn tag(&self) -> &'static str {
        match self {
            Severity::Success => "success",
            Severity::Failure => "failure",
            Severity::Info => "info",
        }
    }
}

/// Classify one output line by case-insensitive substring
///
/// "connected" wins over "error" and "panic" when a line has both.
pub fn classify(line: &str) -> Severity {
    let lower = line.to_lowercase();
    if lower.contains("connected") {
        Severity::Success
    } else if lower.contains("error") || lower.contains("panic") {
        Severity::Failure
    } else {
        Severity::Info
    }
}

/// Splits a byte stream into lines, tolerating CRLF and invalid UTF-8
#[derive(Debug, Default)]
pub struct OutputLineCodec {
    /// Bytes already scanned for a newline
    scanned: usize,
}

impl OutputLineCodec {
    pub fn new() -> Self {
        Self::default()
    }

    fn take_line(&mut self, src: &mut BytesMut, len: usize, consumed: usize) -> String {
        let chunk = src.split_to(consumed);
        self.scanned = 0;
        let mut line = &chunk[..len];
        if line.last() == Some(&b'\r') {
            line = &line[..line.len() - 1];
        }
        String::from_utf8_lossy(line).into_owned()
    }
}

impl Decoder for OutputLineCodec {
    type Item = String;
    type Error = io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if let Some(offset) = src[self.scanned..].iter().position(|b| *b == b'\n') {
            let newline = self.scanned + offset;
            return Ok(Some(self.take_line(src, newline, newline + 1)));
        }

        if src.len() >= MAX_LINE_LENGTH {
            return Ok(Some(self.take_line(src, MAX_LINE_LENGTH, MAX_LINE_LENGTH)));
        }

        self.scanned = src.len();
        Ok(None)
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if let Some(line) = self.decode(src)? {
            return Ok(Some(line));
        }
        if src.is_empty() {
            return Ok(None);
        }
        let len = src.len();
        Ok(Some(self.take_line(src, len, len)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify() {
        assert_eq!(classify("Connected to relay"), Severity::Success);
        assert_eq!(classify("panic: nil pointer"), Severity::Failure);
        assert_eq!(classify("listening on 127.0.0.1:30000"), Severity::Info);
        assert_eq!(classify("TLS ERROR: handshake"), Severity::Failure);
        assert_eq!(classify("connected; ignoring error"), Severity::Success);
    }

    #[test]
    fn test_decode_lines() {
        let mut codec = OutputLineCodec::new();
        let mut buf = BytesMut::from(&b"first\r\nsec"[..]);

        assert_eq!(codec.decode(&mut buf).unwrap().as_deref(), Some("first"));
        assert_eq!(codec.decode(&mut buf).unwrap(), None);

        buf.extend_from_slice(b"ond\n");
        assert_eq!(codec.decode(&mut buf).unwrap().as_deref(), Some("second"));
        assert!(buf.is_empty());
    }

    #[test]
    fn test_decode_eof_flushes_partial_line() {
        let mut codec = OutputLineCodec::new();
        let mut buf = BytesMut::from(&b"no newline"[..]);

        assert_eq!(codec.decode(&mut buf).unwrap(), None);
        assert_eq!(
            codec.decode_eof(&mut buf).unwrap().as_deref(),
            Some("no newline")
        );
        assert_eq!(codec.decode_eof(&mut buf).unwrap(), None);
    }

    #[test]
    fn test_decode_invalid_utf8() {
        let mut codec = OutputLineCodec::new();
        let mut buf = BytesMut::from(&b"bad \xff byte\n"[..]);
        assert_eq!(
            codec.decode(&mut buf).unwrap().as_deref(),
            Some("bad \u{fffd} byte")
        );
    }

    #[test]
    fn test_decode_splits_overlong_line() {
        let mut codec = OutputLineCodec::new();
        let mut buf = BytesMut::from(vec![b'x'; MAX_LINE_LENGTH + 3].as_slice());

        let line = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(line.len(), MAX_LINE_LENGTH);
        assert_eq!(buf.len(), 3);
    }
}
