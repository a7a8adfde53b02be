//! Line frames and the newline codec.
//!
//! The device speaks ASCII lines. Incoming lines end in LF (usually CR LF);
//! outgoing lines are always terminated with CR LF.
//!
//! ```text
//! "WELCOME to Envy v1.1.3\r\n"      -> Frame("WELCOME to Envy v1.1.3")
//! "OK\r\nMacAddress 00-aa-"          -> Frame("OK"), rest stays buffered
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::cmp;
use std::fmt;

use bytes::{BufMut, BytesMut};
use serde::Serialize;
use tokio_util::codec::{Decoder, Encoder};
use tracing::{debug, trace};

use crate::error::{Error, Result};

// ============================================================================
// Constants
// ============================================================================

/// Default upper bound on a single line, terminator excluded.
pub const DEFAULT_MAX_FRAME_LEN: usize = 4096;

/// Outgoing line terminator.
const LINE_TERMINATOR: &[u8] = b"\r\n";

// ============================================================================
// Frame
// ============================================================================

/// One text line exchanged with the device, without its terminator.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct Frame(String);

impl Frame {
    /// Creates a frame from a line of text.
    #[inline]
    #[must_use]
    pub fn new(line: impl Into<String>) -> Self {
        Self(line.into())
    }

    /// Returns the line as a string slice.
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Consumes the frame, returning the line.
    #[inline]
    #[must_use]
    pub fn into_string(self) -> String {
        self.0
    }

    /// Returns the first space-delimited token (the title or verb).
    #[inline]
    #[must_use]
    pub fn title(&self) -> &str {
        self.0.split(' ').next().unwrap_or_default()
    }

    /// Returns everything after the title, trimmed.
    #[inline]
    #[must_use]
    pub fn body(&self) -> &str {
        self.0.split_once(' ').map(|(_, rest)| rest.trim()).unwrap_or_default()
    }
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Frame {
    fn from(line: &str) -> Self {
        Self::new(line)
    }
}

// ============================================================================
// LineCodec
// ============================================================================

/// Splits a byte stream into [`Frame`]s at LF and writes frames with CR LF.
///
/// Partial lines stay buffered across reads. A line longer than
/// `max_length` is a protocol error; the connection must be dropped after
/// it because the stream position is no longer trustworthy.
#[derive(Debug, Clone)]
pub struct LineCodec {
    /// Maximum line length, terminator excluded.
    max_length: usize,
    /// Index up to which the buffer has already been scanned for LF.
    next_index: usize,
}

impl LineCodec {
    /// Creates a codec with [`DEFAULT_MAX_FRAME_LEN`].
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::with_max_length(DEFAULT_MAX_FRAME_LEN)
    }

    /// Creates a codec with a custom line limit.
    #[inline]
    #[must_use]
    pub fn with_max_length(max_length: usize) -> Self {
        Self {
            max_length,
            next_index: 0,
        }
    }

    /// Returns the line limit.
    #[inline]
    #[must_use]
    pub fn max_length(&self) -> usize {
        self.max_length
    }
}

impl LineCodec {
    fn oversized(&mut self) -> Error {
        self.next_index = 0;
        Error::protocol(format!("frame exceeds {} bytes", self.max_length))
    }
}

impl Default for LineCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for LineCodec {
    type Item = Frame;
    type Error = Error;

    fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<Frame>> {
        loop {
            // A max-length line is followed by at most CR LF.
            let read_to = cmp::min(self.max_length.saturating_add(2), buf.len());
            let newline = buf[self.next_index..read_to]
                .iter()
                .position(|b| *b == b'\n');

            match newline {
                Some(offset) => {
                    let newline_index = offset + self.next_index;
                    self.next_index = 0;

                    let line = buf.split_to(newline_index + 1);
                    let mut line = &line[..line.len() - 1];
                    if let Some(stripped) = line.strip_suffix(b"\r") {
                        line = stripped;
                    }
                    if line.len() > self.max_length {
                        return Err(self.oversized());
                    }

                    let text = String::from_utf8_lossy(line);
                    let text = text.trim_end();
                    if text.trim_start().is_empty() {
                        continue;
                    }

                    trace!(frame = %text, "Decoded frame");
                    return Ok(Some(Frame::new(text)));
                }
                None if buf.len() > self.max_length.saturating_add(1) => {
                    return Err(self.oversized());
                }
                None => {
                    self.next_index = buf.len();
                    return Ok(None);
                }
            }
        }
    }

    fn decode_eof(&mut self, buf: &mut BytesMut) -> Result<Option<Frame>> {
        if let Some(frame) = self.decode(buf)? {
            return Ok(Some(frame));
        }

        if !buf.is_empty() {
            debug!(len = buf.len(), "Discarding unterminated frame at EOF");
            buf.clear();
            self.next_index = 0;
        }

        Ok(None)
    }
}

impl Encoder<Frame> for LineCodec {
    type Error = Error;

    fn encode(&mut self, frame: Frame, dst: &mut BytesMut) -> Result<()> {
        let line = frame.as_str();

        if line.contains(['\r', '\n']) {
            return Err(Error::invalid_argument(
                "outgoing frame must not contain line terminators",
            ));
        }

        if line.len() > self.max_length {
            return Err(Error::invalid_argument(format!(
                "outgoing frame exceeds {} bytes",
                self.max_length
            )));
        }

        dst.reserve(line.len() + LINE_TERMINATOR.len());
        dst.put_slice(line.as_bytes());
        dst.put_slice(LINE_TERMINATOR);
        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use proptest::prelude::*;

    fn decode_all(codec: &mut LineCodec, buf: &mut BytesMut) -> Vec<String> {
        let mut out = Vec::new();
        while let Some(frame) = codec.decode(buf).expect("decode") {
            out.push(frame.into_string());
        }
        out
    }

    #[test]
    fn test_decode_crlf_lines() {
        let mut codec = LineCodec::new();
        let mut buf = BytesMut::from(&b"OK\r\nMacAddress 01-02-03-04-05-06\r\n"[..]);
        assert_eq!(
            decode_all(&mut codec, &mut buf),
            vec!["OK", "MacAddress 01-02-03-04-05-06"]
        );
        assert!(buf.is_empty());
    }

    #[test]
    fn test_partial_line_is_buffered() {
        let mut codec = LineCodec::new();
        let mut buf = BytesMut::from(&b"IncomingSignal"[..]);
        assert!(codec.decode(&mut buf).expect("decode").is_none());

        buf.extend_from_slice(b"Info 3840x2160 59.940p\r\n");
        let frame = codec.decode(&mut buf).expect("decode").expect("frame");
        assert_eq!(frame.as_str(), "IncomingSignalInfo 3840x2160 59.940p");
    }

    #[test]
    fn test_blank_lines_are_skipped() {
        let mut codec = LineCodec::new();
        let mut buf = BytesMut::from(&b"\r\n \r\nOK\r\n"[..]);
        assert_eq!(decode_all(&mut codec, &mut buf), vec!["OK"]);
    }

    #[test]
    fn test_bare_lf_terminator() {
        let mut codec = LineCodec::new();
        let mut buf = BytesMut::from(&b"PowerOff\n"[..]);
        assert_eq!(decode_all(&mut codec, &mut buf), vec!["PowerOff"]);
    }

    #[test]
    fn test_oversized_frame_is_protocol_error() {
        let mut codec = LineCodec::with_max_length(8);
        let mut buf = BytesMut::from(&b"0123456789"[..]);
        let err = codec.decode(&mut buf).unwrap_err();
        assert!(matches!(err, Error::Protocol { .. }));
        assert!(err.invalidates_connection());
    }

    #[test]
    fn test_max_length_line_is_accepted() {
        let mut codec = LineCodec::with_max_length(4);
        let mut buf = BytesMut::from(&b"ABCD\r\n"[..]);
        assert_eq!(decode_all(&mut codec, &mut buf), vec!["ABCD"]);
    }

    #[test]
    fn test_max_length_line_split_before_lf() {
        let mut codec = LineCodec::with_max_length(4);
        let mut buf = BytesMut::from(&b"ABCD\r"[..]);
        assert!(codec.decode(&mut buf).expect("decode").is_none());

        buf.extend_from_slice(b"\nOK\r\n");
        assert_eq!(decode_all(&mut codec, &mut buf), vec!["ABCD", "OK"]);
    }

    #[test]
    fn test_terminated_line_over_limit_is_rejected() {
        let mut codec = LineCodec::with_max_length(4);
        let mut buf = BytesMut::from(&b"ABCDE\r\n"[..]);
        let err = codec.decode(&mut buf).unwrap_err();
        assert!(matches!(err, Error::Protocol { .. }));
    }

    #[test]
    fn test_invalid_utf8_is_replaced_not_fatal() {
        let mut codec = LineCodec::new();
        let mut buf = BytesMut::from(&b"Temp\xff 40\r\nOK\r\n"[..]);
        let frames = decode_all(&mut codec, &mut buf);
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[1], "OK");
    }

    #[test]
    fn test_decode_eof_discards_partial() {
        let mut codec = LineCodec::new();
        let mut buf = BytesMut::from(&b"Standb"[..]);
        assert!(codec.decode_eof(&mut buf).expect("eof").is_none());
        assert!(buf.is_empty());
    }

    #[test]
    fn test_encode_appends_crlf() {
        let mut codec = LineCodec::new();
        let mut dst = BytesMut::new();
        codec
            .encode(Frame::new("KeyPress MENU"), &mut dst)
            .expect("encode");
        assert_eq!(&dst[..], b"KeyPress MENU\r\n");
    }

    #[test]
    fn test_encode_rejects_embedded_newline() {
        let mut codec = LineCodec::new();
        let mut dst = BytesMut::new();
        assert!(codec.encode(Frame::new("a\nb"), &mut dst).is_err());
        assert!(dst.is_empty());
    }

    #[test]
    fn test_frame_title_and_body() {
        let frame = Frame::new("AspectRatio 3840:2160 1.778 178 \"16:9\"");
        assert_eq!(frame.title(), "AspectRatio");
        assert_eq!(frame.body(), "3840:2160 1.778 178 \"16:9\"");
        assert_eq!(Frame::new("OK").body(), "");
    }

    proptest! {
        #[test]
        fn prop_chunking_does_not_change_frames(
            lines in proptest::collection::vec("[A-Za-z0-9 :.]{1,40}", 1..8),
            split in 0usize..400,
        ) {
            let wire: Vec<u8> = lines
                .iter()
                .flat_map(|l| format!("{l}\r\n").into_bytes())
                .collect();
            let split = split % (wire.len() + 1);

            let mut codec = LineCodec::new();
            let mut buf = BytesMut::new();
            let mut frames = Vec::new();

            buf.extend_from_slice(&wire[..split]);
            frames.extend(decode_all(&mut codec, &mut buf));
            buf.extend_from_slice(&wire[split..]);
            frames.extend(decode_all(&mut codec, &mut buf));

            let expected: Vec<String> = lines
                .iter()
                .map(|l| l.trim_end().to_string())
                .filter(|l| !l.trim_start().is_empty())
                .collect();
            prop_assert_eq!(frames, expected);
        }
    }
}
