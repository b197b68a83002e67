//! Resumable reply decoder
//!
//! Replies arrive in arbitrary chunks. [`RespDecoder`] keeps the partially read
//! line, bulk payload and open arrays between calls, so a frame split across any
//! number of reads decodes to the same value as the frame delivered at once.

use crate::core::{
    config::EndpointConfig,
    error::{RedisError, RedisResult},
    strings,
    value::RespValue,
};
use bytes::{Buf, BytesMut};

/// Kind of header line being read
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LineKind {
    Status,
    Error,
    Integer,
    Double,
    BulkLength,
    ArrayLength,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    /// Waiting for the type byte of the next element
    Type,
    /// Reading a CRLF terminated line
    Line(LineKind),
    /// Reading `len` payload bytes plus the trailing CRLF
    Bulk { len: usize },
}

#[derive(Debug)]
struct PartialArray {
    remaining: usize,
    items: Vec<RespValue>,
}

enum Step {
    Value(RespValue),
    Continue,
}

/// Streaming RESP decoder.
///
/// Call [`RespDecoder::decode`] whenever new bytes are appended to the read
/// buffer. It consumes bytes until one top-level value is complete and leaves
/// anything after that value in the buffer. After a protocol error the decoder
/// refuses further input until [`RespDecoder::reset`] is called.
#[derive(Debug)]
pub struct RespDecoder {
    state: State,
    line: BytesMut,
    payload: BytesMut,
    stack: Vec<PartialArray>,
    max_bulk_length: usize,
    max_line_length: usize,
    max_nesting_depth: usize,
    poisoned: bool,
}

impl Default for RespDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl RespDecoder {
    /// Create a decoder with the default frame limits
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(&EndpointConfig::default())
    }

    /// Create a decoder using the limits from an endpoint configuration
    #[must_use]
    pub fn with_config(config: &EndpointConfig) -> Self {
        Self::with_limits(config.max_bulk_length, config.max_line_length)
            .with_max_nesting_depth(config.max_nesting_depth)
    }

    /// Create a decoder with explicit limits
    #[must_use]
    pub fn with_limits(max_bulk_length: usize, max_line_length: usize) -> Self {
        Self {
            state: State::Type,
            line: BytesMut::new(),
            payload: BytesMut::new(),
            stack: Vec::new(),
            max_bulk_length,
            max_line_length,
            max_nesting_depth: EndpointConfig::default().max_nesting_depth,
            poisoned: false,
        }
    }

    /// Limit how deeply arrays may nest before the input is rejected
    #[must_use]
    pub const fn with_max_nesting_depth(mut self, depth: usize) -> Self {
        self.max_nesting_depth = depth;
        self
    }

    /// Whether a previous protocol error disabled this decoder
    #[must_use]
    pub const fn is_poisoned(&self) -> bool {
        self.poisoned
    }

    /// Whether no partially decoded frame is held
    #[must_use]
    pub fn is_idle(&self) -> bool {
        self.state == State::Type && self.stack.is_empty() && self.line.is_empty()
    }

    /// Drop all partial state. Used when the connection is re-established.
    pub fn reset(&mut self) {
        self.state = State::Type;
        self.line.clear();
        self.payload.clear();
        self.stack.clear();
        self.poisoned = false;
    }

    /// Decode the next complete value from `buf`.
    ///
    /// Returns `Ok(None)` when every byte of `buf` was consumed without
    /// completing a value.
    ///
    /// # Errors
    ///
    /// Returns [`RedisError::Protocol`] on malformed input. The decoder is then
    /// poisoned and the rest of the stream cannot be trusted.
    pub fn decode(&mut self, buf: &mut BytesMut) -> RedisResult<Option<RespValue>> {
        if self.poisoned {
            return Err(RedisError::Protocol(
                "decoder is poisoned by an earlier protocol error".to_string(),
            ));
        }

        let result = self.decode_inner(buf);
        if result.is_err() {
            self.poisoned = true;
        }
        result
    }

    fn decode_inner(&mut self, buf: &mut BytesMut) -> RedisResult<Option<RespValue>> {
        loop {
            let value = match self.state {
                State::Type => {
                    if buf.is_empty() {
                        return Ok(None);
                    }
                    let kind = match buf[0] {
                        b'+' => LineKind::Status,
                        b'-' => LineKind::Error,
                        b':' => LineKind::Integer,
                        b',' => LineKind::Double,
                        b'$' => LineKind::BulkLength,
                        b'*' => LineKind::ArrayLength,
                        other => {
                            return Err(RedisError::Protocol(format!(
                                "Invalid RESP type byte: 0x{other:02x}"
                            )))
                        }
                    };
                    buf.advance(1);
                    self.state = State::Line(kind);
                    continue;
                }
                State::Line(kind) => {
                    let Some(line) = self.read_line(buf)? else {
                        return Ok(None);
                    };
                    match self.finish_line(kind, &line)? {
                        Step::Value(value) => value,
                        Step::Continue => continue,
                    }
                }
                State::Bulk { len } => {
                    let wanted = len + 2 - self.payload.len();
                    let take = wanted.min(buf.len());
                    self.payload.extend_from_slice(&buf[..take]);
                    buf.advance(take);
                    if self.payload.len() < len + 2 {
                        return Ok(None);
                    }
                    if &self.payload[len..] != b"\r\n" {
                        return Err(RedisError::Protocol(
                            "Bulk string not terminated by CRLF".to_string(),
                        ));
                    }
                    self.payload.truncate(len);
                    self.state = State::Type;
                    RespValue::BulkString(self.payload.split().freeze())
                }
            };

            if let Some(complete) = self.attach(value) {
                return Ok(Some(complete));
            }
        }
    }

    /// Read up to and including the next LF, accumulating across calls
    fn read_line(&mut self, buf: &mut BytesMut) -> RedisResult<Option<BytesMut>> {
        let Some(pos) = buf.iter().position(|&b| b == b'\n') else {
            self.line.extend_from_slice(buf);
            buf.clear();
            self.check_line_length()?;
            return Ok(None);
        };

        self.line.extend_from_slice(&buf[..=pos]);
        buf.advance(pos + 1);
        self.check_line_length()?;

        let mut line = self.line.split();
        if !line.ends_with(b"\r\n") {
            return Err(RedisError::Protocol("Line not terminated by CRLF".to_string()));
        }
        line.truncate(line.len() - 2);
        Ok(Some(line))
    }

    fn check_line_length(&self) -> RedisResult<()> {
        if self.line.len() > self.max_line_length + 2 {
            return Err(RedisError::Protocol(format!(
                "Header line exceeds {} bytes",
                self.max_line_length
            )));
        }
        Ok(())
    }

    fn finish_line(&mut self, kind: LineKind, line: &[u8]) -> RedisResult<Step> {
        self.state = State::Type;
        let value = match kind {
            LineKind::Status => RespValue::SimpleString(utf8(line)?.to_string()),
            LineKind::Error => RespValue::Error(utf8(line)?.to_string()),
            LineKind::Integer => RespValue::Integer(parse_int(line, "integer")?),
            LineKind::Double => RespValue::Double(
                strings::to_double(utf8(line)?)
                    .map_err(|e| RedisError::Protocol(format!("Invalid double: {e}")))?,
            ),
            LineKind::BulkLength => {
                let len = parse_int(line, "bulk string length")?;
                let Some(len) = Self::checked_length(len, "bulk string")? else {
                    return Ok(Step::Value(RespValue::Null));
                };
                if len > self.max_bulk_length {
                    return Err(RedisError::Protocol(format!(
                        "Bulk string of {len} bytes exceeds limit of {}",
                        self.max_bulk_length
                    )));
                }
                self.payload.reserve((len + 2).min(64 * 1024));
                self.state = State::Bulk { len };
                return Ok(Step::Continue);
            }
            LineKind::ArrayLength => {
                let len = parse_int(line, "array length")?;
                let Some(len) = Self::checked_length(len, "array")? else {
                    return Ok(Step::Value(RespValue::Null));
                };
                if len > self.max_bulk_length {
                    return Err(RedisError::Protocol(format!(
                        "Array of {len} elements exceeds limit of {}",
                        self.max_bulk_length
                    )));
                }
                if len == 0 {
                    return Ok(Step::Value(RespValue::Array(Vec::new())));
                }
                if self.stack.len() >= self.max_nesting_depth {
                    return Err(RedisError::Protocol(format!(
                        "Array nesting exceeds {} levels",
                        self.max_nesting_depth
                    )));
                }
                self.stack.push(PartialArray {
                    remaining: len,
                    items: Vec::with_capacity(len.min(1024)),
                });
                return Ok(Step::Continue);
            }
        };
        Ok(Step::Value(value))
    }

    /// `-1` means null; any other negative length is malformed
    fn checked_length(len: i64, what: &str) -> RedisResult<Option<usize>> {
        match len {
            -1 => Ok(None),
            n if n < -1 => Err(RedisError::Protocol(format!(
                "Negative {what} length: {n}"
            ))),
            n => Ok(Some(n as usize)),
        }
    }

    /// Add a finished element to the innermost open array, closing arrays as
    /// they fill. Returns the top-level value once nothing remains open.
    fn attach(&mut self, mut value: RespValue) -> Option<RespValue> {
        loop {
            let Some(top) = self.stack.last_mut() else {
                return Some(value);
            };
            top.items.push(value);
            top.remaining -= 1;
            if top.remaining > 0 {
                return None;
            }
            let items = std::mem::take(&mut top.items);
            self.stack.pop();
            value = RespValue::Array(items);
        }
    }
}

fn utf8(line: &[u8]) -> RedisResult<&str> {
    std::str::from_utf8(line).map_err(|e| RedisError::Protocol(format!("Invalid UTF-8: {e}")))
}

fn parse_int(line: &[u8], what: &str) -> RedisResult<i64> {
    utf8(line)?
        .parse::<i64>()
        .map_err(|e| RedisError::Protocol(format!("Invalid {what}: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    fn decode_all(data: &[u8]) -> RedisResult<Option<RespValue>> {
        let mut buf = BytesMut::from(data);
        RespDecoder::new().decode(&mut buf)
    }

    fn bulk(s: &str) -> RespValue {
        RespValue::BulkString(Bytes::copy_from_slice(s.as_bytes()))
    }

    #[test]
    fn test_decode_scalars() {
        assert_eq!(
            decode_all(b"+OK\r\n").unwrap(),
            Some(RespValue::SimpleString("OK".to_string()))
        );
        assert_eq!(
            decode_all(b"-ERR unknown\r\n").unwrap(),
            Some(RespValue::Error("ERR unknown".to_string()))
        );
        assert_eq!(
            decode_all(b":-42\r\n").unwrap(),
            Some(RespValue::Integer(-42))
        );
        assert_eq!(decode_all(b"$6\r\nfoobar\r\n").unwrap(), Some(bulk("foobar")));
        assert_eq!(decode_all(b"$0\r\n\r\n").unwrap(), Some(bulk("")));
    }

    #[test]
    fn test_decode_double() {
        assert_eq!(
            decode_all(b",1.5\r\n").unwrap(),
            Some(RespValue::Double(1.5))
        );
        assert_eq!(
            decode_all(b",-inf\r\n").unwrap(),
            Some(RespValue::Double(f64::NEG_INFINITY))
        );
        match decode_all(b",nan\r\n").unwrap() {
            Some(RespValue::Double(d)) => assert!(d.is_nan()),
            other => panic!("expected nan, got {other:?}"),
        }
    }

    #[test]
    fn test_null_and_empty_are_distinct() {
        assert_eq!(decode_all(b"$-1\r\n").unwrap(), Some(RespValue::Null));
        assert_eq!(decode_all(b"*-1\r\n").unwrap(), Some(RespValue::Null));
        assert_eq!(
            decode_all(b"*0\r\n").unwrap(),
            Some(RespValue::Array(Vec::new()))
        );
    }

    #[test]
    fn test_nested_arrays() {
        let data = b"*3\r\n*2\r\n:1\r\n:2\r\n*0\r\n$3\r\nfoo\r\n";
        assert_eq!(
            decode_all(data).unwrap(),
            Some(RespValue::Array(vec![
                RespValue::Array(vec![RespValue::Integer(1), RespValue::Integer(2)]),
                RespValue::Array(Vec::new()),
                bulk("foo"),
            ]))
        );
    }

    #[test]
    fn test_byte_at_a_time_matches_whole_frame() {
        let data: &[u8] =
            b"*4\r\n$7\r\nmessage\r\n$4\r\nchan\r\n*2\r\n$-1\r\n:7\r\n$5\r\nhe\r\nl\r\n";
        let expected = decode_all(data).unwrap().unwrap();

        let mut decoder = RespDecoder::new();
        let mut buf = BytesMut::new();
        let mut result = None;
        for (i, byte) in data.iter().enumerate() {
            buf.extend_from_slice(&[*byte]);
            if let Some(value) = decoder.decode(&mut buf).unwrap() {
                assert_eq!(i, data.len() - 1, "completed before the last byte");
                result = Some(value);
            }
            assert!(buf.is_empty());
        }
        assert_eq!(result, Some(expected));
        assert!(decoder.is_idle());
    }

    #[test]
    fn test_arbitrary_chunk_boundaries() {
        let data: &[u8] = b"*2\r\n$12\r\nhello\r\nworld\r\n+OK\r\n";
        let expected = RespValue::Array(vec![
            bulk("hello\r\nworld"),
            RespValue::SimpleString("OK".to_string()),
        ]);
        for split in 1..data.len() {
            let mut decoder = RespDecoder::new();
            let mut buf = BytesMut::from(&data[..split]);
            let first = decoder.decode(&mut buf).unwrap();
            buf.extend_from_slice(&data[split..]);
            let value = match first {
                Some(v) => v,
                None => decoder.decode(&mut buf).unwrap().unwrap(),
            };
            assert_eq!(value, expected, "split at {split}");
        }
    }

    #[test]
    fn test_leaves_following_frames_in_buffer() {
        let mut decoder = RespDecoder::new();
        let mut buf = BytesMut::from(&b"+first\r\n:2\r\n+th"[..]);
        assert_eq!(
            decoder.decode(&mut buf).unwrap(),
            Some(RespValue::SimpleString("first".to_string()))
        );
        assert_eq!(decoder.decode(&mut buf).unwrap(), Some(RespValue::Integer(2)));
        assert_eq!(decoder.decode(&mut buf).unwrap(), None);
        buf.extend_from_slice(b"ird\r\n");
        assert_eq!(
            decoder.decode(&mut buf).unwrap(),
            Some(RespValue::SimpleString("third".to_string()))
        );
    }

    #[test]
    fn test_invalid_type_byte_poisons() {
        let mut decoder = RespDecoder::new();
        let mut buf = BytesMut::from(&b"!oops\r\n"[..]);
        assert!(matches!(
            decoder.decode(&mut buf),
            Err(RedisError::Protocol(_))
        ));
        assert!(decoder.is_poisoned());

        let mut next = BytesMut::from(&b"+OK\r\n"[..]);
        assert!(decoder.decode(&mut next).is_err());

        decoder.reset();
        assert_eq!(
            decoder.decode(&mut next).unwrap(),
            Some(RespValue::SimpleString("OK".to_string()))
        );
    }

    #[test]
    fn test_missing_crlf() {
        assert!(matches!(
            decode_all(b"$3\r\nfooXY"),
            Err(RedisError::Protocol(_))
        ));
        assert!(matches!(decode_all(b"+OK\n"), Err(RedisError::Protocol(_))));
    }

    #[test]
    fn test_invalid_lengths() {
        assert!(decode_all(b"$-2\r\n").is_err());
        assert!(decode_all(b"*-5\r\n").is_err());
        assert!(decode_all(b"$abc\r\n").is_err());
        assert!(decode_all(b":12x\r\n").is_err());
    }

    #[test]
    fn test_limits() {
        let mut decoder = RespDecoder::with_limits(4, 8);
        let mut buf = BytesMut::from(&b"$5\r\n"[..]);
        assert!(decoder.decode(&mut buf).is_err());

        let mut decoder = RespDecoder::with_limits(4, 8);
        let mut buf = BytesMut::from(&b"+0123456789abcdef"[..]);
        assert!(decoder.decode(&mut buf).is_err());

        let mut decoder = RespDecoder::with_limits(4, 64);
        let mut buf = BytesMut::from(&b"*1000000000000\r\n"[..]);
        assert!(matches!(decoder.decode(&mut buf), Err(RedisError::Protocol(_))));

        let mut decoder = RespDecoder::with_limits(4, 64);
        let mut buf = BytesMut::from(&b"*5\r\n"[..]);
        assert!(matches!(decoder.decode(&mut buf), Err(RedisError::Protocol(_))));

        let mut decoder = RespDecoder::with_limits(4, 64);
        let mut buf = BytesMut::from(&b"*4\r\n:1\r\n:2\r\n:3\r\n:4\r\n"[..]);
        assert_eq!(
            decoder.decode(&mut buf).unwrap(),
            Some(RespValue::Array((1..=4).map(RespValue::Integer).collect()))
        );
    }

    #[test]
    fn test_nesting_depth_limit() {
        let mut decoder = RespDecoder::new().with_max_nesting_depth(3);
        let mut buf = BytesMut::from(&b"*1\r\n*1\r\n*1\r\n:7\r\n"[..]);
        let nested = RespValue::Array(vec![RespValue::Array(vec![RespValue::Array(vec![
            RespValue::Integer(7),
        ])])]);
        assert_eq!(decoder.decode(&mut buf).unwrap(), Some(nested));

        let mut buf = BytesMut::from(&b"*1\r\n*1\r\n*1\r\n*1\r\n:7\r\n"[..]);
        assert!(matches!(decoder.decode(&mut buf), Err(RedisError::Protocol(_))));
        assert!(decoder.is_poisoned());
    }

    #[test]
    fn test_deeply_nested_input_is_rejected() {
        let mut data = b"*1\r\n".repeat(1_000_000);
        data.extend_from_slice(b":1\r\n");
        let mut decoder = RespDecoder::new();
        let mut buf = BytesMut::from(&data[..]);
        assert!(matches!(decoder.decode(&mut buf), Err(RedisError::Protocol(_))));
        assert!(decoder.is_poisoned());

        let config = EndpointConfig::default().with_max_nesting_depth(2);
        let mut decoder = RespDecoder::with_config(&config);
        let mut buf = BytesMut::from(&b"*1\r\n*1\r\n*1\r\n:1\r\n"[..]);
        assert!(decoder.decode(&mut buf).is_err());
    }
}
