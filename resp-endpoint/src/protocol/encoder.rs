//! Reply value encoder
//!
//! Commands are framed by [`CommandArgs`](super::CommandArgs). This encoder
//! writes arbitrary [`RespValue`]s and is what a server side (or a test double)
//! uses to produce replies and push messages.

use crate::core::{strings, value::RespValue};
use bytes::{BufMut, Bytes, BytesMut};

const CRLF: &[u8] = b"\r\n";

/// Encodes RESP values into bytes
pub struct RespEncoder;

impl RespEncoder {
    /// Encode a value into a buffer
    pub fn encode(value: &RespValue, buf: &mut BytesMut) {
        match value {
            RespValue::SimpleString(s) => {
                buf.put_u8(b'+');
                buf.put_slice(s.as_bytes());
                buf.put_slice(CRLF);
            }
            RespValue::Error(e) => {
                buf.put_u8(b'-');
                buf.put_slice(e.as_bytes());
                buf.put_slice(CRLF);
            }
            RespValue::Integer(i) => {
                buf.put_u8(b':');
                buf.put_slice(i.to_string().as_bytes());
                buf.put_slice(CRLF);
            }
            RespValue::Double(d) => {
                buf.put_u8(b',');
                buf.put_slice(strings::format_double(*d).as_bytes());
                buf.put_slice(CRLF);
            }
            RespValue::BulkString(data) => {
                buf.put_u8(b'$');
                buf.put_slice(data.len().to_string().as_bytes());
                buf.put_slice(CRLF);
                buf.put_slice(data);
                buf.put_slice(CRLF);
            }
            RespValue::Null => {
                buf.put_slice(b"$-1\r\n");
            }
            RespValue::Array(arr) => {
                buf.put_u8(b'*');
                buf.put_slice(arr.len().to_string().as_bytes());
                buf.put_slice(CRLF);
                for item in arr {
                    Self::encode(item, buf);
                }
            }
        }
    }

    /// Encode a single value into a new frame
    #[must_use]
    pub fn to_bytes(value: &RespValue) -> Bytes {
        let mut buf = BytesMut::new();
        Self::encode(value, &mut buf);
        buf.freeze()
    }

    /// Build a push frame as sent to a subscribed connection:
    /// an array of bulk strings
    #[must_use]
    pub fn push(parts: &[&[u8]]) -> Bytes {
        Self::to_bytes(&RespValue::Array(
            parts
                .iter()
                .map(|p| RespValue::BulkString(Bytes::copy_from_slice(p)))
                .collect(),
        ))
    }
}
