//! Command argument lists and their wire encoding
//!
//! A command is sent as an array of bulk strings. [`CommandArgs`] collects the
//! arguments in wire order; keys and values go through the active codec as they
//! are added, everything else is rendered to its canonical text form.

use crate::core::{
    codec::RedisCodec,
    error::{RedisError, RedisResult},
    strings,
};
use bytes::{BufMut, Bytes, BytesMut};
use std::fmt;
use std::sync::{Arc, OnceLock};

const CRLF: &[u8] = b"\r\n";

const CACHED_MIN: i64 = -128;
const CACHED_MAX: i64 = 127;

/// Decimal rendering of `value`. Small integers come from a shared table.
fn integer_bytes(value: i64) -> Bytes {
    static CACHE: OnceLock<Vec<Bytes>> = OnceLock::new();

    if (CACHED_MIN..=CACHED_MAX).contains(&value) {
        let table = CACHE.get_or_init(|| {
            (CACHED_MIN..=CACHED_MAX)
                .map(|i| Bytes::from(i.to_string()))
                .collect()
        });
        table[(value - CACHED_MIN) as usize].clone()
    } else {
        Bytes::from(value.to_string())
    }
}

fn put_bulk(buf: &mut BytesMut, data: &[u8]) {
    buf.put_u8(b'$');
    buf.put_slice(integer_bytes(data.len() as i64).as_ref());
    buf.put_slice(CRLF);
    buf.put_slice(data);
    buf.put_slice(CRLF);
}

/// A single typed command argument
#[derive(Debug, Clone, PartialEq)]
pub enum CommandArg {
    /// Raw text argument, sent as its UTF-8 bytes
    Str(String),
    /// Raw byte argument
    Bytes(Bytes),
    /// Signed integer, sent in decimal
    Integer(i64),
    /// Double, sent as `+inf`, `-inf`, `nan` or a decimal
    Double(f64),
    /// Key bytes produced by the codec
    Key(Bytes),
    /// Value bytes produced by the codec
    Value(Bytes),
}

impl CommandArg {
    fn encode(&self, buf: &mut BytesMut) {
        match self {
            Self::Str(s) => put_bulk(buf, s.as_bytes()),
            Self::Bytes(b) | Self::Key(b) | Self::Value(b) => put_bulk(buf, b),
            Self::Integer(i) => put_bulk(buf, &integer_bytes(*i)),
            Self::Double(d) => put_bulk(buf, strings::format_double(*d).as_bytes()),
        }
    }
}

impl From<&str> for CommandArg {
    fn from(s: &str) -> Self {
        Self::Str(s.to_string())
    }
}
impl From<String> for CommandArg {
    fn from(s: String) -> Self {
        Self::Str(s)
    }
}
impl From<&[u8]> for CommandArg {
    fn from(b: &[u8]) -> Self {
        Self::Bytes(Bytes::copy_from_slice(b))
    }
}
impl From<Vec<u8>> for CommandArg {
    fn from(b: Vec<u8>) -> Self {
        Self::Bytes(Bytes::from(b))
    }
}
impl From<Bytes> for CommandArg {
    fn from(b: Bytes) -> Self {
        Self::Bytes(b)
    }
}
impl From<i64> for CommandArg {
    fn from(i: i64) -> Self {
        Self::Integer(i)
    }
}
impl From<i32> for CommandArg {
    fn from(i: i32) -> Self {
        Self::Integer(i64::from(i))
    }
}
impl From<u32> for CommandArg {
    fn from(i: u32) -> Self {
        Self::Integer(i64::from(i))
    }
}
impl From<f64> for CommandArg {
    fn from(d: f64) -> Self {
        Self::Double(d)
    }
}

/// Ordered argument list for one command.
///
/// ```
/// use resp_endpoint::protocol::CommandArgs;
/// use resp_endpoint::StringCodec;
/// use std::sync::Arc;
///
/// let args = CommandArgs::new(Arc::new(StringCodec))
///     .add_key(&"counter".to_string())
///     .add(5);
/// let frame = args.encode_command("INCRBY");
/// assert_eq!(&frame[..], b"*3\r\n$6\r\nINCRBY\r\n$7\r\ncounter\r\n$1\r\n5\r\n");
/// ```
pub struct CommandArgs<C: RedisCodec> {
    codec: Arc<C>,
    args: Vec<CommandArg>,
}

impl<C: RedisCodec> Clone for CommandArgs<C> {
    fn clone(&self) -> Self {
        Self {
            codec: Arc::clone(&self.codec),
            args: self.args.clone(),
        }
    }
}

impl<C: RedisCodec> CommandArgs<C> {
    /// Create an empty argument list
    pub fn new(codec: Arc<C>) -> Self {
        Self {
            codec,
            args: Vec::new(),
        }
    }

    /// Append a raw argument (string, bytes, integer or double)
    #[must_use]
    pub fn add(mut self, arg: impl Into<CommandArg>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Append a key through the codec
    #[must_use]
    pub fn add_key(mut self, key: &C::Key) -> Self {
        self.args.push(CommandArg::Key(self.codec.encode_key(key)));
        self
    }

    /// Append several keys through the codec
    #[must_use]
    pub fn add_keys<'a>(mut self, keys: impl IntoIterator<Item = &'a C::Key>) -> Self {
        for key in keys {
            self.args.push(CommandArg::Key(self.codec.encode_key(key)));
        }
        self
    }

    /// Append a value through the codec
    #[must_use]
    pub fn add_value(mut self, value: &C::Value) -> Self {
        self.args.push(CommandArg::Value(self.codec.encode_value(value)));
        self
    }

    /// Append several values through the codec
    #[must_use]
    pub fn add_values<'a>(mut self, values: impl IntoIterator<Item = &'a C::Value>) -> Self {
        for value in values {
            self.args.push(CommandArg::Value(self.codec.encode_value(value)));
        }
        self
    }

    /// Append a key followed by its value
    #[must_use]
    pub fn add_key_value(self, key: &C::Key, value: &C::Value) -> Self {
        self.add_key(key).add_value(value)
    }

    /// Append a value that must be present.
    ///
    /// # Errors
    ///
    /// Returns [`RedisError::InvalidArgument`] when `value` is `None`; a missing
    /// payload cannot be framed as a bulk string.
    pub fn try_add_value(self, value: Option<&C::Value>) -> RedisResult<Self> {
        match value {
            Some(value) => Ok(self.add_value(value)),
            None => Err(RedisError::InvalidArgument(
                "value must not be null".to_string(),
            )),
        }
    }

    /// Number of arguments
    #[must_use]
    pub fn len(&self) -> usize {
        self.args.len()
    }

    /// Whether no argument was added
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.args.is_empty()
    }

    /// The arguments in wire order
    #[must_use]
    pub fn args(&self) -> &[CommandArg] {
        &self.args
    }

    /// The codec keys and values were encoded with
    #[must_use]
    pub fn codec(&self) -> &Arc<C> {
        &self.codec
    }

    /// First integer-typed argument
    #[must_use]
    pub fn first_integer(&self) -> Option<i64> {
        self.args.iter().find_map(|arg| match arg {
            CommandArg::Integer(i) => Some(*i),
            _ => None,
        })
    }

    /// First raw string argument
    #[must_use]
    pub fn first_string(&self) -> Option<&str> {
        self.args.iter().find_map(|arg| match arg {
            CommandArg::Str(s) => Some(s.as_str()),
            _ => None,
        })
    }

    /// Encoded bytes of the first key argument
    #[must_use]
    pub fn first_encoded_key(&self) -> Option<&Bytes> {
        self.args.iter().find_map(|arg| match arg {
            CommandArg::Key(k) => Some(k),
            _ => None,
        })
    }

    /// Write the arguments as consecutive bulk strings
    pub fn encode(&self, buf: &mut BytesMut) {
        for arg in &self.args {
            arg.encode(buf);
        }
    }

    /// Build the complete request frame with `keyword` as the first element
    #[must_use]
    pub fn encode_command(&self, keyword: &str) -> Bytes {
        let mut buf = BytesMut::with_capacity(16 + keyword.len() + self.args.len() * 16);
        buf.put_u8(b'*');
        buf.put_slice(integer_bytes(self.args.len() as i64 + 1).as_ref());
        buf.put_slice(CRLF);
        put_bulk(&mut buf, keyword.as_bytes());
        self.encode(&mut buf);
        buf.freeze()
    }
}

impl<C: RedisCodec> fmt::Display for CommandArgs<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, arg) in self.args.iter().enumerate() {
            if i > 0 {
                f.write_str(" ")?;
            }
            match arg {
                CommandArg::Str(s) => f.write_str(s)?,
                CommandArg::Bytes(b) => write!(f, "{}", String::from_utf8_lossy(b))?,
                CommandArg::Integer(n) => write!(f, "{n}")?,
                CommandArg::Double(d) => f.write_str(&strings::format_double(*d))?,
                CommandArg::Key(k) => write!(f, "key<{}>", String::from_utf8_lossy(k))?,
                CommandArg::Value(v) => write!(f, "value<{}>", String::from_utf8_lossy(v))?,
            }
        }
        Ok(())
    }
}

impl<C: RedisCodec> fmt::Debug for CommandArgs<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandArgs")
            .field("args", &self.args)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::codec::{ByteArrayCodec, StringCodec};

    fn string_args() -> CommandArgs<StringCodec> {
        CommandArgs::new(Arc::new(StringCodec))
    }

    fn encoded<C: RedisCodec>(args: &CommandArgs<C>) -> Vec<u8> {
        let mut buf = BytesMut::new();
        args.encode(&mut buf);
        buf.to_vec()
    }

    #[test]
    fn test_first_integer_none() {
        assert_eq!(string_args().add("foo").first_integer(), None);
    }

    #[test]
    fn test_first_integer_positive() {
        let args = string_args()
            .add(1i64)
            .add(127)
            .add(128)
            .add(129)
            .add(0)
            .add(-1);
        assert_eq!(args.first_integer(), Some(1));
    }

    #[test]
    fn test_first_integer_negative() {
        let args = string_args().add(-1i64).add(-127).add(-128).add(-129);
        assert_eq!(args.first_integer(), Some(-1));
    }

    #[test]
    fn test_first_integer_extremes() {
        assert_eq!(string_args().add(i64::MAX).first_integer(), Some(i64::MAX));
        assert_eq!(string_args().add(i64::MIN).first_integer(), Some(i64::MIN));
        assert_eq!(
            string_args().add(i64::MIN + 2).first_integer(),
            Some(i64::MIN + 2)
        );
        assert_eq!(
            string_args().add(i32::MIN).first_integer(),
            Some(i64::from(i32::MIN))
        );
    }

    #[test]
    fn test_cached_and_uncached_integers_encode_the_same_way() {
        let args = string_args().add(127).add(128).add(-128).add(-129);
        assert_eq!(
            encoded(&args),
            b"$3\r\n127\r\n$3\r\n128\r\n$4\r\n-128\r\n$4\r\n-129\r\n".to_vec()
        );
        let extremes = string_args().add(i64::MAX).add(i64::MIN);
        assert_eq!(
            encoded(&extremes),
            b"$19\r\n9223372036854775807\r\n$20\r\n-9223372036854775808\r\n".to_vec()
        );
    }

    #[test]
    fn test_first_string() {
        assert_eq!(string_args().add(1).first_string(), None);
        assert_eq!(
            string_args().add("one").add("two").first_string(),
            Some("one")
        );
    }

    #[test]
    fn test_first_encoded_key() {
        assert_eq!(string_args().add(1i64).first_encoded_key(), None);
        let args = string_args()
            .add_key(&"one".to_string())
            .add_key(&"two".to_string());
        assert_eq!(args.first_encoded_key(), Some(&Bytes::from_static(b"one")));
    }

    #[test]
    fn test_add_values() {
        let values = vec!["1".to_string(), "2".to_string()];
        let args = string_args().add_values(&values);
        assert_eq!(encoded(&args), b"$1\r\n1\r\n$1\r\n2\r\n".to_vec());
    }

    #[test]
    fn test_add_values_independent_of_codec() {
        let values = vec![b"1".to_vec(), b"2".to_vec()];
        let args = CommandArgs::new(Arc::new(ByteArrayCodec)).add_values(&values);
        assert_eq!(encoded(&args), b"$1\r\n1\r\n$1\r\n2\r\n".to_vec());
    }

    #[test]
    fn test_add_bytes() {
        let args = string_args().add(&b"one"[..]);
        assert_eq!(encoded(&args), b"$3\r\none\r\n".to_vec());

        let raw = CommandArgs::new(Arc::new(ByteArrayCodec)).add(b"one".to_vec());
        assert_eq!(encoded(&raw), b"$3\r\none\r\n".to_vec());
    }

    #[test]
    fn test_add_key_and_value_with_byte_codec() {
        let codec = Arc::new(ByteArrayCodec);
        let value = CommandArgs::new(codec.clone()).add_value(&b"one".to_vec());
        let key = CommandArgs::new(codec).add_key(&b"one".to_vec());
        assert_eq!(encoded(&value), b"$3\r\none\r\n".to_vec());
        assert_eq!(encoded(&key), encoded(&value));
    }

    #[test]
    fn test_doubles() {
        let args = string_args()
            .add(1.5)
            .add(f64::INFINITY)
            .add(f64::NEG_INFINITY);
        assert_eq!(
            encoded(&args),
            b"$3\r\n1.5\r\n$4\r\n+inf\r\n$4\r\n-inf\r\n".to_vec()
        );
    }

    #[test]
    fn test_try_add_value_rejects_missing_payload() {
        let err = string_args().try_add_value(None).unwrap_err();
        assert!(matches!(err, RedisError::InvalidArgument(_)));

        let ok = string_args().try_add_value(Some(&"v".to_string())).unwrap();
        assert_eq!(ok.len(), 1);
    }

    #[test]
    fn test_encode_command() {
        let frame = string_args()
            .add_key_value(&"key".to_string(), &"value".to_string())
            .encode_command("SET");
        assert_eq!(
            &frame[..],
            b"*3\r\n$3\r\nSET\r\n$3\r\nkey\r\n$5\r\nvalue\r\n"
        );
        assert_eq!(&string_args().encode_command("PING")[..], b"*1\r\n$4\r\nPING\r\n");
    }

    #[test]
    fn test_display() {
        let args = string_args()
            .add_key(&"k".to_string())
            .add_value(&"v".to_string())
            .add(3)
            .add("EX");
        assert_eq!(args.to_string(), "key<k> value<v> 3 EX");
    }
}
