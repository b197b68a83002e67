//! RESP (`REdis` Serialization Protocol) reply values

use crate::error::{RedisError, RedisResult};
use crate::strings;
use bytes::Bytes;

/// RESP protocol value
///
/// A null bulk string (`$-1`) and a null array (`*-1`) both decode to
/// [`RespValue::Null`]; an empty array stays `Array(vec![])`.
#[derive(Debug, Clone, PartialEq)]
pub enum RespValue {
    /// Simple string: +OK\r\n
    SimpleString(String),
    /// Error: -ERR message\r\n
    Error(String),
    /// Integer: :1000\r\n
    Integer(i64),
    /// Double: ,1.23\r\n (bulk-encoded doubles stay bulk strings until an output asks)
    Double(f64),
    /// Bulk string: $6\r\nfoobar\r\n
    BulkString(Bytes),
    /// Null bulk string or null array
    Null,
    /// Array: *2\r\n$3\r\nfoo\r\n$3\r\nbar\r\n
    Array(Vec<RespValue>),
}

impl RespValue {
    /// Convert to a string if possible
    ///
    /// # Errors
    ///
    /// Returns an error if the value cannot be converted to a string.
    pub fn as_string(&self) -> RedisResult<String> {
        match self {
            Self::SimpleString(s) => Ok(s.clone()),
            Self::BulkString(b) => String::from_utf8(b.to_vec())
                .map_err(|e| RedisError::Type(format!("Invalid UTF-8: {e}"))),
            Self::Integer(i) => Ok(i.to_string()),
            Self::Double(d) => Ok(strings::format_double(*d)),
            Self::Null => Err(RedisError::Type("Value is null".to_string())),
            _ => Err(RedisError::Type(format!(
                "Cannot convert {} to string",
                self.type_name()
            ))),
        }
    }

    /// Convert to an integer if possible
    ///
    /// # Errors
    ///
    /// Returns an error if the value cannot be converted to an integer.
    pub fn as_int(&self) -> RedisResult<i64> {
        match self {
            Self::Integer(i) => Ok(*i),
            Self::BulkString(b) => std::str::from_utf8(b)
                .map_err(|e| RedisError::Type(format!("Invalid UTF-8: {e}")))?
                .parse::<i64>()
                .map_err(|e| RedisError::Type(format!("Cannot parse integer: {e}"))),
            _ => Err(RedisError::Type(format!(
                "Cannot convert {} to integer",
                self.type_name()
            ))),
        }
    }

    /// Convert to a double if possible, accepting the `inf`/`nan` tokens
    ///
    /// # Errors
    ///
    /// Returns an error if the value is not numeric.
    pub fn as_double(&self) -> RedisResult<f64> {
        match self {
            Self::Double(d) => Ok(*d),
            Self::Integer(i) => Ok(*i as f64),
            Self::BulkString(b) => strings::to_double(
                std::str::from_utf8(b)
                    .map_err(|e| RedisError::Type(format!("Invalid UTF-8: {e}")))?,
            ),
            Self::SimpleString(s) => strings::to_double(s),
            _ => Err(RedisError::Type(format!(
                "Cannot convert {} to double",
                self.type_name()
            ))),
        }
    }

    /// Borrow the raw bytes of a string-like value
    ///
    /// # Errors
    ///
    /// Returns an error if the value is not a simple or bulk string.
    pub fn as_bytes(&self) -> RedisResult<Bytes> {
        match self {
            Self::BulkString(b) => Ok(b.clone()),
            Self::SimpleString(s) => Ok(Bytes::copy_from_slice(s.as_bytes())),
            Self::Null => Err(RedisError::Type("Value is null".to_string())),
            _ => Err(RedisError::Type(format!(
                "Cannot convert {} to bytes",
                self.type_name()
            ))),
        }
    }

    /// Convert to an array if possible
    ///
    /// # Errors
    ///
    /// Returns an error if the value cannot be converted to an array.
    pub fn into_array(self) -> RedisResult<Vec<Self>> {
        match self {
            Self::Array(arr) => Ok(arr),
            other => Err(RedisError::Type(format!(
                "Cannot convert {} to array",
                other.type_name()
            ))),
        }
    }

    /// Check if this is a null value
    #[must_use]
    pub const fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Check if this is an error
    #[must_use]
    pub const fn is_error(&self) -> bool {
        matches!(self, Self::Error(_))
    }

    /// Extract error message if this is an error
    #[must_use]
    pub fn into_error(self) -> Option<String> {
        match self {
            Self::Error(msg) => Some(msg),
            _ => None,
        }
    }

    /// Short name of the value's kind, used in error messages
    #[must_use]
    pub const fn type_name(&self) -> &'static str {
        match self {
            Self::SimpleString(_) => "simple-string",
            Self::Error(_) => "error",
            Self::Integer(_) => "integer",
            Self::Double(_) => "double",
            Self::BulkString(_) => "bulk-string",
            Self::Null => "null",
            Self::Array(_) => "array",
        }
    }
}

impl From<String> for RespValue {
    fn from(s: String) -> Self {
        Self::BulkString(Bytes::from(s.into_bytes()))
    }
}
impl From<&str> for RespValue {
    fn from(s: &str) -> Self {
        Self::BulkString(Bytes::copy_from_slice(s.as_bytes()))
    }
}
impl From<i64> for RespValue {
    fn from(i: i64) -> Self {
        Self::Integer(i)
    }
}
impl From<Vec<u8>> for RespValue {
    fn from(b: Vec<u8>) -> Self {
        Self::BulkString(Bytes::from(b))
    }
}
impl From<Bytes> for RespValue {
    fn from(b: Bytes) -> Self {
        Self::BulkString(b)
    }
}
impl From<Vec<RespValue>> for RespValue {
    fn from(items: Vec<RespValue>) -> Self {
        Self::Array(items)
    }
}
