//! Reply accumulators
//!
//! Every command carries a [`CommandOutput`] that turns the raw reply into the
//! value the caller asked for. A reply whose shape does not fit the output
//! fails only that command with [`RedisError::Type`].

use crate::core::{
    codec::RedisCodec,
    error::{RedisError, RedisResult},
    value::RespValue,
};
use std::collections::HashMap;
use std::sync::Arc;

/// Interprets one reply value for one command
pub trait CommandOutput: Send + 'static {
    /// Value delivered to the caller
    type Output: Send + 'static;

    /// Convert the reply. Error replies never reach this method.
    ///
    /// # Errors
    ///
    /// Returns [`RedisError::Type`] when the reply has an unexpected shape.
    fn complete(self, value: RespValue) -> RedisResult<Self::Output>;
}

fn mismatch(expected: &str, got: &RespValue) -> RedisError {
    RedisError::Type(format!("expected {expected}, got {}", got.type_name()))
}

/// Hands back the reply untouched
#[derive(Debug, Default, Clone, Copy)]
pub struct RawOutput;

impl CommandOutput for RawOutput {
    type Output = RespValue;

    fn complete(self, value: RespValue) -> RedisResult<RespValue> {
        Ok(value)
    }
}

/// Status reply such as `OK` or `PONG`
#[derive(Debug, Default, Clone, Copy)]
pub struct StatusOutput;

impl CommandOutput for StatusOutput {
    type Output = String;

    fn complete(self, value: RespValue) -> RedisResult<String> {
        match value {
            RespValue::SimpleString(s) => Ok(s),
            RespValue::BulkString(b) => Ok(String::from_utf8_lossy(&b).into_owned()),
            other => Err(mismatch("status", &other)),
        }
    }
}

/// Integer reply
#[derive(Debug, Default, Clone, Copy)]
pub struct IntegerOutput;

impl CommandOutput for IntegerOutput {
    type Output = i64;

    fn complete(self, value: RespValue) -> RedisResult<i64> {
        match value {
            RespValue::Integer(i) => Ok(i),
            other => Err(mismatch("integer", &other)),
        }
    }
}

/// Integer reply read as a flag (`0` is false)
#[derive(Debug, Default, Clone, Copy)]
pub struct BooleanOutput;

impl CommandOutput for BooleanOutput {
    type Output = bool;

    fn complete(self, value: RespValue) -> RedisResult<bool> {
        match value {
            RespValue::Integer(i) => Ok(i != 0),
            other => Err(mismatch("integer", &other)),
        }
    }
}

/// Floating point reply, sent either natively or as a bulk string
#[derive(Debug, Default, Clone, Copy)]
pub struct DoubleOutput;

impl CommandOutput for DoubleOutput {
    type Output = Option<f64>;

    fn complete(self, value: RespValue) -> RedisResult<Option<f64>> {
        match value {
            RespValue::Null => Ok(None),
            RespValue::Array(_) => Err(mismatch("double", &value)),
            other => other.as_double().map(Some),
        }
    }
}

/// Single optional value decoded with the codec
pub struct ValueOutput<C: RedisCodec> {
    codec: Arc<C>,
}

impl<C: RedisCodec> ValueOutput<C> {
    /// Create the output
    pub fn new(codec: Arc<C>) -> Self {
        Self { codec }
    }
}

impl<C: RedisCodec> CommandOutput for ValueOutput<C> {
    type Output = Option<C::Value>;

    fn complete(self, value: RespValue) -> RedisResult<Option<C::Value>> {
        match value {
            RespValue::Null => Ok(None),
            RespValue::BulkString(b) => Ok(Some(self.codec.decode_value(&b))),
            RespValue::SimpleString(s) => Ok(Some(self.codec.decode_value(s.as_bytes()))),
            other => Err(mismatch("bulk string", &other)),
        }
    }
}

fn element_bytes(value: &RespValue) -> RedisResult<Option<bytes::Bytes>> {
    match value {
        RespValue::Null => Ok(None),
        RespValue::BulkString(_) | RespValue::SimpleString(_) => value.as_bytes().map(Some),
        other => Err(mismatch("bulk string element", other)),
    }
}

/// List of keys, e.g. the reply to `KEYS`
pub struct KeyListOutput<C: RedisCodec> {
    codec: Arc<C>,
}

impl<C: RedisCodec> KeyListOutput<C> {
    /// Create the output
    pub fn new(codec: Arc<C>) -> Self {
        Self { codec }
    }
}

impl<C: RedisCodec> CommandOutput for KeyListOutput<C> {
    type Output = Vec<C::Key>;

    fn complete(self, value: RespValue) -> RedisResult<Vec<C::Key>> {
        match value {
            RespValue::Null => Ok(Vec::new()),
            RespValue::Array(items) => items
                .iter()
                .filter_map(|item| element_bytes(item).transpose())
                .map(|b| b.map(|b| self.codec.decode_key(&b)))
                .collect(),
            other => Err(mismatch("array", &other)),
        }
    }
}

/// List of optional values. Null elements stay in place as `None`.
pub struct ValueListOutput<C: RedisCodec> {
    codec: Arc<C>,
}

impl<C: RedisCodec> ValueListOutput<C> {
    /// Create the output
    pub fn new(codec: Arc<C>) -> Self {
        Self { codec }
    }
}

impl<C: RedisCodec> CommandOutput for ValueListOutput<C> {
    type Output = Vec<Option<C::Value>>;

    fn complete(self, value: RespValue) -> RedisResult<Vec<Option<C::Value>>> {
        match value {
            RespValue::Null => Ok(Vec::new()),
            RespValue::Array(items) => items
                .iter()
                .map(|item| Ok(element_bytes(item)?.map(|b| self.codec.decode_value(&b))))
                .collect(),
            other => Err(mismatch("array", &other)),
        }
    }
}

/// Array reply that keeps null and empty apart
#[derive(Debug, Default, Clone, Copy)]
pub struct ArrayOutput;

impl CommandOutput for ArrayOutput {
    type Output = Option<Vec<RespValue>>;

    fn complete(self, value: RespValue) -> RedisResult<Option<Vec<RespValue>>> {
        match value {
            RespValue::Null => Ok(None),
            RespValue::Array(items) => Ok(Some(items)),
            other => Err(mismatch("array", &other)),
        }
    }
}

/// Flat key/value array such as the reply to `HGETALL`
pub struct MapOutput<C: RedisCodec> {
    codec: Arc<C>,
}

impl<C: RedisCodec> MapOutput<C> {
    /// Create the output
    pub fn new(codec: Arc<C>) -> Self {
        Self { codec }
    }
}

impl<C: RedisCodec> CommandOutput for MapOutput<C> {
    type Output = HashMap<C::Key, Option<C::Value>>;

    fn complete(self, value: RespValue) -> RedisResult<Self::Output> {
        let items = match value {
            RespValue::Null => return Ok(HashMap::new()),
            RespValue::Array(items) => items,
            other => return Err(mismatch("array", &other)),
        };
        if items.len() % 2 != 0 {
            return Err(RedisError::Type(format!(
                "map reply has odd number of elements: {}",
                items.len()
            )));
        }

        let mut map = HashMap::with_capacity(items.len() / 2);
        for pair in items.chunks(2) {
            let key = element_bytes(&pair[0])?
                .ok_or_else(|| RedisError::Type("map key is null".to_string()))?;
            let value = element_bytes(&pair[1])?.map(|b| self.codec.decode_value(&b));
            map.insert(self.codec.decode_key(&key), value);
        }
        Ok(map)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::codec::StringCodec;
    use bytes::Bytes;

    fn bulk(s: &str) -> RespValue {
        RespValue::BulkString(Bytes::copy_from_slice(s.as_bytes()))
    }

    #[test]
    fn test_scalar_outputs() {
        assert_eq!(
            StatusOutput
                .complete(RespValue::SimpleString("OK".into()))
                .unwrap(),
            "OK"
        );
        assert_eq!(IntegerOutput.complete(RespValue::Integer(3)).unwrap(), 3);
        assert!(BooleanOutput.complete(RespValue::Integer(1)).unwrap());
        assert!(!BooleanOutput.complete(RespValue::Integer(0)).unwrap());
    }

    #[test]
    fn test_shape_mismatch_is_type_error() {
        let err = IntegerOutput
            .complete(RespValue::Array(vec![RespValue::Integer(1)]))
            .unwrap_err();
        assert!(matches!(err, RedisError::Type(_)));
        assert!(StatusOutput.complete(RespValue::Integer(1)).is_err());
    }

    #[test]
    fn test_double_output() {
        assert_eq!(DoubleOutput.complete(bulk("1.25")).unwrap(), Some(1.25));
        assert_eq!(
            DoubleOutput.complete(bulk("-inf")).unwrap(),
            Some(f64::NEG_INFINITY)
        );
        assert!(DoubleOutput
            .complete(bulk("-nan"))
            .unwrap()
            .is_some_and(f64::is_nan));
        assert_eq!(DoubleOutput.complete(RespValue::Null).unwrap(), None);
        assert!(DoubleOutput.complete(bulk("12abc")).is_err());
    }

    #[test]
    fn test_value_output() {
        let codec = Arc::new(StringCodec);
        assert_eq!(
            ValueOutput::new(codec.clone()).complete(bulk("v")).unwrap(),
            Some("v".to_string())
        );
        assert_eq!(
            ValueOutput::new(codec).complete(RespValue::Null).unwrap(),
            None
        );
    }

    #[test]
    fn test_list_outputs() {
        let codec = Arc::new(StringCodec);
        let reply = RespValue::Array(vec![bulk("a"), RespValue::Null, bulk("c")]);
        assert_eq!(
            ValueListOutput::new(codec.clone())
                .complete(reply.clone())
                .unwrap(),
            vec![Some("a".to_string()), None, Some("c".to_string())]
        );
        assert_eq!(
            KeyListOutput::new(codec).complete(reply).unwrap(),
            vec!["a".to_string(), "c".to_string()]
        );
    }

    #[test]
    fn test_array_output_keeps_null_and_empty_apart() {
        assert_eq!(ArrayOutput.complete(RespValue::Null).unwrap(), None);
        assert_eq!(
            ArrayOutput.complete(RespValue::Array(Vec::new())).unwrap(),
            Some(Vec::new())
        );
    }

    #[test]
    fn test_map_output() {
        let codec = Arc::new(StringCodec);
        let map = MapOutput::new(codec.clone())
            .complete(RespValue::Array(vec![
                bulk("f1"),
                bulk("v1"),
                bulk("f2"),
                bulk("v2"),
            ]))
            .unwrap();
        assert_eq!(map.len(), 2);
        assert_eq!(map["f1"], Some("v1".to_string()));

        assert!(MapOutput::new(codec)
            .complete(RespValue::Array(vec![bulk("odd")]))
            .is_err());
    }
}
