//! Pluggable key/value codecs
//!
//! The engine never interprets application keys or values. A codec turns them
//! into bytes before framing and turns reply bytes back into application types.

use bytes::Bytes;
use std::fmt::Debug;
use std::hash::Hash;

/// Byte codec for application keys and values.
///
/// Keys must be hashable because channel and pattern identity in the pub/sub
/// registry is defined over decoded keys.
pub trait RedisCodec: Send + Sync + 'static {
    /// Application key type
    type Key: Clone + Eq + Hash + Debug + Send + Sync + 'static;
    /// Application value type
    type Value: Clone + Debug + Send + Sync + 'static;

    /// Encode a key to its wire bytes
    fn encode_key(&self, key: &Self::Key) -> Bytes;

    /// Decode wire bytes into a key
    fn decode_key(&self, bytes: &[u8]) -> Self::Key;

    /// Encode a value to its wire bytes
    fn encode_value(&self, value: &Self::Value) -> Bytes;

    /// Decode wire bytes into a value
    fn decode_value(&self, bytes: &[u8]) -> Self::Value;
}

/// UTF-8 string codec. Invalid sequences decode with replacement characters.
#[derive(Debug, Clone, Copy, Default)]
pub struct StringCodec;

impl RedisCodec for StringCodec {
    type Key = String;
    type Value = String;

    fn encode_key(&self, key: &String) -> Bytes {
        Bytes::copy_from_slice(key.as_bytes())
    }

    fn decode_key(&self, bytes: &[u8]) -> String {
        String::from_utf8_lossy(bytes).into_owned()
    }

    fn encode_value(&self, value: &String) -> Bytes {
        Bytes::copy_from_slice(value.as_bytes())
    }

    fn decode_value(&self, bytes: &[u8]) -> String {
        String::from_utf8_lossy(bytes).into_owned()
    }
}

/// Raw byte codec over `Vec<u8>`
#[derive(Debug, Clone, Copy, Default)]
pub struct ByteArrayCodec;

impl RedisCodec for ByteArrayCodec {
    type Key = Vec<u8>;
    type Value = Vec<u8>;

    fn encode_key(&self, key: &Vec<u8>) -> Bytes {
        Bytes::copy_from_slice(key)
    }

    fn decode_key(&self, bytes: &[u8]) -> Vec<u8> {
        bytes.to_vec()
    }

    fn encode_value(&self, value: &Vec<u8>) -> Bytes {
        Bytes::copy_from_slice(value)
    }

    fn decode_value(&self, bytes: &[u8]) -> Vec<u8> {
        bytes.to_vec()
    }
}

/// Codec over reference-counted [`Bytes`]; encoding is a cheap clone.
#[derive(Debug, Clone, Copy, Default)]
pub struct BytesCodec;

impl RedisCodec for BytesCodec {
    type Key = Bytes;
    type Value = Bytes;

    fn encode_key(&self, key: &Bytes) -> Bytes {
        key.clone()
    }

    fn decode_key(&self, bytes: &[u8]) -> Bytes {
        Bytes::copy_from_slice(bytes)
    }

    fn encode_value(&self, value: &Bytes) -> Bytes {
        value.clone()
    }

    fn decode_value(&self, bytes: &[u8]) -> Bytes {
        Bytes::copy_from_slice(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codecs_agree_on_bytes() {
        let text = StringCodec.encode_value(&"one".to_string());
        let raw = ByteArrayCodec.encode_value(&b"one".to_vec());
        let shared = BytesCodec.encode_value(&Bytes::from_static(b"one"));
        assert_eq!(text, raw);
        assert_eq!(raw, shared);
    }

    #[test]
    fn test_string_codec_lossy_decode() {
        assert_eq!(StringCodec.decode_key(b"chan"), "chan");
        assert_eq!(StringCodec.decode_value(&[0x66, 0xff]), "f\u{fffd}");
    }

    #[test]
    fn test_byte_codec_roundtrip() {
        let key = vec![0u8, 1, 2, 255];
        let encoded = ByteArrayCodec.encode_key(&key);
        assert_eq!(ByteArrayCodec.decode_key(&encoded), key);
    }
}
