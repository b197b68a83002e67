//! Core types for the resp-endpoint command engine
//!
//! This crate provides the reply value model, the error taxonomy, the pluggable
//! key/value codec contract and the configuration types used throughout the
//! resp-endpoint library. It has no async runtime dependency.

#![deny(warnings)]
#![warn(missing_docs)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_sign_loss)]
#![allow(clippy::cast_precision_loss)]

pub mod codec;
pub mod config;
pub mod error;
pub mod strings;
pub mod types;
pub mod value;

pub use codec::{ByteArrayCodec, BytesCodec, RedisCodec, StringCodec};
pub use config::{
    ConnectionConfig, DisconnectedBehavior, EndpointConfig, ReconnectConfig, SentinelConfig,
};
pub use error::{RedisError, RedisResult};
pub use types::HostAndPort;
pub use value::RespValue;
