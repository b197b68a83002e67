//! Pipelined RESP command endpoint for Rust
//!
//! `resp-endpoint` is the command engine of a Redis client. Commands are
//! encoded into RESP frames, written in submission order over one connection
//! and completed in the order replies arrive. A subscribed connection routes
//! pub/sub pushes to registered listeners while ordinary replies still reach
//! their commands.
//!
//! # Features
//!
//! - Pipelining with a bounded in-flight queue and FIFO reply correlation
//! - Resumable RESP decoding across arbitrary read boundaries
//! - Pluggable key/value codecs
//! - Publish/subscribe with listener fan-out and automatic resubscription
//! - Reconnect with exponential backoff, resolving the primary through
//!   sentinels when configured
//!
//! # Quick Start
//!
//! ```no_run
//! use resp_endpoint::{Connection, ConnectionConfig, StringCodec};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ConnectionConfig::new("redis://localhost:6379");
//!     let connection = Connection::connect(config, Arc::new(StringCodec)).await?;
//!
//!     let receivers = connection
//!         .publish(&"news".to_string(), &"hello".to_string())
//!         .await?;
//!     println!("Delivered to {receivers} subscribers");
//!
//!     Ok(())
//! }
//! ```

#![deny(warnings)]
#![warn(missing_docs)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::missing_const_for_fn)]
#![allow(clippy::uninlined_format_args)]
#![allow(clippy::future_not_send)]
#![allow(clippy::significant_drop_tightening)]
#![allow(clippy::doc_markdown)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_sign_loss)]
#![allow(clippy::return_self_not_must_use)]
#![allow(clippy::manual_let_else)]

pub mod command;
pub mod connection;
pub mod core;
pub mod endpoint;
pub mod output;
pub mod protocol;
pub mod pubsub;
pub mod sentinel;

pub use command::{Command, Completion, RedisCommand};
pub use connection::{ConnectTarget, Connection, Connector, PubSubConnection};
pub use endpoint::{ConnectionEvents, Endpoint, Transport};
pub use pubsub::{
    PubSubEndpoint, PubSubMessage, PubSubStream, RedisPubSubListener, SharedListener,
};
pub use sentinel::{SentinelResolver, StaticResolver, TopologyResolver};

pub use crate::core::{
    codec::{ByteArrayCodec, BytesCodec, RedisCodec, StringCodec},
    config::{
        ConnectionConfig, DisconnectedBehavior, EndpointConfig, ReconnectConfig, SentinelConfig,
    },
    error::{RedisError, RedisResult},
    types::HostAndPort,
    value::RespValue,
};
