//! Subscribe to a few channels and print everything that arrives
//!
//! Run against a local server, then publish from another shell:
//!
//! ```text
//! cargo run --example pubsub_listener
//! redis-cli publish news hello
//! ```

use futures_util::StreamExt;
use resp_endpoint::{
    ConnectionConfig, PubSubConnection, PubSubMessage, RedisPubSubListener, StringCodec,
};
use std::sync::Arc;

struct Printer;

impl RedisPubSubListener<String, String> for Printer {
    fn subscribed(&self, channel: &String, count: i64) {
        println!("subscribed to {channel} ({count} total)");
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let url = std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://localhost:6379".to_string());
    let connection =
        PubSubConnection::connect(ConnectionConfig::new(url), Arc::new(StringCodec)).await?;
    connection.add_listener(Arc::new(Printer));

    let mut messages = connection.messages();
    connection.subscribe(&["news".to_string(), "weather".to_string()])?;
    connection.psubscribe(&["alerts.*".to_string()])?;

    while let Some(event) = messages.next().await {
        match event {
            PubSubMessage::Message { channel, payload } => println!("[{channel}] {payload}"),
            PubSubMessage::PMessage {
                pattern,
                channel,
                payload,
            } => println!("[{channel} via {pattern}] {payload}"),
            _ => {}
        }
    }
    Ok(())
}
