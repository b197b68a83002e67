//! Primary address discovery
//!
//! A connection configured with a logical master name asks a
//! [`TopologyResolver`] for the current primary before every connect and
//! reconnect attempt. [`SentinelResolver`] asks a list of sentinels with
//! `SENTINEL get-master-addr-by-name`, the first usable answer wins.
//!
//! # Examples
//!
//! ```no_run
//! use resp_endpoint::{Connection, ConnectionConfig, SentinelConfig, StringCodec};
//! use std::sync::Arc;
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let sentinel_config = SentinelConfig::new("mymaster")
//!     .add_sentinel("127.0.0.1:26379")
//!     .add_sentinel("127.0.0.1:26380")
//!     .with_password("sentinel_password");
//!
//! let config = ConnectionConfig::new_with_sentinel(sentinel_config);
//! let connection = Connection::connect(config, Arc::new(StringCodec)).await?;
//! println!("{}", connection.ping().await?);
//! # Ok(())
//! # }
//! ```

use crate::connection::{self, ReplyReader};
use crate::core::{
    codec::StringCodec,
    config::{EndpointConfig, SentinelConfig},
    error::{RedisError, RedisResult},
    types::HostAndPort,
    value::RespValue,
};
use crate::protocol::CommandArgs;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::time::timeout;
use tracing::{debug, info, warn};

/// Source of the current primary address for a logical master name
#[async_trait]
pub trait TopologyResolver: Send + Sync {
    /// Resolve `master_name` to the address that should receive writes
    ///
    /// # Errors
    ///
    /// Returns an error if no address can be determined.
    async fn resolve_primary(&self, master_name: &str) -> RedisResult<HostAndPort>;
}

/// Resolver that always answers with the same address
#[derive(Debug, Clone)]
pub struct StaticResolver {
    address: HostAndPort,
}

impl StaticResolver {
    /// Create a resolver for a fixed address
    #[must_use]
    pub const fn new(address: HostAndPort) -> Self {
        Self { address }
    }
}

#[async_trait]
impl TopologyResolver for StaticResolver {
    async fn resolve_primary(&self, _master_name: &str) -> RedisResult<HostAndPort> {
        Ok(self.address.clone())
    }
}

/// Resolver that queries sentinels in configured order
#[derive(Debug, Clone)]
pub struct SentinelResolver {
    config: SentinelConfig,
}

impl SentinelResolver {
    /// Create a resolver for the sentinels in `config`
    ///
    /// # Errors
    ///
    /// Returns an error if no sentinel is configured.
    pub fn new(config: SentinelConfig) -> RedisResult<Self> {
        if config.sentinels.is_empty() {
            return Err(RedisError::Config("No sentinels configured".to_string()));
        }
        Ok(Self { config })
    }

    /// Sentinel settings in use
    #[must_use]
    pub const fn config(&self) -> &SentinelConfig {
        &self.config
    }

    async fn query(&self, sentinel: &HostAndPort, master_name: &str) -> RedisResult<HostAndPort> {
        let mut stream = connection::open(sentinel, self.config.connect_timeout, None).await?;
        let mut reader = ReplyReader::new(&EndpointConfig::default());
        let codec = Arc::new(StringCodec);

        if let Some(password) = &self.config.password {
            let auth = CommandArgs::new(Arc::clone(&codec))
                .add(password.as_str())
                .encode_command("AUTH");
            connection::execute(&mut stream, &mut reader, &auth)
                .await
                .map_err(|e| match e {
                    RedisError::Server(msg) => RedisError::Auth(msg),
                    other => other,
                })?;
        }

        let frame = CommandArgs::new(codec)
            .add("get-master-addr-by-name")
            .add(master_name)
            .encode_command("SENTINEL");
        let reply = connection::execute(&mut stream, &mut reader, &frame).await?;
        parse_master_addr(reply)?.ok_or_else(|| {
            RedisError::Sentinel(format!(
                "Sentinel {sentinel} does not know master '{master_name}'"
            ))
        })
    }
}

#[async_trait]
impl TopologyResolver for SentinelResolver {
    async fn resolve_primary(&self, master_name: &str) -> RedisResult<HostAndPort> {
        let mut last_error = None;
        for sentinel in &self.config.sentinels {
            debug!(%sentinel, master = master_name, "Querying sentinel");
            match timeout(self.config.connect_timeout, self.query(sentinel, master_name)).await {
                Ok(Ok(address)) => {
                    info!(%sentinel, master = master_name, %address, "Resolved primary");
                    return Ok(address);
                }
                Ok(Err(e)) => {
                    warn!(%sentinel, error = %e, "Sentinel query failed");
                    last_error = Some(e);
                }
                Err(_) => {
                    warn!(%sentinel, "Sentinel query timed out");
                    last_error = Some(RedisError::Timeout);
                }
            }
        }

        Err(RedisError::Sentinel(format!(
            "Failed to resolve master '{master_name}' from any sentinel{}",
            last_error.map(|e| format!(": {e}")).unwrap_or_default()
        )))
    }
}

/// Parse the reply to `SENTINEL get-master-addr-by-name`.
///
/// A null reply means the sentinel does not monitor that name.
///
/// # Errors
///
/// Returns an error if the reply is not a `[host, port]` pair.
pub fn parse_master_addr(reply: RespValue) -> RedisResult<Option<HostAndPort>> {
    match reply {
        RespValue::Null => Ok(None),
        RespValue::Array(items) if items.len() == 2 => {
            let host = items[0].as_string()?;
            let port = items[1]
                .as_int()
                .ok()
                .and_then(|p| u16::try_from(p).ok())
                .ok_or_else(|| {
                    RedisError::UnexpectedResponse(format!(
                        "Invalid port in master address: {:?}",
                        items[1]
                    ))
                })?;
            Ok(Some(HostAndPort::new(host, port)))
        }
        other => Err(RedisError::UnexpectedResponse(format!(
            "Expected master address pair, got {}",
            other.type_name()
        ))),
    }
}
