//! Configuration types for connections and endpoints

use crate::error::{RedisError, RedisResult};
use crate::types::{HostAndPort, DEFAULT_PORT, DEFAULT_SENTINEL_PORT};
use std::time::Duration;

/// What an endpoint does with commands submitted while no transport is attached
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DisconnectedBehavior {
    /// Hold commands in submission order and write them once connected
    #[default]
    Accept,
    /// Fail commands immediately
    Reject,
}

/// Per-endpoint queue and decoder limits
#[derive(Debug, Clone)]
pub struct EndpointConfig {
    /// Maximum number of commands in flight or buffered
    pub request_queue_size: usize,
    /// Behavior while the connection is down
    pub disconnected_behavior: DisconnectedBehavior,
    /// Largest bulk string or array length the decoder accepts
    pub max_bulk_length: usize,
    /// Largest status, error or number line the decoder accepts
    pub max_line_length: usize,
    /// Deepest array nesting the decoder accepts
    pub max_nesting_depth: usize,
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            request_queue_size: 65_536,
            disconnected_behavior: DisconnectedBehavior::Accept,
            max_bulk_length: 512 * 1024 * 1024,
            max_line_length: 64 * 1024,
            max_nesting_depth: 128,
        }
    }
}

impl EndpointConfig {
    /// Set the request queue size
    #[must_use]
    pub const fn with_request_queue_size(mut self, size: usize) -> Self {
        self.request_queue_size = size;
        self
    }

    /// Set the disconnected behavior
    #[must_use]
    pub const fn with_disconnected_behavior(mut self, behavior: DisconnectedBehavior) -> Self {
        self.disconnected_behavior = behavior;
        self
    }

    /// Set the maximum bulk length
    #[must_use]
    pub const fn with_max_bulk_length(mut self, len: usize) -> Self {
        self.max_bulk_length = len;
        self
    }

    /// Set the maximum array nesting depth
    #[must_use]
    pub const fn with_max_nesting_depth(mut self, depth: usize) -> Self {
        self.max_nesting_depth = depth;
        self
    }

    /// Check the limits are usable
    ///
    /// # Errors
    ///
    /// Returns an error if any limit is zero.
    pub fn validate(&self) -> RedisResult<()> {
        if self.request_queue_size == 0 {
            return Err(RedisError::Config(
                "request_queue_size must be > 0".to_string(),
            ));
        }
        if self.max_bulk_length == 0 || self.max_line_length == 0 || self.max_nesting_depth == 0 {
            return Err(RedisError::Config(
                "decoder limits must be > 0".to_string(),
            ));
        }
        Ok(())
    }
}

/// Configuration for reconnection behavior
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    /// Enable automatic reconnection
    pub enabled: bool,

    /// Initial delay before first reconnect attempt
    pub initial_delay: Duration,

    /// Maximum delay between reconnect attempts
    pub max_delay: Duration,

    /// Backoff multiplier
    pub backoff_multiplier: f64,

    /// Maximum number of reconnect attempts (None = infinite)
    pub max_attempts: Option<usize>,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(30),
            backoff_multiplier: 2.0,
            max_attempts: None,
        }
    }
}

impl ReconnectConfig {
    /// Reconnection switched off
    #[must_use]
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }

    /// Delay before the given zero-based attempt, capped at `max_delay`
    #[must_use]
    pub fn delay_for_attempt(&self, attempt: usize) -> Duration {
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let factor = self.backoff_multiplier.max(1.0).powi(exponent);
        let millis = self.initial_delay.as_secs_f64() * 1000.0 * factor;
        let max_millis = self.max_delay.as_secs_f64() * 1000.0;
        if !millis.is_finite() || millis >= max_millis {
            self.max_delay
        } else {
            Duration::from_millis(millis.round() as u64)
        }
    }
}

/// Configuration for primary discovery through sentinels
#[derive(Debug, Clone)]
pub struct SentinelConfig {
    /// Logical name of the monitored primary
    pub master_name: String,
    /// Sentinel endpoints, queried in order
    pub sentinels: Vec<HostAndPort>,
    /// Password for sentinel authentication
    pub password: Option<String>,
    /// Timeout for connecting to a sentinel
    pub connect_timeout: Duration,
}

impl SentinelConfig {
    /// Create a new sentinel configuration
    #[must_use]
    pub fn new(master_name: impl Into<String>) -> Self {
        Self {
            master_name: master_name.into(),
            sentinels: Vec::new(),
            password: None,
            connect_timeout: Duration::from_secs(5),
        }
    }

    /// Add a sentinel endpoint (`host:port`, default port 26379).
    /// Malformed addresses are ignored.
    #[must_use]
    pub fn add_sentinel(mut self, addr: impl AsRef<str>) -> Self {
        if let Ok(endpoint) = HostAndPort::parse_with_default(addr.as_ref(), DEFAULT_SENTINEL_PORT)
        {
            self.sentinels.push(endpoint);
        }
        self
    }

    /// Set sentinel password
    #[must_use]
    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    /// Set sentinel connect timeout
    #[must_use]
    pub const fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }
}

/// Configuration for a connection
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Connection string (e.g., `redis://localhost:6379`)
    pub connection_string: String,

    /// Optional password for authentication
    pub password: Option<String>,

    /// Database number selected after connecting
    pub database: u8,

    /// Connection timeout
    pub connect_timeout: Duration,

    /// How long `dispatch` waits for a reply
    pub operation_timeout: Duration,

    /// Enable TCP keepalive
    pub tcp_keepalive: Option<Duration>,

    /// Queue and decoder limits
    pub endpoint: EndpointConfig,

    /// Reconnection settings
    pub reconnect: ReconnectConfig,

    /// Sentinel configuration; when set, the primary is resolved before every connect
    pub sentinel: Option<SentinelConfig>,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            connection_string: "redis://localhost:6379".to_string(),
            password: None,
            database: 0,
            connect_timeout: Duration::from_secs(5),
            operation_timeout: Duration::from_secs(30),
            tcp_keepalive: Some(Duration::from_secs(60)),
            endpoint: EndpointConfig::default(),
            reconnect: ReconnectConfig::default(),
            sentinel: None,
        }
    }
}

impl ConnectionConfig {
    /// Create a new configuration with the given connection string
    pub fn new(connection_string: impl Into<String>) -> Self {
        Self {
            connection_string: connection_string.into(),
            ..Default::default()
        }
    }

    /// Create a configuration that follows the primary named in `sentinel`
    #[must_use]
    pub fn new_with_sentinel(sentinel: SentinelConfig) -> Self {
        Self {
            connection_string: String::new(),
            sentinel: Some(sentinel),
            ..Default::default()
        }
    }

    /// Set the password for authentication
    #[must_use]
    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    /// Set the database number
    #[must_use]
    pub const fn with_database(mut self, database: u8) -> Self {
        self.database = database;
        self
    }

    /// Set the connection timeout
    #[must_use]
    pub const fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Set the operation timeout
    #[must_use]
    pub const fn with_operation_timeout(mut self, timeout: Duration) -> Self {
        self.operation_timeout = timeout;
        self
    }

    /// Set TCP keepalive (`None` disables it)
    #[must_use]
    pub const fn with_tcp_keepalive(mut self, keepalive: Option<Duration>) -> Self {
        self.tcp_keepalive = keepalive;
        self
    }

    /// Set the endpoint configuration
    #[must_use]
    pub fn with_endpoint_config(mut self, endpoint: EndpointConfig) -> Self {
        self.endpoint = endpoint;
        self
    }

    /// Set the reconnection configuration
    #[must_use]
    pub fn with_reconnect(mut self, reconnect: ReconnectConfig) -> Self {
        self.reconnect = reconnect;
        self
    }

    /// Apply the password and database carried in the connection string.
    ///
    /// `redis://[[username:]password@]host[:port][/database]` fills in
    /// [`Self::password`] when no password was set explicitly and
    /// [`Self::database`] when it is still 0.
    ///
    /// # Errors
    ///
    /// Returns [`RedisError::Config`] for a `rediss://` (TLS) string, a
    /// username other than `default`, or a database path that is not a
    /// number in `0..=255`.
    pub fn with_url_settings(mut self) -> RedisResult<Self> {
        let conn_str = self.connection_string.trim();
        if conn_str.starts_with("rediss://") {
            return Err(RedisError::Config(
                "TLS connections (rediss://) are not supported".to_string(),
            ));
        }
        let rest = conn_str.strip_prefix("redis://").unwrap_or(conn_str);
        let (userinfo, hosts) = match rest.rsplit_once('@') {
            Some((userinfo, hosts)) => (Some(userinfo), hosts),
            None => (None, rest),
        };

        let url_password = match userinfo.map(|u| u.split_once(':')) {
            None => None,
            Some(None) => userinfo,
            Some(Some((user, password))) => {
                if !user.is_empty() && user != "default" {
                    return Err(RedisError::Config(format!(
                        "Username '{user}' is not supported, only a password"
                    )));
                }
                Some(password)
            }
        };
        let url_database = match hosts.split_once('/') {
            Some((_, db)) if !db.is_empty() => Some(db.parse::<u8>().map_err(|_| {
                RedisError::Config(format!("Invalid database in connection string: '{db}'"))
            })?),
            _ => None,
        };

        let url_password = url_password.filter(|p| !p.is_empty()).map(str::to_string);
        if self.password.is_none() {
            self.password = url_password;
        }
        if let (0, Some(db)) = (self.database, url_database) {
            self.database = db;
        }
        Ok(self)
    }

    /// Parse connection endpoints from connection string
    #[must_use]
    pub fn parse_endpoints(&self) -> Vec<HostAndPort> {
        let conn_str = self.connection_string.trim();

        let addr_part = conn_str
            .strip_prefix("redis://")
            .or_else(|| conn_str.strip_prefix("rediss://"))
            .unwrap_or(conn_str);

        // Drop credentials and a trailing database path
        let addr_part = addr_part.rsplit_once('@').map_or(addr_part, |(_, a)| a);
        let addr_part = addr_part.split_once('/').map_or(addr_part, |(a, _)| a);

        addr_part
            .split(',')
            .filter_map(|endpoint| {
                let endpoint = endpoint.trim();
                if endpoint.is_empty() {
                    return None;
                }
                HostAndPort::parse_with_default(endpoint, DEFAULT_PORT).ok()
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_endpoints() {
        let config = ConnectionConfig::new("redis://host1:6379,host2:6380");
        let endpoints = config.parse_endpoints();
        assert_eq!(
            endpoints,
            vec![HostAndPort::new("host1", 6379), HostAndPort::new("host2", 6380)]
        );
    }

    #[test]
    fn test_parse_endpoints_defaults_and_path() {
        let config = ConnectionConfig::new("redis://:secret@cache/2");
        assert_eq!(config.parse_endpoints(), vec![HostAndPort::new("cache", 6379)]);
        assert!(ConnectionConfig::new("").parse_endpoints().is_empty());
    }

    #[test]
    fn test_url_settings() {
        let config = ConnectionConfig::new("redis://:pw@10.1.2.3:6380/2")
            .with_url_settings()
            .unwrap();
        assert_eq!(config.password.as_deref(), Some("pw"));
        assert_eq!(config.database, 2);

        let config = ConnectionConfig::new("redis://default:pw@cache")
            .with_url_settings()
            .unwrap();
        assert_eq!(config.password.as_deref(), Some("pw"));
        assert_eq!(config.database, 0);

        let plain = ConnectionConfig::new("localhost:6379").with_url_settings().unwrap();
        assert_eq!(plain.password, None);
        assert_eq!(plain.database, 0);
    }

    #[test]
    fn test_explicit_settings_win_over_url() {
        let config = ConnectionConfig::new("redis://:url-pw@cache/2")
            .with_password("explicit")
            .with_database(5)
            .with_url_settings()
            .unwrap();
        assert_eq!(config.password.as_deref(), Some("explicit"));
        assert_eq!(config.database, 5);
    }

    #[test]
    fn test_url_settings_rejects_unsupported() {
        for url in [
            "rediss://localhost:6380",
            "redis://alice:pw@cache",
            "redis://cache/db1",
            "redis://cache/256",
        ] {
            assert!(
                matches!(
                    ConnectionConfig::new(url).with_url_settings(),
                    Err(RedisError::Config(_))
                ),
                "{url} should be rejected"
            );
        }
    }

    #[test]
    fn test_builder() {
        let config = ConnectionConfig::new("redis://localhost:6379")
            .with_password("pw")
            .with_database(3)
            .with_operation_timeout(Duration::from_secs(2))
            .with_reconnect(ReconnectConfig::disabled())
            .with_endpoint_config(EndpointConfig::default().with_request_queue_size(8));

        assert_eq!(config.password.as_deref(), Some("pw"));
        assert_eq!(config.database, 3);
        assert_eq!(config.operation_timeout, Duration::from_secs(2));
        assert!(!config.reconnect.enabled);
        assert_eq!(config.endpoint.request_queue_size, 8);
    }

    #[test]
    fn test_endpoint_config_validate() {
        assert!(EndpointConfig::default().validate().is_ok());
        assert!(EndpointConfig::default()
            .with_request_queue_size(0)
            .validate()
            .is_err());
        assert!(matches!(
            EndpointConfig::default().with_max_nesting_depth(0).validate(),
            Err(RedisError::Config(_))
        ));
    }

    #[test]
    fn test_reconnect_backoff() {
        let reconnect = ReconnectConfig {
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(1),
            backoff_multiplier: 2.0,
            ..ReconnectConfig::default()
        };
        assert_eq!(reconnect.delay_for_attempt(0), Duration::from_millis(100));
        assert_eq!(reconnect.delay_for_attempt(1), Duration::from_millis(200));
        assert_eq!(reconnect.delay_for_attempt(3), Duration::from_millis(800));
        assert_eq!(reconnect.delay_for_attempt(4), Duration::from_secs(1));
        assert_eq!(reconnect.delay_for_attempt(10_000), Duration::from_secs(1));
    }

    #[test]
    fn test_sentinel_config_builder() {
        let config = SentinelConfig::new("mymaster")
            .add_sentinel("127.0.0.1:26379")
            .add_sentinel("sentinel-2")
            .add_sentinel("bad:port")
            .with_password("secret");

        assert_eq!(config.master_name, "mymaster");
        assert_eq!(
            config.sentinels,
            vec![
                HostAndPort::new("127.0.0.1", 26379),
                HostAndPort::new("sentinel-2", DEFAULT_SENTINEL_PORT)
            ]
        );
        assert_eq!(config.password, Some("secret".to_string()));

        let conn = ConnectionConfig::new_with_sentinel(config);
        assert_eq!(conn.sentinel.as_ref().map(|s| s.master_name.as_str()), Some("mymaster"));
    }
}
