//! Common types used throughout the library

use crate::error::{RedisError, RedisResult};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Default server port
pub const DEFAULT_PORT: u16 = 6379;

/// Default sentinel port
pub const DEFAULT_SENTINEL_PORT: u16 = 26379;

/// Network address of a server or sentinel
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct HostAndPort {
    /// Host name or IP literal (IPv6 without brackets)
    pub host: String,
    /// Port number
    pub port: u16,
}

impl HostAndPort {
    /// Create a new address
    #[must_use]
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Parse `host`, `host:port`, `[v6]` or `[v6]:port`, falling back to
    /// `default_port` when no port is given.
    ///
    /// # Errors
    ///
    /// Returns an error if the host is empty or the port is not a number.
    pub fn parse_with_default(addr: &str, default_port: u16) -> RedisResult<Self> {
        let addr = addr.trim();
        if addr.is_empty() {
            return Err(RedisError::Config("Empty address".to_string()));
        }

        if let Some(rest) = addr.strip_prefix('[') {
            let (host, tail) = rest
                .split_once(']')
                .ok_or_else(|| RedisError::Config(format!("Unterminated IPv6 address: {addr}")))?;
            let port = match tail.strip_prefix(':') {
                Some(port) => parse_port(port, addr)?,
                None if tail.is_empty() => default_port,
                None => return Err(RedisError::Config(format!("Invalid address: {addr}"))),
            };
            return Ok(Self::new(host, port));
        }

        // A bare IPv6 literal has more than one colon and no port.
        if addr.matches(':').count() > 1 {
            return Ok(Self::new(addr, default_port));
        }

        match addr.rsplit_once(':') {
            Some((host, _)) if host.is_empty() => {
                Err(RedisError::Config(format!("Missing host in address: {addr}")))
            }
            Some((host, port)) => Ok(Self::new(host, parse_port(port, addr)?)),
            None => Ok(Self::new(addr, default_port)),
        }
    }

    /// Parse an address using [`DEFAULT_PORT`] when none is given
    ///
    /// # Errors
    ///
    /// Returns an error if the address is malformed.
    pub fn parse(addr: &str) -> RedisResult<Self> {
        Self::parse_with_default(addr, DEFAULT_PORT)
    }
}

fn parse_port(port: &str, addr: &str) -> RedisResult<u16> {
    port.parse::<u16>()
        .map_err(|_| RedisError::Config(format!("Invalid port in address: {addr}")))
}

impl fmt::Display for HostAndPort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_host_and_port() {
        let addr = HostAndPort::parse("127.0.0.1:6380").unwrap();
        assert_eq!(addr, HostAndPort::new("127.0.0.1", 6380));
        assert_eq!(addr.to_string(), "127.0.0.1:6380");
    }

    #[test]
    fn test_parse_default_port() {
        assert_eq!(HostAndPort::parse("localhost").unwrap().port, DEFAULT_PORT);
        assert_eq!(
            HostAndPort::parse_with_default("sentinel-1", DEFAULT_SENTINEL_PORT)
                .unwrap()
                .port,
            DEFAULT_SENTINEL_PORT
        );
    }

    #[test]
    fn test_parse_ipv6() {
        let addr = HostAndPort::parse("[::1]:7000").unwrap();
        assert_eq!(addr.host, "::1");
        assert_eq!(addr.port, 7000);
        assert_eq!(addr.to_string(), "[::1]:7000");

        let bare = HostAndPort::parse("fe80::1").unwrap();
        assert_eq!(bare.host, "fe80::1");
        assert_eq!(bare.port, DEFAULT_PORT);
    }

    #[test]
    fn test_parse_invalid() {
        assert!(HostAndPort::parse("").is_err());
        assert!(HostAndPort::parse("host:port").is_err());
        assert!(HostAndPort::parse(":6379").is_err());
        assert!(HostAndPort::parse("[::1").is_err());
    }

    #[test]
    fn test_serde_roundtrip() {
        let addr = HostAndPort::new("10.0.0.5", 6379);
        let json = serde_json::to_string(&addr).unwrap();
        assert_eq!(json, r#"{"host":"10.0.0.5","port":6379}"#);
        let back: HostAndPort = serde_json::from_str(&json).unwrap();
        assert_eq!(back, addr);
    }
}
