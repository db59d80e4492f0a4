//! Configuration for the hub.

use std::net::{SocketAddr, ToSocketAddrs};
use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;

/// Hub configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub markers_path: PathBuf,
    /// Largest inbound WebSocket message (and frame) in bytes.
    pub max_message_size: usize,
    /// Inbound messages buffered per connection before reads pause.
    pub max_queue_depth: usize,
    pub close_timeout: Duration,
    pub send_timeout: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 5000,
            markers_path: PathBuf::from("markers.json"),
            max_message_size: 1_000_000,
            max_queue_depth: 32,
            close_timeout: Duration::from_secs(10),
            send_timeout: Duration::from_secs(10),
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup. Unparseable values keep the default.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let parsed = |key: &str| lookup(key).and_then(|v| v.trim().parse::<u64>().ok());

        let host = lookup("HOST").unwrap_or(defaults.host);
        let port = lookup("PORT")
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(defaults.port);
        let markers_path = lookup("MARKERS_PATH")
            .map(PathBuf::from)
            .unwrap_or(defaults.markers_path);
        let max_message_size = parsed("MAX_MESSAGE_SIZE")
            .map(|v| v as usize)
            .unwrap_or(defaults.max_message_size);
        let max_queue_depth = parsed("MAX_QUEUE_DEPTH")
            .map(|v| (v as usize).max(1))
            .unwrap_or(defaults.max_queue_depth);
        let close_timeout = parsed("CLOSE_TIMEOUT_SECS")
            .map(Duration::from_secs)
            .unwrap_or(defaults.close_timeout);
        let send_timeout = parsed("SEND_TIMEOUT_SECS")
            .map(Duration::from_secs)
            .unwrap_or(defaults.send_timeout);

        Self {
            host,
            port,
            markers_path,
            max_message_size,
            max_queue_depth,
            close_timeout,
            send_timeout,
        }
    }

    /// Resolve host and port to a listen address.
    pub fn bind_addr(&self) -> anyhow::Result<SocketAddr> {
        (self.host.as_str(), self.port)
            .to_socket_addrs()
            .with_context(|| format!("invalid bind address {}:{}", self.host, self.port))?
            .next()
            .with_context(|| format!("no address for {}:{}", self.host, self.port))
    }

    /// Loopback, ephemeral port, short timeouts.
    pub fn for_test(markers_path: impl Into<PathBuf>) -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 0,
            markers_path: markers_path.into(),
            close_timeout: Duration::from_secs(2),
            send_timeout: Duration::from_secs(2),
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_when_nothing_set() {
        let config = Config::from_lookup(lookup(&[]));
        assert_eq!(config.host, "127.0.0.1");
        assert_eq!(config.port, 5000);
        assert_eq!(config.markers_path, PathBuf::from("markers.json"));
        assert_eq!(config.max_message_size, 1_000_000);
        assert_eq!(config.max_queue_depth, 32);
        assert_eq!(config.close_timeout, Duration::from_secs(10));
        assert_eq!(config.send_timeout, Duration::from_secs(10));
    }

    #[test]
    fn overrides_from_lookup() {
        let config = Config::from_lookup(lookup(&[
            ("HOST", "0.0.0.0"),
            ("PORT", "5500"),
            ("MARKERS_PATH", "/var/lib/hub/markers.json"),
            ("MAX_MESSAGE_SIZE", "2048"),
            ("MAX_QUEUE_DEPTH", "4"),
            ("CLOSE_TIMEOUT_SECS", "3"),
            ("SEND_TIMEOUT_SECS", "1"),
        ]));
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.port, 5500);
        assert_eq!(
            config.markers_path,
            PathBuf::from("/var/lib/hub/markers.json")
        );
        assert_eq!(config.max_message_size, 2048);
        assert_eq!(config.max_queue_depth, 4);
        assert_eq!(config.close_timeout, Duration::from_secs(3));
        assert_eq!(config.send_timeout, Duration::from_secs(1));
    }

    #[test]
    fn invalid_numbers_fall_back_and_queue_depth_is_at_least_one() {
        let config = Config::from_lookup(lookup(&[
            ("PORT", "not-a-port"),
            ("MAX_MESSAGE_SIZE", "-5"),
            ("MAX_QUEUE_DEPTH", "0"),
        ]));
        assert_eq!(config.port, 5000);
        assert_eq!(config.max_message_size, 1_000_000);
        assert_eq!(config.max_queue_depth, 1);
    }

    #[test]
    fn bind_addr_resolves_loopback() {
        let config = Config::for_test("unused.json");
        let addr = config.bind_addr().unwrap();
        assert!(addr.ip().is_loopback());
        assert_eq!(addr.port(), 0);
    }
}
