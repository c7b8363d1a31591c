use serde::Deserialize;
use std::net::{IpAddr, Ipv4Addr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::warn;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ProxyConfig {
    pub address: IpAddr,
    pub port: u16,
    /// Read size when streaming bodies.
    pub buffer_size: usize,
    /// Upper bound on one header block, in bytes.
    pub max_header_size: usize,

    /// Host name this proxy writes into `Via`.
    pub via_name: String,
    /// `Server` field of generated error pages.
    pub server_name: String,

    /// Directory of the persistent cache; in-memory when unset.
    pub cache_dir: Option<PathBuf>,

    /// Bound on connecting to an origin and waiting for its response header.
    #[serde(deserialize_with = "deserialize_duration")]
    pub upstream_timeout: Option<Duration>,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            address: IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1)),
            port: 8080,
            buffer_size: 4096,
            max_header_size: 64 * 1024,

            via_name: "localhost".to_string(),
            server_name: format!("rustyproxy/{}", env!("CARGO_PKG_VERSION")),

            cache_dir: None,

            upstream_timeout: None,
        }
    }
}

impl ProxyConfig {
    pub fn from_file(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(err) => {
                warn!("fail to read {}: {err}, falling back to default config", path.display());
                return ProxyConfig::default();
            }
        };

        Self::from_toml(&content).unwrap_or_else(|err| {
            warn!(
                "fail to deserialize config file {}: {err}, falling back to default config",
                path.display()
            );
            ProxyConfig::default()
        })
    }

    pub fn from_toml(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }
}

fn deserialize_duration<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let secs = Option::<f64>::deserialize(deserializer)?;
    match secs {
        Some(secs) if secs.is_finite() && secs > 0.0 => Ok(Some(Duration::from_secs_f64(secs))),
        Some(secs) => Err(serde::de::Error::custom(format!(
            "timeout must be a positive number of seconds, got {secs}"
        ))),
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_for_missing_fields() {
        let config = ProxyConfig::from_toml("port = 3128\n").unwrap();
        assert_eq!(config.port, 3128);
        assert_eq!(config.address, IpAddr::V4(Ipv4Addr::LOCALHOST));
        assert_eq!(config.max_header_size, 64 * 1024);
        assert_eq!(config.via_name, "localhost");
        assert!(config.cache_dir.is_none());
        assert!(config.upstream_timeout.is_none());
    }

    #[test]
    fn test_full_config() {
        let config = ProxyConfig::from_toml(
            r#"
            address = "0.0.0.0"
            port = 8888
            buffer_size = 1024
            via_name = "proxy.lan"
            server_name = "test"
            cache_dir = "/var/cache/rustyproxy"
            upstream_timeout = 2.5
            "#,
        )
        .unwrap();
        assert_eq!(config.address, IpAddr::V4(Ipv4Addr::UNSPECIFIED));
        assert_eq!(config.buffer_size, 1024);
        assert_eq!(config.cache_dir, Some(PathBuf::from("/var/cache/rustyproxy")));
        assert_eq!(config.upstream_timeout, Some(Duration::from_millis(2500)));
    }

    #[test]
    fn test_invalid_timeout_is_rejected() {
        assert!(ProxyConfig::from_toml("upstream_timeout = -1").is_err());
    }

    #[test]
    fn test_missing_file_falls_back_to_default() {
        let config = ProxyConfig::from_file("/nonexistent/rustyproxy.toml");
        assert_eq!(config.port, 8080);
    }
}
