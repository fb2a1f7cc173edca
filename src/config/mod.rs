//! Gateway configuration.
//!
//! Loaded from a YAML file. The key names follow the original gateway's
//! config file so existing deployments carry over unchanged.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Store backend selector. `boltdb` is the durable default; `redis`
/// selects the volatile in-process cache.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheType {
    #[default]
    Boltdb,
    Redis,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// CMPP account (also the enterprise code carried in `msg_src`).
    pub user: String,

    pub password: String,

    /// Carrier-assigned access number, the on-wire originator.
    pub sms_accessno: String,

    /// Service identifier stamped into every submit.
    pub service_id: String,

    #[serde(default = "default_http_host")]
    pub http_host: String,

    #[serde(default = "default_http_port")]
    pub http_port: u16,

    pub cmpp_host: String,

    #[serde(default = "default_cmpp_port")]
    pub cmpp_port: u16,

    /// Debug logging.
    #[serde(default)]
    pub debug: bool,

    /// Emit logs as JSON.
    #[serde(default)]
    pub json_logs: bool,

    #[serde(default)]
    pub cache_type: CacheType,

    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,

    /// Accepted for compatibility with the original config layout; the
    /// `redis` cache is rendered in-process, so these are unused.
    #[serde(default)]
    pub redis_host: Option<String>,

    #[serde(default)]
    pub redis_port: Option<u16>,

    #[serde(default)]
    pub redis_password: Option<String>,

    #[serde(default = "default_heartbeat_secs")]
    pub heartbeat_interval_secs: u64,

    /// Capacity of the submission ingress channel.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
}

fn default_http_host() -> String {
    "0.0.0.0".to_string()
}

fn default_http_port() -> u16 {
    8080
}

fn default_cmpp_port() -> u16 {
    7890
}

fn default_db_path() -> PathBuf {
    PathBuf::from("./data/cmpp.db")
}

fn default_heartbeat_secs() -> u64 {
    10
}

fn default_queue_capacity() -> usize {
    10
}

impl Config {
    /// Load configuration from a YAML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        debug!(path = %path.display(), "loading configuration");

        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;

        Self::from_yaml(&contents)
            .with_context(|| format!("failed to parse config file: {}", path.display()))
    }

    /// Parse configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: Config =
            serde_yaml::from_str(yaml).context("failed to parse YAML configuration")?;
        config.validate()?;
        Ok(config)
    }

    /// Validate field constraints imposed by the wire format.
    pub fn validate(&self) -> Result<()> {
        if self.user.is_empty() {
            anyhow::bail!("user must not be empty");
        }
        if self.user.len() > 6 {
            anyhow::bail!("user exceeds 6 bytes: {}", self.user);
        }
        if self.password.is_empty() {
            anyhow::bail!("password must not be empty");
        }
        if self.sms_accessno.is_empty() {
            anyhow::bail!("sms_accessno must not be empty");
        }
        if self.sms_accessno.len() > 21 {
            anyhow::bail!("sms_accessno exceeds 21 bytes: {}", self.sms_accessno);
        }
        if self.service_id.len() > 10 {
            anyhow::bail!("service_id exceeds 10 bytes: {}", self.service_id);
        }
        if self.cmpp_host.is_empty() {
            anyhow::bail!("cmpp_host must not be empty");
        }
        if self.heartbeat_interval_secs == 0 {
            anyhow::bail!("heartbeat_interval_secs must be positive");
        }
        if self.queue_capacity == 0 {
            anyhow::bail!("queue_capacity must be positive");
        }
        Ok(())
    }

    pub fn http_addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.http_host, self.http_port)
            .parse()
            .with_context(|| {
                format!("invalid http bind address {}:{}", self.http_host, self.http_port)
            })
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs)
    }

    /// A minimal valid configuration, used by tests.
    pub fn sample() -> Self {
        Self {
            user: "900001".into(),
            password: "secret".into(),
            sms_accessno: "10657".into(),
            service_id: "svc001".into(),
            http_host: default_http_host(),
            http_port: default_http_port(),
            cmpp_host: "127.0.0.1".into(),
            cmpp_port: default_cmpp_port(),
            debug: false,
            json_logs: false,
            cache_type: CacheType::default(),
            db_path: default_db_path(),
            redis_host: None,
            redis_port: None,
            redis_password: None,
            heartbeat_interval_secs: default_heartbeat_secs(),
            queue_capacity: default_queue_capacity(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_config_applies_defaults() {
        let yaml = r#"
user: "900001"
password: "secret"
sms_accessno: "10657"
service_id: "svc001"
cmpp_host: "smsc.example.com"
"#;

        let config = Config::from_yaml(yaml).unwrap();
        assert_eq!(config.cmpp_port, 7890);
        assert_eq!(config.http_port, 8080);
        assert_eq!(config.cache_type, CacheType::Boltdb);
        assert_eq!(config.db_path, PathBuf::from("./data/cmpp.db"));
        assert_eq!(config.heartbeat_interval(), Duration::from_secs(10));
        assert_eq!(config.queue_capacity, 10);
    }

    #[test]
    fn cache_type_redis_is_recognized() {
        let yaml = r#"
user: "900001"
password: "secret"
sms_accessno: "10657"
service_id: "svc001"
cmpp_host: "smsc.example.com"
cache_type: redis
"#;

        let config = Config::from_yaml(yaml).unwrap();
        assert_eq!(config.cache_type, CacheType::Redis);
    }

    #[test]
    fn oversized_access_number_is_rejected() {
        let mut config = Config::sample();
        config.sms_accessno = "1".repeat(22);
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("sms_accessno"));
    }

    #[test]
    fn empty_user_is_rejected() {
        let mut config = Config::sample();
        config.user.clear();
        assert!(config.validate().is_err());
    }
}
