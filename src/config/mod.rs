//! Configuration management

use crate::protocol::{
    CHUNK_TIMEOUT, DEFAULT_BUFFER_SIZE, HANDSHAKE_TIMEOUT, TARGET_CONNECT_TIMEOUT,
};
use crate::transport::TransportConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Main configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Local relay configuration
    pub local: Option<LocalConfig>,
    /// Egress relay configuration
    pub egress: Option<EgressConfig>,
    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, crate::Error> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| crate::Error::Config(format!("Failed to read config: {}", e)))?;

        let config: Config = toml::from_str(&content)
            .map_err(|e| crate::Error::Config(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), crate::Error> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| crate::Error::Config(format!("Failed to serialize config: {}", e)))?;

        std::fs::write(path, content)
            .map_err(|e| crate::Error::Config(format!("Failed to write config: {}", e)))
    }

    /// Reject values the relays cannot operate with
    pub fn validate(&self) -> Result<(), crate::Error> {
        if let Some(local) = &self.local {
            validate_buffer_size(local.buffer_size)?;
            if local.max_request_size == 0 {
                return Err(crate::Error::Config("max_request_size must be positive".into()));
            }
            if local.max_request_size > crate::MAX_PLAINTEXT_SIZE {
                return Err(crate::Error::Config(format!(
                    "max_request_size must not exceed {}",
                    crate::MAX_PLAINTEXT_SIZE
                )));
            }
        }
        if let Some(egress) = &self.egress {
            validate_buffer_size(egress.buffer_size)?;
        }
        Ok(())
    }
}

fn validate_buffer_size(size: usize) -> Result<(), crate::Error> {
    if size == 0 || size > crate::MAX_PLAINTEXT_SIZE {
        return Err(crate::Error::Config(format!(
            "buffer_size must be between 1 and {}",
            crate::MAX_PLAINTEXT_SIZE
        )));
    }
    Ok(())
}

/// Local relay configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LocalConfig {
    /// Browser-facing listen address
    pub listen: String,
    /// Egress relay address
    pub egress: String,
    /// Read buffer size
    pub buffer_size: usize,
    /// Bound on the whole key exchange
    pub handshake_timeout_ms: u64,
    /// Browser inactivity bound while capturing the request
    pub request_timeout_ms: u64,
    /// Egress inactivity bound while streaming the response
    pub response_timeout_ms: u64,
    /// Largest request header block accepted from the browser
    pub max_request_size: usize,
}

impl Default for LocalConfig {
    fn default() -> Self {
        Self {
            listen: "127.0.0.1:8080".to_string(),
            egress: "127.0.0.1:9090".to_string(),
            buffer_size: DEFAULT_BUFFER_SIZE,
            handshake_timeout_ms: HANDSHAKE_TIMEOUT * 1000,
            request_timeout_ms: 30_000,
            response_timeout_ms: 30_000,
            max_request_size: 64 * 1024,
        }
    }
}

impl LocalConfig {
    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn response_timeout(&self) -> Duration {
        Duration::from_millis(self.response_timeout_ms)
    }

    /// Transport settings for the browser and egress sockets
    pub fn transport(&self) -> TransportConfig {
        TransportConfig {
            connect_timeout: self.handshake_timeout(),
            read_timeout: self.request_timeout(),
            write_timeout: self.response_timeout(),
        }
    }
}

/// Egress relay configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EgressConfig {
    /// Listen address for local relays
    pub listen: String,
    /// Read buffer size; also the largest response chunk per frame
    pub buffer_size: usize,
    /// Bound on the whole key exchange
    pub handshake_timeout_ms: u64,
    /// Bound on waiting for the encrypted request frame
    pub request_timeout_ms: u64,
    /// Bound on connecting to the target server
    pub target_connect_timeout_ms: u64,
    /// Target inactivity that marks the end of a response
    pub chunk_timeout_ms: u64,
}

impl Default for EgressConfig {
    fn default() -> Self {
        Self {
            listen: "127.0.0.1:9090".to_string(),
            buffer_size: DEFAULT_BUFFER_SIZE,
            handshake_timeout_ms: HANDSHAKE_TIMEOUT * 1000,
            request_timeout_ms: 30_000,
            target_connect_timeout_ms: TARGET_CONNECT_TIMEOUT.as_millis() as u64,
            chunk_timeout_ms: CHUNK_TIMEOUT.as_millis() as u64,
        }
    }
}

impl EgressConfig {
    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn target_connect_timeout(&self) -> Duration {
        Duration::from_millis(self.target_connect_timeout_ms)
    }

    pub fn chunk_timeout(&self) -> Duration {
        Duration::from_millis(self.chunk_timeout_ms)
    }

    /// Transport settings for the local-relay socket
    pub fn tunnel_transport(&self) -> TransportConfig {
        TransportConfig {
            connect_timeout: self.handshake_timeout(),
            read_timeout: self.handshake_timeout(),
            write_timeout: self.request_timeout(),
        }
    }

    /// Transport settings for the target socket
    pub fn target_transport(&self) -> TransportConfig {
        TransportConfig {
            connect_timeout: self.target_connect_timeout(),
            read_timeout: self.chunk_timeout(),
            write_timeout: self.target_connect_timeout(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error) or a full filter directive
    pub level: String,
    /// Log format (pretty, compact)
    pub format: String,
    /// Log request lines and chunk sizes (never payload bytes or keys)
    pub log_traffic: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
            log_traffic: false,
        }
    }
}

impl LoggingConfig {
    /// Install the global `tracing` subscriber
    ///
    /// `RUST_LOG` wins over the configured level when set.
    pub fn init(&self) {
        use tracing_subscriber::EnvFilter;

        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(&self.level));
        let builder = tracing_subscriber::fmt().with_env_filter(filter);

        match self.format.to_lowercase().as_str() {
            "compact" => builder.compact().init(),
            _ => builder.pretty().init(),
        }
    }
}

/// Generate example configuration
pub fn generate_example_config() -> Config {
    Config {
        local: Some(LocalConfig::default()),
        egress: Some(EgressConfig::default()),
        logging: LoggingConfig::default(),
    }
}
