use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Smallest read buffer a connection will use
pub const MIN_READ_CHUNK_SIZE: usize = 512;

/// Client configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Server host
    pub host: String,

    /// Server port
    pub port: u16,

    /// Database index, selected right after connect when non-zero
    pub db: i64,

    /// Maximum bytes read from the socket per read-ready event
    pub read_chunk_size: usize,

    /// TCP nodelay
    pub tcp_nodelay: bool,

    /// Line terminator used when encoding requests
    pub terminator: String,

    /// Largest bulk string the decoder accepts
    pub max_bulk_len: usize,

    /// Poll timeout of the client event loop, in milliseconds
    pub poll_timeout_ms: u64,

    /// Log level
    pub log_level: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 6379,
            db: 0,
            read_chunk_size: 8192,
            tcp_nodelay: true,
            terminator: "\r\n".to_string(),
            max_bulk_len: 512 * 1024 * 1024, // 512MB, same as the server default
            poll_timeout_ms: 100,
            log_level: "warn".to_string(),
        }
    }
}

impl ClientConfig {
    /// Load configuration from a TOML file
    ///
    /// # Example
    ///
    /// ```no_run
    /// use redispatch::ClientConfig;
    ///
    /// # fn main() -> anyhow::Result<()> {
    /// let config = ClientConfig::from_file("redispatch.toml")?;
    /// # Ok(())
    /// # }
    /// ```
    pub fn from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let contents = fs::read_to_string(path)?;
        let config: ClientConfig = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Save configuration to a TOML file
    pub fn to_file<P: AsRef<Path>>(&self, path: P) -> anyhow::Result<()> {
        let contents = toml::to_string_pretty(self)?;
        fs::write(path, contents)?;
        Ok(())
    }

    /// Validate configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.port == 0 {
            anyhow::bail!("port must be > 0");
        }

        if self.read_chunk_size < MIN_READ_CHUNK_SIZE {
            anyhow::bail!("read_chunk_size must be >= {}", MIN_READ_CHUNK_SIZE);
        }

        if self.terminator.is_empty() {
            anyhow::bail!("terminator must not be empty");
        }

        if self.max_bulk_len == 0 {
            anyhow::bail!("max_bulk_len must be > 0");
        }

        Ok(())
    }

    /// `host:port` address string
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
