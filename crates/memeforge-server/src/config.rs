//! Server configuration from environment variables.

use std::net::SocketAddr;
use thiserror::Error;

/// Default upload size limit: 10 MiB.
pub const DEFAULT_MAX_UPLOAD: usize = 10 * 1024 * 1024;
/// Default number of images kept in memory.
pub const DEFAULT_MAX_IMAGES: usize = 500;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid {var}={value:?}: {reason}")]
    Invalid {
        var: &'static str,
        value: String,
        reason: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    pub addr: SocketAddr,
    /// Base URL used when handing out image links, without trailing slash.
    pub public_url: String,
    pub max_upload_bytes: usize,
    /// Oldest images are evicted beyond this count.
    pub max_images: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            addr: SocketAddr::from(([0, 0, 0, 0], 3030)),
            public_url: "http://localhost:3030".to_string(),
            max_upload_bytes: DEFAULT_MAX_UPLOAD,
            max_images: DEFAULT_MAX_IMAGES,
        }
    }
}

impl ServerConfig {
    /// Read `MEMEFORGE_ADDR`, `MEMEFORGE_PUBLIC_URL`, `MEMEFORGE_MAX_UPLOAD`
    /// and `MEMEFORGE_MAX_IMAGES`. Unset variables take defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(value) = lookup("MEMEFORGE_ADDR") {
            config.addr = value.parse().map_err(|e: std::net::AddrParseError| {
                ConfigError::Invalid {
                    var: "MEMEFORGE_ADDR",
                    value: value.clone(),
                    reason: e.to_string(),
                }
            })?;
        }
        config.public_url = match lookup("MEMEFORGE_PUBLIC_URL") {
            Some(url) => url.trim_end_matches('/').to_string(),
            None => format!("http://localhost:{}", config.addr.port()),
        };
        if let Some(value) = lookup("MEMEFORGE_MAX_UPLOAD") {
            config.max_upload_bytes = parse_positive("MEMEFORGE_MAX_UPLOAD", &value)?;
        }
        if let Some(value) = lookup("MEMEFORGE_MAX_IMAGES") {
            config.max_images = parse_positive("MEMEFORGE_MAX_IMAGES", &value)?;
        }
        Ok(config)
    }
}

fn parse_positive(var: &'static str, value: &str) -> Result<usize, ConfigError> {
    let invalid = |reason: String| ConfigError::Invalid {
        var,
        value: value.to_string(),
        reason,
    };
    match value.trim().parse::<usize>() {
        Ok(0) => Err(invalid("must be greater than zero".to_string())),
        Ok(n) => Ok(n),
        Err(e) => Err(invalid(e.to_string())),
    }
}
