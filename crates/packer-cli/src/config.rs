use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;

/// Name of the configuration file searched for on startup
pub const CONFIG_FILE: &str = "packer.toml";

/// The main packer configuration file structure (packer.toml)
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct PackerConfig {
    /// HTTP server configuration
    pub server: ServerConfig,

    /// Logging configuration
    pub log: LogConfig,

    /// Initial pack catalog
    pub packs: PacksConfig,

    /// Request limits
    pub limits: LimitsConfig,
}

/// HTTP server configuration
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Host to bind to
    pub host: Option<String>,

    /// Port to listen on
    pub port: Option<u16>,

    /// Request timeout in seconds
    pub http_timeout: Option<u64>,

    /// Number of worker threads
    pub workers: Option<usize>,

    /// Most request computations running at once, including timed-out ones
    pub max_in_flight: Option<usize>,
}

/// Logging configuration
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Level filter (error, warn, info, debug, trace)
    pub level: Option<String>,

    /// Output format (text or json)
    pub format: Option<String>,
}

/// Pack catalog loaded at startup
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct PacksConfig {
    pub sizes: Option<Vec<i64>>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    /// Largest order accepted by the calculate endpoint
    pub max_order: Option<i64>,

    /// Largest search horizon (order plus largest pack) the optimizer accepts
    pub max_horizon: Option<u64>,

    /// Most pack sizes a catalog update may contain
    pub max_pack_sizes: Option<usize>,
}

impl PackerConfig {
    /// Load configuration from packer.toml, searching upward from the given directory
    pub fn load(start_dir: &Path) -> Result<Option<Self>> {
        let mut current = start_dir.to_path_buf();

        loop {
            let config_path = current.join(CONFIG_FILE);

            if config_path.exists() {
                return Self::load_file(&config_path).map(Some);
            }

            // Move to parent directory
            if !current.pop() {
                // Reached filesystem root, no config found
                return Ok(None);
            }
        }
    }

    /// Load configuration by searching upward from the current working directory
    pub fn load_from_cwd() -> Result<Option<Self>> {
        let cwd = std::env::current_dir()?;
        Self::load(&cwd)
    }

    /// Load configuration from an explicit file path
    pub fn load_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let config: PackerConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse {}", path.display()))?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_parse_empty_config() {
        let config: PackerConfig = toml::from_str("").unwrap();
        assert!(config.server.host.is_none());
        assert!(config.packs.sizes.is_none());
        assert!(config.limits.max_order.is_none());
    }

    #[test]
    fn test_parse_full_config() {
        let toml = r#"
[server]
host = "0.0.0.0"
port = 9000
http_timeout = 5
workers = 2
max_in_flight = 6

[log]
level = "debug"
format = "json"

[packs]
sizes = [23, 31, 53]

[limits]
max_order = 1000
max_horizon = 5000
max_pack_sizes = 8
"#;
        let config: PackerConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.server.host, Some("0.0.0.0".to_string()));
        assert_eq!(config.server.port, Some(9000));
        assert_eq!(config.server.http_timeout, Some(5));
        assert_eq!(config.server.workers, Some(2));
        assert_eq!(config.server.max_in_flight, Some(6));
        assert_eq!(config.log.level, Some("debug".to_string()));
        assert_eq!(config.log.format, Some("json".to_string()));
        assert_eq!(config.packs.sizes, Some(vec![23, 31, 53]));
        assert_eq!(config.limits.max_order, Some(1000));
        assert_eq!(config.limits.max_horizon, Some(5000));
        assert_eq!(config.limits.max_pack_sizes, Some(8));
    }

    #[test]
    fn test_load_searches_parent_directories() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join(CONFIG_FILE), "[server]\nport = 7070\n").unwrap();
        let nested = dir.path().join("a").join("b");
        std::fs::create_dir_all(&nested).unwrap();

        let config = PackerConfig::load(&nested).unwrap().unwrap();
        assert_eq!(config.server.port, Some(7070));
    }

    #[test]
    fn test_load_file_reports_parse_errors() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(CONFIG_FILE);
        std::fs::write(&path, "[server]\nport = \"not a number\"\n").unwrap();

        let err = PackerConfig::load_file(&path).unwrap_err();
        assert!(err.to_string().contains("Failed to parse"));
    }
}
