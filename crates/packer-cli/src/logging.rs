//! Logger setup for the packer binary.

use anyhow::{anyhow, bail, Result};
use env_logger::{Builder, Env, Target};
use log::LevelFilter;
use std::io::Write;
use std::str::FromStr;

/// Log line format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// Human readable lines with an RFC 3339 timestamp
    #[default]
    Text,
    /// One JSON object per line, for log shippers
    Json,
}

impl FromStr for LogFormat {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "text" => Ok(LogFormat::Text),
            "json" => Ok(LogFormat::Json),
            other => bail!("unrecognized log type: {}", other),
        }
    }
}

/// Parse a level name such as `info` or `debug`.
pub fn parse_level(level: &str) -> Result<LevelFilter> {
    LevelFilter::from_str(level).map_err(|_| anyhow!("unrecognized log level: {}", level))
}

/// Install the global logger. `RUST_LOG` takes precedence over `level`.
pub fn init(level: LevelFilter, format: LogFormat) -> Result<()> {
    let mut builder = Builder::from_env(Env::default().default_filter_or(level.as_str()));
    builder.target(Target::Stdout);

    match format {
        LogFormat::Text => {
            builder.format_timestamp_secs();
        }
        LogFormat::Json => {
            builder.format(|buf, record| {
                let line = json_line(
                    &buf.timestamp().to_string(),
                    record.level(),
                    record.target(),
                    &record.args().to_string(),
                );
                writeln!(buf, "{}", line)
            });
        }
    }

    builder
        .try_init()
        .map_err(|e| anyhow!("Failed to initialize logger: {}", e))
}

fn json_line(time: &str, level: log::Level, target: &str, msg: &str) -> String {
    serde_json::json!({
        "time": time,
        "level": level.as_str().to_lowercase(),
        "target": target,
        "msg": msg,
    })
    .to_string()
}
