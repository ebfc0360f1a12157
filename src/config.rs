//! Command-line / environment configuration.

use clap::Parser;

use crate::signaling::{DEFAULT_MAX_PARTICIPANTS, DEFAULT_SIGNALING_PORT};

#[derive(Parser, Debug, Clone, PartialEq, Eq)]
#[command(name = "huddle")]
#[command(about = "WebRTC signaling server with room membership", long_about = None)]
pub struct Config {
    /// Host address to bind the server to
    #[arg(short = 'H', long, env = "HUDDLE_HOST", default_value = "0.0.0.0")]
    pub host: String,

    /// Port number to bind the server to
    #[arg(short = 'p', long, env = "HUDDLE_PORT", default_value_t = DEFAULT_SIGNALING_PORT)]
    pub port: u16,

    /// Maximum number of participants per room
    #[arg(
        long,
        env = "HUDDLE_MAX_PARTICIPANTS",
        default_value_t = DEFAULT_MAX_PARTICIPANTS,
        value_parser = parse_max_participants
    )]
    pub max_participants: usize,

    /// Origins allowed to open a WebSocket (comma separated, empty = any)
    #[arg(long, env = "HUDDLE_ALLOWED_ORIGINS", value_delimiter = ',')]
    pub allowed_origins: Vec<String>,

    /// Default log level, overridden by RUST_LOG
    #[arg(long, env = "HUDDLE_LOG_LEVEL", default_value = "info")]
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: DEFAULT_SIGNALING_PORT,
            max_participants: DEFAULT_MAX_PARTICIPANTS,
            allowed_origins: Vec::new(),
            log_level: "info".to_string(),
        }
    }
}

impl Config {
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn parse_max_participants(s: &str) -> Result<usize, String> {
    let n: usize = s.parse().map_err(|e| format!("{e}"))?;
    if n == 0 {
        return Err("must be at least 1".to_string());
    }
    Ok(n)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = Config::try_parse_from(["huddle"]).unwrap();
        assert_eq!(config.port, 3479);
        assert_eq!(config.max_participants, 6);
        assert!(config.allowed_origins.is_empty());
        assert_eq!(config.bind_addr(), "0.0.0.0:3479");
    }

    #[test]
    fn default_impl_agrees_with_parser() {
        assert_eq!(Config::try_parse_from(["huddle"]).unwrap(), Config::default());
    }

    #[test]
    fn parses_overrides() {
        let config = Config::try_parse_from([
            "huddle",
            "--host",
            "127.0.0.1",
            "-p",
            "9000",
            "--max-participants",
            "2",
            "--allowed-origins",
            "http://localhost:8000,http://localhost:3000",
        ])
        .unwrap();
        assert_eq!(config.bind_addr(), "127.0.0.1:9000");
        assert_eq!(config.max_participants, 2);
        assert_eq!(
            config.allowed_origins,
            vec!["http://localhost:8000", "http://localhost:3000"]
        );
    }

    #[test]
    fn rejects_zero_capacity() {
        assert!(Config::try_parse_from(["huddle", "--max-participants", "0"]).is_err());
    }
}
