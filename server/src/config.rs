use clap::Parser;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::num::NonZeroU32;
use std::time::Duration;

/// Command-line flags. Only flags actually given are layered over the file
/// and environment.
#[derive(Parser, Serialize, Clone, Debug)]
#[command(name = "united-realtime", version, about = "UNITED realtime chat and presence gateway")]
pub struct Cli {
    /// Port to listen on [default: 1984]
    #[arg(long, env = "UNITED_PORT")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,

    /// Bind address [default: 0.0.0.0]
    #[arg(long, env = "UNITED_BIND_ADDRESS")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bind_address: Option<String>,

    /// Path to TOML config file
    #[arg(long, default_value = "./united-realtime.toml")]
    pub config: String,

    /// Enable structured JSON logging (for Docker/production)
    #[arg(long, env = "UNITED_JSON_LOGS")]
    #[serde(skip_serializing_if = "is_unset")]
    pub json_logs: bool,

    /// Output a commented TOML config template and exit
    #[arg(long)]
    #[serde(skip_serializing_if = "is_unset")]
    pub generate_config: bool,

    /// Data directory for the SQLite database and JWT secret file [default: ./data]
    #[arg(long, env = "UNITED_DATA_DIR")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_dir: Option<String>,

    /// HS256 secret for verifying access tokens. Falls back to <data_dir>/jwt_secret.
    #[arg(long, env = "UNITED_JWT_SECRET", hide_env_values = true)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub jwt_secret: Option<String>,
}

fn is_unset(flag: &bool) -> bool {
    !*flag
}

/// Resolved gateway configuration.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct Config {
    pub port: u16,
    pub bind_address: String,
    pub config: String,
    #[serde(default)]
    pub json_logs: bool,
    #[serde(default)]
    pub generate_config: bool,
    pub data_dir: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jwt_secret: Option<String>,
    /// Message and keepalive limits (loaded from [limits] section in TOML)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limits: Option<LimitsConfig>,
}

/// Per-connection limits.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LimitsConfig {
    /// Maximum message length in characters, counted after trimming (default: 2000)
    #[serde(default = "default_max_message_chars")]
    pub max_message_chars: usize,

    /// Sustained message:send + dm:send rate per connection (default: 5)
    #[serde(default = "default_messages_per_second")]
    pub messages_per_second: u32,

    /// Burst allowance on top of the sustained rate (default: 5)
    #[serde(default = "default_message_burst")]
    pub message_burst: u32,

    /// Seconds between server pings (default: 30)
    #[serde(default = "default_ping_interval")]
    pub ping_interval_secs: u64,

    /// Seconds to wait for a pong before closing with 1001 (default: 10)
    #[serde(default = "default_pong_timeout")]
    pub pong_timeout_secs: u64,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_message_chars: 2000,
            messages_per_second: 5,
            message_burst: 5,
            ping_interval_secs: 30,
            pong_timeout_secs: 10,
        }
    }
}

impl LimitsConfig {
    pub fn message_quota(&self) -> governor::Quota {
        let rate = NonZeroU32::new(self.messages_per_second).unwrap_or(NonZeroU32::MIN);
        let burst = NonZeroU32::new(self.message_burst).unwrap_or(rate);
        governor::Quota::per_second(rate).allow_burst(burst)
    }

    pub fn ping_interval(&self) -> Duration {
        Duration::from_secs(self.ping_interval_secs.max(1))
    }

    pub fn pong_timeout(&self) -> Duration {
        Duration::from_secs(self.pong_timeout_secs.max(1))
    }
}

fn default_max_message_chars() -> usize {
    2000
}

fn default_messages_per_second() -> u32 {
    5
}

fn default_message_burst() -> u32 {
    5
}

fn default_ping_interval() -> u64 {
    30
}

fn default_pong_timeout() -> u64 {
    10
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 1984,
            bind_address: "0.0.0.0".to_string(),
            config: "./united-realtime.toml".to_string(),
            json_logs: false,
            generate_config: false,
            data_dir: "./data".to_string(),
            jwt_secret: None,
            limits: Some(LimitsConfig::default()),
        }
    }
}

impl Config {
    /// Load config with layered precedence:
    /// built-in defaults < TOML file < env vars (UNITED_*) < CLI args
    pub fn load() -> Result<Self, figment::Error> {
        Self::layered(Cli::parse())
    }

    /// Resolve parsed flags against the defaults, the TOML file named by
    /// `--config` and the environment.
    pub fn layered(cli: Cli) -> Result<Self, figment::Error> {
        let config_path = cli.config.clone();

        Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Toml::file(&config_path))
            .merge(Env::prefixed("UNITED_"))
            .merge(Serialized::defaults(cli))
            .extract()
    }

    pub fn limits(&self) -> LimitsConfig {
        self.limits.clone().unwrap_or_default()
    }
}

/// Generate a commented TOML config template
pub fn generate_config_template() -> String {
    r#"# UNITED Realtime Gateway Configuration
# Place this file at ./united-realtime.toml or specify with --config <path>
# All settings can be overridden via environment variables (UNITED_PORT, etc.)
# or CLI flags (--port, etc.)

# Server port (default: 1984)
# port = 1984

# Bind address (default: 0.0.0.0, all interfaces)
# bind_address = "0.0.0.0"

# Enable structured JSON logging for Docker/production
# json_logs = false

# Data directory for the SQLite database and JWT secret file
# data_dir = "./data"

# HS256 access token secret shared with the token issuer.
# If unset, read from <data_dir>/jwt_secret
# jwt_secret = ""

# ---- Limits ----
# [limits]
# max_message_chars = 2000   # Longer messages are dropped, not truncated
# messages_per_second = 5    # Per connection, message:send and dm:send combined
# message_burst = 5
# ping_interval_secs = 30
# pong_timeout_secs = 10     # Close with 1001 when no pong arrives in time
"#
    .to_string()
}
