use anyhow::{bail, Context, Result};
use clap::Parser;
use http::Uri;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

const DEFAULT_CONFIG_FILE: &str = "server_relay.conf";

const DEFAULT_PORT: u16 = 9010;
const DEFAULT_LOG_DIR: &str = "./logs";
const DEFAULT_LOG_LEVEL: &str = "info";
const DEFAULT_UPSTREAM_URL: &str = "wss://ws.kraken.com";
const DEFAULT_ORIGIN: &str = "https://ws.kraken.com";
const DEFAULT_CACHE_CAPACITY: usize = 10_000;
const DEFAULT_WARM_UP_THRESHOLD: u64 = 1_000;
const DEFAULT_SILENT_LIMIT_MS: u64 = 300_000;
const DEFAULT_ACCEPT_TIMEOUT_MS: u64 = 5_000;
const DEFAULT_READ_TIMEOUT_MS: u64 = 500;

fn default_subscriptions() -> Vec<String> {
    vec![
        r#"{"event":"subscribe","pair":["XBT/EUR"],"subscription":{"name":"ticker"}}"#.to_string(),
        r#"{"event":"subscribe","pair":["XBT/EUR"],"subscription":{"name":"book"}}"#.to_string(),
    ]
}

fn default_topics() -> Vec<String> {
    vec!["ticker".to_string(), "book".to_string()]
}

/// Raw configuration overlay: every field optional so that defaults, the
/// JSON config file and env/CLI values can be layered with `merge`.
#[derive(Parser, Deserialize, Serialize, Debug, Clone, Default)]
#[clap(about = "Caching relay for a single upstream realtime feed", version)]
#[serde(rename_all = "camelCase")]
pub struct ConfigArgs {
    #[clap(long, env = "RELAY_PORT", help = "Port to listen on for client connections.")]
    pub port: Option<u16>,

    #[clap(long, env = "RELAY_CONFIG_PATH", help = "Path to the JSON configuration file.")]
    pub config_path: Option<PathBuf>,

    #[clap(long, env = "RELAY_LOG_DIR", help = "Directory for log files.")]
    pub log_dir: Option<PathBuf>,

    #[clap(long, env = "RELAY_LOG_LEVEL", help = "Logging level (trace, debug, info, warn, error).")]
    pub log_level: Option<String>,

    #[clap(long, env = "RELAY_UPSTREAM_URL", help = "Upstream feed WebSocket URL.")]
    pub upstream_url: Option<String>,

    #[clap(long, env = "RELAY_ORIGIN", help = "Origin header value sent during the upstream handshake.")]
    pub origin: Option<String>,

    #[clap(
        long,
        env = "RELAY_SUBSCRIPTIONS",
        value_delimiter = ';',
        help = "Subscription requests sent after the upstream connection opens, ';'-separated."
    )]
    pub subscriptions: Option<Vec<String>>,

    #[clap(
        long,
        env = "RELAY_TOPICS",
        value_delimiter = ',',
        help = "Topic names whose presence in a message counts as feed activity, ','-separated."
    )]
    pub topics: Option<Vec<String>>,

    #[clap(long, env = "RELAY_CACHE_CAPACITY", help = "Maximum number of feed lines kept for replay.")]
    pub cache_capacity: Option<usize>,

    #[clap(long, env = "RELAY_WARM_UP_THRESHOLD", help = "Cached insertions after which a session counts as warmed up.")]
    pub warm_up_threshold: Option<u64>,

    #[clap(long, env = "RELAY_SILENT_LIMIT_MS", help = "Milliseconds of silence on every topic before the upstream is declared dead.")]
    pub silent_limit_ms: Option<u64>,

    #[clap(long, env = "RELAY_ACCEPT_TIMEOUT_MS", help = "Milliseconds to wait for a client before re-checking feed liveness.")]
    pub accept_timeout_ms: Option<u64>,

    #[clap(long, env = "RELAY_READ_TIMEOUT_MS", help = "Milliseconds a client read may block between liveness checks.")]
    pub read_timeout_ms: Option<u64>,
}

impl ConfigArgs {
    // Merge two overlays, where 'other' overrides 'self' for Some values
    fn merge(self, other: ConfigArgs) -> ConfigArgs {
        ConfigArgs {
            port: other.port.or(self.port),
            config_path: other.config_path.or(self.config_path),
            log_dir: other.log_dir.or(self.log_dir),
            log_level: other.log_level.or(self.log_level),
            upstream_url: other.upstream_url.or(self.upstream_url),
            origin: other.origin.or(self.origin),
            subscriptions: other.subscriptions.or(self.subscriptions),
            topics: other.topics.or(self.topics),
            cache_capacity: other.cache_capacity.or(self.cache_capacity),
            warm_up_threshold: other.warm_up_threshold.or(self.warm_up_threshold),
            silent_limit_ms: other.silent_limit_ms.or(self.silent_limit_ms),
            accept_timeout_ms: other.accept_timeout_ms.or(self.accept_timeout_ms),
            read_timeout_ms: other.read_timeout_ms.or(self.read_timeout_ms),
        }
    }
}

/// Fully resolved configuration used by the rest of the server.
#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub log_dir: PathBuf,
    pub log_level: String,
    pub upstream_url: String,
    pub origin: String,
    pub subscriptions: Vec<String>,
    pub topics: Vec<String>,
    pub cache_capacity: usize,
    pub warm_up_threshold: u64,
    pub silent_limit: Duration,
    pub accept_timeout: Duration,
    pub read_timeout: Duration,
}

pub fn load_config() -> Result<Config> {
    // 1. CLI arguments and environment variables (clap handles both).
    let cli = ConfigArgs::parse();

    // 2. Config file, path overridable from the CLI. A file explicitly
    //    pointed at must exist; the default location may be absent.
    let explicit_path = cli.config_path.is_some();
    let config_file_path = cli
        .config_path
        .clone()
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE));

    let mut merged = ConfigArgs::default();
    if config_file_path.exists() {
        let raw = fs::read_to_string(&config_file_path)
            .with_context(|| format!("Failed to read config file: {}", config_file_path.display()))?;
        let file_config: ConfigArgs = serde_json::from_str(&raw)
            .with_context(|| format!("Failed to parse config file: {}", config_file_path.display()))?;
        merged = merged.merge(file_config);
    } else if explicit_path {
        bail!("Config file not found: {}", config_file_path.display());
    }

    // 3. Env/CLI values win over the file.
    let merged = merged.merge(cli);

    let config = Config {
        port: merged.port.unwrap_or(DEFAULT_PORT),
        log_dir: merged.log_dir.unwrap_or_else(|| PathBuf::from(DEFAULT_LOG_DIR)),
        log_level: merged.log_level.unwrap_or_else(|| DEFAULT_LOG_LEVEL.to_string()),
        upstream_url: merged
            .upstream_url
            .unwrap_or_else(|| DEFAULT_UPSTREAM_URL.to_string()),
        origin: merged.origin.unwrap_or_else(|| DEFAULT_ORIGIN.to_string()),
        subscriptions: merged.subscriptions.unwrap_or_else(default_subscriptions),
        topics: merged.topics.unwrap_or_else(default_topics),
        cache_capacity: merged.cache_capacity.unwrap_or(DEFAULT_CACHE_CAPACITY),
        warm_up_threshold: merged.warm_up_threshold.unwrap_or(DEFAULT_WARM_UP_THRESHOLD),
        silent_limit: Duration::from_millis(merged.silent_limit_ms.unwrap_or(DEFAULT_SILENT_LIMIT_MS)),
        accept_timeout: Duration::from_millis(
            merged.accept_timeout_ms.unwrap_or(DEFAULT_ACCEPT_TIMEOUT_MS),
        ),
        read_timeout: Duration::from_millis(merged.read_timeout_ms.unwrap_or(DEFAULT_READ_TIMEOUT_MS)),
    };

    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    if config.cache_capacity == 0 {
        bail!("cacheCapacity must be at least 1");
    }

    let uri: Uri = config
        .upstream_url
        .parse()
        .with_context(|| format!("Invalid upstream URL: {}", config.upstream_url))?;
    match uri.scheme_str() {
        Some("ws") | Some("wss") => {}
        _ => bail!("Upstream URL must use ws:// or wss://: {}", config.upstream_url),
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_merge_prefers_the_override_layer() {
        let base = ConfigArgs {
            port: Some(9010),
            log_level: Some("info".to_string()),
            ..Default::default()
        };
        let over = ConfigArgs {
            port: Some(9999),
            ..Default::default()
        };
        let merged = base.merge(over);
        assert_eq!(merged.port, Some(9999));
        assert_eq!(merged.log_level, Some("info".to_string()));
    }

    #[test]
    fn test_validate_rejects_non_websocket_urls() {
        let mut config = Config {
            port: DEFAULT_PORT,
            log_dir: PathBuf::from(DEFAULT_LOG_DIR),
            log_level: DEFAULT_LOG_LEVEL.to_string(),
            upstream_url: "https://example.com/feed".to_string(),
            origin: DEFAULT_ORIGIN.to_string(),
            subscriptions: default_subscriptions(),
            topics: default_topics(),
            cache_capacity: DEFAULT_CACHE_CAPACITY,
            warm_up_threshold: DEFAULT_WARM_UP_THRESHOLD,
            silent_limit: Duration::from_millis(DEFAULT_SILENT_LIMIT_MS),
            accept_timeout: Duration::from_millis(DEFAULT_ACCEPT_TIMEOUT_MS),
            read_timeout: Duration::from_millis(DEFAULT_READ_TIMEOUT_MS),
        };
        assert!(validate(&config).is_err());

        config.upstream_url = DEFAULT_UPSTREAM_URL.to_string();
        assert!(validate(&config).is_ok());

        config.cache_capacity = 0;
        assert!(validate(&config).is_err());
    }
}
