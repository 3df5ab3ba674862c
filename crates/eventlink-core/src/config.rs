//! Configuration system for EventLink.
//!
//! Resolution order: environment variables → config file → defaults.
//!
//! Config file location:
//!   1. $EVENTLINK_CONFIG (explicit override)
//!   2. $XDG_CONFIG_HOME/eventlink/config.toml
//!   3. ~/.config/eventlink/config.toml

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EventLinkConfig {
    pub server: ServerConfig,
    pub connection: ConnectionConfig,
    pub routing: RoutingConfig,
    pub trust: TrustConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// This server's name on the mesh. Empty = refuse to start.
    pub name: String,
    /// Address the peer listener binds.
    pub listen_addr: String,
    /// Localhost port for the admin API. 0 = disabled.
    pub api_port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    /// Upper bound on how long a reader blocks before re-checking cancellation.
    pub read_poll_ms: u64,
    /// Upper bound on how long an idle writer waits before re-checking cancellation.
    pub write_poll_ms: u64,
    /// Grace period granted to workers when joining a connection.
    pub join_grace_ms: u64,
    /// Hello exchange must finish within this window.
    pub handshake_timeout_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RoutingConfig {
    /// Remote entries older than this are treated as absent.
    pub entry_ttl_secs: u64,
    /// How often locally owned entries are re-announced to peers.
    pub announce_interval_secs: u64,
    /// How often expired entries are evicted.
    pub expiry_interval_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrustConfig {
    /// How often trusted-but-disconnected peers are redialled.
    pub refresh_interval_secs: u64,
    /// Peers this server trusts and will connect to.
    pub peers: Vec<TrustedPeerConfig>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrustedPeerConfig {
    pub name: String,
    /// host:port of the peer's listener.
    pub addr: String,
}

// ── Defaults ──────────────────────────────────────────────────────────────────

/// Listener port used when none is configured.
pub const DEFAULT_PORT: u16 = 25365;

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            name: String::new(),
            listen_addr: format!("0.0.0.0:{DEFAULT_PORT}"),
            api_port: 25366,
        }
    }
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            read_poll_ms: 1000,
            write_poll_ms: 200,
            join_grace_ms: 100,
            handshake_timeout_ms: 5000,
        }
    }
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            entry_ttl_secs: 30,
            announce_interval_secs: 10,
            expiry_interval_secs: 5,
        }
    }
}

impl Default for TrustConfig {
    fn default() -> Self {
        Self {
            refresh_interval_secs: 10,
            peers: Vec::new(),
        }
    }
}

impl ConnectionConfig {
    pub fn read_poll(&self) -> Duration {
        Duration::from_millis(self.read_poll_ms)
    }

    pub fn write_poll(&self) -> Duration {
        Duration::from_millis(self.write_poll_ms)
    }

    pub fn join_grace(&self) -> Duration {
        Duration::from_millis(self.join_grace_ms)
    }

    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms)
    }
}

impl RoutingConfig {
    pub fn entry_ttl(&self) -> Duration {
        Duration::from_secs(self.entry_ttl_secs)
    }

    pub fn announce_interval(&self) -> Duration {
        Duration::from_secs(self.announce_interval_secs.max(1))
    }

    pub fn expiry_interval(&self) -> Duration {
        Duration::from_secs(self.expiry_interval_secs.max(1))
    }
}

impl TrustConfig {
    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_interval_secs.max(1))
    }
}

// ── Path helpers ──────────────────────────────────────────────────────────────

fn config_dir() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| dirs_or_home().join(".config"))
        .join("eventlink")
}

fn dirs_or_home() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/tmp"))
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {0}: {1}")]
    ReadFailed(PathBuf, std::io::Error),
    #[error("failed to parse {0}: {1}")]
    ParseFailed(PathBuf, toml::de::Error),
    #[error("failed to write {0}: {1}")]
    WriteFailed(PathBuf, std::io::Error),
    #[error("failed to serialize: {0}")]
    SerializeFailed(toml::ser::Error),
    #[error("server name is not set")]
    MissingServerName,
}

// ── Loading ───────────────────────────────────────────────────────────────────

impl EventLinkConfig {
    /// Load config: env vars → file → defaults.
    pub fn load() -> Result<Self, ConfigError> {
        let path = Self::file_path();
        let mut config = if path.exists() {
            let text = std::fs::read_to_string(&path)
                .map_err(|e| ConfigError::ReadFailed(path.clone(), e))?;
            Self::parse(&text).map_err(|e| ConfigError::ParseFailed(path.clone(), e))?
        } else {
            EventLinkConfig::default()
        };
        config.apply_env_overrides();
        Ok(config)
    }

    pub fn parse(text: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(text)
    }

    /// Config file path.
    pub fn file_path() -> PathBuf {
        std::env::var("EVENTLINK_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| config_dir().join("config.toml"))
    }

    /// Write default config if none exists. Returns the path.
    pub fn write_default_if_missing() -> Result<PathBuf, ConfigError> {
        let path = Self::file_path();
        if !path.exists() {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| ConfigError::WriteFailed(path.clone(), e))?;
            }
            let text = toml::to_string_pretty(&EventLinkConfig::default())
                .map_err(ConfigError::SerializeFailed)?;
            std::fs::write(&path, text).map_err(|e| ConfigError::WriteFailed(path.clone(), e))?;
        }
        Ok(path)
    }

    /// The configured server name, trimmed. Errors if blank.
    pub fn server_name(&self) -> Result<&str, ConfigError> {
        let name = self.server.name.trim();
        if name.is_empty() {
            return Err(ConfigError::MissingServerName);
        }
        Ok(name)
    }

    /// Apply EVENTLINK_* env var overrides.
    fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    /// Apply `EVENTLINK_<SECTION>__<FIELD>` overrides from `lookup`.
    /// Values that fail to parse are ignored.
    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        fn set<T: std::str::FromStr>(
            lookup: &impl Fn(&str) -> Option<String>,
            key: &str,
            field: &mut T,
        ) {
            if let Some(v) = lookup(key).and_then(|v| v.trim().parse().ok()) {
                *field = v;
            }
        }

        if let Some(v) = lookup("EVENTLINK_SERVER__NAME") {
            self.server.name = v;
        }
        if let Some(v) = lookup("EVENTLINK_SERVER__LISTEN_ADDR") {
            self.server.listen_addr = v;
        }
        set(&lookup, "EVENTLINK_SERVER__API_PORT", &mut self.server.api_port);

        let c = &mut self.connection;
        set(&lookup, "EVENTLINK_CONNECTION__READ_POLL_MS", &mut c.read_poll_ms);
        set(&lookup, "EVENTLINK_CONNECTION__WRITE_POLL_MS", &mut c.write_poll_ms);
        set(&lookup, "EVENTLINK_CONNECTION__JOIN_GRACE_MS", &mut c.join_grace_ms);
        set(&lookup, "EVENTLINK_CONNECTION__HANDSHAKE_TIMEOUT_MS", &mut c.handshake_timeout_ms);

        let r = &mut self.routing;
        set(&lookup, "EVENTLINK_ROUTING__ENTRY_TTL_SECS", &mut r.entry_ttl_secs);
        set(&lookup, "EVENTLINK_ROUTING__ANNOUNCE_INTERVAL_SECS", &mut r.announce_interval_secs);
        set(&lookup, "EVENTLINK_ROUTING__EXPIRY_INTERVAL_SECS", &mut r.expiry_interval_secs);

        set(
            &lookup,
            "EVENTLINK_TRUST__REFRESH_INTERVAL_SECS",
            &mut self.trust.refresh_interval_secs,
        );
    }
}
