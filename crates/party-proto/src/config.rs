use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use super::platform;

/// Daemon settings read from `config.toml`.  These are operator knobs; the
/// audience-facing party configuration lives in [`crate::party::PartyConfig`]
/// and is edited by clients at runtime.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub daemon: DaemonConfig,
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub schedule: ScheduleConfig,
    #[serde(default)]
    pub twitch: TwitchConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonConfig {
    /// JSON document holding the persisted party configuration.
    #[serde(default = "default_party_file")]
    pub party_file: PathBuf,
    /// JSON map of bot username -> chat credential.
    #[serde(default = "default_credentials_file")]
    pub credentials_file: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

/// Polling cadence of the two periodic tasks that run while a party is live.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleConfig {
    /// How often the featured stream's deadline is checked.  Rotation
    /// precision is bounded by this value.
    #[serde(default = "default_timeout_check_interval_ms")]
    pub timeout_check_interval_ms: u64,
    #[serde(default = "default_catalog_refresh_interval_secs")]
    pub catalog_refresh_interval_secs: u64,
    /// Ignore an empty search result when the previous one was non-empty.
    #[serde(default = "default_discard_empty_fetch")]
    pub discard_empty_fetch: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TwitchConfig {
    #[serde(default = "default_api_base")]
    pub api_base: String,
    #[serde(default = "default_validate_url")]
    pub validate_url: String,
    #[serde(default = "default_watch_base_url")]
    pub watch_base_url: String,
    /// Public client id used when the party config does not carry its own.
    #[serde(default = "default_client_id")]
    pub default_client_id: String,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            party_file: default_party_file(),
            credentials_file: default_credentials_file(),
        }
    }
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            port: default_port(),
        }
    }
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            timeout_check_interval_ms: default_timeout_check_interval_ms(),
            catalog_refresh_interval_secs: default_catalog_refresh_interval_secs(),
            discard_empty_fetch: default_discard_empty_fetch(),
        }
    }
}

impl Default for TwitchConfig {
    fn default() -> Self {
        Self {
            api_base: default_api_base(),
            validate_url: default_validate_url(),
            watch_base_url: default_watch_base_url(),
            default_client_id: default_client_id(),
        }
    }
}

impl ScheduleConfig {
    pub fn timeout_check_interval(&self) -> Duration {
        Duration::from_millis(self.timeout_check_interval_ms.max(1))
    }

    pub fn catalog_refresh_interval(&self) -> Duration {
        Duration::from_secs(self.catalog_refresh_interval_secs.max(1))
    }
}

fn default_party_file() -> PathBuf {
    platform::data_dir().join("db.json")
}

fn default_credentials_file() -> PathBuf {
    platform::data_dir().join("credentials.json")
}

fn default_bind_address() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    platform::DEFAULT_HTTP_PORT
}

fn default_timeout_check_interval_ms() -> u64 {
    100
}

fn default_catalog_refresh_interval_secs() -> u64 {
    30
}

fn default_discard_empty_fetch() -> bool {
    true
}

fn default_api_base() -> String {
    "https://api.twitch.tv/helix".to_string()
}

fn default_validate_url() -> String {
    "https://id.twitch.tv/oauth2/validate".to_string()
}

fn default_watch_base_url() -> String {
    "https://twitch.tv".to_string()
}

fn default_client_id() -> String {
    "6mpwge1p7z0yxjsibbbupjuepqhqe2".to_string()
}

impl Config {
    pub fn load() -> anyhow::Result<Self> {
        Self::load_from(&Self::config_path())
    }

    /// Read settings from `path`, writing the defaults there first when the
    /// file does not exist yet.
    pub fn load_from(path: &Path) -> anyhow::Result<Self> {
        if !path.exists() {
            let config = Self::default();
            config.save_to(path)?;
            return Ok(config);
        }

        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }

    pub fn save_to(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn config_path() -> PathBuf {
        platform::config_dir().join("config.toml")
    }
}
