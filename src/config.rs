use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::info;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub general: GeneralConfig,

    pub server: ServerConfig,

    pub observability: ObservabilityConfig,

    pub security: SecurityConfig,

    pub roster: RosterConfig,

    pub two_factor: TwoFactorConfig,

    pub watchdog: WatchdogConfig,

    pub frontend: FrontendConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    pub database_path: String,

    pub log_level: String,

    #[serde(default)]
    pub suppress_connection_errors: bool,

    /// Event bus buffer size (default: 256)
    pub event_bus_buffer_size: usize,

    /// Number of tokio worker threads (default: 2)
    /// Set to 0 to use the number of CPU cores
    pub worker_threads: usize,

    /// Maximum database connections (default: 5)
    pub max_db_connections: u32,

    /// Minimum database connections (default: 1)
    pub min_db_connections: u32,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            database_path: "sqlite:data/chime.db".to_string(),
            log_level: "info".to_string(),
            suppress_connection_errors: false,
            event_bus_buffer_size: 256,
            worker_threads: 2,
            max_db_connections: 5,
            min_db_connections: 1,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub enabled: bool,

    pub host: String,

    pub port: u16,

    /// Shared key the frontend adapter must send in `X-Api-Key`.
    /// When unset, the API accepts unauthenticated requests (local dev only).
    pub api_key: Option<String>,

    pub cors_allowed_origins: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            host: "127.0.0.1".to_string(),
            port: 7171,
            api_key: None,
            cors_allowed_origins: vec![
                "http://localhost:7171".to_string(),
                "http://127.0.0.1:7171".to_string(),
            ],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    pub metrics_enabled: bool,

    pub loki_enabled: bool,

    pub loki_url: String,

    pub loki_labels: std::collections::HashMap<String, String>,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        let mut labels = std::collections::HashMap::new();
        labels.insert("app".to_string(), "chime".to_string());

        Self {
            metrics_enabled: false,
            loki_enabled: false,
            loki_url: "http://localhost:3100".to_string(),
            loki_labels: labels,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SecurityConfig {
    /// Argon2 memory cost in KiB (default: 8192 = 8MB)
    pub argon2_memory_cost_kib: u32,

    /// Argon2 time cost (iterations)
    pub argon2_time_cost: u32,

    /// Argon2 parallelism (default: 1)
    pub argon2_parallelism: u32,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            argon2_memory_cost_kib: 8192,
            argon2_time_cost: 3,
            argon2_parallelism: 1,
        }
    }
}

/// External role roster. Synced into the users table at startup; grants happen
/// once per listed chat id, never revocations.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct RosterConfig {
    pub admins: Vec<i64>,

    pub curators: Vec<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TwoFactorConfig {
    /// Issuer shown in authenticator apps and provisioning URIs.
    pub issuer: String,
}

impl Default for TwoFactorConfig {
    fn default() -> Self {
        Self {
            issuer: "chime".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WatchdogConfig {
    pub enabled: bool,

    /// Warnings strictly above this count inside the window trip a restart.
    pub threshold: usize,

    /// Sliding window length in seconds.
    pub window_seconds: u64,
}

impl Default for WatchdogConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            threshold: 20,
            window_seconds: 600,
        }
    }
}

impl WatchdogConfig {
    /// Environment wins over the config file. Read once at startup.
    fn apply_env_overrides(&mut self) {
        if let Ok(value) = std::env::var("WARNING_RESTART_ENABLED")
            && let Some(enabled) = parse_bool_flag(&value)
        {
            self.enabled = enabled;
        }

        if let Ok(value) = std::env::var("WARNING_RESTART_THRESHOLD")
            && let Ok(threshold) = value.trim().parse()
        {
            self.threshold = threshold;
        }

        if let Ok(value) = std::env::var("WARNING_RESTART_WINDOW_SECONDS")
            && let Ok(window) = value.trim().parse()
        {
            self.window_seconds = window;
        }
    }
}

fn parse_bool_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FrontendConfig {
    /// Base URL of the chat frontend adapter. When unset, disclosure deletion
    /// degrades to a logged no-op.
    pub base_url: Option<String>,

    /// Request timeout in seconds (default: 10)
    pub request_timeout_seconds: u32,
}

impl Default for FrontendConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            request_timeout_seconds: 10,
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        let paths = Self::config_paths();

        for path in &paths {
            if path.exists() {
                info!("Loading config from: {}", path.display());
                let mut config = Self::load_from_path(path)?;
                config.watchdog.apply_env_overrides();
                return Ok(config);
            }
        }

        info!("No config file found, using defaults");
        let mut config = Self::default();
        config.watchdog.apply_env_overrides();
        Ok(config)
    }

    /// Load from an explicit path when given, otherwise walk the default
    /// lookup chain. Watchdog env overrides are applied either way.
    pub fn load_with_override(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => {
                info!("Loading config from: {}", path.display());
                let mut config = Self::load_from_path(path)?;
                config.watchdog.apply_env_overrides();
                Ok(config)
            }
            None => Self::load(),
        }
    }

    pub fn load_from_path(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Self = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    pub fn save_to_path(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        info!("Config saved to: {}", path.display());
        Ok(())
    }

    fn config_paths() -> Vec<PathBuf> {
        let mut paths = vec![];

        if let Ok(env_path) = std::env::var("CHIME_CONFIG") {
            paths.push(PathBuf::from(env_path));
        }

        paths.push(PathBuf::from("config.toml"));

        if let Some(config_dir) = dirs::config_dir() {
            paths.push(config_dir.join("chime").join("config.toml"));
        }

        if let Some(home) = dirs::home_dir() {
            paths.push(home.join(".chime").join("config.toml"));
        }

        paths
    }

    fn default_config_path() -> PathBuf {
        PathBuf::from("config.toml")
    }

    pub fn create_default_if_missing() -> Result<bool> {
        let path = Self::default_config_path();
        if path.exists() {
            Ok(false)
        } else {
            let config = Self::default();
            config.save_to_path(&path)?;
            info!("Created default config file: {}", path.display());
            Ok(true)
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.general.max_db_connections == 0 {
            anyhow::bail!("max_db_connections must be > 0");
        }

        if self.general.min_db_connections > self.general.max_db_connections {
            anyhow::bail!("min_db_connections cannot exceed max_db_connections");
        }

        if self.watchdog.enabled && self.watchdog.threshold == 0 {
            anyhow::bail!("Watchdog threshold must be > 0 when enabled");
        }

        if self.watchdog.enabled && self.watchdog.window_seconds == 0 {
            anyhow::bail!("Watchdog window must be > 0 when enabled");
        }

        if self.two_factor.issuer.is_empty() {
            anyhow::bail!("Two-factor issuer cannot be empty");
        }

        for chat_id in self.roster.admins.iter().chain(&self.roster.curators) {
            if *chat_id <= 0 {
                anyhow::bail!("Roster chat ids must be positive, got {chat_id}");
            }
        }

        for chat_id in &self.roster.admins {
            if self.roster.curators.contains(chat_id) {
                anyhow::bail!("Chat id {chat_id} is listed as both admin and curator");
            }
        }

        if let Some(url) = &self.frontend.base_url
            && url.is_empty()
        {
            anyhow::bail!("Frontend base_url cannot be an empty string");
        }

        Ok(())
    }
}
