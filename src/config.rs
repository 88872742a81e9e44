//! Configuration loading and management.
//!
//! Loads Gridlot configuration from `./gridlot.toml` (or `$GRIDLOT_CONFIG_PATH`).
//! Environment variables override file values; file values override defaults.
//!
//! Precedence: env vars > config file > defaults.

use std::path::PathBuf;

use anyhow::{Context, Result};
use serde::Deserialize;

// ── Top-level config ────────────────────────────────────────────

/// Top-level Gridlot configuration loaded from TOML.
///
/// Path: `./gridlot.toml` or `$GRIDLOT_CONFIG_PATH`.
/// Env vars override file values; file values override defaults.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct GridlotConfig {
    /// Canvas geometry and pricing defaults (`[canvas]`).
    pub canvas: CanvasConfig,
    /// SQLite database location (`[database]`).
    pub database: DatabaseConfig,
    /// Moderation pipeline and provider settings (`[moderation]`).
    pub moderation: ModerationConfig,
    /// Object storage location (`[storage]`).
    pub storage: StorageConfig,
    /// Logging settings (`[logging]`).
    pub logging: LoggingConfig,
}

impl GridlotConfig {
    /// Load configuration with precedence: env vars > TOML file > defaults.
    ///
    /// Config file path: `$GRIDLOT_CONFIG_PATH` or `./gridlot.toml`.
    /// If the file does not exist, returns defaults.
    pub fn load() -> Result<Self> {
        let mut config = Self::load_from_file()?;
        config.apply_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Load from TOML file only, no env overrides.
    fn load_from_file() -> Result<Self> {
        let path = Self::config_path();
        match std::fs::read_to_string(&path) {
            Ok(contents) => {
                tracing::info!(path = %path.display(), "loading config from file");
                let config: GridlotConfig =
                    toml::from_str(&contents).context("failed to parse config TOML")?;
                Ok(config)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!("no config file found, using defaults");
                Ok(GridlotConfig::default())
            }
            Err(e) => Err(anyhow::anyhow!("failed to read config file: {e}")),
        }
    }

    /// Resolve config file path: `$GRIDLOT_CONFIG_PATH`, then `./gridlot.toml`.
    fn config_path() -> PathBuf {
        Self::config_path_with(|key| std::env::var(key).ok())
    }

    /// Resolve config path using a custom env resolver (for testing).
    fn config_path_with(env: impl Fn(&str) -> Option<String>) -> PathBuf {
        if let Some(p) = env("GRIDLOT_CONFIG_PATH") {
            return PathBuf::from(p);
        }
        PathBuf::from("gridlot.toml")
    }

    /// Apply environment variable overrides (env > config > defaults).
    ///
    /// Takes a resolver function for testability (avoids `set_var` in tests).
    fn apply_overrides(&mut self, env: impl Fn(&str) -> Option<String>) {
        fn parse_into<T: std::str::FromStr>(slot: &mut T, var: &'static str, value: &str) {
            match value.parse() {
                Ok(n) => *slot = n,
                Err(_) => {
                    tracing::warn!(var, value, "ignoring invalid env override");
                }
            }
        }

        // Canvas.
        if let Some(v) = env("GRIDLOT_CANVAS_WIDTH") {
            parse_into(&mut self.canvas.width, "GRIDLOT_CANVAS_WIDTH", &v);
        }
        if let Some(v) = env("GRIDLOT_CANVAS_HEIGHT") {
            parse_into(&mut self.canvas.height, "GRIDLOT_CANVAS_HEIGHT", &v);
        }
        if let Some(v) = env("GRIDLOT_MIN_UNIT") {
            parse_into(&mut self.canvas.min_unit, "GRIDLOT_MIN_UNIT", &v);
        }
        if let Some(v) = env("GRIDLOT_DEFAULT_PRICE_CENTS") {
            parse_into(
                &mut self.canvas.default_price_per_unit_cents,
                "GRIDLOT_DEFAULT_PRICE_CENTS",
                &v,
            );
        }

        // Database.
        if let Some(v) = env("GRIDLOT_DB_PATH") {
            self.database.path = v;
        }

        // Moderation.
        if let Some(v) = env("GRIDLOT_CHECKER_TIMEOUT_SECS") {
            parse_into(
                &mut self.moderation.checker_timeout_secs,
                "GRIDLOT_CHECKER_TIMEOUT_SECS",
                &v,
            );
        }
        if let Some(v) = env("GRIDLOT_MAX_IMAGE_BYTES") {
            parse_into(
                &mut self.moderation.max_image_bytes,
                "GRIDLOT_MAX_IMAGE_BYTES",
                &v,
            );
        }

        // Providers — env var presence creates the endpoint.
        if let Some(base_url) = env("GRIDLOT_IMAGE_POLICY_URL") {
            let api_key = env("GRIDLOT_IMAGE_POLICY_KEY").unwrap_or_default();
            self.moderation.image_policy = Some(ProviderEndpoint { base_url, api_key });
        }
        if let Some(base_url) = env("GRIDLOT_VISION_URL") {
            let api_key = env("GRIDLOT_VISION_KEY").unwrap_or_default();
            self.moderation.vision = Some(ProviderEndpoint { base_url, api_key });
        }

        // Storage.
        if let Some(v) = env("GRIDLOT_OBJECTS_DIR") {
            self.storage.objects_dir = v;
        }

        // Logging.
        if let Some(v) = env("GRIDLOT_LOGS_DIR") {
            self.logging.logs_dir = v;
        }
        if let Some(v) = env("GRIDLOT_LOG_LEVEL") {
            self.logging.level = v;
        }
    }
}

// ── Sections ────────────────────────────────────────────────────

/// Canvas geometry and default pricing.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CanvasConfig {
    /// Canvas width in grid units.
    pub width: u32,
    /// Canvas height in grid units.
    pub height: u32,
    /// Minimum reservation unit; dimensions must be positive multiples of it.
    pub min_unit: u32,
    /// Default price per grid unit in cents, used when no pricing zone matches.
    pub default_price_per_unit_cents: i64,
}

impl Default for CanvasConfig {
    fn default() -> Self {
        Self {
            width: 1000,
            height: 1000,
            min_unit: 10,
            default_price_per_unit_cents: 100,
        }
    }
}

/// SQLite database location.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Path to the SQLite database file.
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: "gridlot.db".to_owned(),
        }
    }
}

/// Moderation pipeline settings and provider endpoints.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ModerationConfig {
    /// Per-checker timeout in seconds; a checker that exceeds it fails open.
    pub checker_timeout_secs: u64,
    /// Maximum accepted image payload in bytes.
    pub max_image_bytes: usize,
    /// Minimum label confidence (0–100 scale on the wire) to report a detection.
    pub min_label_confidence: f64,
    /// Image policy classification provider; checker is skipped when absent.
    pub image_policy: Option<ProviderEndpoint>,
    /// Vision provider (label detection + text extraction); checkers are
    /// skipped when absent.
    pub vision: Option<ProviderEndpoint>,
}

impl Default for ModerationConfig {
    fn default() -> Self {
        Self {
            checker_timeout_secs: 10,
            max_image_bytes: 5 * 1024 * 1024,
            min_label_confidence: 60.0,
            image_policy: None,
            vision: None,
        }
    }
}

/// An HTTP provider endpoint with bearer credentials.
#[derive(Debug, Clone, Deserialize)]
pub struct ProviderEndpoint {
    /// Base URL of the provider API.
    pub base_url: String,
    /// API key sent as a bearer token.
    pub api_key: String,
}

/// Object storage location.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Directory root for stored image objects.
    pub objects_dir: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            objects_dir: "objects".to_owned(),
        }
    }
}

/// Logging settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Directory for rotated JSON log files.
    pub logs_dir: String,
    /// Default log level when `RUST_LOG` is unset.
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            logs_dir: "logs".to_owned(),
            level: "info".to_owned(),
        }
    }
}
