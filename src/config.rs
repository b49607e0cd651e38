use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};

/// Main configuration structure
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub vk: VkConfig,
    pub files: FilesConfig,
    pub database: DatabaseConfig,
    #[serde(default)]
    pub sync: SyncConfig,
    #[serde(default)]
    pub posting: PostingConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct VkConfig {
    /// REST API endpoint, methods are appended as path segments
    #[serde(default = "default_api_url")]
    pub api_url: String,
    /// API version sent as `v` with every call
    #[serde(default = "default_api_version")]
    pub api_version: String,
    /// User access token with `photos,wall,groups` scope
    pub access_token: String,
    /// Community photos are mirrored from
    pub src_group_id: i64,
    /// Community photos are posted to
    pub dst_group_id: i64,
    /// Upper bound on API calls per second (VK allows 3)
    #[serde(default = "default_requests_per_second")]
    pub requests_per_second: u32,
    /// Retries on "too many requests" responses
    #[serde(default = "default_max_retries")]
    pub max_retries: u8,
}

fn default_api_url() -> String {
    "https://api.vk.com/method".to_string()
}

fn default_api_version() -> String {
    "5.62".to_string()
}

fn default_requests_per_second() -> u32 {
    3
}

fn default_max_retries() -> u8 {
    3
}

#[derive(Debug, Clone, Deserialize)]
pub struct FilesConfig {
    /// Root directory mirrored photos are stored under
    pub images_path: PathBuf,
    /// PNG overlay composited onto every photo
    pub watermark_path: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// PostgreSQL connection URL
    pub url: String,
    /// Maximum connections in pool
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_max_connections() -> u32 {
    5
}

#[derive(Debug, Clone, Deserialize)]
pub struct SyncConfig {
    /// Where photos are loaded from: "album", "wall" or "all"
    #[serde(default = "default_source")]
    pub source: String,
    /// Seconds between synchronize-and-mark passes
    #[serde(default = "default_sync_period")]
    pub period_secs: u64,
    /// Minimum spacing between photo downloads in milliseconds
    #[serde(default = "default_download_interval")]
    pub download_interval_ms: u64,
}

fn default_source() -> String {
    "album".to_string()
}

fn default_sync_period() -> u64 {
    86_400
}

fn default_download_interval() -> u64 {
    330
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            source: default_source(),
            period_secs: default_sync_period(),
            download_interval_ms: default_download_interval(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PostingConfig {
    /// Seconds between random posts (one day spread over 50 posts)
    #[serde(default = "default_posting_period")]
    pub period_secs: u64,
    /// Raw filters applied when picking photos to post
    #[serde(default)]
    pub filters: Map<String, Value>,
}

fn default_posting_period() -> u64 {
    86_400 / 50
}

impl Default for PostingConfig {
    fn default() -> Self {
        Self {
            period_secs: default_posting_period(),
            filters: Map::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Level of this crate's own targets; dependencies log at info
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Enable JSON formatted logs
    #[serde(default)]
    pub json: bool,
}

fn default_log_level() -> String {
    "debug".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

impl AppConfig {
    /// Load configuration from files and environment
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from("config")
    }

    /// Load configuration from a specific directory
    pub fn load_from<P: AsRef<Path>>(config_dir: P) -> Result<Self, ConfigError> {
        let config_dir = config_dir.as_ref();

        let builder = Config::builder()
            .set_default("logging.level", "debug")?
            .set_default("logging.json", false)?
            .set_default("database.max_connections", 5)?
            .add_source(File::from(config_dir.join("default.toml")).required(false))
            // Environment-specific overrides (e.g., config/production.toml)
            .add_source(
                File::from(config_dir.join(
                    std::env::var("VKC_ENV").unwrap_or_else(|_| "development".to_string()),
                ))
                .required(false),
            )
            // VKC_VK__ACCESS_TOKEN, VKC_DATABASE__URL, ...
            .add_source(
                Environment::with_prefix("VKC")
                    .separator("__")
                    .try_parsing(true),
            );

        builder.build()?.try_deserialize()
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.vk.access_token.trim().is_empty() {
            errors.push("vk.access_token must be set".to_string());
        }

        if self.vk.src_group_id <= 0 || self.vk.dst_group_id <= 0 {
            errors.push("vk group ids must be positive community ids".to_string());
        }

        if self.vk.requests_per_second == 0 {
            errors.push("vk.requests_per_second must be positive".to_string());
        }

        if !matches!(self.sync.source.as_str(), "album" | "wall" | "all") {
            errors.push(format!(
                "sync.source must be one of album, wall, all; got {}",
                self.sync.source
            ));
        }

        if self.sync.period_secs == 0 || self.posting.period_secs == 0 {
            errors.push("periods must be positive".to_string());
        }

        if let Err(e) = crate::domain::check_filters(&self.posting.filters) {
            errors.push(format!("posting.filters: {e}"));
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}
