use thiserror::Error;

/// Main error type for the community bot
#[derive(Error, Debug)]
pub enum CommunityError {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    // Database errors
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    // Network errors
    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("VK API error {code}: {message}")]
    VkApi { code: i64, message: String },

    #[error("Rate limited: {0}")]
    RateLimited(String),

    #[error("Download failed: {0}")]
    Download(String),

    // Serialization errors
    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid VK payload: {0}")]
    InvalidPayload(String),

    // Filter errors
    #[error("Invalid filters: {0}")]
    Filter(#[from] FilterError),

    // Validation errors
    #[error("Validation failed: {0}")]
    Validation(String),

    // Image errors
    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    // IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // Generic errors
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

/// Result type alias for CommunityError
pub type Result<T> = std::result::Result<T, CommunityError>;

/// Errors raised while coercing loosely typed filter parameters
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FilterError {
    /// The value has an acceptable type but an unacceptable value
    #[error("'{key}' filter parameter has invalid value {value}: {reason}")]
    InvalidValue {
        key: String,
        value: String,
        reason: String,
    },

    /// The value has a type the parameter never accepts
    #[error("'{key}' filter parameter should be {expected}, got {value}")]
    InvalidType {
        key: String,
        expected: &'static str,
        value: String,
    },
}

impl FilterError {
    pub fn key(&self) -> &str {
        match self {
            FilterError::InvalidValue { key, .. } | FilterError::InvalidType { key, .. } => key,
        }
    }

    pub fn is_type_error(&self) -> bool {
        matches!(self, FilterError::InvalidType { .. })
    }
}
