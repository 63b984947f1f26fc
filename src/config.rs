use std::path::Path;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Redis connection string; `None` falls back to the in-process cache,
    /// for development and tests.
    pub redis_url: Option<String>,
    /// Secret for signing access/refresh tokens. Overridden by the
    /// `JWT_SECRET` environment variable when set.
    pub jwt_secret: String,
    pub access_token_minutes: i64,
    pub refresh_token_days: i64,
    /// Referrers allowed to request signed media URLs; empty allows any.
    pub allowed_referrers: Vec<String>,
    /// Where a student without any approved enrollment is sent instead of
    /// the lecture list.
    pub landing_url: String,
    pub storage: StorageConfig,
}

/// Connection facts for the external object store that holds thumbnails,
/// materials, videos and assignment files.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub endpoint: String,
    pub bucket: String,
    pub access_key: String,
    pub secret_key: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
            redis_url: Some("redis://127.0.0.1:6379".to_string()),
            jwt_secret: String::new(),
            access_token_minutes: 30,
            refresh_token_days: 14,
            allowed_referrers: Vec::new(),
            landing_url: "https://dummy-landing-page.com".to_string(),
            storage: StorageConfig::default(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            endpoint: "https://kr.object.example.com".to_string(),
            bucket: "course-media".to_string(),
            access_key: String::new(),
            secret_key: String::new(),
        }
    }
}

impl ServerConfig {
    /// Load from a TOML file, falling back to defaults when the file is
    /// absent; `JWT_SECRET` from the environment wins over the file value.
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let mut config = if path.exists() {
            toml::from_str::<ServerConfig>(&std::fs::read_to_string(path)?)?
        } else {
            tracing::warn!("config file {} not found, using defaults", path.display());
            ServerConfig::default()
        };
        let _ = dotenvy::dotenv();
        if let Ok(secret) = dotenvy::var("JWT_SECRET") {
            config.jwt_secret = secret;
        }
        if config.jwt_secret.is_empty() {
            anyhow::bail!("jwt_secret is not set (config file or JWT_SECRET env)");
        }
        Ok(config)
    }
}
