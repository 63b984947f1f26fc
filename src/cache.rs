use std::time::{Duration, Instant};

use moka::future::Cache as MokaCache;
use redis::aio::{ConnectionManager, ConnectionManagerConfig};

use crate::error::AppError;

/// TTL for listings derived from a parent entity (`assignments_*`,
/// `lecture_chapters:*`). One policy for all of them.
pub const LISTING_TTL: Duration = Duration::from_secs(5 * 60 * 60);
/// TTL for the per-student lecture list with computed progress rates.
pub const STUDENT_LECTURES_TTL: Duration = Duration::from_secs(60 * 60);
/// TTL for signed media URLs, matching the URL's own expiry.
pub const SIGNED_URL_TTL: Duration = Duration::from_secs(120);
pub const VERIFICATION_CODE_TTL: Duration = Duration::from_secs(300);
pub const VERIFIED_EMAIL_TTL: Duration = Duration::from_secs(60 * 60);
pub const EMAIL_RATE_LIMIT_TTL: Duration = Duration::from_secs(60);

/// Cache key layout. Kept together so the whole namespace is visible in one
/// place.
pub mod keys {
    pub fn assignments(lecture_chapter_id: i64) -> String {
        format!("assignments_{lecture_chapter_id}")
    }
    pub fn lecture_chapters(lecture_id: i64) -> String {
        format!("lecture_chapters:{lecture_id}")
    }
    pub fn student_lectures(student_id: i64) -> String {
        format!("student_{student_id}_lectures")
    }
    pub fn verified_email(email: &str) -> String {
        format!("verified_email_{email}")
    }
    pub fn email_verification(email: &str) -> String {
        format!("email_verification_{email}")
    }
    pub fn email_request_limit(email: &str) -> String {
        format!("email_request_limit_{email}")
    }
    pub fn signed_url(chapter_video_id: i64) -> String {
        format!("signed_url:{chapter_video_id}")
    }
    pub fn refresh_blacklist(jti: &str) -> String {
        format!("refresh_blacklist_{jti}")
    }
}

struct PerEntryTtl;

impl moka::Expiry<String, (String, Duration)> for PerEntryTtl {
    fn expire_after_create(
        &self,
        _key: &String,
        value: &(String, Duration),
        _created_at: Instant,
    ) -> Option<Duration> {
        Some(value.1)
    }
}

/// Key-value cache handle, constructed once at startup and injected through
/// application state. The store is non-authoritative: entries may be stale
/// until invalidated or expired, and every mutation of a cached entity is
/// responsible for deleting the dependent keys.
#[derive(Clone)]
pub enum Cache {
    Redis(ConnectionManager),
    /// In-process fallback used by tests and cache-less deployments.
    Memory(MokaCache<String, (String, Duration)>),
}

impl Cache {
    pub async fn redis(url: &str) -> anyhow::Result<Self> {
        let config = ConnectionManagerConfig::new()
            .set_number_of_retries(1)
            .set_connection_timeout(Some(Duration::from_millis(500)));
        let client = redis::Client::open(url)?;
        let manager = client.get_connection_manager_with_config(config).await?;
        Ok(Cache::Redis(manager))
    }

    pub fn memory() -> Self {
        let cache = MokaCache::builder()
            .max_capacity(100_000)
            .expire_after(PerEntryTtl)
            .build();
        Cache::Memory(cache)
    }

    pub async fn get(&self, key: &str) -> Result<Option<String>, AppError> {
        match self {
            Cache::Redis(manager) => {
                let mut conn = manager.clone();
                let value: Option<String> = redis::cmd("GET")
                    .arg(key)
                    .query_async(&mut conn)
                    .await
                    .map_err(anyhow::Error::from)?;
                Ok(value)
            }
            Cache::Memory(cache) => Ok(cache.get(key).await.map(|(value, _)| value)),
        }
    }

    pub async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<(), AppError> {
        match self {
            Cache::Redis(manager) => {
                let mut conn = manager.clone();
                let _: () = redis::cmd("SETEX")
                    .arg(key)
                    .arg(ttl.as_secs().max(1))
                    .arg(value)
                    .query_async(&mut conn)
                    .await
                    .map_err(anyhow::Error::from)?;
                Ok(())
            }
            Cache::Memory(cache) => {
                cache
                    .insert(key.to_string(), (value.to_string(), ttl))
                    .await;
                Ok(())
            }
        }
    }

    pub async fn del(&self, key: &str) -> Result<(), AppError> {
        match self {
            Cache::Redis(manager) => {
                let mut conn = manager.clone();
                let _: () = redis::cmd("DEL")
                    .arg(key)
                    .query_async(&mut conn)
                    .await
                    .map_err(anyhow::Error::from)?;
                Ok(())
            }
            Cache::Memory(cache) => {
                cache.invalidate(key).await;
                Ok(())
            }
        }
    }

    pub async fn exists(&self, key: &str) -> Result<bool, AppError> {
        Ok(self.get(key).await?.is_some())
    }
}
