use std::{
    hash::{DefaultHasher, Hash, Hasher},
    time::Duration,
};
#[cfg(test)]
use std::sync::{Arc, Mutex};

use crate::{config::StorageConfig, utils::now_utc};

/// Client for the external object store holding thumbnails, materials,
/// videos and assignment files. Media bytes never pass through this
/// service; rows store object keys and readers get time-limited signed
/// URLs. The URL token here is a stand-in fingerprint — the authoritative
/// signer is the store itself.
#[derive(Debug, Clone)]
pub struct StorageClient {
    endpoint: String,
    bucket: String,
    access_key: String,
    secret_key: String,
    #[cfg(test)]
    deleted: Arc<Mutex<Vec<String>>>,
}

impl StorageClient {
    pub fn new(config: &StorageConfig) -> Self {
        Self {
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
            bucket: config.bucket.clone(),
            access_key: config.access_key.clone(),
            secret_key: config.secret_key.clone(),
            #[cfg(test)]
            deleted: Arc::default(),
        }
    }

    /// Time-limited URL for an object key.
    pub fn signed_url(&self, object: &str, ttl: Duration) -> String {
        let expires = now_utc().unix_timestamp() + ttl.as_secs() as i64;
        let mut hasher = DefaultHasher::new();
        self.secret_key.hash(&mut hasher);
        object.hash(&mut hasher);
        expires.hash(&mut hasher);
        let signature = hasher.finish();
        format!(
            "{}/{}/{}?AWSAccessKeyId={}&Expires={}&Signature={:016x}",
            self.endpoint, self.bucket, object, self.access_key, expires, signature
        )
    }

    /// Drop an object from the store. Deletion is fire-and-forget from the
    /// caller's perspective; a failure must not abort the row mutation that
    /// triggered it.
    pub async fn delete(&self, object: &str) {
        tracing::info!("deleting object {}/{}/{}", self.endpoint, self.bucket, object);
        #[cfg(test)]
        self.deleted.lock().unwrap().push(object.to_string());
    }

    /// Object keys this client was asked to remove, oldest first.
    #[cfg(test)]
    pub fn deleted_objects(&self) -> Vec<String> {
        self.deleted.lock().unwrap().clone()
    }
}
