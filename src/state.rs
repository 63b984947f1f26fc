use std::sync::Arc;

use sqlx::SqlitePool;

use crate::{cache::Cache, config::ServerConfig, storage::StorageClient};

/// Shared application state handed to every request handler. All durable
/// state lives in the database or the cache; handlers themselves are
/// stateless.
#[derive(Clone)]
pub struct AppState {
    pub db: SqlitePool,
    pub cache: Cache,
    pub storage: StorageClient,
    pub config: Arc<ServerConfig>,
}

impl AppState {
    pub fn new(db: SqlitePool, cache: Cache, config: ServerConfig) -> Self {
        let storage = StorageClient::new(&config.storage);
        Self {
            db,
            cache,
            storage,
            config: Arc::new(config),
        }
    }
}
