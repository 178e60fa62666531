pub mod cached;
pub mod postgres;
pub mod sqlite;
pub mod trait_def;


pub use cached::CachedStorage;
pub use postgres::PostgresStorage;
pub use sqlite::SqliteStorage;
pub use trait_def::{EventStream, Storage, StorageError, StorageResult};

use std::sync::Arc;

use anyhow::Result;
use tracing::info;

use crate::config::{Config, DatabaseBackend};

/// Open the configured backend behind the manifest cache and create its tables
pub async fn connect(config: &Config) -> Result<Arc<dyn Storage>> {
    let backend: Arc<dyn Storage> = match config.database.backend {
        DatabaseBackend::Sqlite => {
            info!("Using SQLite storage: {}", config.database.url);
            Arc::new(
                SqliteStorage::new(&config.database.url, config.database.max_connections).await?,
            )
        }
        DatabaseBackend::Postgres => {
            info!("Using PostgreSQL storage: {}", config.database.url);
            Arc::new(
                PostgresStorage::new(&config.database.url, config.database.max_connections)
                    .await?,
            )
        }
    };

    let storage: Arc<dyn Storage> = Arc::new(CachedStorage::new(
        backend,
        config.cache.manifest_capacity,
        config.cache.manifest_ttl_secs,
    ));

    storage.init().await?;
    Ok(storage)
}
