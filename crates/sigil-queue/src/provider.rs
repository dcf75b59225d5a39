//! Queue store selection from configuration.

use std::sync::Arc;

use tracing::info;

use sigil_core::config::queue::QueueConfig;
use sigil_core::error::AppError;
use sigil_core::result::AppResult;

use crate::store::QueueStore;

/// Connect the backing store named by `config.backend`.
///
/// The returned handle is owned by the process lifecycle and shared by
/// every watcher, worker, and scheduler through [`crate::JobQueue`].
pub async fn connect(config: &QueueConfig) -> AppResult<Arc<dyn QueueStore>> {
    let store: Arc<dyn QueueStore> = match config.backend.as_str() {
        #[cfg(feature = "redis-backend")]
        "redis" => {
            info!("Initializing Redis queue store");
            let client = crate::redis::RedisClient::connect(&config.redis).await?;
            Arc::new(crate::redis::RedisQueueStore::new(
                client,
                config.wait_poll_interval_ms,
            ))
        }
        #[cfg(feature = "memory")]
        "memory" => {
            info!("Initializing in-memory queue store");
            Arc::new(crate::memory::MemoryQueueStore::new())
        }
        other => {
            return Err(AppError::configuration(format!(
                "Unknown queue backend: '{other}'. Supported: memory, redis"
            )));
        }
    };

    Ok(store)
}
