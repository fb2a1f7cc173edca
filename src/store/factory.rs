//! Store backend selection.

use anyhow::Result;

use crate::config::{CacheType, Config};

use super::{MemoryStore, PersistentStore, SharedStore};

/// Create the store backend named by `cache_type`.
///
/// `boltdb` selects the durable fjall keyspace at `db_path`; `redis`
/// selects the volatile in-memory backend (see DESIGN.md on why the
/// remote cache is rendered in-process).
pub fn create_store(config: &Config) -> Result<SharedStore> {
    match config.cache_type {
        CacheType::Boltdb => {
            tracing::info!(path = %config.db_path.display(), "using durable store");
            Ok(PersistentStore::open(&config.db_path)? as SharedStore)
        }
        CacheType::Redis => {
            if config.redis_host.is_some() {
                tracing::warn!("redis_host is set but the redis cache runs in-process; ignoring");
            }
            tracing::info!("using volatile in-memory store");
            Ok(std::sync::Arc::new(MemoryStore::new()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{LogKind, MessageRecord};
    use tempfile::TempDir;

    #[test]
    fn default_backend_is_durable() {
        let dir = TempDir::new().unwrap();
        let mut config = Config::sample();
        config.db_path = dir.path().join("cmpp.db");

        let store = create_store(&config).unwrap();
        store
            .append_outbound(&MessageRecord::outbound("", "13800138000", "hi"))
            .unwrap();
        assert_eq!(store.count(LogKind::Outbound).unwrap(), 1);
    }

    #[test]
    fn redis_flag_selects_memory_backend() {
        let mut config = Config::sample();
        config.cache_type = CacheType::Redis;

        let store = create_store(&config).unwrap();
        assert_eq!(store.count(LogKind::Outbound).unwrap(), 0);
    }
}
