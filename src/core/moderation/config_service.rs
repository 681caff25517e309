// Config service - per-group moderation settings over a shared default.
//
// Reads are synchronous (everything is cached in memory after `load`), so the
// per-message hot path never touches storage. Every mutation is persisted
// before the in-memory copy is replaced.

use super::keyed_locks::KeyedLocks;
use super::moderation_models::GroupConfig;
use super::moderation_ports::{ConfigRepository, ModerationError};
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;

pub struct ConfigService {
    repository: Arc<dyn ConfigRepository>,
    defaults: GroupConfig,
    overrides: DashMap<u64, GroupConfig>,
    write_locks: KeyedLocks<u64>,
}

impl ConfigService {
    pub fn new(repository: Arc<dyn ConfigRepository>, defaults: GroupConfig) -> Self {
        Self {
            repository,
            defaults,
            overrides: DashMap::new(),
            write_locks: KeyedLocks::new(),
        }
    }

    /// Load every stored override. A malformed override is logged and the
    /// group falls back to the defaults.
    pub async fn load(&self) -> Result<usize, ModerationError> {
        let stored = self.repository.load_overrides().await?;
        let mut loaded = 0;
        for (group_id, raw) in stored {
            match serde_json::from_str::<GroupConfig>(&raw) {
                Ok(config) => match config.validate() {
                    Ok(()) => {
                        self.overrides.insert(group_id, config);
                        loaded += 1;
                    }
                    Err(reason) => tracing::warn!(
                        group_id,
                        "Stored moderation config is invalid ({}), using defaults",
                        reason
                    ),
                },
                Err(e) => tracing::warn!(
                    group_id,
                    "Stored moderation config is malformed ({}), using defaults",
                    e
                ),
            }
        }
        Ok(loaded)
    }

    /// Effective config for a group.
    pub fn get(&self, group_id: u64) -> GroupConfig {
        self.overrides
            .get(&group_id)
            .map(|c| c.clone())
            .unwrap_or_else(|| self.defaults.clone())
    }

    /// Longest warning decay configured for any group.
    pub fn max_warning_decay(&self) -> chrono::Duration {
        self.overrides
            .iter()
            .map(|c| c.warning_decay())
            .fold(self.defaults.warning_decay(), |a, b| a.max(b))
    }

    /// Longest toxicity quota period configured for any group.
    pub fn max_toxicity_period(&self) -> Duration {
        self.overrides
            .iter()
            .map(|c| c.toxicity_period())
            .fold(self.defaults.toxicity_period(), |a, b| a.max(b))
    }

    /// Apply `change` to a group's config, validate, persist, then activate.
    pub async fn update<F>(&self, group_id: u64, change: F) -> Result<GroupConfig, ModerationError>
    where
        F: FnOnce(&mut GroupConfig),
    {
        let _guard = self.write_locks.lock(&group_id).await;

        let mut config = self.get(group_id);
        change(&mut config);
        config
            .validate()
            .map_err(ModerationError::InvalidInput)?;

        self.repository.save_override(group_id, &config).await?;
        self.overrides.insert(group_id, config.clone());

        tracing::info!(group_id, "Moderation config updated");
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::moderation::test_support::MemoryStore;

    #[tokio::test]
    async fn test_unknown_group_gets_defaults() {
        let store = Arc::new(MemoryStore::new());
        let service = ConfigService::new(store, GroupConfig::default());
        assert_eq!(service.get(42), GroupConfig::default());
    }

    #[tokio::test]
    async fn test_update_persists_and_activates() {
        let store = Arc::new(MemoryStore::new());
        let service = ConfigService::new(store.clone(), GroupConfig::default());

        let updated = service
            .update(1, |c| {
                c.exempt_channels.insert(99);
            })
            .await
            .unwrap();

        assert!(updated.is_exempt(99));
        assert!(service.get(1).is_exempt(99));
        assert!(!service.get(2).is_exempt(99));

        // A fresh service over the same store sees the override
        let reloaded = ConfigService::new(store, GroupConfig::default());
        assert_eq!(reloaded.load().await.unwrap(), 1);
        assert!(reloaded.get(1).is_exempt(99));
    }

    #[tokio::test]
    async fn test_invalid_update_is_rejected() {
        let store = Arc::new(MemoryStore::new());
        let service = ConfigService::new(store, GroupConfig::default());

        let result = service.update(1, |c| c.burst_limit = 0).await;
        assert!(matches!(result, Err(ModerationError::InvalidInput(_))));
        assert_eq!(service.get(1).burst_limit, 5);
    }

    #[tokio::test]
    async fn test_failed_write_keeps_old_config() {
        let store = Arc::new(MemoryStore::new());
        store.fail_writes(true);
        let service = ConfigService::new(store, GroupConfig::default());

        let result = service.update(1, |c| c.mod_log_channel = Some(5)).await;
        assert!(matches!(result, Err(ModerationError::Persistence(_))));
        assert_eq!(service.get(1).mod_log_channel, None);
    }

    #[tokio::test]
    async fn test_malformed_override_falls_back_to_defaults() {
        let store = Arc::new(MemoryStore::new());
        store.put_raw_config(3, "{not json");
        let service = ConfigService::new(store, GroupConfig::default());

        assert_eq!(service.load().await.unwrap(), 0);
        assert_eq!(service.get(3), GroupConfig::default());
    }
}
