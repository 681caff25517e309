// Escalation engine - decaying warning counter per member.
//
// A member's warnings are a list of violation timestamps. The current count is
// the number of entries younger than the group's decay window; older entries
// are pruned on the next access, so decay is a view rather than a scheduled
// deletion. The engine only reports when the mute threshold is crossed; it
// never imposes anything itself.

use super::config_service::ConfigService;
use super::moderation_models::{EscalationState, MemberKey};
use super::moderation_ports::{ModerationError, WarningLedger};
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use std::collections::VecDeque;
use std::sync::Arc;

fn prune(entries: &mut VecDeque<DateTime<Utc>>, now: DateTime<Utc>, decay: Duration) {
    while let Some(oldest) = entries.front() {
        if now - *oldest >= decay {
            entries.pop_front();
        } else {
            break;
        }
    }
}

pub struct EscalationEngine {
    config: Arc<ConfigService>,
    ledger: Arc<dyn WarningLedger>,
    records: DashMap<MemberKey, VecDeque<DateTime<Utc>>>,
}

impl EscalationEngine {
    pub fn new(config: Arc<ConfigService>, ledger: Arc<dyn WarningLedger>) -> Self {
        Self {
            config,
            ledger,
            records: DashMap::new(),
        }
    }

    /// Rebuild warning lists from the audit ledger after a restart.
    pub async fn restore(&self, now: DateTime<Utc>) -> Result<usize, ModerationError> {
        let since = now - self.config.max_warning_decay();
        let entries = self.ledger.load_since(since).await?;
        let count = entries.len();
        for (member, at) in entries {
            self.records.entry(member).or_default().push_back(at);
        }
        for mut record in self.records.iter_mut() {
            record.make_contiguous().sort();
        }
        Ok(count)
    }

    /// Record a violation and return the member's warning count including it.
    pub async fn record_violation(&self, group_id: u64, user_id: u64, now: DateTime<Utc>) -> u32 {
        let decay = self.config.get(group_id).warning_decay();
        let count = {
            let mut entries = self.records.entry((group_id, user_id)).or_default();
            prune(&mut entries, now, decay);
            entries.push_back(now);
            entries.len() as u32
        };

        if let Err(e) = self.ledger.append(group_id, user_id, now).await {
            tracing::warn!(group_id, user_id, "Failed to write warning audit entry: {}", e);
        }
        count
    }

    /// Number of unexpired warnings.
    pub fn current_count(&self, group_id: u64, user_id: u64, now: DateTime<Utc>) -> u32 {
        let decay = self.config.get(group_id).warning_decay();
        match self.records.get_mut(&(group_id, user_id)) {
            Some(mut entries) => {
                prune(&mut entries, now, decay);
                entries.len() as u32
            }
            None => 0,
        }
    }

    pub fn state(&self, group_id: u64, user_id: u64, now: DateTime<Utc>) -> EscalationState {
        let threshold = self.config.get(group_id).warnings_before_mute;
        EscalationState::from_count(self.current_count(group_id, user_id, now), threshold)
    }

    /// Reset a member to Clean. The audit ledger is cleared first; if that
    /// fails the in-memory warnings are kept so a restart cannot resurrect
    /// them.
    pub async fn clear(&self, group_id: u64, user_id: u64) -> Result<(), ModerationError> {
        self.ledger.clear(group_id, user_id).await?;
        self.records.remove(&(group_id, user_id));
        Ok(())
    }

    /// Prune every list and drop the empty ones. Returns how many members were
    /// dropped.
    pub fn sweep_idle(&self, now: DateTime<Utc>) -> usize {
        let before = self.records.len();
        self.records.retain(|(group_id, _), entries| {
            prune(entries, now, self.config.get(*group_id).warning_decay());
            !entries.is_empty()
        });
        before.saturating_sub(self.records.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::moderation::moderation_models::GroupConfig;
    use crate::core::moderation::test_support::MemoryStore;

    fn engine(store: Arc<MemoryStore>) -> EscalationEngine {
        let config = Arc::new(ConfigService::new(
            store.clone(),
            GroupConfig {
                warning_decay_secs: 600,
                warnings_before_mute: 3,
                ..Default::default()
            },
        ));
        EscalationEngine::new(config, store)
    }

    fn at(secs: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000 + secs, 0).unwrap()
    }

    #[tokio::test]
    async fn test_warning_decays_after_window() {
        let engine = engine(Arc::new(MemoryStore::new()));
        assert_eq!(engine.record_violation(1, 2, at(0)).await, 1);

        assert_eq!(engine.current_count(1, 2, at(599)), 1);
        assert_eq!(engine.current_count(1, 2, at(601)), 0);
        // Once decayed it stays decayed
        assert_eq!(engine.current_count(1, 2, at(599)), 0);
    }

    #[tokio::test]
    async fn test_entry_at_exact_window_edge_is_expired() {
        let engine = engine(Arc::new(MemoryStore::new()));
        engine.record_violation(1, 2, at(0)).await;
        assert_eq!(engine.current_count(1, 2, at(600)), 0);
    }

    #[tokio::test]
    async fn test_state_machine_progression() {
        let engine = engine(Arc::new(MemoryStore::new()));
        assert_eq!(engine.state(1, 2, at(0)), EscalationState::Clean);

        engine.record_violation(1, 2, at(0)).await;
        assert_eq!(engine.state(1, 2, at(1)), EscalationState::Warned(1));

        engine.record_violation(1, 2, at(10)).await;
        assert_eq!(engine.record_violation(1, 2, at(20)).await, 3);
        assert_eq!(engine.state(1, 2, at(21)), EscalationState::MuteTriggered);

        engine.clear(1, 2).await.unwrap();
        assert_eq!(engine.state(1, 2, at(22)), EscalationState::Clean);
    }

    #[tokio::test]
    async fn test_old_warnings_do_not_count_toward_new_violation() {
        let engine = engine(Arc::new(MemoryStore::new()));
        engine.record_violation(1, 2, at(0)).await;
        engine.record_violation(1, 2, at(100)).await;
        assert_eq!(engine.record_violation(1, 2, at(650)).await, 2);
    }

    #[tokio::test]
    async fn test_restore_from_ledger() {
        let store = Arc::new(MemoryStore::new());
        let first = engine(store.clone());
        first.record_violation(1, 2, at(0)).await;
        first.record_violation(1, 2, at(300)).await;
        first.record_violation(1, 9, at(300)).await;
        first.clear(1, 9).await.unwrap();

        let second = engine(store);
        second.restore(at(700)).await.unwrap();
        assert_eq!(second.current_count(1, 2, at(700)), 1);
        assert_eq!(second.current_count(1, 9, at(700)), 0);
    }

    #[tokio::test]
    async fn test_sweep_drops_decayed_members() {
        let engine = engine(Arc::new(MemoryStore::new()));
        engine.record_violation(1, 2, at(0)).await;
        engine.record_violation(1, 3, at(500)).await;
        assert_eq!(engine.sweep_idle(at(700)), 1);
        assert_eq!(engine.current_count(1, 3, at(700)), 1);
    }

    #[tokio::test]
    async fn test_failed_ledger_clear_keeps_warnings() {
        let store = Arc::new(MemoryStore::new());
        let engine = engine(store.clone());
        engine.record_violation(1, 2, at(0)).await;
        engine.record_violation(1, 2, at(10)).await;

        store.fail_writes(true);
        assert!(matches!(
            engine.clear(1, 2).await,
            Err(ModerationError::Persistence(_))
        ));
        assert_eq!(engine.current_count(1, 2, at(20)), 2);

        // Memory and ledger still agree after a restart
        store.fail_writes(false);
        let restarted = EscalationEngine::new(Arc::clone(&engine.config), store);
        restarted.restore(at(20)).await.unwrap();
        assert_eq!(restarted.current_count(1, 2, at(20)), 2);
    }
}
