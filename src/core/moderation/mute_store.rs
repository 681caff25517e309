// Mute store - the authoritative record of active temporary mutes.
//
// Every Impose/Lift is written to durable storage before the in-memory map
// changes, so a crash right after `impose` returns still leaves the mute
// discoverable on restart, and a failed write never leaves an unpersisted
// mute looking active. Records that expired while the process was down are
// kept after `load` and surface on the first `sweep`, giving the enforcement
// side a chance to remove the platform restriction.

use super::keyed_locks::KeyedLocks;
use super::moderation_models::{MemberKey, MuteRecord};
use super::moderation_ports::{ModerationError, MuteRepository};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;

/// Result of `impose`.
#[derive(Debug, Clone, PartialEq)]
pub struct ImposeOutcome {
    pub record: MuteRecord,
    /// `false` when an active mute already existed and was returned unchanged
    pub created: bool,
}

pub struct MuteStore {
    repository: Arc<dyn MuteRepository>,
    active: DashMap<MemberKey, MuteRecord>,
    write_locks: KeyedLocks<u64>,
}

impl MuteStore {
    pub fn new(repository: Arc<dyn MuteRepository>) -> Self {
        Self {
            repository,
            active: DashMap::new(),
            write_locks: KeyedLocks::new(),
        }
    }

    /// Reload every persisted mute, expired ones included.
    pub async fn load(&self) -> Result<usize, ModerationError> {
        let records = self.repository.load_all().await?;
        let count = records.len();
        for record in records {
            self.active.insert(record.member(), record);
        }
        Ok(count)
    }

    /// Mute a member until `now + duration`.
    ///
    /// Idempotent: if the member already has an unexpired mute, that record is
    /// returned with `created == false` and nothing is written.
    pub async fn impose(
        &self,
        group_id: u64,
        user_id: u64,
        duration: Duration,
        now: DateTime<Utc>,
    ) -> Result<ImposeOutcome, ModerationError> {
        let _guard = self.write_locks.lock(&group_id).await;

        if let Some(existing) = self.active.get(&(group_id, user_id)) {
            if !existing.is_expired(now) {
                return Ok(ImposeOutcome {
                    record: existing.clone(),
                    created: false,
                });
            }
        }

        let duration = chrono::Duration::from_std(duration)
            .map_err(|e| ModerationError::InvalidInput(e.to_string()))?;
        let expires_at = now
            .checked_add_signed(duration)
            .ok_or_else(|| ModerationError::InvalidInput("mute duration too long".to_string()))?;
        let record = MuteRecord {
            group_id,
            user_id,
            expires_at,
        };

        self.repository.save(&record).await?;
        self.active.insert(record.member(), record.clone());

        tracing::info!(group_id, user_id, expires_at = %record.expires_at, "Mute imposed");
        Ok(ImposeOutcome {
            record,
            created: true,
        })
    }

    pub fn is_active(&self, group_id: u64, user_id: u64, now: DateTime<Utc>) -> bool {
        self.active
            .get(&(group_id, user_id))
            .map(|record| !record.is_expired(now))
            .unwrap_or(false)
    }

    pub fn get(&self, group_id: u64, user_id: u64) -> Option<MuteRecord> {
        self.active.get(&(group_id, user_id)).map(|r| r.clone())
    }

    /// Remove a mute. Returns the removed record, or `None` if there was none.
    pub async fn lift(
        &self,
        group_id: u64,
        user_id: u64,
    ) -> Result<Option<MuteRecord>, ModerationError> {
        let _guard = self.write_locks.lock(&group_id).await;

        if !self.active.contains_key(&(group_id, user_id)) {
            return Ok(None);
        }

        self.repository.delete(group_id, user_id).await?;
        let removed = self.active.remove(&(group_id, user_id)).map(|(_, r)| r);

        tracing::info!(group_id, user_id, "Mute lifted");
        Ok(removed)
    }

    /// Lift a mute only if the stored record is still expired at `now`.
    ///
    /// Returns `None` when the member has no mute or it was replaced by a
    /// fresh one, so a sweep never undoes a mute imposed after it started.
    pub async fn lift_expired(
        &self,
        group_id: u64,
        user_id: u64,
        now: DateTime<Utc>,
    ) -> Result<Option<MuteRecord>, ModerationError> {
        let _guard = self.write_locks.lock(&group_id).await;

        let still_expired = self
            .active
            .get(&(group_id, user_id))
            .map(|record| record.is_expired(now))
            .unwrap_or(false);
        if !still_expired {
            return Ok(None);
        }

        self.repository.delete(group_id, user_id).await?;
        let removed = self.active.remove(&(group_id, user_id)).map(|(_, r)| r);

        tracing::info!(group_id, user_id, "Expired mute lifted");
        Ok(removed)
    }

    /// Records whose expiry has passed. They stay in the store until lifted.
    pub fn sweep(&self, now: DateTime<Utc>) -> Vec<MuteRecord> {
        let mut expired: Vec<MuteRecord> = self
            .active
            .iter()
            .filter(|r| r.is_expired(now))
            .map(|r| r.clone())
            .collect();
        expired.sort_by_key(|r| r.expires_at);
        expired
    }

    pub fn active_count(&self) -> usize {
        self.active.len()
    }
}
