// Administrative operations exposed to the command layer.
//
// Unlike the per-message pipeline, these are user-initiated: persistence and
// permission failures are returned to the caller so the admin sees them.

use super::blacklist::normalize_word;
use super::message_gate::ModerationServices;
use super::metrics::MetricsSnapshot;
use super::moderation_models::{GroupConfig, MemberStatus, MuteRecord, MAX_DURATION_SECS};
use super::moderation_ports::{Enforcer, EnforcerError, ModerationError};
use super::mute_store::ImposeOutcome;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;

/// Numeric settings an admin may change in one go. `None` leaves a value as is.
#[derive(Debug, Clone, Default)]
pub struct SettingsUpdate {
    pub burst_limit: Option<u32>,
    pub burst_window_secs: Option<u64>,
    pub warnings_before_mute: Option<u32>,
    pub mute_duration_secs: Option<u64>,
    pub warning_decay_secs: Option<u64>,
    pub toxicity_rate: Option<u32>,
    pub toxicity_per_secs: Option<u64>,
    pub cache_capacity: Option<usize>,
    pub block_invites: Option<bool>,
}

impl SettingsUpdate {
    fn apply(self, config: &mut GroupConfig) {
        if let Some(v) = self.burst_limit {
            config.burst_limit = v;
        }
        if let Some(v) = self.burst_window_secs {
            config.burst_window_secs = v;
        }
        if let Some(v) = self.warnings_before_mute {
            config.warnings_before_mute = v;
        }
        if let Some(v) = self.mute_duration_secs {
            config.mute_duration_secs = v;
        }
        if let Some(v) = self.warning_decay_secs {
            config.warning_decay_secs = v;
        }
        if let Some(v) = self.toxicity_rate {
            config.toxicity_rate = v;
        }
        if let Some(v) = self.toxicity_per_secs {
            config.toxicity_per_secs = v;
        }
        if let Some(v) = self.cache_capacity {
            config.cache_capacity = v;
        }
        if let Some(v) = self.block_invites {
            config.block_invites = v;
        }
    }
}

pub struct ModerationAdmin {
    services: ModerationServices,
    enforcer: Arc<dyn Enforcer>,
}

impl ModerationAdmin {
    pub fn new(services: ModerationServices, enforcer: Arc<dyn Enforcer>) -> Self {
        Self { services, enforcer }
    }

    pub fn config(&self, group_id: u64) -> GroupConfig {
        self.services.config.get(group_id)
    }

    // ------------------------------------------------------------------
    // Blacklist
    // ------------------------------------------------------------------

    pub async fn add_blacklist_word(
        &self,
        group_id: u64,
        word: &str,
    ) -> Result<bool, ModerationError> {
        self.services.blacklist.add(group_id, word).await
    }

    pub async fn remove_blacklist_word(
        &self,
        group_id: u64,
        word: &str,
    ) -> Result<bool, ModerationError> {
        self.services.blacklist.remove(group_id, word).await
    }

    pub fn blacklist_words(&self, group_id: u64) -> Vec<String> {
        self.services.blacklist.words(group_id)
    }

    /// The stored form of a phrase, for confirmation messages.
    pub fn normalized(word: &str) -> Option<String> {
        normalize_word(word)
    }

    // ------------------------------------------------------------------
    // Settings
    // ------------------------------------------------------------------

    pub async fn set_mod_log_channel(
        &self,
        group_id: u64,
        channel_id: Option<u64>,
    ) -> Result<GroupConfig, ModerationError> {
        self.services
            .config
            .update(group_id, |c| c.mod_log_channel = channel_id)
            .await
    }

    /// Returns `false` if the channel was already exempt.
    pub async fn exempt_channel(
        &self,
        group_id: u64,
        channel_id: u64,
    ) -> Result<bool, ModerationError> {
        if self.services.config.get(group_id).is_exempt(channel_id) {
            return Ok(false);
        }
        self.services
            .config
            .update(group_id, |c| {
                c.exempt_channels.insert(channel_id);
            })
            .await?;
        Ok(true)
    }

    /// Returns `false` if the channel was not exempt.
    pub async fn unexempt_channel(
        &self,
        group_id: u64,
        channel_id: u64,
    ) -> Result<bool, ModerationError> {
        if !self.services.config.get(group_id).is_exempt(channel_id) {
            return Ok(false);
        }
        self.services
            .config
            .update(group_id, |c| {
                c.exempt_channels.remove(&channel_id);
            })
            .await?;
        Ok(true)
    }

    pub async fn set_enabled(
        &self,
        group_id: u64,
        enabled: bool,
    ) -> Result<GroupConfig, ModerationError> {
        self.services
            .config
            .update(group_id, |c| c.enabled = enabled)
            .await
    }

    pub async fn update_settings(
        &self,
        group_id: u64,
        update: SettingsUpdate,
    ) -> Result<GroupConfig, ModerationError> {
        self.services
            .config
            .update(group_id, |c| update.apply(c))
            .await
    }

    // ------------------------------------------------------------------
    // Members
    // ------------------------------------------------------------------

    /// Administrative pardon: forget every warning of a member.
    pub async fn clear_warnings(&self, group_id: u64, user_id: u64) -> Result<(), ModerationError> {
        self.services.escalation.clear(group_id, user_id).await
    }

    pub fn member_status(&self, group_id: u64, user_id: u64, now: DateTime<Utc>) -> MemberStatus {
        MemberStatus {
            state: self.services.escalation.state(group_id, user_id, now),
            warning_count: self
                .services
                .escalation
                .current_count(group_id, user_id, now),
            warnings_before_mute: self.services.config.get(group_id).warnings_before_mute,
            mute: self
                .services
                .mutes
                .get(group_id, user_id)
                .filter(|m| !m.is_expired(now)),
        }
    }

    /// Manually mute a member. Uses the group's mute duration when `duration`
    /// is `None`. If the mute role cannot be applied for lack of permission,
    /// the new record is rolled back and the permission error returned.
    pub async fn impose_mute(
        &self,
        group_id: u64,
        user_id: u64,
        duration: Option<Duration>,
        now: DateTime<Utc>,
    ) -> Result<ImposeOutcome, ModerationError> {
        let duration = duration.unwrap_or_else(|| self.services.config.get(group_id).mute_duration());
        if duration.as_secs() > MAX_DURATION_SECS {
            return Err(ModerationError::InvalidInput(
                "mute duration must be at most one year".to_string(),
            ));
        }
        let outcome = self
            .services
            .mutes
            .impose(group_id, user_id, duration, now)
            .await?;
        if !outcome.created {
            return Ok(outcome);
        }

        match self.enforcer.apply_mute_role(group_id, user_id).await {
            Ok(()) => {}
            Err(EnforcerError::PermissionDenied(reason)) => {
                self.services.mutes.lift(group_id, user_id).await?;
                return Err(ModerationError::Permission(reason));
            }
            Err(e) => tracing::warn!(group_id, user_id, "Failed to apply mute role: {}", e),
        }

        self.services.metrics.record_mute();
        self.log(
            group_id,
            &format!(
                "Muted {} for {} minutes (manual).",
                self.enforcer.mention(user_id),
                duration.as_secs() / 60
            ),
        )
        .await;
        Ok(outcome)
    }

    /// Manually lift a mute. The durable record is removed first; a failure
    /// to remove the platform role is then reported to the caller.
    pub async fn lift_mute(
        &self,
        group_id: u64,
        user_id: u64,
    ) -> Result<Option<MuteRecord>, ModerationError> {
        let Some(record) = self.services.mutes.lift(group_id, user_id).await? else {
            return Ok(None);
        };

        self.services.metrics.record_unmute();
        self.log(
            group_id,
            &format!("Unmuted {} (manual).", self.enforcer.mention(user_id)),
        )
        .await;

        match self.enforcer.remove_mute_role(group_id, user_id).await {
            Ok(()) | Err(EnforcerError::NotFound(_)) => Ok(Some(record)),
            Err(e) => Err(e.into()),
        }
    }

    pub fn stats(&self) -> MetricsSnapshot {
        self.services.metrics.snapshot()
    }

    async fn log(&self, group_id: u64, text: &str) {
        if let Err(e) = self.enforcer.log_moderation_event(group_id, text).await {
            tracing::warn!(group_id, "Failed to write moderation log: {}", e);
        }
    }
}
