// Message gate - the per-message moderation pipeline.
//
// Checks run in a fixed order and stop at the first violation:
// burst -> blacklist -> invite link -> toxicity.
// Cheap deterministic checks come first so the remote classifier is only
// asked about messages that passed everything else.
//
// A check that fails is logged and counts as "no violation". On a violation
// the gate deletes the message, records a warning and, once the warning count
// reaches the group's threshold, imposes a mute and clears the warnings.
// All side effects go through the `Enforcer`.

use super::blacklist::BlacklistMatcher;
use super::config_service::ConfigService;
use super::escalation::EscalationEngine;
use super::invite_filter::InviteFilter;
use super::keyed_locks::KeyedLocks;
use super::metrics::ModerationMetrics;
use super::moderation_models::{GroupConfig, InboundMessage, MemberKey, ModerationAction, Violation};
use super::moderation_ports::{Enforcer, EnforcerError};
use super::mute_store::MuteStore;
use super::rate_limiter::RateLimiter;
use super::toxicity::{ClassifierError, ToxicityClassifier};
use chrono::{DateTime, Utc};
use std::sync::Arc;

/// Every moderation component, shared between the gate, the admin surface
/// and the background sweeps.
#[derive(Clone)]
pub struct ModerationServices {
    pub config: Arc<ConfigService>,
    pub rate_limiter: Arc<RateLimiter>,
    pub blacklist: Arc<BlacklistMatcher>,
    pub invites: Arc<InviteFilter>,
    pub classifier: Arc<ToxicityClassifier>,
    pub escalation: Arc<EscalationEngine>,
    pub mutes: Arc<MuteStore>,
    pub metrics: Arc<ModerationMetrics>,
}

pub struct MessageGate {
    services: ModerationServices,
    enforcer: Arc<dyn Enforcer>,
    member_locks: KeyedLocks<MemberKey>,
}

impl MessageGate {
    pub fn new(services: ModerationServices, enforcer: Arc<dyn Enforcer>) -> Self {
        Self {
            services,
            enforcer,
            member_locks: KeyedLocks::new(),
        }
    }

    /// Moderate one inbound message.
    ///
    /// Messages from the same member are processed one at a time in arrival
    /// order; different members proceed concurrently.
    pub async fn process(&self, message: &InboundMessage) -> ModerationAction {
        let _guard = self.member_locks.lock(&message.member()).await;

        let config = self.services.config.get(message.group_id);
        if !config.enabled {
            return ModerationAction::Allow;
        }

        let now = message.timestamp;
        if self
            .services
            .mutes
            .is_active(message.group_id, message.user_id, now)
        {
            self.delete(message).await;
            return ModerationAction::Suppress;
        }

        if config.is_exempt(message.channel_id) {
            return ModerationAction::Allow;
        }

        match self.detect(message, &config, now).await {
            Some(violation) => self.handle_violation(message, &config, violation, now).await,
            None => ModerationAction::Allow,
        }
    }

    /// Run the checks in order and return the first violation.
    async fn detect(
        &self,
        message: &InboundMessage,
        config: &GroupConfig,
        now: DateTime<Utc>,
    ) -> Option<Violation> {
        let (group_id, user_id) = message.member();

        if self
            .services
            .rate_limiter
            .check_and_record(group_id, user_id, message.channel_id, now)
        {
            self.services.rate_limiter.reset(group_id, user_id);
            return Some(Violation::Burst);
        }

        if self.services.blacklist.contains(group_id, &message.content) {
            return Some(Violation::Blacklist);
        }

        if config.block_invites && self.services.invites.contains_invite(&message.content) {
            return Some(Violation::Invite);
        }

        if message.content.trim().is_empty() {
            return None;
        }

        match self
            .services
            .classifier
            .classify(group_id, user_id, &message.content, now)
            .await
        {
            Ok(verdict) if verdict.toxic => Some(Violation::Toxicity),
            Ok(_) => None,
            Err(ClassifierError::RateLimited) => {
                tracing::debug!(group_id, user_id, "Toxicity check skipped (rate limited)");
                None
            }
        }
    }

    async fn handle_violation(
        &self,
        message: &InboundMessage,
        config: &GroupConfig,
        violation: Violation,
        now: DateTime<Utc>,
    ) -> ModerationAction {
        let (group_id, user_id) = message.member();
        tracing::info!(group_id, user_id, %violation, "Moderation violation");

        self.services.metrics.record_violation(violation);
        self.delete(message).await;

        let mention = self.enforcer.mention(user_id);
        let threshold = config.warnings_before_mute;
        let warning_count = self
            .services
            .escalation
            .record_violation(group_id, user_id, now)
            .await;

        if warning_count < threshold {
            self.notify(
                message.channel_id,
                &format!(
                    "{}, {} Warnings: {}/{}",
                    mention,
                    violation.notice(),
                    warning_count,
                    threshold
                ),
            )
            .await;
            return ModerationAction::DeleteAndWarn {
                violation,
                warning_count,
                mute_unconfirmed: false,
            };
        }

        let outcome = match self
            .services
            .mutes
            .impose(group_id, user_id, config.mute_duration(), now)
            .await
        {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::error!(group_id, user_id, "Mute not confirmed: {}", e);
                self.notify(
                    message.channel_id,
                    &format!("{}, {} Warnings: {}/{}", mention, violation.notice(), warning_count, threshold),
                )
                .await;
                return ModerationAction::DeleteAndWarn {
                    violation,
                    warning_count,
                    mute_unconfirmed: true,
                };
            }
        };

        // A mute consumes the accumulated warnings
        if let Err(e) = self.services.escalation.clear(group_id, user_id).await {
            tracing::warn!(group_id, user_id, "Failed to reset warnings after mute: {}", e);
        }

        if outcome.created {
            self.services.metrics.record_mute();
            self.apply_mute_role(message, &mention, config).await;
        }

        ModerationAction::DeleteWarnAndMute {
            violation,
            mute: outcome.record,
        }
    }

    async fn apply_mute_role(&self, message: &InboundMessage, mention: &str, config: &GroupConfig) {
        let (group_id, user_id) = message.member();
        match self.enforcer.apply_mute_role(group_id, user_id).await {
            Ok(()) => {
                let minutes = config.mute_duration_secs / 60;
                self.notify(
                    message.channel_id,
                    &format!("{} has been muted for {} minutes.", mention, minutes),
                )
                .await;
                if let Err(e) = self
                    .enforcer
                    .log_moderation_event(group_id, &format!("Muted {} for {} minutes.", mention, minutes))
                    .await
                {
                    tracing::warn!(group_id, "Failed to write moderation log: {}", e);
                }
            }
            Err(EnforcerError::PermissionDenied(reason)) => {
                tracing::warn!(group_id, user_id, "Cannot apply mute role: {}", reason);
                self.notify(message.channel_id, "I lack permission to manage roles.")
                    .await;
            }
            Err(e) => tracing::error!(group_id, user_id, "Failed to apply mute role: {}", e),
        }
    }

    async fn delete(&self, message: &InboundMessage) {
        if let Err(e) = self.enforcer.delete_message(message).await {
            tracing::warn!(
                group_id = message.group_id,
                message_id = message.message_id,
                "Failed to delete message: {}",
                e
            );
        }
    }

    async fn notify(&self, channel_id: u64, text: &str) {
        if let Err(e) = self.enforcer.send_ephemeral_notice(channel_id, text).await {
            tracing::warn!(channel_id, "Failed to send moderation notice: {}", e);
        }
    }

    /// Drop idle per-member state across the pipeline.
    pub fn sweep_idle(&self, now: DateTime<Utc>) -> usize {
        self.services.rate_limiter.sweep_idle(now)
            + self.services.escalation.sweep_idle(now)
            + self.services.classifier.sweep_idle_quotas(now)
            + self.member_locks.prune_idle()
    }
}
