// Moderation domain models - data structures shared by every moderation component.
//
// These are pure domain types with no Discord dependencies.
// The Discord layer converts gateway events into `InboundMessage`s and turns
// `ModerationAction`s back into platform calls (through the `Enforcer` port).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::time::Duration;

/// (group, user) key used by every per-user map in the moderation core.
pub type MemberKey = (u64, u64);

/// Upper bound for every duration setting: one year.
pub const MAX_DURATION_SECS: u64 = 365 * 24 * 60 * 60;

fn bounded_secs(secs: u64) -> chrono::Duration {
    chrono::Duration::seconds(secs.min(MAX_DURATION_SECS) as i64)
}

/// Per-group moderation settings.
///
/// Stored per group as an override of the default config. Unknown or missing
/// fields fall back to the defaults via `#[serde(default)]`, so an old stored
/// override keeps working after new settings are added.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GroupConfig {
    /// Whether automatic moderation runs at all in this group
    pub enabled: bool,
    /// Messages allowed inside the burst window before it counts as spam
    pub burst_limit: u32,
    /// Burst window in seconds
    pub burst_window_secs: u64,
    /// Number of unexpired warnings that triggers a mute
    pub warnings_before_mute: u32,
    /// Mute duration in seconds
    pub mute_duration_secs: u64,
    /// How long a warning keeps counting toward escalation
    pub warning_decay_secs: u64,
    /// Toxicity checks allowed per user in `toxicity_per_secs`
    pub toxicity_rate: u32,
    /// Toxicity quota refill period in seconds
    pub toxicity_per_secs: u64,
    /// Maximum number of cached toxicity verdicts
    pub cache_capacity: usize,
    /// Block chat invite links
    pub block_invites: bool,
    /// Channels that are never moderated
    pub exempt_channels: BTreeSet<u64>,
    /// Where moderation events are logged
    pub mod_log_channel: Option<u64>,
}

impl Default for GroupConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            burst_limit: 5,           // 5 messages...
            burst_window_secs: 10,    // ...in 10 seconds
            warnings_before_mute: 3,  // 3 warnings before mute
            mute_duration_secs: 900,  // 15 minute mute
            warning_decay_secs: 3600, // warnings count for an hour
            toxicity_rate: 3,         // 3 classifier calls...
            toxicity_per_secs: 60,    // ...per minute per user
            cache_capacity: 1000,
            block_invites: true,
            exempt_channels: BTreeSet::new(),
            mod_log_channel: None,
        }
    }
}

impl GroupConfig {
    pub fn burst_window(&self) -> chrono::Duration {
        bounded_secs(self.burst_window_secs)
    }

    pub fn mute_duration(&self) -> Duration {
        Duration::from_secs(self.mute_duration_secs.min(MAX_DURATION_SECS))
    }

    pub fn warning_decay(&self) -> chrono::Duration {
        bounded_secs(self.warning_decay_secs)
    }

    pub fn toxicity_period(&self) -> Duration {
        Duration::from_secs(self.toxicity_per_secs.min(MAX_DURATION_SECS))
    }

    pub fn is_exempt(&self, channel_id: u64) -> bool {
        self.exempt_channels.contains(&channel_id)
    }

    /// Check the settings an admin update may not break.
    pub fn validate(&self) -> Result<(), String> {
        if self.burst_limit < 2 {
            return Err("burst limit must be at least 2".to_string());
        }
        if self.burst_window_secs == 0 {
            return Err("burst window must be positive".to_string());
        }
        if self.warnings_before_mute == 0 {
            return Err("warnings before mute must be at least 1".to_string());
        }
        if self.mute_duration_secs == 0 {
            return Err("mute duration must be positive".to_string());
        }
        if self.warning_decay_secs == 0 {
            return Err("warning decay must be positive".to_string());
        }
        if self.toxicity_rate == 0 || self.toxicity_per_secs == 0 {
            return Err("toxicity rate limit must be positive".to_string());
        }
        if self.cache_capacity == 0 {
            return Err("cache capacity must be at least 1".to_string());
        }
        let durations = [
            ("burst window", self.burst_window_secs),
            ("mute duration", self.mute_duration_secs),
            ("warning decay", self.warning_decay_secs),
            ("toxicity period", self.toxicity_per_secs),
        ];
        for (name, secs) in durations {
            if secs > MAX_DURATION_SECS {
                return Err(format!("{} must be at most one year", name));
            }
        }
        Ok(())
    }
}

/// A chat message as seen by the moderation core.
#[derive(Debug, Clone)]
pub struct InboundMessage {
    pub message_id: u64,
    pub group_id: u64,
    pub channel_id: u64,
    pub user_id: u64,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

impl InboundMessage {
    pub fn member(&self) -> MemberKey {
        (self.group_id, self.user_id)
    }
}

/// Which check flagged a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Violation {
    /// Too many messages inside the burst window
    Burst,
    /// Message contained a blacklisted phrase
    Blacklist,
    /// Message contained a chat invite link
    Invite,
    /// Classifier judged the message toxic
    Toxicity,
}

impl Violation {
    /// Notice shown to the author when their message is removed.
    pub fn notice(&self) -> &'static str {
        match self {
            Violation::Burst => "please don't spam.",
            Violation::Blacklist => "your message contained a blacklisted word.",
            Violation::Invite => "invite links are not allowed.",
            Violation::Toxicity => "please maintain a respectful environment.",
        }
    }
}

impl std::fmt::Display for Violation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Violation::Burst => write!(f, "Spam"),
            Violation::Blacklist => write!(f, "Blacklisted Word"),
            Violation::Invite => write!(f, "Invite Link"),
            Violation::Toxicity => write!(f, "Toxicity"),
        }
    }
}

/// An active temporary mute. At most one exists per (group, user).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MuteRecord {
    pub group_id: u64,
    pub user_id: u64,
    pub expires_at: DateTime<Utc>,
}

impl MuteRecord {
    pub fn member(&self) -> MemberKey {
        (self.group_id, self.user_id)
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

/// What the pipeline decided for one message.
#[derive(Debug, Clone, PartialEq)]
pub enum ModerationAction {
    /// No violation
    Allow,
    /// Author is currently muted; message removed without a new warning
    Suppress,
    /// Message removed and the author warned.
    ///
    /// `mute_unconfirmed` is set when the warning count reached the mute
    /// threshold but the mute could not be persisted.
    DeleteAndWarn {
        violation: Violation,
        warning_count: u32,
        mute_unconfirmed: bool,
    },
    /// Message removed, author warned and muted
    DeleteWarnAndMute {
        violation: Violation,
        mute: MuteRecord,
    },
}

impl ModerationAction {
    pub fn is_violation(&self) -> bool {
        matches!(
            self,
            ModerationAction::DeleteAndWarn { .. } | ModerationAction::DeleteWarnAndMute { .. }
        )
    }
}

/// Escalation state for a (group, user), derived from the warning count.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EscalationState {
    Clean,
    Warned(u32),
    MuteTriggered,
}

impl EscalationState {
    pub fn from_count(count: u32, threshold: u32) -> Self {
        if count == 0 {
            EscalationState::Clean
        } else if count >= threshold {
            EscalationState::MuteTriggered
        } else {
            EscalationState::Warned(count)
        }
    }
}

/// Warning and mute overview for a single member (admin query).
#[derive(Debug, Clone)]
pub struct MemberStatus {
    pub state: EscalationState,
    pub warning_count: u32,
    pub warnings_before_mute: u32,
    pub mute: Option<MuteRecord>,
}
