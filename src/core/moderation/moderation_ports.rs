// Ports for the moderation core: errors, persistence traits and the Enforcer.
//
// The core defines WHAT it needs; `infra/` provides durable storage and
// `discord/` provides the Enforcer. Tests use the in-memory versions in
// `test_support`.

use super::moderation_models::{GroupConfig, InboundMessage, MemberKey, MuteRecord};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeSet, HashMap};
use thiserror::Error;

// ============================================================================
// ERRORS
// ============================================================================

#[derive(Debug, Error)]
pub enum ModerationError {
    /// A durable write failed; the action it belonged to is not confirmed.
    #[error("Storage error: {0}")]
    Persistence(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Missing permission: {0}")]
    Permission(String),
}

/// Failures of platform side effects. Logged by the caller, never retried
/// indefinitely.
#[derive(Debug, Error)]
pub enum EnforcerError {
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Platform error: {0}")]
    Platform(String),
}

impl From<EnforcerError> for ModerationError {
    fn from(err: EnforcerError) -> Self {
        match err {
            EnforcerError::PermissionDenied(msg) => ModerationError::Permission(msg),
            other => ModerationError::Persistence(other.to_string()),
        }
    }
}

// ============================================================================
// STORAGE TRAITS (PORTS)
// ============================================================================

/// Durable per-group config overrides.
#[async_trait]
pub trait ConfigRepository: Send + Sync {
    /// Raw stored overrides. Parsing happens in the core so a single malformed
    /// row only affects its own group.
    async fn load_overrides(&self) -> Result<Vec<(u64, String)>, ModerationError>;

    async fn save_override(&self, group_id: u64, config: &GroupConfig)
        -> Result<(), ModerationError>;
}

/// Durable blacklist word sets, one per group.
#[async_trait]
pub trait BlacklistRepository: Send + Sync {
    async fn load_all(&self) -> Result<HashMap<u64, BTreeSet<String>>, ModerationError>;

    /// Replace the stored word set of a group.
    async fn save_words(&self, group_id: u64, words: &BTreeSet<String>)
        -> Result<(), ModerationError>;
}

/// Durable active mutes.
#[async_trait]
pub trait MuteRepository: Send + Sync {
    async fn load_all(&self) -> Result<Vec<MuteRecord>, ModerationError>;

    async fn save(&self, record: &MuteRecord) -> Result<(), ModerationError>;

    async fn delete(&self, group_id: u64, user_id: u64) -> Result<(), ModerationError>;
}

/// Audit trail of violations, used to restore escalation state after restart.
#[async_trait]
pub trait WarningLedger: Send + Sync {
    async fn append(
        &self,
        group_id: u64,
        user_id: u64,
        at: DateTime<Utc>,
    ) -> Result<(), ModerationError>;

    async fn clear(&self, group_id: u64, user_id: u64) -> Result<(), ModerationError>;

    /// Violations recorded at or after `since`, oldest first.
    async fn load_since(
        &self,
        since: DateTime<Utc>,
    ) -> Result<Vec<(MemberKey, DateTime<Utc>)>, ModerationError>;
}

// ============================================================================
// ENFORCER (implemented by the platform adapter)
// ============================================================================

/// Platform side effects requested by the moderation core.
#[async_trait]
pub trait Enforcer: Send + Sync {
    async fn delete_message(&self, message: &InboundMessage) -> Result<(), EnforcerError>;

    async fn send_ephemeral_notice(&self, channel_id: u64, text: &str)
        -> Result<(), EnforcerError>;

    async fn apply_mute_role(&self, group_id: u64, user_id: u64) -> Result<(), EnforcerError>;

    async fn remove_mute_role(&self, group_id: u64, user_id: u64) -> Result<(), EnforcerError>;

    async fn log_moderation_event(&self, group_id: u64, text: &str) -> Result<(), EnforcerError>;

    /// How a user is referred to in notices.
    fn mention(&self, user_id: u64) -> String {
        format!("user {}", user_id)
    }
}
