// Moderation counters, shown by the admin `stats` command.

use super::moderation_models::Violation;
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
pub struct ModerationMetrics {
    spam_deleted: AtomicU64,
    blacklist_hits: AtomicU64,
    invite_deleted: AtomicU64,
    toxicity_deleted: AtomicU64,
    api_fallbacks: AtomicU64,
    mutes: AtomicU64,
    unmutes: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub spam_deleted: u64,
    pub blacklist_hits: u64,
    pub invite_deleted: u64,
    pub toxicity_deleted: u64,
    pub api_fallbacks: u64,
    pub mutes: u64,
    pub unmutes: u64,
}

impl MetricsSnapshot {
    /// (label, value) pairs in display order.
    pub fn entries(&self) -> [(&'static str, u64); 7] {
        [
            ("Spam Deleted", self.spam_deleted),
            ("Blacklist Hits", self.blacklist_hits),
            ("Invites Deleted", self.invite_deleted),
            ("Toxicity Deleted", self.toxicity_deleted),
            ("Api Fallbacks", self.api_fallbacks),
            ("Mutes", self.mutes),
            ("Unmutes", self.unmutes),
        ]
    }
}

impl ModerationMetrics {
    pub fn record_violation(&self, violation: Violation) {
        let counter = match violation {
            Violation::Burst => &self.spam_deleted,
            Violation::Blacklist => &self.blacklist_hits,
            Violation::Invite => &self.invite_deleted,
            Violation::Toxicity => &self.toxicity_deleted,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_api_fallback(&self) {
        self.api_fallbacks.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_mute(&self) {
        self.mutes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_unmute(&self) {
        self.unmutes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            spam_deleted: self.spam_deleted.load(Ordering::Relaxed),
            blacklist_hits: self.blacklist_hits.load(Ordering::Relaxed),
            invite_deleted: self.invite_deleted.load(Ordering::Relaxed),
            toxicity_deleted: self.toxicity_deleted.load(Ordering::Relaxed),
            api_fallbacks: self.api_fallbacks.load(Ordering::Relaxed),
            mutes: self.mutes.load(Ordering::Relaxed),
            unmutes: self.unmutes.load(Ordering::Relaxed),
        }
    }
}
