// Core moderation module - the platform-agnostic moderation engine.
//
// Stores and detectors are composed into a `MessageGate` (per-message
// pipeline), a `ModerationAdmin` (command surface) and the background
// sweeps. Persistence and platform side effects go through the ports in
// `moderation_ports`.

pub mod admin;
pub mod blacklist;
pub mod config_service;
pub mod escalation;
pub mod invite_filter;
pub mod keyed_locks;
pub mod message_gate;
pub mod metrics;
pub mod moderation_models;
pub mod moderation_ports;
pub mod mute_store;
pub mod rate_limiter;
pub mod sweeper;
pub mod toxicity;
pub mod verdict_cache;

#[cfg(test)]
mod test_support;

pub use admin::{ModerationAdmin, SettingsUpdate};
pub use blacklist::BlacklistMatcher;
pub use config_service::ConfigService;
pub use escalation::EscalationEngine;
pub use invite_filter::InviteFilter;
pub use message_gate::{MessageGate, ModerationServices};
pub use metrics::ModerationMetrics;
pub use moderation_models::*;
pub use moderation_ports::*;
pub use mute_store::MuteStore;
pub use rate_limiter::RateLimiter;
pub use toxicity::{parse_verdict, TierError, ToxicityClassifier, VerdictProvider, TOXICITY_INSTRUCTION};
