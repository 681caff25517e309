// The infra module contains implementations of core traits.
// Each feature implementation goes in its own submodule.

#[path = "moderation/sqlite_moderation_store.rs"]
pub mod moderation;

#[path = "ai/mod.rs"]
pub mod ai;
