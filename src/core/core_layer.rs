// The core module contains all business logic.
// Nothing in here knows about Discord, SQLite or HTTP.

#[path = "moderation/mod.rs"]
pub mod moderation;
