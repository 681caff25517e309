// Discord layer - commands, event handling and the Enforcer implementation.

#[path = "moderation/mod.rs"]
pub mod moderation;

use crate::core::moderation::{MessageGate, ModerationAdmin};
use std::sync::Arc;

/// Shared state available to every command and event handler.
pub struct Data {
    pub gate: Arc<MessageGate>,
    pub admin: Arc<ModerationAdmin>,
}

pub type Error = Box<dyn std::error::Error + Send + Sync>;
pub type Context<'a> = poise::Context<'a, Data, Error>;
