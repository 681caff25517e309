// Discord adapter for the moderation core.

pub mod commands;
pub mod enforcer;
pub mod message_handler;

pub use enforcer::SerenityEnforcer;
pub use message_handler::handle_message;
