// Discord-specific message handling - feeds gateway messages to the moderation gate.

use crate::core::moderation::{InboundMessage, MessageGate, ModerationAction};
use chrono::Utc;
use poise::serenity_prelude as serenity;

/// Convert a gateway message into the core's message type.
///
/// Returns `None` for messages the moderation core never sees: bots
/// (including ourselves) and direct messages.
pub fn to_inbound(msg: &serenity::Message) -> Option<InboundMessage> {
    if msg.author.bot {
        return None;
    }
    let guild_id = msg.guild_id?;

    Some(InboundMessage {
        message_id: msg.id.get(),
        group_id: guild_id.get(),
        channel_id: msg.channel_id.get(),
        user_id: msg.author.id.get(),
        content: msg.content.clone(),
        // Arrival time; per-member processing is serialised in this order
        timestamp: Utc::now(),
    })
}

/// Moderate a message. All side effects happen inside the gate.
pub async fn handle_message(gate: &MessageGate, msg: &serenity::Message) -> ModerationAction {
    let Some(inbound) = to_inbound(msg) else {
        return ModerationAction::Allow;
    };

    let action = gate.process(&inbound).await;
    if action.is_violation() {
        tracing::debug!(
            guild_id = inbound.group_id,
            user_id = inbound.user_id,
            ?action,
            "Message moderated"
        );
    }
    action
}
