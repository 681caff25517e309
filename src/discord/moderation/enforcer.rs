// Discord implementation of the moderation Enforcer port.
//
// Mutes use a guild role named "Muted" that denies sending, speaking and
// reacting. The role is created on first use and its id cached per guild.

use crate::core::moderation::{ConfigService, Enforcer, EnforcerError, InboundMessage};
use async_trait::async_trait;
use dashmap::DashMap;
use poise::serenity_prelude as serenity;
use std::sync::Arc;
use std::time::Duration;

const MUTED_ROLE_NAME: &str = "Muted";

/// How long channel notices stay visible before they are removed.
const NOTICE_LIFETIME: Duration = Duration::from_secs(10);

pub struct SerenityEnforcer {
    http: Arc<serenity::Http>,
    config: Arc<ConfigService>,
    muted_roles: DashMap<u64, serenity::RoleId>,
}

fn map_error(err: serenity::Error) -> EnforcerError {
    if let serenity::Error::Http(serenity::HttpError::UnsuccessfulRequest(response)) = &err {
        match response.status_code.as_u16() {
            403 => return EnforcerError::PermissionDenied(err.to_string()),
            404 => return EnforcerError::NotFound(err.to_string()),
            _ => {}
        }
    }
    EnforcerError::Platform(err.to_string())
}

impl SerenityEnforcer {
    pub fn new(http: Arc<serenity::Http>, config: Arc<ConfigService>) -> Self {
        Self {
            http,
            config,
            muted_roles: DashMap::new(),
        }
    }

    /// Look up the guild's mute role, optionally creating it.
    async fn muted_role(
        &self,
        guild_id: serenity::GuildId,
        create: bool,
    ) -> Result<Option<serenity::RoleId>, EnforcerError> {
        if let Some(role) = self.muted_roles.get(&guild_id.get()) {
            return Ok(Some(*role));
        }

        let roles = guild_id.roles(&self.http).await.map_err(map_error)?;
        if let Some(role) = roles.values().find(|r| r.name == MUTED_ROLE_NAME) {
            self.muted_roles.insert(guild_id.get(), role.id);
            return Ok(Some(role.id));
        }

        if !create {
            return Ok(None);
        }

        let role = guild_id
            .create_role(&self.http, serenity::EditRole::new().name(MUTED_ROLE_NAME))
            .await
            .map_err(map_error)?;
        tracing::info!(guild_id = guild_id.get(), "Created mute role");

        let deny = serenity::Permissions::SEND_MESSAGES
            | serenity::Permissions::SPEAK
            | serenity::Permissions::ADD_REACTIONS;
        let channels = guild_id.channels(&self.http).await.map_err(map_error)?;
        for channel_id in channels.keys() {
            let overwrite = serenity::PermissionOverwrite {
                allow: serenity::Permissions::empty(),
                deny,
                kind: serenity::PermissionOverwriteType::Role(role.id),
            };
            if let Err(e) = channel_id.create_permission(&self.http, overwrite).await {
                tracing::warn!(channel_id = channel_id.get(), "Failed to restrict mute role: {}", e);
            }
        }

        self.muted_roles.insert(guild_id.get(), role.id);
        Ok(Some(role.id))
    }
}

#[async_trait]
impl Enforcer for SerenityEnforcer {
    async fn delete_message(&self, message: &InboundMessage) -> Result<(), EnforcerError> {
        serenity::ChannelId::new(message.channel_id)
            .delete_message(&self.http, serenity::MessageId::new(message.message_id))
            .await
            .map_err(map_error)
    }

    async fn send_ephemeral_notice(&self, channel_id: u64, text: &str) -> Result<(), EnforcerError> {
        let channel = serenity::ChannelId::new(channel_id);
        let sent = channel.say(&self.http, text).await.map_err(map_error)?;

        let http = Arc::clone(&self.http);
        tokio::spawn(async move {
            tokio::time::sleep(NOTICE_LIFETIME).await;
            if let Err(e) = sent.delete(&http).await {
                tracing::debug!("Failed to remove moderation notice: {}", e);
            }
        });
        Ok(())
    }

    async fn apply_mute_role(&self, group_id: u64, user_id: u64) -> Result<(), EnforcerError> {
        let guild_id = serenity::GuildId::new(group_id);
        let role = self
            .muted_role(guild_id, true)
            .await?
            .ok_or_else(|| EnforcerError::NotFound("mute role".to_string()))?;

        self.http
            .add_member_role(
                guild_id,
                serenity::UserId::new(user_id),
                role,
                Some("AutoMod mute"),
            )
            .await
            .map_err(map_error)
    }

    async fn remove_mute_role(&self, group_id: u64, user_id: u64) -> Result<(), EnforcerError> {
        let guild_id = serenity::GuildId::new(group_id);
        let Some(role) = self.muted_role(guild_id, false).await? else {
            return Err(EnforcerError::NotFound("mute role".to_string()));
        };

        self.http
            .remove_member_role(
                guild_id,
                serenity::UserId::new(user_id),
                role,
                Some("Mute expired"),
            )
            .await
            .map_err(map_error)
    }

    async fn log_moderation_event(&self, group_id: u64, text: &str) -> Result<(), EnforcerError> {
        let Some(channel_id) = self.config.get(group_id).mod_log_channel else {
            return Ok(());
        };

        let embed = serenity::CreateEmbed::new()
            .description(text)
            .color(0xFFA500)
            .timestamp(serenity::Timestamp::now());

        serenity::ChannelId::new(channel_id)
            .send_message(&self.http, serenity::CreateMessage::new().embed(embed))
            .await
            .map_err(map_error)?;
        Ok(())
    }

    fn mention(&self, user_id: u64) -> String {
        format!("<@{}>", user_id)
    }
}
