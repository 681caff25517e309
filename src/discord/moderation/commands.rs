// Automod slash commands - configuration and manual moderation.

use crate::core::moderation::{EscalationState, ModerationAdmin, SettingsUpdate};
use crate::discord::{Context, Error};
use chrono::Utc;
use poise::serenity_prelude as serenity;
use std::time::Duration;

fn guild_of(ctx: &Context<'_>) -> Result<u64, Error> {
    Ok(ctx.guild_id().ok_or("Must be used in a server")?.get())
}

fn minutes_to_secs(minutes: Option<u64>) -> Result<Option<u64>, Error> {
    match minutes {
        Some(m) => Ok(Some(m.checked_mul(60).ok_or("That duration is too long")?)),
        None => Ok(None),
    }
}

/// Automatic moderation commands.
///
/// Configure spam, blacklist, invite and toxicity filtering for your server.
#[poise::command(
    slash_command,
    subcommands(
        "status",
        "enable",
        "disable",
        "settings",
        "blacklist_add",
        "blacklist_remove",
        "blacklist_list",
        "exempt",
        "unexempt",
        "modlog",
        "warnings",
        "clear_warnings",
        "mute",
        "unmute",
        "stats"
    ),
    required_permissions = "MANAGE_MESSAGES",
    guild_only
)]
pub async fn automod(_ctx: Context<'_>) -> Result<(), Error> {
    Ok(())
}

/// Show current automod status and settings.
#[poise::command(slash_command, guild_only, required_permissions = "MANAGE_MESSAGES")]
pub async fn status(ctx: Context<'_>) -> Result<(), Error> {
    let guild_id = guild_of(&ctx)?;
    let config = ctx.data().admin.config(guild_id);

    let exempt = if config.exempt_channels.is_empty() {
        "None".to_string()
    } else {
        config
            .exempt_channels
            .iter()
            .map(|id| format!("<#{}>", id))
            .collect::<Vec<_>>()
            .join(", ")
    };
    let mod_log = config
        .mod_log_channel
        .map(|id| format!("<#{}>", id))
        .unwrap_or_else(|| "Not set".to_string());

    let embed = serenity::CreateEmbed::new()
        .title("🛡️ Automod Status")
        .color(if config.enabled { 0x00FF00 } else { 0xFF0000 })
        .field(
            "Status",
            if config.enabled { "✅ Enabled" } else { "❌ Disabled" },
            false,
        )
        .field(
            "Burst Limit",
            format!(
                "{} messages / {} seconds",
                config.burst_limit, config.burst_window_secs
            ),
            true,
        )
        .field(
            "Escalation",
            format!(
                "{} warnings → {} minute mute\nWarnings expire after {} minutes",
                config.warnings_before_mute,
                config.mute_duration_secs / 60,
                config.warning_decay_secs / 60
            ),
            true,
        )
        .field(
            "Toxicity Checks",
            format!(
                "{} per user / {} seconds",
                config.toxicity_rate, config.toxicity_per_secs
            ),
            true,
        )
        .field(
            "Invite Links",
            if config.block_invites { "Blocked" } else { "Allowed" },
            true,
        )
        .field("Exempt Channels", exempt, false)
        .field("Mod Log", mod_log, false);

    ctx.send(poise::CreateReply::default().embed(embed)).await?;
    Ok(())
}

/// Enable automatic moderation.
#[poise::command(slash_command, guild_only, required_permissions = "MANAGE_MESSAGES")]
pub async fn enable(ctx: Context<'_>) -> Result<(), Error> {
    let guild_id = guild_of(&ctx)?;
    ctx.data().admin.set_enabled(guild_id, true).await?;
    ctx.say("✅ Automod has been **enabled**.").await?;
    Ok(())
}

/// Disable automatic moderation.
#[poise::command(slash_command, guild_only, required_permissions = "MANAGE_MESSAGES")]
pub async fn disable(ctx: Context<'_>) -> Result<(), Error> {
    let guild_id = guild_of(&ctx)?;
    ctx.data().admin.set_enabled(guild_id, false).await?;
    ctx.say("❌ Automod has been **disabled**.").await?;
    Ok(())
}

/// Configure automod thresholds.
#[poise::command(slash_command, guild_only, required_permissions = "MANAGE_MESSAGES")]
pub async fn settings(
    ctx: Context<'_>,
    #[description = "Messages allowed in the burst window (default: 5)"] burst_limit: Option<u32>,
    #[description = "Burst window in seconds (default: 10)"] burst_window_secs: Option<u64>,
    #[description = "Warnings before mute (default: 3)"] warnings_before_mute: Option<u32>,
    #[description = "Mute duration in minutes (default: 15)"] mute_minutes: Option<u64>,
    #[description = "Minutes a warning keeps counting (default: 60)"] warning_decay_minutes: Option<
        u64,
    >,
    #[description = "Toxicity checks per user per period (default: 3)"] toxicity_rate: Option<u32>,
    #[description = "Toxicity quota period in seconds (default: 60)"] toxicity_per_secs: Option<u64>,
    #[description = "Cached toxicity verdicts (default: 1000)"] cache_capacity: Option<usize>,
    #[description = "Block invite links (default: true)"] block_invites: Option<bool>,
) -> Result<(), Error> {
    let guild_id = guild_of(&ctx)?;

    let update = SettingsUpdate {
        burst_limit,
        burst_window_secs,
        warnings_before_mute,
        mute_duration_secs: minutes_to_secs(mute_minutes)?,
        warning_decay_secs: minutes_to_secs(warning_decay_minutes)?,
        toxicity_rate,
        toxicity_per_secs,
        cache_capacity,
        block_invites,
    };
    let config = ctx.data().admin.update_settings(guild_id, update).await?;

    ctx.say(format!(
        "✅ Automod settings updated!\n\
         • Burst: {} msgs / {} sec\n\
         • Warnings before mute: {} → {} min mute\n\
         • Warning decay: {} min\n\
         • Toxicity checks: {} / {} sec (cache {})\n\
         • Invite links: {}",
        config.burst_limit,
        config.burst_window_secs,
        config.warnings_before_mute,
        config.mute_duration_secs / 60,
        config.warning_decay_secs / 60,
        config.toxicity_rate,
        config.toxicity_per_secs,
        config.cache_capacity,
        if config.block_invites { "blocked" } else { "allowed" }
    ))
    .await?;
    Ok(())
}

/// Add a word or phrase to the blacklist.
#[poise::command(slash_command, guild_only, required_permissions = "MANAGE_MESSAGES")]
pub async fn blacklist_add(
    ctx: Context<'_>,
    #[description = "Word or phrase to block"] word: String,
) -> Result<(), Error> {
    let guild_id = guild_of(&ctx)?;
    let shown = ModerationAdmin::normalized(&word).ok_or("The word cannot be empty")?;

    if ctx.data().admin.add_blacklist_word(guild_id, &word).await? {
        ctx.say(format!("✅ Added `{}` to the blacklist.", shown)).await?;
    } else {
        ctx.say(format!("`{}` is already blacklisted.", shown)).await?;
    }
    Ok(())
}

/// Remove a word or phrase from the blacklist.
#[poise::command(slash_command, guild_only, required_permissions = "MANAGE_MESSAGES")]
pub async fn blacklist_remove(
    ctx: Context<'_>,
    #[description = "Word or phrase to unblock"] word: String,
) -> Result<(), Error> {
    let guild_id = guild_of(&ctx)?;
    let shown = ModerationAdmin::normalized(&word).ok_or("The word cannot be empty")?;

    if ctx.data().admin.remove_blacklist_word(guild_id, &word).await? {
        ctx.say(format!("✅ Removed `{}` from the blacklist.", shown))
            .await?;
    } else {
        ctx.say(format!("`{}` was not blacklisted.", shown)).await?;
    }
    Ok(())
}

/// List blacklisted words (only visible to you).
#[poise::command(slash_command, guild_only, required_permissions = "MANAGE_MESSAGES")]
pub async fn blacklist_list(ctx: Context<'_>) -> Result<(), Error> {
    let guild_id = guild_of(&ctx)?;
    let words = ctx.data().admin.blacklist_words(guild_id);

    let text = if words.is_empty() {
        "The blacklist is empty.".to_string()
    } else {
        let mut list = words
            .iter()
            .map(|w| format!("`{}`", w))
            .collect::<Vec<_>>()
            .join(", ");
        if list.chars().count() > 1900 {
            list = list.chars().take(1900).collect();
            list.push_str("...");
        }
        format!("Blacklisted ({}): {}", words.len(), list)
    };

    ctx.send(poise::CreateReply::default().content(text).ephemeral(true))
        .await?;
    Ok(())
}

/// Exclude a channel from automatic moderation.
#[poise::command(slash_command, guild_only, required_permissions = "MANAGE_MESSAGES")]
pub async fn exempt(
    ctx: Context<'_>,
    #[description = "Channel to exempt"] channel: serenity::Channel,
) -> Result<(), Error> {
    let guild_id = guild_of(&ctx)?;
    let channel_id = channel.id().get();

    if ctx.data().admin.exempt_channel(guild_id, channel_id).await? {
        ctx.say(format!("✅ <#{}> is now exempt from automod.", channel_id))
            .await?;
    } else {
        ctx.say(format!("<#{}> was already exempt.", channel_id))
            .await?;
    }
    Ok(())
}

/// Moderate a previously exempt channel again.
#[poise::command(slash_command, guild_only, required_permissions = "MANAGE_MESSAGES")]
pub async fn unexempt(
    ctx: Context<'_>,
    #[description = "Channel to moderate again"] channel: serenity::Channel,
) -> Result<(), Error> {
    let guild_id = guild_of(&ctx)?;
    let channel_id = channel.id().get();

    if ctx.data().admin.unexempt_channel(guild_id, channel_id).await? {
        ctx.say(format!("✅ <#{}> is moderated again.", channel_id))
            .await?;
    } else {
        ctx.say(format!("<#{}> was not exempt.", channel_id)).await?;
    }
    Ok(())
}

/// Set or clear the moderation log channel.
#[poise::command(slash_command, guild_only, required_permissions = "MANAGE_MESSAGES")]
pub async fn modlog(
    ctx: Context<'_>,
    #[description = "Channel for moderation events (leave empty to disable)"] channel: Option<
        serenity::Channel,
    >,
) -> Result<(), Error> {
    let guild_id = guild_of(&ctx)?;
    let channel_id = channel.map(|c| c.id().get());

    ctx.data()
        .admin
        .set_mod_log_channel(guild_id, channel_id)
        .await?;
    match channel_id {
        Some(id) => ctx.say(format!("✅ Moderation log set to <#{}>.", id)).await?,
        None => ctx.say("✅ Moderation log disabled.").await?,
    };
    Ok(())
}

/// Show warnings and mute status for a member.
#[poise::command(slash_command, guild_only, required_permissions = "MANAGE_MESSAGES")]
pub async fn warnings(
    ctx: Context<'_>,
    #[description = "Member to inspect"] user: serenity::User,
) -> Result<(), Error> {
    let guild_id = guild_of(&ctx)?;
    let status = ctx
        .data()
        .admin
        .member_status(guild_id, user.id.get(), Utc::now());

    let mute = match status.mute {
        Some(record) => format!("Muted until <t:{}:R>", record.expires_at.timestamp()),
        None => "Not muted".to_string(),
    };
    let state = match status.state {
        EscalationState::Clean => "clean",
        EscalationState::Warned(_) => "warned",
        EscalationState::MuteTriggered => "at mute threshold",
    };
    ctx.say(format!(
        "<@{}> is {}: {}/{} active warnings. {}",
        user.id, state, status.warning_count, status.warnings_before_mute, mute
    ))
    .await?;
    Ok(())
}

/// Clear warnings for a member.
#[poise::command(slash_command, guild_only, required_permissions = "MANAGE_MESSAGES")]
pub async fn clear_warnings(
    ctx: Context<'_>,
    #[description = "Member to clear warnings for"] user: serenity::User,
) -> Result<(), Error> {
    let guild_id = guild_of(&ctx)?;
    ctx.data().admin.clear_warnings(guild_id, user.id.get()).await?;
    ctx.say(format!("✅ Cleared all warnings for <@{}>.", user.id))
        .await?;
    Ok(())
}

/// Mute a member.
#[poise::command(slash_command, guild_only, required_permissions = "MANAGE_ROLES")]
pub async fn mute(
    ctx: Context<'_>,
    #[description = "Member to mute"] user: serenity::User,
    #[description = "Duration in minutes (default: server setting)"] minutes: Option<u64>,
) -> Result<(), Error> {
    let guild_id = guild_of(&ctx)?;
    let duration = minutes_to_secs(minutes)?.map(Duration::from_secs);

    let outcome = ctx
        .data()
        .admin
        .impose_mute(guild_id, user.id.get(), duration, Utc::now())
        .await?;

    let until = outcome.record.expires_at.timestamp();
    if outcome.created {
        ctx.say(format!("🔇 <@{}> muted until <t:{}:t>.", user.id, until))
            .await?;
    } else {
        ctx.say(format!(
            "<@{}> is already muted until <t:{}:t>.",
            user.id, until
        ))
        .await?;
    }
    Ok(())
}

/// Lift a member's mute.
#[poise::command(slash_command, guild_only, required_permissions = "MANAGE_ROLES")]
pub async fn unmute(
    ctx: Context<'_>,
    #[description = "Member to unmute"] user: serenity::User,
) -> Result<(), Error> {
    let guild_id = guild_of(&ctx)?;

    match ctx.data().admin.lift_mute(guild_id, user.id.get()).await? {
        Some(_) => ctx.say(format!("🔊 <@{}> has been unmuted.", user.id)).await?,
        None => ctx.say(format!("<@{}> is not muted.", user.id)).await?,
    };
    Ok(())
}

/// Show moderation counters since the bot started.
#[poise::command(slash_command, guild_only, required_permissions = "MANAGE_MESSAGES")]
pub async fn stats(ctx: Context<'_>) -> Result<(), Error> {
    let snapshot = ctx.data().admin.stats();

    let mut embed = serenity::CreateEmbed::new()
        .title("📊 Automod Stats")
        .color(serenity::Color::BLURPLE);
    for (label, value) in snapshot.entries() {
        embed = embed.field(label, value.to_string(), true);
    }

    ctx.send(poise::CreateReply::default().embed(embed)).await?;
    Ok(())
}
