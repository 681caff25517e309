// This is the entry point of the automod bot.
//
// **Architecture Overview:**
// - `core/` = Moderation engine (platform-agnostic)
// - `infra/` = Implementations of core traits (SQLite, classifier APIs)
// - `discord/` = Discord-specific adapters (commands, events, Enforcer)
//
// This file's job is to:
// 1. Load configuration
// 2. Initialize services (dependency injection) and rebuild state from disk
// 3. Start the background sweeps
// 4. Set up the Discord framework

// These attrs point each module declaration at a more descriptive root file
// so we don't end up with half a dozen mod.rs files that all look the same.
#[path = "core/core_layer.rs"]
mod core;
#[path = "discord/discord_layer.rs"]
mod discord;
#[path = "infra/infra_layer.rs"]
mod infra;

use crate::core::moderation::sweeper::{
    spawn_idle_sweeper, spawn_mute_sweeper, DEFAULT_IDLE_SWEEP_INTERVAL,
    DEFAULT_MUTE_SWEEP_INTERVAL,
};
use crate::core::moderation::{
    BlacklistMatcher, ConfigService, Enforcer, EscalationEngine, GroupConfig, InviteFilter,
    MessageGate, ModerationAdmin, ModerationMetrics, ModerationServices, MuteStore, RateLimiter,
    ToxicityClassifier, VerdictProvider,
};
use crate::discord::moderation::{handle_message, SerenityEnforcer};
use crate::discord::{Data, Error};
use crate::infra::ai::{
    OllamaClient, OpenRouterClient, DEFAULT_OLLAMA_URL, DEFAULT_OPENROUTER_MODEL,
    DEFAULT_OPENROUTER_URL,
};
use crate::infra::moderation::SqliteModerationStore;
use anyhow::Context as _;
use chrono::Utc;
use poise::serenity_prelude as serenity;
use std::sync::Arc;
use std::time::Duration;

// ============================================================================
// SETTINGS
// ============================================================================

/// Process settings read from the environment (and `.env`).
struct Settings {
    token: String,
    data_dir: String,
    openrouter_api_key: Option<String>,
    openrouter_model: String,
    toxicity_api_url: String,
    toxicity_timeout: Duration,
    local_model_url: Option<String>,
    local_model_name: Option<String>,
    defaults_file: Option<String>,
    mute_sweep_interval: Duration,
    idle_sweep_interval: Duration,
}

fn env_secs(name: &str, default: Duration) -> Duration {
    match std::env::var(name) {
        Ok(raw) => match raw.parse::<u64>() {
            Ok(secs) if secs > 0 => Duration::from_secs(secs),
            _ => {
                tracing::warn!("Ignoring invalid {}={:?}", name, raw);
                default
            }
        },
        Err(_) => default,
    }
}

impl Settings {
    fn from_env() -> anyhow::Result<Self> {
        let token = std::env::var("DISCORD_TOKEN").context(
            "Missing DISCORD_TOKEN environment variable! Create a .env file with your bot token.",
        )?;

        Ok(Self {
            token,
            data_dir: std::env::var("MODERATION_DATA_DIR").unwrap_or_else(|_| "data".to_string()),
            openrouter_api_key: std::env::var("OPENROUTER_API_KEY").ok(),
            openrouter_model: std::env::var("OPENROUTER_MODEL")
                .unwrap_or_else(|_| DEFAULT_OPENROUTER_MODEL.to_string()),
            toxicity_api_url: std::env::var("TOXICITY_API_URL")
                .unwrap_or_else(|_| DEFAULT_OPENROUTER_URL.to_string()),
            toxicity_timeout: env_secs("TOXICITY_TIMEOUT_SECS", Duration::from_secs(10)),
            local_model_url: std::env::var("LOCAL_MODEL_URL").ok(),
            local_model_name: std::env::var("LOCAL_MODEL_NAME").ok(),
            defaults_file: std::env::var("MODERATION_DEFAULTS_FILE").ok(),
            mute_sweep_interval: env_secs("MUTE_SWEEP_INTERVAL_SECS", DEFAULT_MUTE_SWEEP_INTERVAL),
            idle_sweep_interval: env_secs("IDLE_SWEEP_INTERVAL_SECS", DEFAULT_IDLE_SWEEP_INTERVAL),
        })
    }

    /// Default group config, optionally overridden by a JSON file.
    /// A missing or malformed file falls back to the built-in defaults.
    fn group_defaults(&self) -> GroupConfig {
        let Some(path) = &self.defaults_file else {
            return GroupConfig::default();
        };

        let parsed = std::fs::read_to_string(path)
            .map_err(|e| e.to_string())
            .and_then(|raw| serde_json::from_str::<GroupConfig>(&raw).map_err(|e| e.to_string()))
            .and_then(|config| config.validate().map(|_| config));

        match parsed {
            Ok(config) => {
                tracing::info!("Loaded moderation defaults from {}", path);
                config
            }
            Err(e) => {
                tracing::warn!("Ignoring moderation defaults file {}: {}", path, e);
                GroupConfig::default()
            }
        }
    }

    fn remote_tier(&self) -> anyhow::Result<Option<Arc<dyn VerdictProvider>>> {
        let Some(api_key) = &self.openrouter_api_key else {
            tracing::warn!("OPENROUTER_API_KEY not set; remote toxicity checks disabled");
            return Ok(None);
        };
        let client = OpenRouterClient::new(
            api_key.clone(),
            self.openrouter_model.clone(),
            self.toxicity_api_url.clone(),
            self.toxicity_timeout,
        )?;
        Ok(Some(Arc::new(client)))
    }

    fn local_tier(&self) -> anyhow::Result<Option<Arc<dyn VerdictProvider>>> {
        let Some(model) = &self.local_model_name else {
            return Ok(None);
        };
        let url = self
            .local_model_url
            .clone()
            .unwrap_or_else(|| DEFAULT_OLLAMA_URL.to_string());
        tracing::info!("Local toxicity model {} at {}", model, url);
        let client = OllamaClient::new(url, model.clone(), self.toxicity_timeout)?;
        Ok(Some(Arc::new(client)))
    }
}

// ============================================================================
// EVENTS
// ============================================================================

/// Event handler for non-command Discord events.
async fn event_handler(
    _ctx: &serenity::Context,
    event: &serenity::FullEvent,
    _framework: poise::FrameworkContext<'_, Data, Error>,
    data: &Data,
) -> Result<(), Error> {
    if let serenity::FullEvent::Message { new_message } = event {
        handle_message(&data.gate, new_message).await;
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging so we can see what's happening
    tracing_subscriber::fmt::init();

    // Load environment variables from .env file (if it exists)
    dotenv::dotenv().ok();

    let settings = Settings::from_env()?;

    std::fs::create_dir_all(&settings.data_dir)
        .context("Failed to create data directory for SQLite files")?;
    let db_path = format!("{}/moderation.db", settings.data_dir);

    // ========================================================================
    // DEPENDENCY INJECTION
    // ========================================================================
    // This is the "composition root" where we wire everything together.

    let store = Arc::new(
        SqliteModerationStore::new(&db_path)
            .await
            .context("Failed to initialize moderation database")?,
    );

    let config = Arc::new(ConfigService::new(store.clone(), settings.group_defaults()));
    let blacklist = Arc::new(BlacklistMatcher::new(store.clone()));
    let metrics = Arc::new(ModerationMetrics::default());
    let classifier = ToxicityClassifier::new(
        settings.remote_tier()?,
        settings.local_tier()?,
        Arc::clone(&blacklist),
        Arc::clone(&config),
        Arc::clone(&metrics),
    )
    .with_timeout(settings.toxicity_timeout);

    let services = ModerationServices {
        rate_limiter: Arc::new(RateLimiter::new(Arc::clone(&config))),
        escalation: Arc::new(EscalationEngine::new(Arc::clone(&config), store.clone())),
        mutes: Arc::new(MuteStore::new(store.clone())),
        invites: Arc::new(InviteFilter::new()?),
        classifier: Arc::new(classifier),
        blacklist,
        config,
        metrics,
    };

    // Rebuild in-memory state before the first message arrives
    let overrides = services.config.load().await?;
    let lists = services.blacklist.load().await?;
    let mutes = services.mutes.load().await?;
    let warnings = services.escalation.restore(Utc::now()).await?;
    tracing::info!(
        overrides,
        blacklists = lists,
        mutes,
        warnings,
        "Moderation state restored"
    );

    let http = Arc::new(serenity::Http::new(&settings.token));
    let enforcer: Arc<dyn Enforcer> = Arc::new(SerenityEnforcer::new(
        Arc::clone(&http),
        Arc::clone(&services.config),
    ));

    let gate = Arc::new(MessageGate::new(services.clone(), Arc::clone(&enforcer)));
    let admin = Arc::new(ModerationAdmin::new(services.clone(), Arc::clone(&enforcer)));

    // Mutes that expired while we were offline are lifted on the first tick
    let _mute_sweeper = spawn_mute_sweeper(
        Arc::clone(&services.mutes),
        Arc::clone(&enforcer),
        Arc::clone(&services.metrics),
        settings.mute_sweep_interval,
    );
    let _idle_sweeper = spawn_idle_sweeper(Arc::clone(&gate), settings.idle_sweep_interval);

    let data = Data { gate, admin };

    // ========================================================================
    // DISCORD FRAMEWORK SETUP
    // ========================================================================

    let intents = serenity::GatewayIntents::GUILD_MESSAGES
        | serenity::GatewayIntents::MESSAGE_CONTENT // Required to read message content
        | serenity::GatewayIntents::GUILDS;

    let framework = poise::Framework::builder()
        .options(poise::FrameworkOptions {
            commands: vec![discord::moderation::commands::automod()],
            event_handler: |ctx, event, framework, data| {
                Box::pin(event_handler(ctx, event, framework, data))
            },
            ..Default::default()
        })
        .setup(|ctx, _ready, framework| {
            Box::pin(async move {
                tracing::info!("Bot is starting up...");
                poise::builtins::register_globally(ctx, &framework.options().commands).await?;
                tracing::info!("Commands registered, bot is ready");
                Ok(data)
            })
        })
        .build();

    let mut client = serenity::ClientBuilder::new(&settings.token, intents)
        .framework(framework)
        .await
        .context("Error creating client")?;

    client.start().await.context("Error running bot")?;
    Ok(())
}
