// In-memory ports for moderation tests.

use super::blacklist::BlacklistMatcher;
use super::config_service::ConfigService;
use super::escalation::EscalationEngine;
use super::invite_filter::InviteFilter;
use super::message_gate::ModerationServices;
use super::metrics::ModerationMetrics;
use super::moderation_models::{GroupConfig, InboundMessage, MemberKey, MuteRecord};
use super::moderation_ports::{
    BlacklistRepository, ConfigRepository, Enforcer, EnforcerError, ModerationError,
    MuteRepository, WarningLedger,
};
use super::mute_store::MuteStore;
use super::rate_limiter::RateLimiter;
use super::toxicity::{TierError, ToxicityClassifier, VerdictProvider};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

// ============================================================================
// MEMORY STORE
// ============================================================================

#[derive(Default)]
pub struct MemoryStore {
    configs: Mutex<HashMap<u64, String>>,
    blacklists: Mutex<HashMap<u64, BTreeSet<String>>>,
    mutes: Mutex<HashMap<MemberKey, MuteRecord>>,
    warnings: Mutex<Vec<(MemberKey, DateTime<Utc>)>>,
    mute_writes: AtomicUsize,
    failing: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every write fail with a persistence error.
    pub fn fail_writes(&self, fail: bool) {
        self.failing.store(fail, Ordering::SeqCst);
    }

    pub fn put_raw_config(&self, group_id: u64, raw: &str) {
        self.configs.lock().unwrap().insert(group_id, raw.to_string());
    }

    pub fn blacklist_of(&self, group_id: u64) -> BTreeSet<String> {
        self.blacklists
            .lock()
            .unwrap()
            .get(&group_id)
            .cloned()
            .unwrap_or_default()
    }

    pub fn mutes(&self) -> Vec<MuteRecord> {
        self.mutes.lock().unwrap().values().cloned().collect()
    }

    pub fn mute_writes(&self) -> usize {
        self.mute_writes.load(Ordering::SeqCst)
    }

    fn check_writable(&self) -> Result<(), ModerationError> {
        if self.failing.load(Ordering::SeqCst) {
            Err(ModerationError::Persistence("disk full".to_string()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl ConfigRepository for MemoryStore {
    async fn load_overrides(&self) -> Result<Vec<(u64, String)>, ModerationError> {
        Ok(self
            .configs
            .lock()
            .unwrap()
            .iter()
            .map(|(g, raw)| (*g, raw.clone()))
            .collect())
    }

    async fn save_override(
        &self,
        group_id: u64,
        config: &GroupConfig,
    ) -> Result<(), ModerationError> {
        self.check_writable()?;
        let raw = serde_json::to_string(config).unwrap();
        self.configs.lock().unwrap().insert(group_id, raw);
        Ok(())
    }
}

#[async_trait]
impl BlacklistRepository for MemoryStore {
    async fn load_all(&self) -> Result<HashMap<u64, BTreeSet<String>>, ModerationError> {
        Ok(self.blacklists.lock().unwrap().clone())
    }

    async fn save_words(
        &self,
        group_id: u64,
        words: &BTreeSet<String>,
    ) -> Result<(), ModerationError> {
        self.check_writable()?;
        self.blacklists
            .lock()
            .unwrap()
            .insert(group_id, words.clone());
        Ok(())
    }
}

#[async_trait]
impl MuteRepository for MemoryStore {
    async fn load_all(&self) -> Result<Vec<MuteRecord>, ModerationError> {
        Ok(self.mutes())
    }

    async fn save(&self, record: &MuteRecord) -> Result<(), ModerationError> {
        self.check_writable()?;
        self.mute_writes.fetch_add(1, Ordering::SeqCst);
        self.mutes
            .lock()
            .unwrap()
            .insert(record.member(), record.clone());
        Ok(())
    }

    async fn delete(&self, group_id: u64, user_id: u64) -> Result<(), ModerationError> {
        self.check_writable()?;
        self.mutes.lock().unwrap().remove(&(group_id, user_id));
        Ok(())
    }
}

#[async_trait]
impl WarningLedger for MemoryStore {
    async fn append(
        &self,
        group_id: u64,
        user_id: u64,
        at: DateTime<Utc>,
    ) -> Result<(), ModerationError> {
        self.check_writable()?;
        self.warnings.lock().unwrap().push(((group_id, user_id), at));
        Ok(())
    }

    async fn clear(&self, group_id: u64, user_id: u64) -> Result<(), ModerationError> {
        self.check_writable()?;
        self.warnings
            .lock()
            .unwrap()
            .retain(|(member, _)| *member != (group_id, user_id));
        Ok(())
    }

    async fn load_since(
        &self,
        since: DateTime<Utc>,
    ) -> Result<Vec<(MemberKey, DateTime<Utc>)>, ModerationError> {
        let mut entries: Vec<_> = self
            .warnings
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, at)| *at >= since)
            .cloned()
            .collect();
        entries.sort_by_key(|(_, at)| *at);
        Ok(entries)
    }
}

// ============================================================================
// RECORDING ENFORCER
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub enum EnforcerCall {
    Delete(u64),
    Notice(u64, String),
    ApplyMute(u64, u64),
    RemoveMute(u64, u64),
    Log(u64, String),
}

#[derive(Default)]
pub struct RecordingEnforcer {
    calls: Mutex<Vec<EnforcerCall>>,
    deny_roles: AtomicBool,
}

impl RecordingEnforcer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> Vec<EnforcerCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn notices(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                EnforcerCall::Notice(_, text) => Some(text),
                _ => None,
            })
            .collect()
    }

    pub fn logs(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                EnforcerCall::Log(_, text) => Some(text),
                _ => None,
            })
            .collect()
    }

    /// Make role changes fail as if the bot lacked the permission.
    pub fn deny_roles(&self, deny: bool) {
        self.deny_roles.store(deny, Ordering::SeqCst);
    }

    fn record(&self, call: EnforcerCall) {
        self.calls.lock().unwrap().push(call);
    }

    fn role_change(&self, call: EnforcerCall) -> Result<(), EnforcerError> {
        if self.deny_roles.load(Ordering::SeqCst) {
            return Err(EnforcerError::PermissionDenied("Manage Roles".to_string()));
        }
        self.record(call);
        Ok(())
    }
}

#[async_trait]
impl Enforcer for RecordingEnforcer {
    async fn delete_message(&self, message: &InboundMessage) -> Result<(), EnforcerError> {
        self.record(EnforcerCall::Delete(message.message_id));
        Ok(())
    }

    async fn send_ephemeral_notice(
        &self,
        channel_id: u64,
        text: &str,
    ) -> Result<(), EnforcerError> {
        self.record(EnforcerCall::Notice(channel_id, text.to_string()));
        Ok(())
    }

    async fn apply_mute_role(&self, group_id: u64, user_id: u64) -> Result<(), EnforcerError> {
        self.role_change(EnforcerCall::ApplyMute(group_id, user_id))
    }

    async fn remove_mute_role(&self, group_id: u64, user_id: u64) -> Result<(), EnforcerError> {
        self.role_change(EnforcerCall::RemoveMute(group_id, user_id))
    }

    async fn log_moderation_event(&self, group_id: u64, text: &str) -> Result<(), EnforcerError> {
        self.record(EnforcerCall::Log(group_id, text.to_string()));
        Ok(())
    }
}

// ============================================================================
// SCRIPTED PROVIDER
// ============================================================================

enum Script {
    Answer,
    Fail,
    Hang,
}

pub struct ScriptedProvider {
    script: Script,
    answer: AtomicBool,
    pub calls: AtomicUsize,
}

impl ScriptedProvider {
    fn with(script: Script, answer: bool) -> Self {
        Self {
            script,
            answer: AtomicBool::new(answer),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn answering(toxic: bool) -> Self {
        Self::with(Script::Answer, toxic)
    }

    pub fn failing() -> Self {
        Self::with(Script::Fail, false)
    }

    /// Never answers; exercises the tier timeout.
    pub fn hanging() -> Self {
        Self::with(Script::Hang, false)
    }

    pub fn set_answer(&self, toxic: bool) {
        self.answer.store(toxic, Ordering::SeqCst);
    }
}

#[async_trait]
impl VerdictProvider for ScriptedProvider {
    fn name(&self) -> &'static str {
        "scripted"
    }

    async fn verdict(&self, _text: &str) -> Result<bool, TierError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.script {
            Script::Answer => Ok(self.answer.load(Ordering::SeqCst)),
            Script::Fail => Err(TierError::Transport("connection refused".to_string())),
            Script::Hang => {
                std::future::pending::<()>().await;
                Err(TierError::Unavailable("unreachable".to_string()))
            }
        }
    }
}

// ============================================================================
// WIRING
// ============================================================================

pub fn build_services(
    store: Arc<MemoryStore>,
    remote: Option<Arc<ScriptedProvider>>,
    defaults: GroupConfig,
) -> ModerationServices {
    let config = Arc::new(ConfigService::new(store.clone(), defaults));
    let blacklist = Arc::new(BlacklistMatcher::new(store.clone()));
    let metrics = Arc::new(ModerationMetrics::default());
    let classifier = ToxicityClassifier::new(
        remote.map(|p| p as Arc<dyn VerdictProvider>),
        None,
        Arc::clone(&blacklist),
        Arc::clone(&config),
        Arc::clone(&metrics),
    )
    .with_timeout(std::time::Duration::from_millis(50));

    ModerationServices {
        rate_limiter: Arc::new(RateLimiter::new(Arc::clone(&config))),
        escalation: Arc::new(EscalationEngine::new(Arc::clone(&config), store.clone())),
        mutes: Arc::new(MuteStore::new(store)),
        invites: Arc::new(InviteFilter::new().unwrap()),
        classifier: Arc::new(classifier),
        blacklist,
        config,
        metrics,
    }
}

/// A message in group `group_id`, channel 3, sent `secs` after a fixed epoch.
/// The message id equals `secs`.
pub fn message_at(group_id: u64, user_id: u64, content: &str, secs: i64) -> InboundMessage {
    InboundMessage {
        message_id: secs as u64,
        group_id,
        channel_id: 3,
        user_id,
        content: content.to_string(),
        timestamp: DateTime::from_timestamp(1_700_000_000 + secs, 0).unwrap(),
    }
}
