// Toxicity classifier - remote verdict with a cache and a local fallback chain.
//
// Order of work for one message:
// 1. per-user quota (token bucket); an exhausted quota fails open
// 2. verdict cache
// 3. tiers in order: remote service, local model, blacklist
// 4. cache whatever verdict was resolved
//
// Each tier either yields a verdict or a `TierError` that moves the chain on
// to the next tier. The last tier (blacklist) cannot fail, so `classify` only
// ever returns an error for the quota.

use super::blacklist::BlacklistMatcher;
use super::config_service::ConfigService;
use super::metrics::ModerationMetrics;
use super::verdict_cache::VerdictCache;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Instruction sent to every model tier. Replies must be one of the two words.
pub const TOXICITY_INSTRUCTION: &str = "Only respond with 'toxic' or 'safe'.";

pub const DEFAULT_TIER_TIMEOUT: Duration = Duration::from_secs(10);

// ============================================================================
// ERRORS
// ============================================================================

/// Why a tier could not produce a verdict.
#[derive(Debug, Error)]
pub enum TierError {
    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("malformed reply: {0}")]
    Malformed(String),

    #[error("tier unavailable: {0}")]
    Unavailable(String),
}

#[derive(Debug, Error, PartialEq)]
pub enum ClassifierError {
    /// The user's classifier quota is exhausted; the message is not checked.
    #[error("toxicity check rate limited")]
    RateLimited,
}

// ============================================================================
// PROVIDER TRAIT (PORT)
// ============================================================================

/// A model that judges a message toxic or safe.
#[async_trait]
pub trait VerdictProvider: Send + Sync {
    fn name(&self) -> &'static str;

    async fn verdict(&self, text: &str) -> Result<bool, TierError>;
}

/// Parse a model reply under the `toxic`/`safe` contract.
pub fn parse_verdict(reply: &str) -> Result<bool, TierError> {
    let word = reply
        .trim()
        .trim_matches(|c: char| !c.is_alphanumeric())
        .to_lowercase();
    match word.as_str() {
        "toxic" => Ok(true),
        "safe" => Ok(false),
        _ => Err(TierError::Malformed(reply.chars().take(64).collect())),
    }
}

// ============================================================================
// MODELS
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerdictSource {
    Cache,
    Remote,
    LocalModel,
    Blacklist,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Verdict {
    pub toxic: bool,
    pub source: VerdictSource,
}

/// Classic token bucket: `rate` tokens, refilled continuously over `per`.
#[derive(Debug, Clone)]
struct TokenBucket {
    tokens: f64,
    last_refill: DateTime<Utc>,
}

impl TokenBucket {
    fn full(rate: u32, now: DateTime<Utc>) -> Self {
        Self {
            tokens: rate as f64,
            last_refill: now,
        }
    }

    fn refill(&mut self, rate: u32, per: Duration, now: DateTime<Utc>) {
        let elapsed = (now - self.last_refill).num_milliseconds().max(0) as f64 / 1000.0;
        let per_token = per.as_secs_f64() / rate.max(1) as f64;
        self.tokens = (self.tokens + elapsed / per_token).min(rate as f64);
        self.last_refill = now;
    }

    fn try_acquire(&mut self, rate: u32, per: Duration, now: DateTime<Utc>) -> bool {
        self.refill(rate, per, now);
        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }
}

// ============================================================================
// CLASSIFIER
// ============================================================================

pub struct ToxicityClassifier {
    remote: Option<Arc<dyn VerdictProvider>>,
    local: Option<Arc<dyn VerdictProvider>>,
    blacklist: Arc<BlacklistMatcher>,
    config: Arc<ConfigService>,
    metrics: Arc<ModerationMetrics>,
    cache: VerdictCache,
    quotas: DashMap<u64, TokenBucket>,
    timeout: Duration,
}

impl ToxicityClassifier {
    pub fn new(
        remote: Option<Arc<dyn VerdictProvider>>,
        local: Option<Arc<dyn VerdictProvider>>,
        blacklist: Arc<BlacklistMatcher>,
        config: Arc<ConfigService>,
        metrics: Arc<ModerationMetrics>,
    ) -> Self {
        Self {
            remote,
            local,
            blacklist,
            config,
            metrics,
            cache: VerdictCache::new(),
            quotas: DashMap::new(),
            timeout: DEFAULT_TIER_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Classify a message. Never fails except for an exhausted quota.
    pub async fn classify(
        &self,
        group_id: u64,
        user_id: u64,
        text: &str,
        now: DateTime<Utc>,
    ) -> Result<Verdict, ClassifierError> {
        let config = self.config.get(group_id);
        let per = config.toxicity_period();

        let allowed = self
            .quotas
            .entry(user_id)
            .or_insert_with(|| TokenBucket::full(config.toxicity_rate, now))
            .try_acquire(config.toxicity_rate, per, now);
        if !allowed {
            tracing::debug!(group_id, user_id, "Toxicity check skipped: quota exhausted");
            return Err(ClassifierError::RateLimited);
        }

        if let Some(toxic) = self.cache.get(group_id, text).await {
            return Ok(Verdict {
                toxic,
                source: VerdictSource::Cache,
            });
        }

        let verdict = self.resolve(group_id, text).await;
        self.cache
            .insert(group_id, text, verdict.toxic, config.cache_capacity)
            .await;
        Ok(verdict)
    }

    async fn resolve(&self, group_id: u64, text: &str) -> Verdict {
        let tiers = [
            (self.remote.as_ref(), VerdictSource::Remote),
            (self.local.as_ref(), VerdictSource::LocalModel),
        ];

        let mut fell_back = false;
        for (provider, source) in tiers {
            let Some(provider) = provider else { continue };
            match self.ask(provider.as_ref(), text).await {
                Ok(toxic) => {
                    if fell_back {
                        self.metrics.record_api_fallback();
                    }
                    return Verdict { toxic, source };
                }
                Err(e) => {
                    tracing::warn!(group_id, tier = provider.name(), "Toxicity tier failed: {}", e);
                    fell_back = true;
                }
            }
        }

        if fell_back {
            self.metrics.record_api_fallback();
        }
        Verdict {
            toxic: self.blacklist.contains(group_id, text),
            source: VerdictSource::Blacklist,
        }
    }

    async fn ask(&self, provider: &dyn VerdictProvider, text: &str) -> Result<bool, TierError> {
        match tokio::time::timeout(self.timeout, provider.verdict(text)).await {
            Ok(result) => result,
            Err(_) => Err(TierError::Timeout(self.timeout)),
        }
    }

    /// Forget quotas that have fully refilled. Returns how many were removed.
    ///
    /// Buckets are keyed by user across groups, so a bucket is only dropped
    /// once the longest configured period has passed since its last use.
    pub fn sweep_idle_quotas(&self, now: DateTime<Utc>) -> usize {
        let before = self.quotas.len();
        let per = self.config.max_toxicity_period();
        self.quotas.retain(|_, bucket| {
            let idle = (now - bucket.last_refill).num_seconds().max(0) as u64;
            idle < per.as_secs()
        });
        before.saturating_sub(self.quotas.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::moderation::moderation_models::GroupConfig;
    use crate::core::moderation::test_support::{MemoryStore, ScriptedProvider};
    use std::sync::atomic::Ordering;

    struct Fixture {
        classifier: ToxicityClassifier,
        config: Arc<ConfigService>,
        metrics: Arc<ModerationMetrics>,
        blacklist: Arc<BlacklistMatcher>,
    }

    fn fixture(
        remote: Option<Arc<ScriptedProvider>>,
        local: Option<Arc<ScriptedProvider>>,
        defaults: GroupConfig,
    ) -> Fixture {
        let store = Arc::new(MemoryStore::new());
        let config = Arc::new(ConfigService::new(store.clone(), defaults));
        let blacklist = Arc::new(BlacklistMatcher::new(store));
        let metrics = Arc::new(ModerationMetrics::default());
        let classifier = ToxicityClassifier::new(
            remote.map(|p| p as Arc<dyn VerdictProvider>),
            local.map(|p| p as Arc<dyn VerdictProvider>),
            Arc::clone(&blacklist),
            Arc::clone(&config),
            Arc::clone(&metrics),
        )
        .with_timeout(Duration::from_millis(50));
        Fixture {
            classifier,
            config,
            metrics,
            blacklist,
        }
    }

    fn now() -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000, 0).unwrap()
    }

    #[test]
    fn test_parse_verdict_contract() {
        assert!(parse_verdict("toxic").unwrap());
        assert!(parse_verdict(" Toxic.\n").unwrap());
        assert!(!parse_verdict("'safe'").unwrap());
        assert!(matches!(
            parse_verdict("maybe"),
            Err(TierError::Malformed(_))
        ));
        assert!(matches!(parse_verdict(""), Err(TierError::Malformed(_))));
    }

    #[tokio::test]
    async fn test_second_classification_hits_cache() {
        let remote = Arc::new(ScriptedProvider::answering(true));
        let f = fixture(Some(remote.clone()), None, GroupConfig::default());

        let first = f.classifier.classify(1, 2, "you are awful", now()).await.unwrap();
        let second = f.classifier.classify(1, 2, "you are awful", now()).await.unwrap();

        assert_eq!(remote.calls.load(Ordering::SeqCst), 1);
        assert!(first.toxic && second.toxic);
        assert_eq!(first.source, VerdictSource::Remote);
        assert_eq!(second.source, VerdictSource::Cache);
    }

    #[tokio::test]
    async fn test_remote_failure_uses_local_model() {
        let remote = Arc::new(ScriptedProvider::failing());
        let local = Arc::new(ScriptedProvider::answering(true));
        let f = fixture(Some(remote), Some(local.clone()), GroupConfig::default());

        let verdict = f.classifier.classify(1, 2, "hello", now()).await.unwrap();
        assert_eq!(verdict.source, VerdictSource::LocalModel);
        assert!(verdict.toxic);
        assert_eq!(f.metrics.snapshot().api_fallbacks, 1);
    }

    #[tokio::test]
    async fn test_timeout_falls_through_to_blacklist() {
        let remote = Arc::new(ScriptedProvider::hanging());
        let f = fixture(Some(remote), None, GroupConfig::default());
        f.blacklist.add(1, "ban").await.unwrap();

        let verdict = f.classifier.classify(1, 2, "ban this", now()).await.unwrap();
        assert_eq!(verdict.source, VerdictSource::Blacklist);
        assert!(verdict.toxic);

        let verdict = f.classifier.classify(1, 2, "hello", now()).await.unwrap();
        assert!(!verdict.toxic);
    }

    #[tokio::test]
    async fn test_no_tiers_configured_uses_blacklist_without_fallback_metric() {
        let f = fixture(None, None, GroupConfig::default());
        let verdict = f.classifier.classify(1, 2, "hello", now()).await.unwrap();
        assert_eq!(verdict.source, VerdictSource::Blacklist);
        assert_eq!(f.metrics.snapshot().api_fallbacks, 0);
    }

    #[tokio::test]
    async fn test_quota_fails_open_without_remote_call() {
        let remote = Arc::new(ScriptedProvider::answering(false));
        let f = fixture(
            Some(remote.clone()),
            None,
            GroupConfig {
                toxicity_rate: 2,
                toxicity_per_secs: 60,
                ..Default::default()
            },
        );

        assert!(f.classifier.classify(1, 2, "a", now()).await.is_ok());
        assert!(f.classifier.classify(1, 2, "b", now()).await.is_ok());
        assert_eq!(
            f.classifier.classify(1, 2, "c", now()).await,
            Err(ClassifierError::RateLimited)
        );
        assert_eq!(remote.calls.load(Ordering::SeqCst), 2);

        // Other users keep their own quota
        assert!(f.classifier.classify(1, 3, "c", now()).await.is_ok());

        // One token refills after per/rate seconds
        let later = now() + chrono::Duration::seconds(30);
        assert!(f.classifier.classify(1, 2, "c", later).await.is_ok());
    }

    #[tokio::test]
    async fn test_cache_respects_group_capacity() {
        let remote = Arc::new(ScriptedProvider::answering(false));
        let f = fixture(
            Some(remote.clone()),
            None,
            GroupConfig {
                cache_capacity: 2,
                toxicity_rate: 100,
                ..Default::default()
            },
        );

        for text in ["a", "b", "c"] {
            f.classifier.classify(1, 2, text, now()).await.unwrap();
        }
        // "a" was evicted, so it goes to the remote again
        f.classifier.classify(1, 2, "a", now()).await.unwrap();
        assert_eq!(remote.calls.load(Ordering::SeqCst), 4);
        // "c" is still cached
        let verdict = f.classifier.classify(1, 2, "c", now()).await.unwrap();
        assert_eq!(verdict.source, VerdictSource::Cache);
    }

    #[tokio::test]
    async fn test_idle_sweep_keeps_bucket_of_slow_refilling_group() {
        let f = fixture(None, None, GroupConfig::default());
        f.config
            .update(1, |c| {
                c.toxicity_rate = 2;
                c.toxicity_per_secs = 3600;
            })
            .await
            .unwrap();

        assert!(f.classifier.classify(1, 2, "a", now()).await.is_ok());
        assert!(f.classifier.classify(1, 2, "b", now()).await.is_ok());

        // Past the default 60s period but far from a full hour-long refill
        let later = now() + chrono::Duration::seconds(120);
        assert_eq!(f.classifier.sweep_idle_quotas(later), 0);
        assert_eq!(
            f.classifier.classify(1, 2, "c", later).await,
            Err(ClassifierError::RateLimited)
        );

        let much_later = later + chrono::Duration::seconds(3600);
        assert_eq!(f.classifier.sweep_idle_quotas(much_later), 1);
    }
}
