// Blacklist matcher - case-insensitive, word-boundary-safe phrase matching.
//
// Each group has a word set and a compiled matcher built from it. Small sets
// compile to one alternation regex; large sets compile to an Aho-Corasick
// automaton. Both run on lowercased text and accept a hit only when it starts
// and ends on a word boundary, so they agree on every input.
//
// Mutations are write-then-activate: the new set is persisted first, then the
// freshly built matcher replaces the old one with a single map insert. Readers
// clone the `Arc` and match outside the map lock, so they never see a
// half-built pattern.

use super::keyed_locks::KeyedLocks;
use super::moderation_ports::{BlacklistRepository, ModerationError};
use aho_corasick::AhoCorasick;
use dashmap::DashMap;
use regex::Regex;
use std::collections::BTreeSet;
use std::sync::Arc;

/// Word sets at least this large use the automaton instead of a regex.
pub const AUTOMATON_MIN_WORDS: usize = 32;

/// Word characters exactly as regex's Unicode `\w` defines them.
struct WordClass(Regex);

impl WordClass {
    fn new() -> Result<Self, ModerationError> {
        Regex::new(r"^\w$")
            .map(WordClass)
            .map_err(|e| ModerationError::Configuration(e.to_string()))
    }

    fn contains(&self, c: char) -> bool {
        let mut buf = [0u8; 4];
        self.0.is_match(c.encode_utf8(&mut buf))
    }

    /// Word boundary test with the same meaning as regex `\b`.
    fn is_boundary(&self, text: &str, at: usize) -> bool {
        let before = text[..at].chars().next_back().map(|c| self.contains(c)).unwrap_or(false);
        let after = text[at..].chars().next().map(|c| self.contains(c)).unwrap_or(false);
        before != after
    }
}

/// Normalise an admin-supplied phrase the way stored words are kept.
pub fn normalize_word(word: &str) -> Option<String> {
    let word = word.trim().to_lowercase();
    if word.is_empty() {
        None
    } else {
        Some(word)
    }
}

enum CompiledMatcher {
    /// Empty word set: matches nothing
    Empty,
    Regex(Regex),
    Automaton(AhoCorasick, WordClass),
}

impl CompiledMatcher {
    fn build(words: &BTreeSet<String>) -> Result<Self, ModerationError> {
        if words.is_empty() {
            return Ok(CompiledMatcher::Empty);
        }

        if words.len() >= AUTOMATON_MIN_WORDS {
            let automaton = AhoCorasick::new(words.iter())
                .map_err(|e| ModerationError::Configuration(e.to_string()))?;
            return Ok(CompiledMatcher::Automaton(automaton, WordClass::new()?));
        }

        let alternation = words
            .iter()
            .map(|w| regex::escape(w))
            .collect::<Vec<_>>()
            .join("|");
        let regex = Regex::new(&format!(r"\b(?:{})\b", alternation))
            .map_err(|e| ModerationError::Configuration(e.to_string()))?;
        Ok(CompiledMatcher::Regex(regex))
    }

    fn is_match(&self, text: &str) -> bool {
        let lowered = text.to_lowercase();
        match self {
            CompiledMatcher::Empty => false,
            CompiledMatcher::Regex(regex) => regex.is_match(&lowered),
            CompiledMatcher::Automaton(automaton, word) => automaton
                .find_overlapping_iter(&lowered)
                .any(|m| word.is_boundary(&lowered, m.start()) && word.is_boundary(&lowered, m.end())),
        }
    }
}

struct GroupBlacklist {
    words: BTreeSet<String>,
    matcher: CompiledMatcher,
}

impl GroupBlacklist {
    fn build(words: BTreeSet<String>) -> Result<Self, ModerationError> {
        let matcher = CompiledMatcher::build(&words)?;
        Ok(Self { words, matcher })
    }
}

pub struct BlacklistMatcher {
    repository: Arc<dyn BlacklistRepository>,
    groups: DashMap<u64, Arc<GroupBlacklist>>,
    write_locks: KeyedLocks<u64>,
}

impl BlacklistMatcher {
    pub fn new(repository: Arc<dyn BlacklistRepository>) -> Self {
        Self {
            repository,
            groups: DashMap::new(),
            write_locks: KeyedLocks::new(),
        }
    }

    /// Load every stored word set and compile its matcher.
    pub async fn load(&self) -> Result<usize, ModerationError> {
        let stored = self.repository.load_all().await?;
        let count = stored.len();
        for (group_id, words) in stored {
            let words = words.iter().filter_map(|w| normalize_word(w)).collect();
            self.groups
                .insert(group_id, Arc::new(GroupBlacklist::build(words)?));
        }
        Ok(count)
    }

    /// Whether `text` contains a blacklisted phrase of the group.
    pub fn contains(&self, group_id: u64, text: &str) -> bool {
        let current = self.groups.get(&group_id).map(|g| Arc::clone(&g));
        match current {
            Some(blacklist) => blacklist.matcher.is_match(text),
            None => false,
        }
    }

    /// Add a phrase. Returns `false` if it was already present.
    pub async fn add(&self, group_id: u64, word: &str) -> Result<bool, ModerationError> {
        let word = normalize_word(word)
            .ok_or_else(|| ModerationError::InvalidInput("word must not be empty".into()))?;
        self.mutate(group_id, |words| words.insert(word)).await
    }

    /// Remove a phrase. Returns `false` if it was not present.
    pub async fn remove(&self, group_id: u64, word: &str) -> Result<bool, ModerationError> {
        let word = normalize_word(word)
            .ok_or_else(|| ModerationError::InvalidInput("word must not be empty".into()))?;
        self.mutate(group_id, |words| words.remove(&word)).await
    }

    pub fn words(&self, group_id: u64) -> Vec<String> {
        self.groups
            .get(&group_id)
            .map(|g| g.words.iter().cloned().collect())
            .unwrap_or_default()
    }

    async fn mutate<F>(&self, group_id: u64, change: F) -> Result<bool, ModerationError>
    where
        F: FnOnce(&mut BTreeSet<String>) -> bool,
    {
        let _guard = self.write_locks.lock(&group_id).await;

        let mut words = self
            .groups
            .get(&group_id)
            .map(|g| g.words.clone())
            .unwrap_or_default();
        if !change(&mut words) {
            return Ok(false);
        }

        let rebuilt = GroupBlacklist::build(words)?;
        self.repository.save_words(group_id, &rebuilt.words).await?;
        self.groups.insert(group_id, Arc::new(rebuilt));

        tracing::info!(group_id, "Blacklist rebuilt");
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::moderation::test_support::MemoryStore;

    fn words(list: &[&str]) -> BTreeSet<String> {
        list.iter().map(|w| w.to_string()).collect()
    }

    /// Both strategies must agree on every sample.
    fn assert_strategies_agree(list: &[&str], samples: &[(&str, bool)]) {
        let regex = CompiledMatcher::build(&words(list)).unwrap();
        assert!(matches!(regex, CompiledMatcher::Regex(_)));

        let mut padded = words(list);
        for i in 0..AUTOMATON_MIN_WORDS {
            padded.insert(format!("zzfiller{}", i));
        }
        let automaton = CompiledMatcher::build(&padded).unwrap();
        assert!(matches!(automaton, CompiledMatcher::Automaton(..)));

        for (text, expected) in samples {
            assert_eq!(regex.is_match(text), *expected, "regex on {:?}", text);
            assert_eq!(automaton.is_match(text), *expected, "automaton on {:?}", text);
        }
    }

    #[test]
    fn test_word_boundaries_and_case() {
        assert_strategies_agree(
            &["ban"],
            &[
                ("ban", true),
                ("BAN", true),
                ("Ban!", true),
                ("you got a ban.", true),
                ("banana", false),
                ("urban legend", false),
                ("bandwidth ban", true),
                ("", false),
            ],
        );
    }

    #[test]
    fn test_combining_marks_and_connectors_are_word_characters() {
        assert_strategies_agree(
            &["ban"],
            &[
                // U+0301 combining acute accent (Mn)
                ("ban\u{301}", false),
                ("\u{301}ban", false),
                // U+203F undertie (Pc)
                ("ban\u{203F}x", false),
                // U+0903 devanagari visarga (Mc)
                ("ban\u{903}", false),
                ("ban \u{301}", true),
            ],
        );
    }

    #[test]
    fn test_phrases_and_overlaps() {
        assert_strategies_agree(
            &["bad word", "bad"],
            &[
                ("that is a BAD WORD here", true),
                ("badword", false),
                ("badly", false),
                ("so bad", true),
            ],
        );
    }

    #[test]
    fn test_empty_set_matches_nothing() {
        let matcher = CompiledMatcher::build(&BTreeSet::new()).unwrap();
        assert!(!matcher.is_match("anything at all"));
        assert!(!matcher.is_match(""));
    }

    #[tokio::test]
    async fn test_add_remove_rebuilds_and_persists() {
        let store = Arc::new(MemoryStore::new());
        let matcher = BlacklistMatcher::new(store.clone());

        assert!(!matcher.contains(1, "no ban here"));
        assert!(matcher.add(1, "  BAN ").await.unwrap());
        assert!(!matcher.add(1, "ban").await.unwrap());
        assert!(matcher.contains(1, "no ban here"));
        assert!(!matcher.contains(2, "no ban here"));
        assert_eq!(store.blacklist_of(1), words(&["ban"]));

        assert!(matcher.remove(1, "ban").await.unwrap());
        assert!(!matcher.remove(1, "ban").await.unwrap());
        assert!(!matcher.contains(1, "no ban here"));
        assert!(store.blacklist_of(1).is_empty());
    }

    #[tokio::test]
    async fn test_failed_write_does_not_activate() {
        let store = Arc::new(MemoryStore::new());
        let matcher = BlacklistMatcher::new(store.clone());
        store.fail_writes(true);

        let result = matcher.add(1, "ban").await;
        assert!(matches!(result, Err(ModerationError::Persistence(_))));
        assert!(!matcher.contains(1, "ban"));
        assert!(matcher.words(1).is_empty());
    }

    #[tokio::test]
    async fn test_empty_word_is_rejected() {
        let matcher = BlacklistMatcher::new(Arc::new(MemoryStore::new()));
        assert!(matches!(
            matcher.add(1, "   ").await,
            Err(ModerationError::InvalidInput(_))
        ));
    }

    #[tokio::test]
    async fn test_load_restores_matchers() {
        let store = Arc::new(MemoryStore::new());
        BlacklistMatcher::new(store.clone())
            .add(4, "spoiler")
            .await
            .unwrap();

        let reloaded = BlacklistMatcher::new(store);
        assert_eq!(reloaded.load().await.unwrap(), 1);
        assert!(reloaded.contains(4, "Spoiler alert"));
    }
}
