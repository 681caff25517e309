// Bounded caches of toxicity verdicts, one per group, keyed by normalized text.
//
// Each group is bounded by its own capacity, and eviction is by insertion
// order only: the group's oldest inserted entry goes first once that group is
// over capacity. Entries never expire by time. The capacity check and the
// eviction happen under one lock, so concurrent inserts can never push a group
// past its bound.

use std::collections::{HashMap, VecDeque};
use tokio::sync::Mutex;

/// Collapse whitespace and lowercase, so trivially different spellings of the
/// same message share a verdict.
pub fn normalize_text(text: &str) -> String {
    text.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

#[derive(Default)]
struct GroupVerdicts {
    verdicts: HashMap<String, bool>,
    order: VecDeque<String>,
}

#[derive(Default)]
pub struct VerdictCache {
    groups: Mutex<HashMap<u64, GroupVerdicts>>,
}

impl VerdictCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self, group_id: u64, text: &str) -> Option<bool> {
        let key = normalize_text(text);
        self.groups
            .lock()
            .await
            .get(&group_id)
            .and_then(|group| group.verdicts.get(&key).copied())
    }

    /// Insert a verdict, evicting the group's oldest entries while the group
    /// holds more than `capacity`. Other groups are never touched.
    /// Re-inserting an existing key updates the verdict but keeps its age.
    pub async fn insert(&self, group_id: u64, text: &str, toxic: bool, capacity: usize) {
        let key = normalize_text(text);
        let mut groups = self.groups.lock().await;
        let group = groups.entry(group_id).or_default();

        if group.verdicts.insert(key.clone(), toxic).is_none() {
            group.order.push_back(key);
        }

        while group.verdicts.len() > capacity.max(1) {
            match group.order.pop_front() {
                Some(oldest) => {
                    group.verdicts.remove(&oldest);
                }
                None => break,
            }
        }
    }

    #[cfg(test)]
    pub async fn len(&self) -> usize {
        self.groups
            .lock()
            .await
            .values()
            .map(|group| group.verdicts.len())
            .sum()
    }
}
