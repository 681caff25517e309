// Burst detector - sliding window of recent message timestamps per member.
//
// Each (group, user) owns a bounded window whose capacity is the group's burst
// limit. A burst is a full window whose oldest and newest entries are closer
// together than the burst interval. DashMap entry locking gives per-member
// mutual exclusion without blocking other members.

use super::config_service::ConfigService;
use super::moderation_models::MemberKey;
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use std::collections::VecDeque;
use std::sync::Arc;

/// Windows idle for longer than this are dropped by `sweep_idle`.
pub const IDLE_RETENTION_HOURS: i64 = 24;

#[derive(Debug)]
struct SpamWindow {
    capacity: usize,
    timestamps: VecDeque<DateTime<Utc>>,
}

impl SpamWindow {
    fn new(capacity: usize) -> Self {
        Self {
            capacity,
            timestamps: VecDeque::with_capacity(capacity),
        }
    }

    fn push(&mut self, now: DateTime<Utc>) {
        if self.timestamps.len() == self.capacity {
            self.timestamps.pop_front();
        }
        self.timestamps.push_back(now);
    }

    fn is_burst(&self, interval: Duration) -> bool {
        match (self.timestamps.front(), self.timestamps.back()) {
            (Some(oldest), Some(newest)) if self.timestamps.len() == self.capacity => {
                *newest - *oldest < interval
            }
            _ => false,
        }
    }

    fn last_seen(&self) -> Option<DateTime<Utc>> {
        self.timestamps.back().copied()
    }
}

pub struct RateLimiter {
    config: Arc<ConfigService>,
    windows: DashMap<MemberKey, SpamWindow>,
}

impl RateLimiter {
    pub fn new(config: Arc<ConfigService>) -> Self {
        Self {
            config,
            windows: DashMap::new(),
        }
    }

    /// Record a message and report whether it completes a burst.
    ///
    /// Messages from exempt channels are not counted at all. When the
    /// configured burst limit differs from the window's capacity the window is
    /// replaced, discarding the member's history. On a burst the caller should
    /// `reset` the window.
    pub fn check_and_record(
        &self,
        group_id: u64,
        user_id: u64,
        channel_id: u64,
        now: DateTime<Utc>,
    ) -> bool {
        let config = self.config.get(group_id);
        if config.is_exempt(channel_id) {
            return false;
        }

        let capacity = config.burst_limit as usize;
        let mut window = self
            .windows
            .entry((group_id, user_id))
            .or_insert_with(|| SpamWindow::new(capacity));

        if window.capacity != capacity {
            *window = SpamWindow::new(capacity);
        }

        window.push(now);
        window.is_burst(config.burst_window())
    }

    /// Clear a member's window, typically right after a burst was reported.
    pub fn reset(&self, group_id: u64, user_id: u64) {
        if let Some(mut window) = self.windows.get_mut(&(group_id, user_id)) {
            window.timestamps.clear();
        }
    }

    /// Drop windows with no message in the last 24 hours. Returns how many
    /// windows were removed.
    pub fn sweep_idle(&self, now: DateTime<Utc>) -> usize {
        let cutoff = now - Duration::hours(IDLE_RETENTION_HOURS);
        let before = self.windows.len();
        self.windows
            .retain(|_, window| matches!(window.last_seen(), Some(last) if last >= cutoff));
        before.saturating_sub(self.windows.len())
    }

    #[cfg(test)]
    pub fn tracked_members(&self) -> usize {
        self.windows.len()
    }
}
