// Background sweeps.
//
// Two independent timer tasks:
// - mute sweep: lifts expired mutes through the Enforcer (every 30s by default)
// - idle sweep: drops per-member state nobody touched for a day (hourly)
//
// Each returns its JoinHandle; aborting the handle cancels that loop only.
// A failing iteration is logged and the loop carries on with the next tick.

use super::message_gate::MessageGate;
use super::metrics::ModerationMetrics;
use super::moderation_ports::Enforcer;
use super::mute_store::MuteStore;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

pub const DEFAULT_MUTE_SWEEP_INTERVAL: Duration = Duration::from_secs(30);
pub const DEFAULT_IDLE_SWEEP_INTERVAL: Duration = Duration::from_secs(60 * 60);

/// Lift every mute that expired by `now`. Returns how many were lifted.
pub async fn run_mute_sweep(
    mutes: &MuteStore,
    enforcer: &Arc<dyn Enforcer>,
    metrics: &ModerationMetrics,
    now: DateTime<Utc>,
) -> usize {
    let mut lifted = 0;
    for record in mutes.sweep(now) {
        let (group_id, user_id) = record.member();

        // The record may have been replaced by a fresh mute since the snapshot
        match mutes.lift_expired(group_id, user_id, now).await {
            Ok(Some(_)) => {}
            Ok(None) => continue,
            // Stays in the store; the next tick retries
            Err(e) => {
                tracing::error!(group_id, user_id, "Failed to persist mute removal: {}", e);
                continue;
            }
        }

        if let Err(e) = enforcer.remove_mute_role(group_id, user_id).await {
            tracing::warn!(group_id, user_id, "Failed to remove mute role: {}", e);
        }

        // A new mute imposed while the role was being removed needs it back
        if mutes.is_active(group_id, user_id, now) {
            if let Err(e) = enforcer.apply_mute_role(group_id, user_id).await {
                tracing::warn!(group_id, user_id, "Failed to restore mute role: {}", e);
            }
            continue;
        }

        lifted += 1;
        metrics.record_unmute();
        let text = format!("Unmuted {} (mute expired)", enforcer.mention(user_id));
        if let Err(e) = enforcer.log_moderation_event(group_id, &text).await {
            tracing::warn!(group_id, "Failed to write moderation log: {}", e);
        }
    }
    lifted
}

pub fn spawn_mute_sweeper(
    mutes: Arc<MuteStore>,
    enforcer: Arc<dyn Enforcer>,
    metrics: Arc<ModerationMetrics>,
    every: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            let lifted = run_mute_sweep(&mutes, &enforcer, &metrics, Utc::now()).await;
            if lifted > 0 {
                tracing::info!("Mute sweep lifted {} mute(s)", lifted);
            } else {
                tracing::debug!("Mute sweep found nothing to lift ({} active)", mutes.active_count());
            }
        }
    })
}

pub fn spawn_idle_sweeper(gate: Arc<MessageGate>, every: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        // The first tick completes immediately; nothing is idle at startup.
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let removed = gate.sweep_idle(Utc::now());
            tracing::debug!("Idle sweep removed {} entries", removed);
        }
    })
}
