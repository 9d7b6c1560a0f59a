//! # Fanout Rate Governor
//! Per-(channel, account) throttling that keeps sender accounts alive.
//!
//! Three policies stack per slot: randomized inter-send pacing (burst
//! patterns get accounts flagged), a rolling daily cap on bulk runs, and
//! a cooldown window after every completed bulk run.

pub mod store;

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Local, NaiveDate, TimeZone, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use fanout_core::config::GovernorConfig;
use fanout_core::error::{FanoutError, Result};
use fanout_core::types::ChannelKind;

pub use crate::store::GovernorStore;

/// Identifies one rate-governed slot: a platform account on a channel.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GovernorKey {
    pub channel: ChannelKind,
    pub account_id: String,
}

impl GovernorKey {
    pub fn new(channel: ChannelKind, account_id: impl Into<String>) -> Self {
        Self {
            channel,
            account_id: account_id.into(),
        }
    }
}

impl std::fmt::Display for GovernorKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.channel, self.account_id)
    }
}

/// A successful acquisition. The caller must sleep `delay` before the
/// send; the delay is the pacing mechanism, not a suggestion.
#[derive(Debug, Clone, Copy)]
pub struct Grant {
    pub delay: Duration,
}

/// Mutable per-slot state. Persisted so daily counts and cooldowns
/// survive a restart.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SlotState {
    /// Reservation point: no send may be scheduled before this instant.
    pub next_free: DateTime<Utc>,
    pub cooldown_until: Option<DateTime<Utc>>,
    pub daily_count: u32,
    /// Local date the daily count belongs to.
    pub daily_date: NaiveDate,
    /// Bulk runs currently in progress on this slot. While non-zero, an
    /// exhausted daily cap does not reject the run's own sends.
    pub active_runs: u32,
}

impl SlotState {
    fn fresh(now: DateTime<Utc>) -> Self {
        Self {
            next_free: now,
            cooldown_until: None,
            daily_count: 0,
            daily_date: Local::now().date_naive(),
            active_runs: 0,
        }
    }

    /// Roll the daily counter when the local day changes.
    fn roll_day(&mut self) {
        let today = Local::now().date_naive();
        if self.daily_date != today {
            self.daily_date = today;
            self.daily_count = 0;
        }
    }
}

/// The rate governor. One instance serves every campaign and every
/// channel; acquisition is strictly serialized per key through the
/// single slot-map mutex.
pub struct RateGovernor {
    policy: GovernorConfig,
    slots: Mutex<HashMap<GovernorKey, SlotState>>,
    store: Option<GovernorStore>,
}

impl RateGovernor {
    /// In-memory governor (tests, embedded use).
    pub fn new(policy: GovernorConfig) -> Self {
        Self {
            policy,
            slots: Mutex::new(HashMap::new()),
            store: None,
        }
    }

    /// Governor with persisted slot state.
    pub fn with_store(policy: GovernorConfig, store: GovernorStore) -> Self {
        let slots = store.load();
        Self {
            policy,
            slots: Mutex::new(slots),
            store: Some(store),
        }
    }

    pub fn policy(&self) -> &GovernorConfig {
        &self.policy
    }

    /// Ask for permission to send one message on `key`.
    ///
    /// Returns a [`Grant`] carrying the mandatory pre-send delay, or
    /// `CooldownActive` when the slot is cooling down or its daily cap
    /// is exhausted with no bulk run in progress.
    pub async fn try_acquire(&self, key: &GovernorKey) -> Result<Grant> {
        let now = Utc::now();
        let mut slots = self.slots.lock().await;
        let slot = slots
            .entry(key.clone())
            .or_insert_with(|| SlotState::fresh(now));
        slot.roll_day();

        if let Some(until) = slot.cooldown_until {
            if until > now {
                return Err(FanoutError::CooldownActive { until });
            }
            slot.cooldown_until = None;
        }

        if slot.daily_count >= self.policy.daily_cap && slot.active_runs == 0 {
            let until = next_local_midnight_utc();
            return Err(FanoutError::CooldownActive { until });
        }

        // Reservation pacing: each grant pushes next_free forward by a
        // fresh random draw, so consecutive sends are never closer than
        // min_delay even when callers race.
        let draw = self.draw_delay();
        let send_at = slot.next_free.max(now) + chrono::Duration::from_std(draw).unwrap_or_default();
        slot.next_free = send_at;
        let delay = (send_at - now).to_std().unwrap_or(Duration::ZERO);

        tracing::debug!(key = %key, delay_ms = delay.as_millis() as u64, "governor grant");
        Ok(Grant { delay })
    }

    /// Admit a bulk run on `key`. Checked and counted
    /// synchronously at creation time: rejects when the slot is cooling
    /// down or the daily cap is spent, otherwise consumes one daily unit
    /// and marks a run active.
    pub async fn admit_bulk(&self, key: &GovernorKey) -> Result<()> {
        let now = Utc::now();
        let mut slots = self.slots.lock().await;
        let slot = slots
            .entry(key.clone())
            .or_insert_with(|| SlotState::fresh(now));
        slot.roll_day();

        if let Some(until) = slot.cooldown_until {
            if until > now {
                return Err(FanoutError::CooldownActive { until });
            }
            slot.cooldown_until = None;
        }
        if slot.daily_count >= self.policy.daily_cap {
            return Err(FanoutError::CooldownActive {
                until: next_local_midnight_utc(),
            });
        }

        slot.daily_count += 1;
        slot.active_runs += 1;
        tracing::info!(
            key = %key,
            daily_count = slot.daily_count,
            daily_cap = self.policy.daily_cap,
            "bulk run admitted"
        );
        self.persist(&slots);
        Ok(())
    }

    /// Mark a bulk run finished: the post-run cooldown window starts now.
    pub async fn complete_bulk(&self, key: &GovernorKey) {
        let now = Utc::now();
        let mut slots = self.slots.lock().await;
        if let Some(slot) = slots.get_mut(key) {
            slot.active_runs = slot.active_runs.saturating_sub(1);
            let until = now + chrono::Duration::from_std(self.policy.cooldown()).unwrap_or_default();
            slot.cooldown_until = Some(match slot.cooldown_until {
                Some(existing) if existing > until => existing,
                _ => until,
            });
            tracing::info!(key = %key, cooldown_until = %until, "bulk run complete");
            self.persist(&slots);
        }
    }

    /// Administrative override: wipe all limits for `key`.
    pub async fn reset(&self, key: &GovernorKey) {
        let mut slots = self.slots.lock().await;
        if slots.remove(key).is_some() {
            tracing::warn!(key = %key, "governor slot reset by operator");
            self.persist(&slots);
        }
    }

    /// Read-only view of a slot, if one exists.
    pub async fn slot(&self, key: &GovernorKey) -> Option<SlotState> {
        self.slots.lock().await.get(key).cloned()
    }

    fn draw_delay(&self) -> Duration {
        let min = self.policy.min_delay_ms.max(1);
        let max = self.policy.max_delay_ms.max(min);
        let ms = rand::thread_rng().gen_range(min..=max);
        Duration::from_millis(ms)
    }

    fn persist(&self, slots: &HashMap<GovernorKey, SlotState>) {
        if let Some(store) = &self.store {
            if let Err(e) = store.save(slots) {
                tracing::warn!("Failed to save governor state: {e}");
            }
        }
    }
}

/// Next local midnight, expressed in UTC. Used as the expiry for
/// daily-cap rejections.
fn next_local_midnight_utc() -> DateTime<Utc> {
    let tomorrow = Local::now().date_naive() + chrono::Duration::days(1);
    let midnight = tomorrow.and_hms_opt(0, 0, 0).unwrap_or_else(|| {
        // and_hms_opt(0,0,0) on a valid date never fails
        Local::now().naive_local()
    });
    match Local.from_local_datetime(&midnight) {
        chrono::LocalResult::Single(dt) | chrono::LocalResult::Ambiguous(dt, _) => {
            dt.with_timezone(&Utc)
        }
        chrono::LocalResult::None => Utc::now() + chrono::Duration::days(1),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fast_policy() -> GovernorConfig {
        GovernorConfig {
            min_delay_ms: 5,
            max_delay_ms: 10,
            daily_cap: 2,
            cooldown_secs: 3600,
            max_recipients_per_run: 200,
        }
    }

    fn key() -> GovernorKey {
        GovernorKey::new(ChannelKind::WhatsApp, "acct-1")
    }

    #[tokio::test]
    async fn test_grants_are_spaced_by_min_delay() {
        let gov = RateGovernor::new(fast_policy());
        gov.admit_bulk(&key()).await.unwrap();

        let g1 = gov.try_acquire(&key()).await.unwrap();
        let g2 = gov.try_acquire(&key()).await.unwrap();
        // Second reservation lands a full draw after the first.
        assert!(g2.delay > g1.delay);
        assert!(g2.delay >= Duration::from_millis(9));
    }

    #[tokio::test]
    async fn test_delay_never_zero() {
        let gov = RateGovernor::new(fast_policy());
        gov.admit_bulk(&key()).await.unwrap();
        let g = gov.try_acquire(&key()).await.unwrap();
        assert!(g.delay >= Duration::from_millis(5));
        assert!(g.delay <= Duration::from_millis(10));
    }

    #[tokio::test]
    async fn test_daily_cap_rejects_bulk_admission() {
        let gov = RateGovernor::new(fast_policy());
        gov.admit_bulk(&key()).await.unwrap();
        gov.admit_bulk(&key()).await.unwrap();
        let err = gov.admit_bulk(&key()).await.unwrap_err();
        assert!(matches!(err, FanoutError::CooldownActive { .. }));
    }

    #[tokio::test]
    async fn test_exhausted_cap_rejects_sends_once_runs_finish() {
        let gov = RateGovernor::new(fast_policy());
        gov.admit_bulk(&key()).await.unwrap();
        gov.admit_bulk(&key()).await.unwrap();
        // Cap spent but runs active: their own sends still pass.
        assert!(gov.try_acquire(&key()).await.is_ok());

        gov.complete_bulk(&key()).await;
        gov.complete_bulk(&key()).await;
        // Post-run cooldown now rejects everything.
        let err = gov.try_acquire(&key()).await.unwrap_err();
        assert!(matches!(err, FanoutError::CooldownActive { .. }));
    }

    #[tokio::test]
    async fn test_cooldown_window_after_bulk() {
        let gov = RateGovernor::new(fast_policy());
        gov.admit_bulk(&key()).await.unwrap();
        gov.complete_bulk(&key()).await;

        let err = gov.admit_bulk(&key()).await.unwrap_err();
        match err {
            FanoutError::CooldownActive { until } => {
                assert!(until > Utc::now() + chrono::Duration::minutes(55));
            }
            other => panic!("expected CooldownActive, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_reset_clears_everything() {
        let gov = RateGovernor::new(fast_policy());
        gov.admit_bulk(&key()).await.unwrap();
        gov.complete_bulk(&key()).await;
        assert!(gov.admit_bulk(&key()).await.is_err());

        gov.reset(&key()).await;
        assert!(gov.admit_bulk(&key()).await.is_ok());
    }

    #[tokio::test]
    async fn test_keys_are_independent() {
        let gov = RateGovernor::new(fast_policy());
        let other = GovernorKey::new(ChannelKind::Messenger, "acct-2");
        gov.admit_bulk(&key()).await.unwrap();
        gov.admit_bulk(&key()).await.unwrap();
        assert!(gov.admit_bulk(&key()).await.is_err());
        assert!(gov.admit_bulk(&other).await.is_ok());
    }

    #[tokio::test]
    async fn test_state_survives_reload() {
        let dir = std::env::temp_dir().join("fanout-test-governor");
        std::fs::remove_dir_all(&dir).ok();

        {
            let gov = RateGovernor::with_store(fast_policy(), GovernorStore::new(&dir));
            gov.admit_bulk(&key()).await.unwrap();
            gov.complete_bulk(&key()).await;
        }

        // A fresh process sees the cooldown.
        let gov = RateGovernor::with_store(fast_policy(), GovernorStore::new(&dir));
        let err = gov.try_acquire(&key()).await.unwrap_err();
        assert!(matches!(err, FanoutError::CooldownActive { .. }));
        std::fs::remove_dir_all(&dir).ok();
    }
}
