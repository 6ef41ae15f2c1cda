//! Refresh scheduler.
//!
//! Drives the leaderboard pipeline on a fixed period:
//! 1. Fetch a snapshot of the match
//! 2. Aggregate it under the configured policy
//! 3. Publish the result to the ranking store
//!
//! Fetch failures abort the cycle and leave the store untouched; the next
//! tick tries again.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::calculate::aggregate;
use crate::fetch::{FetchError, SnapshotFetcher};
use crate::models::{MatchId, Policy};
use crate::storage::{RankingStore, Standings};

/// Errors that can end a refresh cycle.
#[derive(Debug, Error)]
pub enum RefreshError {
    /// Retried on the next tick.
    #[error("Transient fetch failure: {0}")]
    Transient(#[from] FetchError),
}

/// Configuration for the refresh scheduler.
#[derive(Debug, Clone)]
pub struct RefreshSettings {
    pub match_id: MatchId,
    pub policy: Policy,

    /// Time between cycle starts
    pub interval: Duration,
}

impl RefreshSettings {
    pub fn new(match_id: MatchId, policy: Policy) -> Self {
        Self {
            match_id,
            policy,
            interval: Duration::from_secs(10),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RefreshStatus {
    #[default]
    Idle,
    Refreshing,
}

/// Bookkeeping for the scheduler's own logging.
#[derive(Debug, Clone, Default)]
pub struct RefreshState {
    pub cycles: u64,
    pub consecutive_failures: u32,
    pub last_started: Option<DateTime<Utc>>,
    pub last_success: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

/// What a single tick did.
#[derive(Debug, Clone)]
pub enum RefreshOutcome {
    /// A new generation was published
    Published {
        generation: u64,
        players: usize,
        games: usize,
        enrichment_failures: u32,
        duration: Duration,
    },
    /// A previous cycle was still running
    Skipped,
}

/// Clears the refreshing flag when a cycle ends, even on early return.
struct CycleGuard<'a>(&'a AtomicBool);

impl Drop for CycleGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Periodic fetch → aggregate → publish loop.
pub struct RefreshScheduler {
    settings: RefreshSettings,
    fetcher: SnapshotFetcher,
    store: Arc<RankingStore>,
    refreshing: AtomicBool,
    state: Mutex<RefreshState>,
}

impl RefreshScheduler {
    pub fn new(settings: RefreshSettings, fetcher: SnapshotFetcher, store: Arc<RankingStore>) -> Self {
        Self {
            settings,
            fetcher,
            store,
            refreshing: AtomicBool::new(false),
            state: Mutex::new(RefreshState::default()),
        }
    }

    pub fn status(&self) -> RefreshStatus {
        if self.refreshing.load(Ordering::Acquire) {
            RefreshStatus::Refreshing
        } else {
            RefreshStatus::Idle
        }
    }

    pub async fn state(&self) -> RefreshState {
        self.state.lock().await.clone()
    }

    /// Run one cycle unless one is already in flight.
    pub async fn tick(&self) -> Result<RefreshOutcome, RefreshError> {
        if self
            .refreshing
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!("Refresh still in progress, skipping tick");
            return Ok(RefreshOutcome::Skipped);
        }
        let _guard = CycleGuard(&self.refreshing);

        let started = Utc::now();
        {
            let mut state = self.state.lock().await;
            state.cycles += 1;
            state.last_started = Some(started);
        }

        let result = self.refresh_once().await;

        let mut state = self.state.lock().await;
        match &result {
            Ok(_) => {
                state.consecutive_failures = 0;
                state.last_success = Some(Utc::now());
                state.last_error = None;
            }
            Err(e) => {
                state.consecutive_failures += 1;
                state.last_error = Some(e.to_string());
            }
        }

        result
    }

    /// Fetch, aggregate and publish once.
    async fn refresh_once(&self) -> Result<RefreshOutcome, RefreshError> {
        let start = std::time::Instant::now();

        let report = self.fetcher.fetch_report(self.settings.match_id).await?;
        let snapshot = report.snapshot;
        let games = snapshot.games.len();

        let table = aggregate(&snapshot, self.settings.policy);
        let players = table.len();
        let published: Arc<Standings> = self.store.replace(table, snapshot.match_name).await;

        Ok(RefreshOutcome::Published {
            generation: published.generation,
            players,
            games,
            enrichment_failures: report.enrichment_failures,
            duration: start.elapsed(),
        })
    }

    /// Run cycles forever at the configured interval.
    ///
    /// The first cycle starts immediately. Ticks that come due while a cycle
    /// is still running are dropped rather than queued.
    pub async fn run_periodic(self: Arc<Self>) {
        let mut ticker = interval(self.settings.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        info!(
            "Refreshing match {} every {:?} ({} policy, provider: {})",
            self.settings.match_id,
            self.settings.interval,
            self.settings.policy,
            self.fetcher.provider_name()
        );

        loop {
            ticker.tick().await;

            match self.tick().await {
                Ok(RefreshOutcome::Published {
                    generation,
                    players,
                    games,
                    enrichment_failures,
                    duration,
                }) => {
                    if enrichment_failures > 0 {
                        warn!("{} player lookups failed this cycle", enrichment_failures);
                    }
                    info!(
                        "Refresh {} complete: {} players over {} games in {:?}",
                        generation, players, games, duration
                    );
                }
                Ok(RefreshOutcome::Skipped) => {
                    debug!("Tick skipped, scheduler is {:?}", self.status());
                }
                Err(e) => {
                    let failures = self.state().await.consecutive_failures;
                    error!(
                        "Refresh failed ({} in a row), keeping previous standings: {}",
                        failures, e
                    );
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::{sample_match, FetcherConfig, MockProvider};

    fn scheduler(provider: Arc<MockProvider>, policy: Policy) -> (Arc<RefreshScheduler>, Arc<RankingStore>) {
        let store = Arc::new(RankingStore::new(policy));
        let fetcher = SnapshotFetcher::new(provider, FetcherConfig::default());
        let scheduler = RefreshScheduler::new(
            RefreshSettings::new(MatchId::new(111534249), policy),
            fetcher,
            Arc::clone(&store),
        );
        (Arc::new(scheduler), store)
    }

    #[tokio::test]
    async fn test_tick_publishes_ranking() {
        let provider = Arc::new(MockProvider::new(sample_match()));
        let (scheduler, store) = scheduler(provider, Policy::TotalScore);

        let outcome = scheduler.tick().await.unwrap();
        assert!(matches!(
            outcome,
            RefreshOutcome::Published { generation: 1, players: 2, games: 2, .. }
        ));

        let standings = store.read().await;
        assert_eq!(standings.match_name, "OWC: (Alpha) vs (Beta)");
        assert_eq!(standings.table.names(), vec!["Alpha", "Beta"]);
        assert_eq!(standings.table.get("Alpha").unwrap().score, 1200);
        assert_eq!(scheduler.status(), RefreshStatus::Idle);
    }

    #[tokio::test]
    async fn test_failed_fetch_leaves_store_unchanged() {
        let provider = Arc::new(MockProvider::new(sample_match()));
        let (scheduler, store) = scheduler(provider.clone(), Policy::Position);

        scheduler.tick().await.unwrap();
        let before = store.read().await;
        let before_json = serde_json::to_vec(&*before).unwrap();

        provider.set_match(None);
        let result = scheduler.tick().await;
        assert!(matches!(result, Err(RefreshError::Transient(_))));

        let after = store.read().await;
        assert_eq!(serde_json::to_vec(&*after).unwrap(), before_json);
        assert!(Arc::ptr_eq(&before, &after));

        let state = scheduler.state().await;
        assert_eq!(state.consecutive_failures, 1);
        assert!(state.last_error.is_some());
        assert_eq!(scheduler.status(), RefreshStatus::Idle);
    }

    #[tokio::test]
    async fn test_failure_before_first_success_keeps_initial_state() {
        let provider = Arc::new(MockProvider::unavailable());
        let (scheduler, store) = scheduler(provider, Policy::Position);

        assert!(scheduler.tick().await.is_err());
        assert!(scheduler.tick().await.is_err());

        let standings = store.read().await;
        assert_eq!(standings.generation, 0);
        assert!(standings.table.is_empty());
        assert_eq!(scheduler.state().await.consecutive_failures, 2);
    }

    #[tokio::test]
    async fn test_recovery_resets_failure_count() {
        let provider = Arc::new(MockProvider::unavailable());
        let (scheduler, store) = scheduler(provider.clone(), Policy::Position);

        assert!(scheduler.tick().await.is_err());
        provider.set_match(Some(sample_match()));
        scheduler.tick().await.unwrap();

        let state = scheduler.state().await;
        assert_eq!(state.cycles, 2);
        assert_eq!(state.consecutive_failures, 0);
        assert!(state.last_success.is_some());
        assert_eq!(store.read().await.generation, 1);
    }

    #[tokio::test]
    async fn test_tick_skipped_while_refreshing() {
        let provider = Arc::new(MockProvider::new(sample_match()));
        let (scheduler, store) = scheduler(provider.clone(), Policy::Position);

        scheduler.refreshing.store(true, Ordering::Release);
        assert_eq!(scheduler.status(), RefreshStatus::Refreshing);

        let outcome = scheduler.tick().await.unwrap();
        assert!(matches!(outcome, RefreshOutcome::Skipped));
        assert_eq!(provider.match_calls(), 0);
        assert_eq!(store.read().await.generation, 0);

        scheduler.refreshing.store(false, Ordering::Release);
        scheduler.tick().await.unwrap();
        assert_eq!(provider.match_calls(), 1);
    }

    #[tokio::test]
    async fn test_run_periodic_refreshes_immediately() {
        let provider = Arc::new(MockProvider::new(sample_match()));
        let (scheduler, store) = scheduler(provider, Policy::Position);

        let handle = tokio::spawn(Arc::clone(&scheduler).run_periodic());

        let mut published = false;
        for _ in 0..100 {
            if store.read().await.generation > 0 {
                published = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        handle.abort();

        assert!(published);
        // Both finish on 3 points; ties keep participant order.
        let standings = store.read().await;
        assert_eq!(standings.table.names(), vec!["Alpha", "Beta"]);
        assert!(standings.table.iter().all(|e| e.score == 3));
    }

    #[test]
    fn test_settings_default_interval() {
        let settings = RefreshSettings::new(MatchId::new(1), Policy::TotalScore);
        assert_eq!(settings.interval, Duration::from_secs(10));
    }
}
