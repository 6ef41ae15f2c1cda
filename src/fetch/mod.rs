//! Match snapshot fetching.
//!
//! Pulls raw match data from a [`MatchProvider`] and resolves per-player
//! enrichment (avatar, global rank) with a secondary lookup. Every provider
//! failure surfaces as a [`FetchError`], which callers treat as retryable.
//! A failed enrichment lookup never fails the fetch; the player keeps the
//! last known values instead.

pub mod osu;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::models::{GameEvent, MatchId, Player, PlayerId, Snapshot};

pub use osu::OsuClient;

/// Errors that can occur while talking to the provider.
///
/// All variants are transient: the refresh cycle logs them and tries again
/// on the next tick.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Rate limited by {host}, retry after {retry_after_secs}s")]
    RateLimited { host: String, retry_after_secs: u64 },

    #[error("HTTP {status}: {message}")]
    HttpStatus { status: u16, message: String },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Authentication failed: {0}")]
    Auth(String),
}

impl FetchError {
    /// Whether the next refresh may succeed where this one failed.
    ///
    /// Provider outages, throttling and bad payloads all clear up on their
    /// own, so every variant is retryable.
    pub fn is_transient(&self) -> bool {
        match self {
            FetchError::Http(_)
            | FetchError::InvalidUrl(_)
            | FetchError::RateLimited { .. }
            | FetchError::HttpStatus { .. }
            | FetchError::Json(_)
            | FetchError::Auth(_) => true,
        }
    }
}

/// A participant as listed in the match payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Participant {
    pub id: PlayerId,
    pub username: String,
    pub avatar_url: Option<String>,
}

/// Raw match contents as returned by a provider.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MatchData {
    pub name: String,
    pub participants: Vec<Participant>,
    /// Completed games, in play order
    pub games: Vec<GameEvent>,
}

/// Result of a secondary per-user lookup.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UserProfile {
    pub avatar_url: Option<String>,
    pub global_rank: Option<u32>,
}

/// Source of match and user data.
#[async_trait]
pub trait MatchProvider: Send + Sync {
    /// Provider name for logging.
    fn name(&self) -> &'static str;

    /// Fetch the full contents of a match.
    async fn match_data(&self, match_id: MatchId) -> Result<MatchData, FetchError>;

    /// Look up avatar and rank for a single user.
    async fn user_profile(&self, player_id: PlayerId) -> Result<UserProfile, FetchError>;
}

/// Configuration for the snapshot fetcher.
#[derive(Debug, Clone)]
pub struct FetcherConfig {
    /// How long a successful user lookup is reused (zero = look up every time)
    pub enrichment_ttl: Duration,
}

impl Default for FetcherConfig {
    fn default() -> Self {
        Self {
            enrichment_ttl: Duration::from_secs(300),
        }
    }
}

/// A snapshot plus bookkeeping about how it was assembled.
#[derive(Debug, Clone)]
pub struct FetchReport {
    pub snapshot: Snapshot,
    /// User lookups sent to the provider this fetch
    pub lookups: u32,
    /// User lookups that failed this fetch
    pub enrichment_failures: u32,
}

#[derive(Debug, Clone)]
struct CachedProfile {
    profile: UserProfile,
    fetched_at: DateTime<Utc>,
}

/// Builds [`Snapshot`]s from a provider.
pub struct SnapshotFetcher {
    provider: Arc<dyn MatchProvider>,
    config: FetcherConfig,
    profiles: Mutex<HashMap<PlayerId, CachedProfile>>,
}

impl SnapshotFetcher {
    pub fn new(provider: Arc<dyn MatchProvider>, config: FetcherConfig) -> Self {
        Self {
            provider,
            config,
            profiles: Mutex::new(HashMap::new()),
        }
    }

    pub fn provider_name(&self) -> &'static str {
        self.provider.name()
    }

    /// Fetch a normalized snapshot of the match.
    pub async fn fetch(&self, match_id: MatchId) -> Result<Snapshot, FetchError> {
        Ok(self.fetch_report(match_id).await?.snapshot)
    }

    /// Fetch a snapshot and report enrichment statistics.
    pub async fn fetch_report(&self, match_id: MatchId) -> Result<FetchReport, FetchError> {
        debug!("Fetching match {} from {}", match_id, self.provider.name());
        let data = self.provider.match_data(match_id).await?;

        let mut players = Vec::with_capacity(data.participants.len());
        let mut lookups = 0u32;
        let mut enrichment_failures = 0u32;

        for participant in data.participants {
            let cached = self.cached_profile(participant.id).await;

            let profile = match cached {
                Some(entry) if self.is_fresh(&entry) => Some(entry.profile),
                stale => {
                    lookups += 1;
                    match self.provider.user_profile(participant.id).await {
                        Ok(profile) => {
                            self.store_profile(participant.id, profile.clone()).await;
                            Some(profile)
                        }
                        Err(e) => {
                            enrichment_failures += 1;
                            warn!(
                                "Could not enrich {} ({}): {}",
                                participant.username, participant.id, e
                            );
                            stale.map(|entry| entry.profile)
                        }
                    }
                }
            };

            let (avatar_url, global_rank) = match profile {
                Some(p) => (p.avatar_url.or(participant.avatar_url), p.global_rank),
                None => (participant.avatar_url, None),
            };

            players.push(Player {
                id: participant.id,
                username: participant.username,
                avatar_url,
                global_rank,
            });
        }

        info!(
            "Fetched '{}': {} players, {} games ({} lookups, {} failed)",
            data.name,
            players.len(),
            data.games.len(),
            lookups,
            enrichment_failures
        );

        Ok(FetchReport {
            snapshot: Snapshot::new(data.name, players, data.games),
            lookups,
            enrichment_failures,
        })
    }

    fn is_fresh(&self, entry: &CachedProfile) -> bool {
        if self.config.enrichment_ttl.is_zero() {
            return false;
        }
        let age = Utc::now().signed_duration_since(entry.fetched_at);
        age.num_milliseconds() < self.config.enrichment_ttl.as_millis() as i64
    }

    async fn cached_profile(&self, id: PlayerId) -> Option<CachedProfile> {
        self.profiles.lock().await.get(&id).cloned()
    }

    async fn store_profile(&self, id: PlayerId, profile: UserProfile) {
        self.profiles.lock().await.insert(
            id,
            CachedProfile {
                profile,
                fetched_at: Utc::now(),
            },
        );
    }
}

/// Scriptable provider for tests.
#[cfg(test)]
pub struct MockProvider {
    state: std::sync::Mutex<MockState>,
}

#[cfg(test)]
#[derive(Default)]
struct MockState {
    match_data: Option<MatchData>,
    profiles: HashMap<PlayerId, UserProfile>,
    failing_users: std::collections::HashSet<PlayerId>,
    match_calls: u32,
    user_calls: u32,
}

#[cfg(test)]
impl MockProvider {
    /// A provider that serves `data`; users without a profile resolve to
    /// an empty one.
    pub fn new(data: MatchData) -> Self {
        Self {
            state: std::sync::Mutex::new(MockState {
                match_data: Some(data),
                ..Default::default()
            }),
        }
    }

    /// A provider whose match endpoint always fails.
    pub fn unavailable() -> Self {
        Self {
            state: std::sync::Mutex::new(MockState::default()),
        }
    }

    pub fn set_match(&self, data: Option<MatchData>) {
        self.state.lock().unwrap().match_data = data;
    }

    pub fn set_profile(&self, id: u64, profile: UserProfile) {
        self.state
            .lock()
            .unwrap()
            .profiles
            .insert(PlayerId::new(id), profile);
    }

    pub fn fail_user(&self, id: u64, failing: bool) {
        let mut state = self.state.lock().unwrap();
        if failing {
            state.failing_users.insert(PlayerId::new(id));
        } else {
            state.failing_users.remove(&PlayerId::new(id));
        }
    }

    pub fn match_calls(&self) -> u32 {
        self.state.lock().unwrap().match_calls
    }

    pub fn user_calls(&self) -> u32 {
        self.state.lock().unwrap().user_calls
    }
}

#[cfg(test)]
#[async_trait]
impl MatchProvider for MockProvider {
    fn name(&self) -> &'static str {
        "mock"
    }

    async fn match_data(&self, _match_id: MatchId) -> Result<MatchData, FetchError> {
        let mut state = self.state.lock().unwrap();
        state.match_calls += 1;
        state.match_data.clone().ok_or(FetchError::HttpStatus {
            status: 503,
            message: "Service Unavailable".to_string(),
        })
    }

    async fn user_profile(&self, player_id: PlayerId) -> Result<UserProfile, FetchError> {
        let mut state = self.state.lock().unwrap();
        state.user_calls += 1;
        if state.failing_users.contains(&player_id) {
            return Err(FetchError::HttpStatus {
                status: 404,
                message: "Not Found".to_string(),
            });
        }
        Ok(state.profiles.get(&player_id).cloned().unwrap_or_default())
    }
}

#[cfg(test)]
pub(crate) fn sample_match() -> MatchData {
    use crate::models::ScoreEntry;

    MatchData {
        name: "OWC: (Alpha) vs (Beta)".to_string(),
        participants: vec![
            Participant {
                id: PlayerId::new(1),
                username: "Alpha".to_string(),
                avatar_url: Some("https://a.ppy.sh/1?embedded".to_string()),
            },
            Participant {
                id: PlayerId::new(2),
                username: "Beta".to_string(),
                avatar_url: None,
            },
        ],
        games: vec![
            GameEvent::new(10, vec![ScoreEntry::new(1, 500), ScoreEntry::new(2, 900)]),
            GameEvent::new(11, vec![ScoreEntry::new(1, 700), ScoreEntry::new(2, 100)]),
        ],
    }
}
