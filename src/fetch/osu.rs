//! osu! API v2 client.
//!
//! Authenticates with the client-credentials OAuth flow and reads match
//! history and user profiles. All osu! wire formats are isolated in this
//! module.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, USER_AGENT};
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use url::Url;

use super::{FetchError, MatchData, MatchProvider, Participant, UserProfile};
use crate::config::{Credentials, ProviderConfig};
use crate::models::{GameEvent, MatchId, PlayerId, ScoreEntry};

/// Events returned per match page (API maximum).
const PAGE_LIMIT: u32 = 100;

/// Upper bound on pages followed for a single match.
const MAX_PAGES: usize = 50;

/// Tokens are renewed this long before they expire.
const TOKEN_REFRESH_MARGIN_SECS: i64 = 60;

// ── Wire types ──────────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
struct TokenRequest<'a> {
    client_id: &'a str,
    client_secret: &'a str,
    grant_type: &'static str,
    scope: &'static str,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: i64,
}

/// `GET /matches/{id}` response.
#[derive(Debug, Deserialize)]
pub(crate) struct MatchResponse {
    #[serde(rename = "match")]
    info: MatchInfo,
    #[serde(default)]
    events: Vec<MatchEvent>,
    #[serde(default)]
    users: Vec<MatchUser>,
    first_event_id: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct MatchInfo {
    name: String,
}

#[derive(Debug, Deserialize)]
struct MatchEvent {
    id: u64,
    #[serde(default)]
    game: Option<MatchGame>,
}

#[derive(Debug, Deserialize)]
struct MatchGame {
    id: u64,
    beatmap_id: Option<u64>,
    end_time: Option<String>,
    #[serde(default)]
    scores: Vec<GameScore>,
}

#[derive(Debug, Deserialize)]
struct GameScore {
    user_id: u64,
    score: u64,
}

#[derive(Debug, Deserialize)]
struct MatchUser {
    id: u64,
    username: String,
    avatar_url: Option<String>,
}

/// `GET /users/{id}` response (fields we use).
#[derive(Debug, Deserialize)]
pub(crate) struct UserResponse {
    avatar_url: Option<String>,
    statistics: Option<UserStatistics>,
    rank_history: Option<RankHistory>,
}

#[derive(Debug, Deserialize)]
struct UserStatistics {
    global_rank: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct RankHistory {
    #[serde(default)]
    data: Vec<u32>,
}

impl From<UserResponse> for UserProfile {
    fn from(user: UserResponse) -> Self {
        let global_rank = user
            .statistics
            .and_then(|s| s.global_rank)
            .or_else(|| user.rank_history.and_then(|h| h.data.last().copied()));

        UserProfile {
            avatar_url: user.avatar_url.filter(|u| !u.is_empty()),
            global_rank,
        }
    }
}

/// Combine match pages (any order) into normalized match data.
///
/// Events are ordered by id and de-duplicated; only games with an end time
/// are kept. Users are listed in first-seen order.
pub(crate) fn merge_pages(pages: Vec<MatchResponse>) -> MatchData {
    let mut name = String::new();
    let mut events: Vec<MatchEvent> = Vec::new();
    let mut participants: Vec<Participant> = Vec::new();

    for page in pages {
        if name.is_empty() {
            name = page.info.name;
        }
        for user in page.users {
            let id = PlayerId::new(user.id);
            if participants.iter().any(|p| p.id == id) {
                continue;
            }
            participants.push(Participant {
                id,
                username: user.username,
                avatar_url: user.avatar_url.filter(|u| !u.is_empty()),
            });
        }
        events.extend(page.events);
    }

    events.sort_by_key(|e| e.id);
    events.dedup_by_key(|e| e.id);

    let games = events
        .into_iter()
        .filter_map(|e| e.game)
        .filter(|g| g.end_time.is_some())
        .map(|g| GameEvent {
            game_id: g.id,
            beatmap_id: g.beatmap_id,
            scores: g
                .scores
                .into_iter()
                .map(|s| ScoreEntry::new(s.user_id, s.score))
                .collect(),
        })
        .collect();

    MatchData {
        name,
        participants,
        games,
    }
}

// ── Client ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
struct AccessToken {
    value: String,
    expires_at: DateTime<Utc>,
}

impl AccessToken {
    fn is_valid(&self) -> bool {
        Utc::now() + chrono::Duration::seconds(TOKEN_REFRESH_MARGIN_SECS) < self.expires_at
    }
}

/// osu! API v2 client.
pub struct OsuClient {
    client: Client,
    api_base: Url,
    token_url: Url,
    credentials: Credentials,
    token: RwLock<Option<AccessToken>>,
}

impl OsuClient {
    pub fn new(config: &ProviderConfig, credentials: Credentials) -> Result<Self, FetchError> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("multi-leaderboard/{}", env!("CARGO_PKG_VERSION")))
                .unwrap_or_else(|_| HeaderValue::from_static("multi-leaderboard")),
        );

        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .default_headers(headers)
            .build()?;

        let api_base = parse_base(&config.api_base)?;
        let token_url = parse_base(&config.oauth_url)?
            .join("oauth/token")
            .map_err(|e| FetchError::InvalidUrl(e.to_string()))?;

        Ok(Self {
            client,
            api_base,
            token_url,
            credentials,
            token: RwLock::new(None),
        })
    }

    /// Get a valid bearer token, requesting a new one if needed.
    async fn access_token(&self) -> Result<String, FetchError> {
        if let Some(token) = self.token.read().await.as_ref().filter(|t| t.is_valid()) {
            return Ok(token.value.clone());
        }

        let mut slot = self.token.write().await;
        if let Some(token) = slot.as_ref().filter(|t| t.is_valid()) {
            return Ok(token.value.clone());
        }

        debug!("Requesting osu! API token");
        let response = self
            .client
            .post(self.token_url.clone())
            .json(&TokenRequest {
                client_id: &self.credentials.client_id,
                client_secret: &self.credentials.client_secret,
                grant_type: "client_credentials",
                scope: "public",
            })
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(FetchError::Auth(format!("token endpoint returned {}: {}", status, body)));
        }

        let body = response.bytes().await?;
        let token: TokenResponse = serde_json::from_slice(&body)?;
        info!("Obtained osu! API token (expires in {}s)", token.expires_in);

        let access = AccessToken {
            value: token.access_token,
            expires_at: Utc::now() + chrono::Duration::seconds(token.expires_in),
        };
        let value = access.value.clone();
        *slot = Some(access);
        Ok(value)
    }

    async fn invalidate_token(&self) {
        *self.token.write().await = None;
    }

    /// Authenticated GET returning parsed JSON.
    async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<T, FetchError> {
        let url = self
            .api_base
            .join(path)
            .map_err(|e| FetchError::InvalidUrl(e.to_string()))?;
        let token = self.access_token().await?;

        debug!("GET {}", url);
        let response = self
            .client
            .get(url.clone())
            .bearer_auth(token)
            .query(query)
            .send()
            .await?;

        let status = response.status();
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            let retry_after = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.parse().ok())
                .unwrap_or(60);

            return Err(FetchError::RateLimited {
                host: url.host_str().unwrap_or("unknown").to_string(),
                retry_after_secs: retry_after,
            });
        }

        if status == reqwest::StatusCode::UNAUTHORIZED {
            warn!("osu! API rejected token, will re-authenticate");
            self.invalidate_token().await;
        }

        if !status.is_success() {
            return Err(FetchError::HttpStatus {
                status: status.as_u16(),
                message: status.canonical_reason().unwrap_or("Unknown").to_string(),
            });
        }

        let body = response.bytes().await?;
        Ok(serde_json::from_slice(&body)?)
    }
}

fn parse_base(raw: &str) -> Result<Url, FetchError> {
    // A trailing slash keeps `join` from dropping the last path segment.
    let normalized = if raw.ends_with('/') {
        raw.to_string()
    } else {
        format!("{}/", raw)
    };
    Url::parse(&normalized).map_err(|e| FetchError::InvalidUrl(format!("{}: {}", raw, e)))
}

#[async_trait]
impl MatchProvider for OsuClient {
    fn name(&self) -> &'static str {
        "osu"
    }

    async fn match_data(&self, match_id: MatchId) -> Result<MatchData, FetchError> {
        let path = format!("matches/{}", match_id);
        let first: MatchResponse = self
            .get_json(&path, &[("limit", PAGE_LIMIT.to_string())])
            .await?;

        let first_event_id = first.first_event_id;
        let mut earliest = first.events.iter().map(|e| e.id).min();
        let mut pages = vec![first];

        // Walk backwards until the match's first event is included.
        while let (Some(target), Some(current)) = (first_event_id, earliest) {
            if current <= target {
                break;
            }
            if pages.len() >= MAX_PAGES {
                warn!("Match {} has more than {} pages, truncating", match_id, MAX_PAGES);
                break;
            }

            let page: MatchResponse = self
                .get_json(
                    &path,
                    &[
                        ("limit", PAGE_LIMIT.to_string()),
                        ("before", current.to_string()),
                    ],
                )
                .await?;

            let next = page.events.iter().map(|e| e.id).min();
            pages.push(page);
            match next {
                Some(id) if id < current => earliest = Some(id),
                _ => break,
            }
        }

        debug!("Match {} loaded in {} page(s)", match_id, pages.len());
        Ok(merge_pages(pages))
    }

    async fn user_profile(&self, player_id: PlayerId) -> Result<UserProfile, FetchError> {
        let user: UserResponse = self
            .get_json(&format!("users/{}", player_id), &[("key", "id".to_string())])
            .await?;
        Ok(user.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MATCH_PAGE: &str = r#"{
        "match": {"id": 111534249, "name": "OWC: (Alpha) vs (Beta)", "start_time": "2024-10-19T10:00:00+00:00", "end_time": null},
        "events": [
            {"id": 5, "detail": {"type": "other"}, "timestamp": "2024-10-19T10:05:00+00:00", "user_id": null,
             "game": {"id": 900, "beatmap_id": 4242, "end_time": "2024-10-19T10:09:00+00:00",
                      "scores": [{"user_id": 1, "score": 500, "accuracy": 0.97}, {"user_id": 2, "score": 900, "accuracy": 0.99}]}},
            {"id": 6, "detail": {"type": "player-joined"}, "timestamp": "2024-10-19T10:10:00+00:00", "user_id": 3},
            {"id": 7, "detail": {"type": "other"}, "timestamp": "2024-10-19T10:11:00+00:00", "user_id": null,
             "game": {"id": 901, "beatmap_id": 4343, "end_time": null, "scores": []}}
        ],
        "users": [
            {"id": 1, "username": "Alpha", "avatar_url": "https://a.ppy.sh/1", "country_code": "DE"},
            {"id": 2, "username": "Beta", "avatar_url": ""}
        ],
        "first_event_id": 1,
        "latest_event_id": 7,
        "current_game_id": 901
    }"#;

    const EARLIER_PAGE: &str = r#"{
        "match": {"id": 111534249, "name": "OWC: (Alpha) vs (Beta)"},
        "events": [
            {"id": 1, "detail": {"type": "match-created"}, "user_id": 1},
            {"id": 2, "game": {"id": 899, "beatmap_id": 4141, "end_time": "2024-10-19T10:04:00+00:00",
                               "scores": [{"user_id": 3, "score": 100}, {"user_id": 1, "score": 200}]}},
            {"id": 5, "game": {"id": 900, "beatmap_id": 4242, "end_time": "2024-10-19T10:09:00+00:00",
                               "scores": [{"user_id": 1, "score": 500}, {"user_id": 2, "score": 900}]}}
        ],
        "users": [
            {"id": 3, "username": "Gamma", "avatar_url": null},
            {"id": 1, "username": "Alpha", "avatar_url": "https://a.ppy.sh/1"}
        ],
        "first_event_id": 1
    }"#;

    fn page(json: &str) -> MatchResponse {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn test_merge_single_page() {
        let data = merge_pages(vec![page(MATCH_PAGE)]);

        assert_eq!(data.name, "OWC: (Alpha) vs (Beta)");
        assert_eq!(data.participants.len(), 2);
        assert_eq!(data.participants[1].avatar_url, None);

        // The unfinished game is dropped.
        assert_eq!(data.games.len(), 1);
        let game = &data.games[0];
        assert_eq!(game.game_id, 900);
        assert_eq!(game.beatmap_id, Some(4242));
        assert_eq!(
            game.scores,
            vec![ScoreEntry::new(1, 500), ScoreEntry::new(2, 900)]
        );
    }

    #[test]
    fn test_merge_pages_orders_and_dedups_events() {
        let data = merge_pages(vec![page(MATCH_PAGE), page(EARLIER_PAGE)]);

        let game_ids: Vec<u64> = data.games.iter().map(|g| g.game_id).collect();
        assert_eq!(game_ids, vec![899, 900]);

        let names: Vec<&str> = data
            .participants
            .iter()
            .map(|p| p.username.as_str())
            .collect();
        assert_eq!(names, vec!["Alpha", "Beta", "Gamma"]);
    }

    #[test]
    fn test_user_profile_from_statistics() {
        let user: UserResponse = serde_json::from_str(
            r#"{"id": 2, "avatar_url": "https://a.ppy.sh/2", "statistics": {"global_rank": 1234},
                "rank_history": {"mode": "osu", "data": [1300, 1250]}}"#,
        )
        .unwrap();

        let profile = UserProfile::from(user);
        assert_eq!(profile.avatar_url.as_deref(), Some("https://a.ppy.sh/2"));
        assert_eq!(profile.global_rank, Some(1234));
    }

    #[test]
    fn test_user_profile_falls_back_to_rank_history() {
        let user: UserResponse = serde_json::from_str(
            r#"{"avatar_url": "", "statistics": {"global_rank": null},
                "rank_history": {"data": [900, 880]}}"#,
        )
        .unwrap();

        let profile = UserProfile::from(user);
        assert_eq!(profile.avatar_url, None);
        assert_eq!(profile.global_rank, Some(880));
    }

    #[test]
    fn test_parse_base_adds_trailing_slash() {
        let base = parse_base("https://osu.ppy.sh/api/v2").unwrap();
        assert_eq!(
            base.join("matches/1").unwrap().as_str(),
            "https://osu.ppy.sh/api/v2/matches/1"
        );
        assert!(parse_base("not a url").is_err());
    }

    #[test]
    fn test_access_token_validity() {
        let fresh = AccessToken {
            value: "t".to_string(),
            expires_at: Utc::now() + chrono::Duration::seconds(3600),
        };
        let expiring = AccessToken {
            value: "t".to_string(),
            expires_at: Utc::now() + chrono::Duration::seconds(30),
        };
        assert!(fresh.is_valid());
        assert!(!expiring.is_valid());
    }

    #[test]
    fn test_client_builds_from_default_config() {
        let client = OsuClient::new(
            &ProviderConfig::default(),
            Credentials::new("123", "secret"),
        )
        .unwrap();
        assert_eq!(client.token_url.as_str(), "https://osu.ppy.sh/oauth/token");
        assert_eq!(client.name(), "osu");
    }

    // A local stand-in for the osu! API. Match `n` has events 1..=n, each a
    // finished game; matches 401 and 429 always fail with that status.
    mod stub {
        use std::collections::HashMap;
        use std::sync::atomic::{AtomicUsize, Ordering};
        use std::sync::Arc;

        use axum::extract::{Path, Query, State};
        use axum::http::header::{AUTHORIZATION, RETRY_AFTER};
        use axum::http::{HeaderMap, StatusCode};
        use axum::response::{IntoResponse, Response};
        use axum::routing::{get, post};
        use axum::{Json, Router};
        use serde_json::{json, Value};

        #[derive(Clone, Default)]
        pub struct Counters {
            pub tokens: Arc<AtomicUsize>,
            pub match_pages: Arc<AtomicUsize>,
        }

        async fn token(State(counters): State<Counters>) -> Json<Value> {
            let n = counters.tokens.fetch_add(1, Ordering::SeqCst) + 1;
            Json(json!({
                "token_type": "Bearer",
                "access_token": format!("tok-{}", n),
                "expires_in": 86400
            }))
        }

        async fn match_page(
            State(counters): State<Counters>,
            Path(id): Path<u64>,
            Query(query): Query<HashMap<String, String>>,
            headers: HeaderMap,
        ) -> Response {
            let authorized = headers
                .get(AUTHORIZATION)
                .and_then(|v| v.to_str().ok())
                .is_some_and(|v| v.starts_with("Bearer tok-"));
            if !authorized || id == 401 {
                return StatusCode::UNAUTHORIZED.into_response();
            }
            if id == 429 {
                return (StatusCode::TOO_MANY_REQUESTS, [(RETRY_AFTER, "17")]).into_response();
            }
            counters.match_pages.fetch_add(1, Ordering::SeqCst);

            let limit: u64 = query.get("limit").and_then(|v| v.parse().ok()).unwrap_or(100);
            let before: u64 = query
                .get("before")
                .and_then(|v| v.parse().ok())
                .unwrap_or(id + 1);
            let high = before.saturating_sub(1);
            let low = high.saturating_sub(limit - 1).max(1);

            let events: Vec<Value> = (low..=high)
                .map(|event_id| {
                    json!({
                        "id": event_id,
                        "game": {
                            "id": event_id,
                            "beatmap_id": null,
                            "end_time": "2024-10-19T10:00:00+00:00",
                            "scores": [{"user_id": 1, "score": event_id}]
                        }
                    })
                })
                .collect();

            Json(json!({
                "match": {"id": id, "name": format!("lobby {}", id)},
                "events": events,
                "users": [{"id": 1, "username": "Alpha", "avatar_url": null}],
                "first_event_id": 1,
                "latest_event_id": id
            }))
            .into_response()
        }

        /// Serve the stub on an ephemeral port and return its address.
        pub async fn spawn(counters: Counters) -> std::net::SocketAddr {
            let app = Router::new()
                .route("/oauth/token", post(token))
                .route("/api/v2/matches/:id", get(match_page))
                .with_state(counters);

            let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
            let addr = listener.local_addr().unwrap();
            tokio::spawn(async move {
                axum::serve(listener, app).await.unwrap();
            });
            addr
        }
    }

    async fn stub_client() -> (OsuClient, stub::Counters) {
        let counters = stub::Counters::default();
        let addr = stub::spawn(counters.clone()).await;
        let config = ProviderConfig {
            api_base: format!("http://{}/api/v2", addr),
            oauth_url: format!("http://{}", addr),
            ..ProviderConfig::default()
        };
        let client = OsuClient::new(&config, Credentials::new("123", "secret")).unwrap();
        (client, counters)
    }

    fn count(counter: &std::sync::atomic::AtomicUsize) -> usize {
        counter.load(std::sync::atomic::Ordering::SeqCst)
    }

    #[tokio::test]
    async fn test_match_data_walks_back_to_first_event() {
        let (client, counters) = stub_client().await;

        let data = client.match_data(MatchId::new(250)).await.unwrap();

        // 151..=250, then before=151, then before=51 reaches event 1.
        assert_eq!(count(&counters.match_pages), 3);
        assert_eq!(data.name, "lobby 250");
        assert_eq!(data.games.len(), 250);
        assert_eq!(data.games.first().unwrap().game_id, 1);
        assert_eq!(data.games.last().unwrap().game_id, 250);
        assert_eq!(data.participants.len(), 1);

        // One token serves every page.
        assert_eq!(count(&counters.tokens), 1);
    }

    #[tokio::test]
    async fn test_match_data_stops_at_page_cap() {
        let (client, counters) = stub_client().await;

        let data = client.match_data(MatchId::new(10_000)).await.unwrap();

        assert_eq!(count(&counters.match_pages), MAX_PAGES);
        assert_eq!(data.games.len(), MAX_PAGES * PAGE_LIMIT as usize);
        assert_eq!(data.games.first().unwrap().game_id, 10_001 - 5_000);
    }

    #[tokio::test]
    async fn test_rate_limit_reports_retry_after() {
        let (client, _counters) = stub_client().await;

        let err = client.match_data(MatchId::new(429)).await.unwrap_err();

        match err {
            FetchError::RateLimited {
                host,
                retry_after_secs,
            } => {
                assert_eq!(host, "127.0.0.1");
                assert_eq!(retry_after_secs, 17);
            }
            other => panic!("expected rate limit, got {}", other),
        }
    }

    #[tokio::test]
    async fn test_unauthorized_clears_cached_token() {
        let (client, counters) = stub_client().await;

        let err = client.match_data(MatchId::new(401)).await.unwrap_err();
        assert!(matches!(err, FetchError::HttpStatus { status: 401, .. }));
        assert_eq!(count(&counters.tokens), 1);
        assert!(client.token.read().await.is_none());

        // The next request authenticates again.
        client.match_data(MatchId::new(3)).await.unwrap();
        assert_eq!(count(&counters.tokens), 2);
        assert!(client.token.read().await.is_some());
    }
}
