use axum::extract::State;
use axum::http::header::{CACHE_CONTROL, ETAG, IF_NONE_MATCH};
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::ser::SerializeStruct;
use serde::{Serialize, Serializer};

use crate::api::state::AppState;
use crate::models::{Policy, RankingTable};
use crate::storage::Standings;

/// Wire shape of `GET /api/scores`.
///
/// ```json
/// {
///   "scores":  {"<player>": 12, ...},
///   "avatars": {"<player>": "<url or empty>", ...},
///   "ranks":   {"<player>": 1234, ...},
///   "match_name": "..."
/// }
/// ```
///
/// Maps follow ranking order, best first. `ranks` is only present under the
/// total-score policy and only lists players with a known global rank.
pub struct ScoresResponse<'a> {
    standings: &'a Standings,
}

impl<'a> From<&'a Standings> for ScoresResponse<'a> {
    fn from(standings: &'a Standings) -> Self {
        Self { standings }
    }
}

struct ScoreMap<'a>(&'a RankingTable);
struct AvatarMap<'a>(&'a RankingTable);
struct RankMap<'a>(&'a RankingTable);

impl Serialize for ScoreMap<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_map(self.0.iter().map(|e| (&e.player_name, e.score)))
    }
}

impl Serialize for AvatarMap<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_map(
            self.0
                .iter()
                .map(|e| (&e.player_name, e.avatar_url.as_deref().unwrap_or(""))),
        )
    }
}

impl Serialize for RankMap<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_map(
            self.0
                .iter()
                .filter_map(|e| e.global_rank.map(|rank| (&e.player_name, rank))),
        )
    }
}

impl Serialize for ScoresResponse<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let table = &self.standings.table;
        let with_ranks = table.policy == Policy::TotalScore;

        let mut state =
            serializer.serialize_struct("ScoresResponse", if with_ranks { 4 } else { 3 })?;
        state.serialize_field("scores", &ScoreMap(table))?;
        state.serialize_field("avatars", &AvatarMap(table))?;
        if with_ranks {
            state.serialize_field("ranks", &RankMap(table))?;
        } else {
            state.skip_field("ranks")?;
        }
        state.serialize_field("match_name", &self.standings.match_name)?;
        state.end()
    }
}

fn etag_matches(headers: &HeaderMap, etag: &str) -> bool {
    headers
        .get_all(IF_NONE_MATCH)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .map(str::trim)
        .any(|tag| tag == "*" || tag == etag || tag.strip_prefix("W/") == Some(etag))
}

pub async fn get_scores(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let standings = state.store.read().await;
    let etag = format!("\"{}\"", standings.fingerprint);

    let mut response = if etag_matches(&headers, &etag) {
        StatusCode::NOT_MODIFIED.into_response()
    } else {
        Json(ScoresResponse::from(standings.as_ref())).into_response()
    };

    if let Ok(value) = HeaderValue::from_str(&etag) {
        response.headers_mut().insert(ETAG, value);
    }
    response
        .headers_mut()
        .insert(CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    response
}
