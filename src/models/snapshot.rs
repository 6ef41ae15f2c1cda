//! Match snapshot models.

use serde::{Deserialize, Serialize};

use super::{Player, PlayerId};

/// A single player's raw score on one map.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScoreEntry {
    pub player_id: PlayerId,
    pub score: u64,
}

impl ScoreEntry {
    pub fn new(player_id: impl Into<PlayerId>, score: u64) -> Self {
        Self {
            player_id: player_id.into(),
            score,
        }
    }
}

/// One completed map within a match.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GameEvent {
    /// Provider game id
    pub game_id: u64,

    /// Beatmap played, if reported
    pub beatmap_id: Option<u64>,

    /// Scores in the order the provider reported them
    pub scores: Vec<ScoreEntry>,
}

impl GameEvent {
    pub fn new(game_id: u64, scores: Vec<ScoreEntry>) -> Self {
        Self {
            game_id,
            beatmap_id: None,
            scores,
        }
    }
}

/// An internally consistent view of a match at one point in time.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    pub match_name: String,

    /// Participants, in provider order
    pub players: Vec<Player>,

    /// Completed games, in play order
    pub games: Vec<GameEvent>,
}

impl Snapshot {
    pub fn new(match_name: impl Into<String>, players: Vec<Player>, games: Vec<GameEvent>) -> Self {
        Self {
            match_name: match_name.into(),
            players,
            games,
        }
    }

    /// Look up a participant by id.
    pub fn player(&self, id: PlayerId) -> Option<&Player> {
        self.players.iter().find(|p| p.id == id)
    }
}
