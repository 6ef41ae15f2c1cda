//! Ranking models.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::PlayerId;

/// How per-map results fold into a final ranking.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum Policy {
    /// Sum of per-map finishing positions, lower is better
    #[default]
    #[serde(alias = "positions")]
    Position,
    /// Sum of raw scores, higher is better
    #[serde(alias = "total", alias = "total_score")]
    TotalScore,
}

impl Policy {
    pub fn lower_is_better(&self) -> bool {
        matches!(self, Policy::Position)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Policy::Position => "position",
            Policy::TotalScore => "total-score",
        }
    }
}

impl fmt::Display for Policy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Policy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "position" | "positions" => Ok(Policy::Position),
            "total-score" | "total_score" | "total" => Ok(Policy::TotalScore),
            other => Err(format!(
                "Unknown policy '{}'. Use 'position' or 'total-score'.",
                other
            )),
        }
    }
}

/// One row of a ranking.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RankingEntry {
    pub player_id: PlayerId,
    pub player_name: String,

    /// Summed positions or summed score, depending on policy
    pub score: u64,

    pub avatar_url: Option<String>,
    pub global_rank: Option<u32>,

    /// Number of maps this player has a score on
    pub maps_played: u32,
}

/// A total ordering of players, best first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct RankingTable {
    pub policy: Policy,
    pub entries: Vec<RankingEntry>,
}

impl RankingTable {
    pub fn empty(policy: Policy) -> Self {
        Self {
            policy,
            entries: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &RankingEntry> {
        self.entries.iter()
    }

    /// Find a player's row by display name.
    pub fn get(&self, player_name: &str) -> Option<&RankingEntry> {
        self.entries.iter().find(|e| e.player_name == player_name)
    }

    /// Player names, best first.
    pub fn names(&self) -> Vec<&str> {
        self.entries.iter().map(|e| e.player_name.as_str()).collect()
    }
}
