//! Typed identifiers for provider entities.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use url::Url;

/// Error parsing a match identifier from user input.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum IdParseError {
    #[error("Empty match id")]
    Empty,

    #[error("Not a match id or match URL: {0}")]
    Invalid(String),
}

/// A player (user) id as issued by the provider.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PlayerId(u64);

impl PlayerId {
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn get(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for PlayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Debug for PlayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PlayerId({})", self.0)
    }
}

impl From<u64> for PlayerId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

/// A multiplayer match (room) id.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MatchId(u64);

impl MatchId {
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn get(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for MatchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Debug for MatchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MatchId({})", self.0)
    }
}

impl From<u64> for MatchId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

/// Accepts either a bare number or a match page URL
/// (e.g. `https://osu.ppy.sh/community/matches/111534249`).
impl FromStr for MatchId {
    type Err = IdParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err(IdParseError::Empty);
        }

        if let Ok(id) = s.parse::<u64>() {
            return Ok(Self(id));
        }

        let url = Url::parse(s).map_err(|_| IdParseError::Invalid(s.to_string()))?;
        let mut segments = url
            .path_segments()
            .ok_or_else(|| IdParseError::Invalid(s.to_string()))?;

        // The id is the segment right after "matches" (or "mp" for short links).
        let found = segments
            .by_ref()
            .find(|seg| *seg == "matches" || *seg == "mp")
            .and_then(|_| segments.next())
            .and_then(|seg| seg.parse::<u64>().ok());

        found
            .map(Self)
            .ok_or_else(|| IdParseError::Invalid(s.to_string()))
    }
}
