//! Player model.

use serde::{Deserialize, Serialize};

use super::PlayerId;

/// A match participant with best-effort enrichment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Player {
    pub id: PlayerId,

    /// Display name
    pub username: String,

    /// Avatar image URL, if known
    pub avatar_url: Option<String>,

    /// Global performance rank, if known
    pub global_rank: Option<u32>,
}

impl Player {
    /// Create a player without enrichment.
    pub fn new(id: impl Into<PlayerId>, username: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            username: username.into(),
            avatar_url: None,
            global_rank: None,
        }
    }

    pub fn with_avatar(mut self, url: impl Into<String>) -> Self {
        self.avatar_url = Some(url.into());
        self
    }

    pub fn with_global_rank(mut self, rank: u32) -> Self {
        self.global_rank = Some(rank);
        self
    }
}
