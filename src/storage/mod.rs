//! In-memory ranking store.
//!
//! Holds the latest published standings for the tracked match. The refresh
//! scheduler is the only writer; HTTP handlers only read. Each publication
//! is an immutable [`Standings`] value swapped in whole, so a reader always
//! sees a table together with the match name it was computed for.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use sha2::{Digest, Sha256};
use tokio::sync::RwLock;
use tracing::debug;

use crate::models::{Policy, RankingTable};

/// One published generation of the leaderboard.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Standings {
    pub match_name: String,
    pub table: RankingTable,

    /// Number of successful replacements so far (0 = initial state)
    pub generation: u64,

    /// When this generation was published
    pub updated_at: Option<DateTime<Utc>>,

    /// Content hash of match name and table
    pub fingerprint: String,
}

impl Standings {
    /// The empty state served before the first refresh completes.
    pub fn initial(policy: Policy) -> Self {
        let table = RankingTable::empty(policy);
        let fingerprint = fingerprint("", &table);
        Self {
            match_name: String::new(),
            table,
            generation: 0,
            updated_at: None,
            fingerprint,
        }
    }

    fn published(match_name: String, table: RankingTable) -> Self {
        let fingerprint = fingerprint(&match_name, &table);
        Self {
            match_name,
            table,
            generation: 0,
            updated_at: Some(Utc::now()),
            fingerprint,
        }
    }
}

/// Hash the observable content of a generation.
///
/// Generation counter and timestamp are left out so an unchanged ranking
/// keeps the same fingerprint across refreshes.
fn fingerprint(match_name: &str, table: &RankingTable) -> String {
    let mut hasher = Sha256::new();
    hasher.update(match_name.as_bytes());
    hasher.update(b"|");
    hasher.update(table.policy.as_str().as_bytes());
    for entry in table.iter() {
        hasher.update(b"|");
        hasher.update(entry.player_id.get().to_le_bytes());
        hasher.update(entry.player_name.as_bytes());
        hasher.update(b"\0");
        hasher.update(entry.score.to_le_bytes());
        hasher.update(entry.avatar_url.as_deref().unwrap_or("").as_bytes());
        hasher.update(b"\0");
        hasher.update(entry.global_rank.unwrap_or(0).to_le_bytes());
    }
    let result = hasher.finalize();
    hex::encode(&result[..8])
}

/// Shared holder of the current standings.
#[derive(Debug)]
pub struct RankingStore {
    current: RwLock<Arc<Standings>>,
}

impl RankingStore {
    pub fn new(policy: Policy) -> Self {
        Self {
            current: RwLock::new(Arc::new(Standings::initial(policy))),
        }
    }

    /// Get the current generation.
    ///
    /// The returned value is immutable; later replacements do not affect it.
    pub async fn read(&self) -> Arc<Standings> {
        self.current.read().await.clone()
    }

    /// Publish a new table for `match_name`, replacing the previous one.
    pub async fn replace(&self, table: RankingTable, match_name: impl Into<String>) -> Arc<Standings> {
        let mut next = Standings::published(match_name.into(), table);

        let mut current = self.current.write().await;
        next.generation = current.generation + 1;
        let next = Arc::new(next);
        *current = Arc::clone(&next);
        drop(current);

        debug!(
            generation = next.generation,
            players = next.table.len(),
            "Published standings for {}",
            next.match_name
        );
        next
    }
}
