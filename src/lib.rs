//! # Multi Leaderboard
//!
//! A live leaderboard for osu! multiplayer matches.
//!
//! ## Architecture
//!
//! - **models**: Core data structures (players, snapshots, rankings)
//! - **fetch**: Match provider client and snapshot assembly
//! - **calculate**: Ranking computation under a scoring policy
//! - **storage**: Shared in-memory ranking store
//! - **sync**: Periodic refresh scheduler
//! - **api**: HTTP endpoints
//! - **config**: Configuration loading and validation

pub mod api;
pub mod calculate;
pub mod config;
pub mod fetch;
pub mod models;
pub mod storage;
pub mod sync;

pub use models::*;

use std::time::Duration;

/// Parse a human-friendly duration string (e.g., "10s", "2m", "1h").
pub fn parse_duration(s: &str) -> Option<Duration> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }

    let (num_str, multiplier) = if let Some(n) = s.strip_suffix('h') {
        (n, 3600)
    } else if let Some(n) = s.strip_suffix('m') {
        (n, 60)
    } else if let Some(n) = s.strip_suffix('s') {
        (n, 1)
    } else {
        // Default to seconds
        (s, 1)
    };

    let num: u64 = num_str.trim().parse().ok()?;
    Some(Duration::from_secs(num * multiplier))
}
