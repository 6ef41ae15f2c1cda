//! Core data models for the leaderboard.

mod ids;
mod player;
mod ranking;
mod snapshot;

pub use ids::*;
pub use player::*;
pub use ranking::*;
pub use snapshot::*;
