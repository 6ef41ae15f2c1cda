//! Ranking calculation engine.
//!
//! Folds every completed game of a [`Snapshot`] into per-player totals and
//! orders the result under a [`Policy`]:
//! - Position: sum of 1-based finishing positions per map, lower is better
//! - TotalScore: sum of raw scores, higher is better
//!
//! Pure functions only; the same snapshot always yields the same table.

use std::collections::{HashMap, HashSet};

use crate::models::{GameEvent, Player, PlayerId, Policy, RankingEntry, RankingTable, Snapshot};

/// Running totals for one player, kept in encounter order.
#[derive(Debug)]
struct Tally<'a> {
    player_id: PlayerId,
    player: Option<&'a Player>,
    total: u64,
    maps_played: u32,
}

/// Finishing positions for a single map, best first.
///
/// Scores are ordered descending; equal scores keep the provider's order.
pub fn positions_for_game(game: &GameEvent) -> Vec<(PlayerId, u32)> {
    let mut order: Vec<_> = game.scores.iter().collect();
    order.sort_by(|a, b| b.score.cmp(&a.score));

    order
        .into_iter()
        .enumerate()
        .map(|(i, entry)| (entry.player_id, i as u32 + 1))
        .collect()
}

/// Compute the full ranking for a snapshot.
///
/// Participants with no scored map are left out under [`Policy::Position`]
/// (zero points would otherwise rank them first) and placed last with a
/// score of zero under [`Policy::TotalScore`].
pub fn aggregate(snapshot: &Snapshot, policy: Policy) -> RankingTable {
    let mut tallies: Vec<Tally> = Vec::with_capacity(snapshot.players.len());
    let mut index: HashMap<PlayerId, usize> = HashMap::new();

    for player in &snapshot.players {
        if index.contains_key(&player.id) {
            continue;
        }
        index.insert(player.id, tallies.len());
        tallies.push(Tally {
            player_id: player.id,
            player: Some(player),
            total: 0,
            maps_played: 0,
        });
    }

    for game in &snapshot.games {
        let contributions: Vec<(PlayerId, u64)> = match policy {
            Policy::Position => positions_for_game(game)
                .into_iter()
                .map(|(id, pos)| (id, pos as u64))
                .collect(),
            Policy::TotalScore => game.scores.iter().map(|s| (s.player_id, s.score)).collect(),
        };

        for (player_id, points) in contributions {
            let slot = *index.entry(player_id).or_insert_with(|| {
                tallies.push(Tally {
                    player_id,
                    player: None,
                    total: 0,
                    maps_played: 0,
                });
                tallies.len() - 1
            });
            let tally = &mut tallies[slot];
            tally.total += points;
            tally.maps_played += 1;
        }
    }

    // Names key the feed's JSON maps, so each one must be unique.
    let mut taken: HashSet<String> = HashSet::new();
    let mut entries: Vec<RankingEntry> = tallies
        .into_iter()
        .filter(|t| policy == Policy::TotalScore || t.maps_played > 0)
        .map(|t| {
            let base = t
                .player
                .map(|p| p.username.clone())
                .unwrap_or_else(|| t.player_id.to_string());
            let player_name = unique_name(&mut taken, base, t.player_id);
            RankingEntry {
                player_id: t.player_id,
                player_name,
                score: t.total,
                avatar_url: t.player.and_then(|p| p.avatar_url.clone()),
                global_rank: t.player.and_then(|p| p.global_rank),
                maps_played: t.maps_played,
            }
        })
        .collect();

    // Stable sorts: ties keep encounter order.
    match policy {
        Policy::Position => entries.sort_by(|a, b| a.score.cmp(&b.score)),
        Policy::TotalScore => entries.sort_by(|a, b| {
            (a.maps_played == 0)
                .cmp(&(b.maps_played == 0))
                .then(b.score.cmp(&a.score))
        }),
    }

    RankingTable { policy, entries }
}

/// Claim `name`, or `name [id]` when an earlier entry already holds it.
fn unique_name(taken: &mut HashSet<String>, name: String, id: PlayerId) -> String {
    if taken.insert(name.clone()) {
        return name;
    }
    let mut candidate = format!("{} [{}]", name, id);
    let mut n = 2;
    while !taken.insert(candidate.clone()) {
        candidate = format!("{} [{}] ({})", name, id, n);
        n += 1;
    }
    candidate
}
