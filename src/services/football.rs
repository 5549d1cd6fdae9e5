// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Mock football statistics provider.
//!
//! Resolves team names against a small catalog and fills in random but
//! plausible statistics. Head-to-head records are mirrored so both sides
//! agree.

use crate::error::AppError;
use crate::models::{HeadToHead, HeadToHeadRecord, Match, Stats, Team};
use crate::services::analysis::StatsProvider;
use async_trait::async_trait;
use rand::Rng;
use std::time::Duration;

const LEAGUE: &str = "Champions League";
const UNKNOWN_TEAM: &str = "Unknown";
const FORM_OUTCOMES: [char; 3] = ['W', 'D', 'L'];

/// Lowercase lookup key and display name.
const TEAMS: &[(&str, &str)] = &[
    ("real madrid", "Real Madrid"),
    ("barcelona", "FC Barcelona"),
    ("manchester city", "Manchester City"),
    ("liverpool", "Liverpool"),
    ("bayern munich", "Bayern Munich"),
    ("borussia dortmund", "Borussia Dortmund"),
    ("paris saint-germain", "Paris Saint-Germain"),
    ("olympique lyonnais", "Olympique Lyonnais"),
    ("juventus", "Juventus"),
    ("ac milan", "AC Milan"),
    ("inter milan", "Inter Milan"),
    ("chelsea", "Chelsea"),
    ("arsenal", "Arsenal"),
    ("manchester united", "Manchester United"),
    ("atletico madrid", "Atlético Madrid"),
];

/// Statistics provider backed by the built-in catalog.
#[derive(Debug, Clone, Default)]
pub struct MockFootballApi {
    /// Simulated network latency
    latency: Duration,
}

impl MockFootballApi {
    pub fn with_latency(latency: Duration) -> Self {
        Self { latency }
    }
}

#[async_trait]
impl StatsProvider for MockFootballApi {
    async fn find_matches(&self, names: &[String]) -> Result<Vec<Match>, AppError> {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        let mut rng = rand::thread_rng();
        Ok(names
            .iter()
            .map(|name| build_match(name, &mut rng))
            .collect())
    }
}

/// Split `"Home vs Away"` (case-insensitive separator).
fn split_pairing(name: &str) -> (&str, &str) {
    let lower = name.to_ascii_lowercase();
    match lower.find(" vs ") {
        Some(idx) => (name[..idx].trim(), name[idx + 4..].trim()),
        None => (name.trim(), UNKNOWN_TEAM),
    }
}

/// Resolve a name against the catalog; unknown teams keep the given name.
fn resolve_team(name: &str) -> Team {
    let normalized = name.trim().to_lowercase();
    if normalized.is_empty() {
        return Team {
            name: UNKNOWN_TEAM.to_string(),
        };
    }

    let found = TEAMS
        .iter()
        .find(|(key, _)| key.contains(normalized.as_str()) || normalized.contains(key));

    Team {
        name: found
            .map(|(_, display)| display.to_string())
            .unwrap_or_else(|| name.trim().to_string()),
    }
}

fn random_form(rng: &mut impl Rng) -> String {
    (0..5)
        .map(|_| FORM_OUTCOMES[rng.gen_range(0..FORM_OUTCOMES.len())])
        .collect()
}

fn random_stats(rng: &mut impl Rng) -> Stats {
    Stats {
        form: random_form(rng),
        goals_for: rng.gen_range(15..=40),
        goals_against: rng.gen_range(10..=35),
        possession: rng.gen_range(45..=65),
        shots_on_target: rng.gen_range(3..=8),
    }
}

fn build_match(name: &str, rng: &mut impl Rng) -> Match {
    let (home, away) = split_pairing(name);

    let home_record = HeadToHeadRecord {
        wins: rng.gen_range(2..=10),
        draws: rng.gen_range(1..=5),
        losses: rng.gen_range(2..=10),
    };

    Match {
        home_team: resolve_team(home),
        away_team: resolve_team(away),
        home_stats: random_stats(rng),
        away_stats: random_stats(rng),
        head_to_head: HeadToHead {
            home: home_record,
            away: home_record.mirrored(),
        },
        league: LEAGUE.to_string(),
    }
}
