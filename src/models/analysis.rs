//! Transient match and prediction structures for one analysis run.
//!
//! These are never persisted. Field names follow the JSON shape exchanged
//! with the prediction model and the web client.

use serde::{Deserialize, Serialize};
#[cfg(feature = "binding-generation")]
use ts_rs::TS;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "binding-generation", derive(TS))]
#[cfg_attr(
    feature = "binding-generation",
    ts(export, export_to = "web/src/lib/generated/")
)]
pub struct Team {
    pub name: String,
}

/// Recent-form statistics for one side.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "binding-generation", derive(TS))]
#[cfg_attr(
    feature = "binding-generation",
    ts(export, export_to = "web/src/lib/generated/")
)]
#[serde(rename_all = "camelCase")]
pub struct Stats {
    /// Last five results, most recent last (`W`, `D`, `L`)
    pub form: String,
    pub goals_for: u32,
    pub goals_against: u32,
    /// Average possession percentage
    pub possession: u32,
    pub shots_on_target: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "binding-generation", derive(TS))]
#[cfg_attr(
    feature = "binding-generation",
    ts(export, export_to = "web/src/lib/generated/")
)]
pub struct HeadToHeadRecord {
    pub wins: u32,
    pub draws: u32,
    pub losses: u32,
}

impl HeadToHeadRecord {
    /// The same record seen from the opponent's side.
    pub fn mirrored(&self) -> Self {
        Self {
            wins: self.losses,
            draws: self.draws,
            losses: self.wins,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "binding-generation", derive(TS))]
#[cfg_attr(
    feature = "binding-generation",
    ts(export, export_to = "web/src/lib/generated/")
)]
pub struct HeadToHead {
    pub home: HeadToHeadRecord,
    pub away: HeadToHeadRecord,
}

/// A match enriched with statistics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "binding-generation", derive(TS))]
#[cfg_attr(
    feature = "binding-generation",
    ts(export, export_to = "web/src/lib/generated/")
)]
#[serde(rename_all = "camelCase")]
pub struct Match {
    pub home_team: Team,
    pub away_team: Team,
    pub home_stats: Stats,
    pub away_stats: Stats,
    pub head_to_head: HeadToHead,
    pub league: String,
}

/// A match plus the model's outcome label and rationale.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "binding-generation", derive(TS))]
#[cfg_attr(
    feature = "binding-generation",
    ts(export, export_to = "web/src/lib/generated/")
)]
pub struct MatchPrediction {
    #[serde(flatten)]
    pub fixture: Match,
    /// Short outcome label, e.g. "Home Win" or "Over 2.5 Goals"
    pub prediction: String,
    /// One or two sentences explaining the prediction
    pub reasoning: String,
}

/// Progress of the most recent analysis run of a session.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[cfg_attr(feature = "binding-generation", derive(TS))]
#[cfg_attr(
    feature = "binding-generation",
    ts(export, export_to = "web/src/lib/generated/")
)]
#[serde(tag = "status", rename_all = "camelCase")]
pub enum RunState {
    Idle,
    Running,
    Succeeded {
        predictions: Vec<MatchPrediction>,
        balance: i64,
    },
    Failed {
        error: String,
        message: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prediction_flattens_match_fields() {
        let json = serde_json::json!({
            "homeTeam": {"name": "Liverpool"},
            "awayTeam": {"name": "Arsenal"},
            "homeStats": {"form": "WWDLW", "goalsFor": 30, "goalsAgainst": 12, "possession": 58, "shotsOnTarget": 6},
            "awayStats": {"form": "WDWWL", "goalsFor": 27, "goalsAgainst": 15, "possession": 54, "shotsOnTarget": 5},
            "headToHead": {
                "home": {"wins": 5, "draws": 2, "losses": 3},
                "away": {"wins": 3, "draws": 2, "losses": 5}
            },
            "league": "Premier League",
            "prediction": "Home Win",
            "reasoning": "Liverpool are stronger at home."
        });

        let prediction: MatchPrediction = serde_json::from_value(json).unwrap();
        assert_eq!(prediction.fixture.home_team.name, "Liverpool");
        assert_eq!(prediction.fixture.head_to_head.away.losses, 5);
        assert_eq!(prediction.prediction, "Home Win");
    }

    #[test]
    fn mirrored_head_to_head_swaps_wins_and_losses() {
        let record = HeadToHeadRecord {
            wins: 7,
            draws: 2,
            losses: 4,
        };
        let mirrored = record.mirrored();
        assert_eq!(mirrored.wins, 4);
        assert_eq!(mirrored.draws, 2);
        assert_eq!(mirrored.losses, 7);
    }

    #[test]
    fn run_state_is_tagged_by_status() {
        let idle = serde_json::to_value(RunState::Idle).unwrap();
        assert_eq!(idle, serde_json::json!({"status": "idle"}));

        let failed = serde_json::to_value(RunState::Failed {
            error: "upstream_error".to_string(),
            message: "try again".to_string(),
        })
        .unwrap();
        assert_eq!(failed["status"], "failed");
        assert_eq!(failed["error"], "upstream_error");
    }
}
