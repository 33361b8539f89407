use crate::model::{
    score_filter::ScoreFilter,
    structures::{
        beatmap_status::BeatmapStatus, gamemode::Gamemode, leaderboard_access::LeaderboardAccess, mods::Mods,
        score_mutation::ScoreMutation, score_set::ScoreSet
    }
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Reference entity owned by the ingestion collaborator. The engine only
/// reads beatmaps; it never writes them.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Beatmap {
    pub id: i64,
    pub gamemode: Gamemode,
    pub status: BeatmapStatus,
    pub artist: String,
    pub title: String,
    pub version: String,
    pub creator_name: String,
    pub max_combo: i32,
    pub star_rating: f64,
    pub approach_rate: f64,
    pub overall_difficulty: f64,
    pub circle_size: f64,
    pub health_drain: f64,
    pub bpm: f64,
    /// Drain length in seconds
    pub length: i32,
    pub last_updated: DateTime<Utc>
}

/// Per-judgement hit counts for a single play.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoreStatistics {
    pub count_300: i32,
    pub count_100: i32,
    pub count_50: i32,
    pub count_miss: i32,
    pub count_katu: i32,
    pub count_geki: i32
}

impl ScoreStatistics {
    pub fn total_hits(&self) -> i32 {
        self.count_300 + self.count_100 + self.count_50 + self.count_miss
    }
}

/// A single play. Immutable once created except for its calculation
/// results; superseded scores are deleted, never updated in place.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Score {
    pub id: i64,
    pub user_id: i64,
    pub beatmap_id: i64,
    pub gamemode: Gamemode,
    pub mods: Mods,
    pub statistics: ScoreStatistics,
    pub combo: i32,
    /// Accuracy percentage in [0, 100], derived from the statistics
    pub accuracy: f64,
    pub mutation: ScoreMutation,
    /// Set on mutated scores only, pointing at the real play they derive from
    pub source_score_id: Option<i64>,
    pub created_at: DateTime<Utc>
}

impl Score {
    pub fn is_real(&self) -> bool {
        self.mutation == ScoreMutation::None
    }
}

/// Cache row keyed by (beatmap_id, mods, engine). A row with an empty value
/// set is a failed calculation and is retried by the next recompute pass.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DifficultyCalculation {
    pub id: i64,
    pub beatmap_id: i64,
    pub mods: Mods,
    pub engine: String,
    pub calculator_version: String,
    pub values: Vec<CalculationValue>
}

impl DifficultyCalculation {
    pub fn value(&self, name: &str) -> Option<f64> {
        self.values.iter().find(|v| v.name == name).map(|v| v.value)
    }
}

/// Cache row keyed by (score_id, engine), referencing the difficulty row
/// matching the score's beatmap + mods.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PerformanceCalculation {
    pub id: i64,
    pub score_id: i64,
    pub difficulty_calculation_id: i64,
    pub engine: String,
    pub calculator_version: String,
    pub values: Vec<CalculationValue>
}

impl PerformanceCalculation {
    pub fn value(&self, name: &str) -> Option<f64> {
        self.values.iter().find(|v| v.name == name).map(|v| v.value)
    }

    pub fn total(&self) -> Option<f64> {
        self.value("total")
    }
}

/// Named scalar produced by a calculator engine, stored keyed by
/// (calculation_id, name).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CalculationValue {
    pub name: String,
    pub value: f64
}

/// A named ranking scope with its own aggregation policy and score filter.
/// Archived leaderboards never recompute.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Leaderboard {
    pub id: i64,
    pub gamemode: Gamemode,
    pub name: String,
    pub description: String,
    /// Community leaderboards have an owner; global ones do not
    pub owner_id: Option<i64>,
    pub access_type: LeaderboardAccess,
    pub score_set: ScoreSet,
    /// Geometric weighting constant of the aggregation series
    pub decay_factor: f64,
    /// When false, only scores set after the membership's join date count
    pub allow_past_scores: bool,
    pub archived: bool,
    pub score_filter: ScoreFilter,
    /// Routing key for record notifications; None disables them
    pub notification_target: Option<String>
}

/// A user's ranked participation record within one leaderboard.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Membership {
    pub id: i64,
    pub leaderboard_id: i64,
    pub user_id: i64,
    pub pp: f64,
    pub score_count: i32,
    /// 1-based position among the leaderboard's memberships by pp descending
    pub rank: i32,
    pub joined_at: DateTime<Utc>
}

/// Denormalized join recording exactly which scores currently count toward
/// a membership's total, with the weighted contribution cached for diffing.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MembershipScore {
    pub leaderboard_id: i64,
    pub membership_id: i64,
    pub score_id: i64,
    /// The score's ranking value under the leaderboard's policy
    pub raw_pp: f64,
    /// raw_pp * decay^index at the score's position in the sorted set
    pub weighted_pp: f64
}

/// Pending invitation to a restricted leaderboard, consumed on join.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Invite {
    pub id: i64,
    pub leaderboard_id: i64,
    pub user_id: i64,
    pub message: String,
    pub created_at: DateTime<Utc>
}
