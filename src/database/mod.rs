use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::future::Future;
use thiserror::Error;

use crate::database::db_structs::{
    Beatmap, CalculationValue, DifficultyCalculation, Invite, Leaderboard, Membership, MembershipScore,
    PerformanceCalculation, Score
};
use crate::model::structures::{gamemode::Gamemode, mods::Mods, score_mutation::ScoreMutation};

pub mod db;
pub mod db_structs;
pub mod memory;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Postgres(#[from] tokio_postgres::Error),

    #[error("failed to decode stored value: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("{entity} {id} not found")]
    MissingRow { entity: &'static str, id: i64 },

    #[error("invalid discriminant {value} for {field}")]
    InvalidDiscriminant { field: &'static str, value: i32 }
}

/// The fully-computed outcome of one membership update, applied atomically:
/// a concurrent reader must never observe the contribution rows without the
/// recomputed total and rank. The inserted/updated/removed split is the diff
/// against the membership's previously-recorded score set.
#[derive(Debug, Clone, Default)]
pub struct MembershipUpdate {
    pub membership_id: i64,
    pub leaderboard_id: i64,
    pub pp: f64,
    pub score_count: i32,
    pub rank: i32,
    pub inserted: Vec<MembershipScore>,
    pub updated: Vec<MembershipScore>,
    pub removed_score_ids: Vec<i64>
}

/// Storage operations the engine requires. All upserts are explicit
/// find-by-unique-key then insert-or-update, so implementations do not need
/// storage-specific conflict resolution. Version upserts are compare-and-set:
/// a strictly-older calculator version never overwrites a newer row.
pub trait Store: Send + Sync {
    // --- beatmaps ---

    fn get_beatmaps(&self, ids: &[i64]) -> impl Future<Output = Result<HashMap<i64, Beatmap>, StoreError>> + Send;

    // --- scores ---

    /// Real (non-mutated) scores of a user in one gamemode.
    fn get_user_scores(
        &self,
        user_id: i64,
        gamemode: Gamemode
    ) -> impl Future<Output = Result<Vec<Score>, StoreError>> + Send;

    /// Mutated variants derived from the given source scores.
    fn get_score_mutations(
        &self,
        source_score_ids: &[i64],
        mutation: ScoreMutation
    ) -> impl Future<Output = Result<Vec<Score>, StoreError>> + Send;

    /// Inserts a score, assigning its id.
    fn insert_score(&self, score: Score) -> impl Future<Output = Result<Score, StoreError>> + Send;

    /// Every score (real and mutated) set on the given beatmaps.
    fn get_scores_for_beatmaps(
        &self,
        beatmap_ids: &[i64]
    ) -> impl Future<Output = Result<Vec<Score>, StoreError>> + Send;

    /// Distinct users with at least one real score in the gamemode.
    fn get_user_ids(&self, gamemode: Gamemode) -> impl Future<Output = Result<Vec<i64>, StoreError>> + Send;

    // --- difficulty calculations ---

    fn get_difficulty_calculations(
        &self,
        keys: &[(i64, Mods)],
        engine: &str
    ) -> impl Future<Output = Result<Vec<DifficultyCalculation>, StoreError>> + Send;

    /// Compare-and-set upsert keyed by (beatmap_id, mods, engine). Returns
    /// None when the stored version is newer than `calculator_version`.
    /// Advancing the version clears the previous value set.
    fn upsert_difficulty_calculation(
        &self,
        beatmap_id: i64,
        mods: Mods,
        engine: &str,
        calculator_version: &str
    ) -> impl Future<Output = Result<Option<DifficultyCalculation>, StoreError>> + Send;

    /// Replaces the value set of a difficulty calculation, keyed by
    /// (calculation_id, name). Re-running with identical values is a no-op.
    fn replace_difficulty_values(
        &self,
        calculation_id: i64,
        values: &[CalculationValue]
    ) -> impl Future<Output = Result<(), StoreError>> + Send;

    // --- performance calculations ---

    fn get_performance_calculations(
        &self,
        score_ids: &[i64],
        engine: &str
    ) -> impl Future<Output = Result<Vec<PerformanceCalculation>, StoreError>> + Send;

    /// Compare-and-set upsert keyed by (score_id, engine); same contract as
    /// the difficulty variant.
    fn upsert_performance_calculation(
        &self,
        score_id: i64,
        difficulty_calculation_id: i64,
        engine: &str,
        calculator_version: &str
    ) -> impl Future<Output = Result<Option<PerformanceCalculation>, StoreError>> + Send;

    fn replace_performance_values(
        &self,
        calculation_id: i64,
        values: &[CalculationValue]
    ) -> impl Future<Output = Result<(), StoreError>> + Send;

    // --- leaderboards and memberships ---

    fn get_leaderboard(
        &self,
        leaderboard_id: i64
    ) -> impl Future<Output = Result<Option<Leaderboard>, StoreError>> + Send;

    /// Ids of leaderboards the user currently holds a membership in.
    fn get_member_leaderboard_ids(
        &self,
        user_id: i64,
        gamemode: Gamemode
    ) -> impl Future<Output = Result<Vec<i64>, StoreError>> + Send;

    fn get_membership(
        &self,
        leaderboard_id: i64,
        user_id: i64
    ) -> impl Future<Output = Result<Option<Membership>, StoreError>> + Send;

    fn insert_membership(
        &self,
        leaderboard_id: i64,
        user_id: i64,
        joined_at: DateTime<Utc>
    ) -> impl Future<Output = Result<Membership, StoreError>> + Send;

    /// Removes a membership and its contribution rows.
    fn delete_membership(
        &self,
        leaderboard_id: i64,
        user_id: i64
    ) -> impl Future<Output = Result<(), StoreError>> + Send;

    fn get_membership_scores(
        &self,
        membership_id: i64
    ) -> impl Future<Output = Result<Vec<MembershipScore>, StoreError>> + Send;

    /// Memberships of the leaderboard with pp strictly greater than `pp`,
    /// excluding the membership being updated.
    fn count_memberships_above(
        &self,
        leaderboard_id: i64,
        pp: f64,
        exclude_membership_id: i64
    ) -> impl Future<Output = Result<i64, StoreError>> + Send;

    /// The highest raw ranking value currently on the leaderboard.
    fn leaderboard_record(
        &self,
        leaderboard_id: i64
    ) -> impl Future<Output = Result<Option<MembershipScore>, StoreError>> + Send;

    /// The membership with the highest aggregate total on the leaderboard.
    fn top_member(
        &self,
        leaderboard_id: i64
    ) -> impl Future<Output = Result<Option<Membership>, StoreError>> + Send;

    /// Applies a membership update atomically and returns the stored row.
    fn commit_membership_update(
        &self,
        update: &MembershipUpdate
    ) -> impl Future<Output = Result<Membership, StoreError>> + Send;

    // --- invites ---

    fn find_invite(
        &self,
        leaderboard_id: i64,
        user_id: i64
    ) -> impl Future<Output = Result<Option<Invite>, StoreError>> + Send;

    fn delete_invite(&self, invite_id: i64) -> impl Future<Output = Result<(), StoreError>> + Send;
}
