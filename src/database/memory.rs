use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use std::collections::HashMap;
use std::sync::Mutex;

use crate::database::db_structs::{
    Beatmap, CalculationValue, DifficultyCalculation, Invite, Leaderboard, Membership, MembershipScore,
    PerformanceCalculation, Score
};
use crate::database::{MembershipUpdate, Store, StoreError};
use crate::model::structures::{gamemode::Gamemode, mods::Mods, score_mutation::ScoreMutation};

#[derive(Default)]
struct Inner {
    beatmaps: IndexMap<i64, Beatmap>,
    scores: IndexMap<i64, Score>,
    difficulty_calculations: IndexMap<i64, DifficultyCalculation>,
    performance_calculations: IndexMap<i64, PerformanceCalculation>,
    leaderboards: IndexMap<i64, Leaderboard>,
    memberships: IndexMap<i64, Membership>,
    membership_scores: Vec<MembershipScore>,
    invites: IndexMap<i64, Invite>,
    next_id: i64
}

impl Inner {
    fn allocate_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }
}

/// In-memory Store with the same key-based upsert semantics as the postgres
/// client. Backs the test-suite and embedded use; a single mutex makes every
/// operation atomic with respect to concurrent readers.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>
}

impl MemoryStore {
    pub fn new() -> MemoryStore {
        MemoryStore::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        // A poisoned lock means a test panicked mid-write; propagating the
        // panic is the right outcome there.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Seeds a beatmap, assigning an id when none is set.
    pub fn add_beatmap(&self, mut beatmap: Beatmap) -> Beatmap {
        let mut inner = self.lock();
        if beatmap.id == 0 {
            beatmap.id = inner.allocate_id();
        }
        inner.beatmaps.insert(beatmap.id, beatmap.clone());
        beatmap
    }

    /// Seeds a leaderboard, assigning an id when none is set.
    pub fn add_leaderboard(&self, mut leaderboard: Leaderboard) -> Leaderboard {
        let mut inner = self.lock();
        if leaderboard.id == 0 {
            leaderboard.id = inner.allocate_id();
        }
        inner.leaderboards.insert(leaderboard.id, leaderboard.clone());
        leaderboard
    }

    /// Seeds an invite, assigning an id when none is set.
    pub fn add_invite(&self, mut invite: Invite) -> Invite {
        let mut inner = self.lock();
        if invite.id == 0 {
            invite.id = inner.allocate_id();
        }
        inner.invites.insert(invite.id, invite.clone());
        invite
    }

    /// Deletes a score and any mutations derived from it.
    pub fn remove_score(&self, score_id: i64) {
        let mut inner = self.lock();
        inner.scores.shift_remove(&score_id);
        inner
            .scores
            .retain(|_, score| score.source_score_id != Some(score_id));
    }

    pub fn get_score(&self, score_id: i64) -> Option<Score> {
        self.lock().scores.get(&score_id).cloned()
    }

    pub fn membership_score_count(&self, membership_id: i64) -> usize {
        self.lock()
            .membership_scores
            .iter()
            .filter(|ms| ms.membership_id == membership_id)
            .count()
    }
}

impl Store for MemoryStore {
    async fn get_beatmaps(&self, ids: &[i64]) -> Result<HashMap<i64, Beatmap>, StoreError> {
        let inner = self.lock();
        Ok(ids
            .iter()
            .filter_map(|id| inner.beatmaps.get(id).map(|b| (*id, b.clone())))
            .collect())
    }

    async fn get_user_scores(&self, user_id: i64, gamemode: Gamemode) -> Result<Vec<Score>, StoreError> {
        let inner = self.lock();
        Ok(inner
            .scores
            .values()
            .filter(|s| s.user_id == user_id && s.gamemode == gamemode && s.is_real())
            .cloned()
            .collect())
    }

    async fn get_score_mutations(
        &self,
        source_score_ids: &[i64],
        mutation: ScoreMutation
    ) -> Result<Vec<Score>, StoreError> {
        let inner = self.lock();
        Ok(inner
            .scores
            .values()
            .filter(|s| {
                s.mutation == mutation
                    && s.source_score_id
                        .is_some_and(|source| source_score_ids.contains(&source))
            })
            .cloned()
            .collect())
    }

    async fn insert_score(&self, mut score: Score) -> Result<Score, StoreError> {
        let mut inner = self.lock();
        if score.id == 0 {
            score.id = inner.allocate_id();
        }
        inner.scores.insert(score.id, score.clone());
        Ok(score)
    }

    async fn get_scores_for_beatmaps(&self, beatmap_ids: &[i64]) -> Result<Vec<Score>, StoreError> {
        let inner = self.lock();
        Ok(inner
            .scores
            .values()
            .filter(|s| beatmap_ids.contains(&s.beatmap_id))
            .cloned()
            .collect())
    }

    async fn get_user_ids(&self, gamemode: Gamemode) -> Result<Vec<i64>, StoreError> {
        let inner = self.lock();
        let mut ids: Vec<i64> = inner
            .scores
            .values()
            .filter(|s| s.gamemode == gamemode && s.is_real())
            .map(|s| s.user_id)
            .collect();
        ids.sort_unstable();
        ids.dedup();
        Ok(ids)
    }

    async fn get_difficulty_calculations(
        &self,
        keys: &[(i64, Mods)],
        engine: &str
    ) -> Result<Vec<DifficultyCalculation>, StoreError> {
        let inner = self.lock();
        Ok(inner
            .difficulty_calculations
            .values()
            .filter(|c| c.engine == engine && keys.contains(&(c.beatmap_id, c.mods)))
            .cloned()
            .collect())
    }

    async fn upsert_difficulty_calculation(
        &self,
        beatmap_id: i64,
        mods: Mods,
        engine: &str,
        calculator_version: &str
    ) -> Result<Option<DifficultyCalculation>, StoreError> {
        let mut inner = self.lock();

        let existing_id = inner
            .difficulty_calculations
            .values()
            .find(|c| c.beatmap_id == beatmap_id && c.mods == mods && c.engine == engine)
            .map(|c| c.id);

        match existing_id {
            Some(id) => {
                let row = inner.difficulty_calculations.get_mut(&id).unwrap();
                if row.calculator_version.as_str() > calculator_version {
                    return Ok(None);
                }
                if row.calculator_version.as_str() < calculator_version {
                    row.calculator_version = calculator_version.to_string();
                    row.values.clear();
                }
                Ok(Some(row.clone()))
            }
            None => {
                let id = inner.allocate_id();
                let row = DifficultyCalculation {
                    id,
                    beatmap_id,
                    mods,
                    engine: engine.to_string(),
                    calculator_version: calculator_version.to_string(),
                    values: Vec::new()
                };
                inner.difficulty_calculations.insert(id, row.clone());
                Ok(Some(row))
            }
        }
    }

    async fn replace_difficulty_values(
        &self,
        calculation_id: i64,
        values: &[CalculationValue]
    ) -> Result<(), StoreError> {
        let mut inner = self.lock();
        let row = inner
            .difficulty_calculations
            .get_mut(&calculation_id)
            .ok_or(StoreError::MissingRow {
                entity: "difficulty calculation",
                id: calculation_id
            })?;
        row.values = values.to_vec();
        Ok(())
    }

    async fn get_performance_calculations(
        &self,
        score_ids: &[i64],
        engine: &str
    ) -> Result<Vec<PerformanceCalculation>, StoreError> {
        let inner = self.lock();
        Ok(inner
            .performance_calculations
            .values()
            .filter(|c| c.engine == engine && score_ids.contains(&c.score_id))
            .cloned()
            .collect())
    }

    async fn upsert_performance_calculation(
        &self,
        score_id: i64,
        difficulty_calculation_id: i64,
        engine: &str,
        calculator_version: &str
    ) -> Result<Option<PerformanceCalculation>, StoreError> {
        let mut inner = self.lock();

        let existing_id = inner
            .performance_calculations
            .values()
            .find(|c| c.score_id == score_id && c.engine == engine)
            .map(|c| c.id);

        match existing_id {
            Some(id) => {
                let row = inner.performance_calculations.get_mut(&id).unwrap();
                if row.calculator_version.as_str() > calculator_version {
                    return Ok(None);
                }
                if row.calculator_version.as_str() < calculator_version {
                    row.calculator_version = calculator_version.to_string();
                    row.values.clear();
                }
                row.difficulty_calculation_id = difficulty_calculation_id;
                Ok(Some(row.clone()))
            }
            None => {
                let id = inner.allocate_id();
                let row = PerformanceCalculation {
                    id,
                    score_id,
                    difficulty_calculation_id,
                    engine: engine.to_string(),
                    calculator_version: calculator_version.to_string(),
                    values: Vec::new()
                };
                inner.performance_calculations.insert(id, row.clone());
                Ok(Some(row))
            }
        }
    }

    async fn replace_performance_values(
        &self,
        calculation_id: i64,
        values: &[CalculationValue]
    ) -> Result<(), StoreError> {
        let mut inner = self.lock();
        let row = inner
            .performance_calculations
            .get_mut(&calculation_id)
            .ok_or(StoreError::MissingRow {
                entity: "performance calculation",
                id: calculation_id
            })?;
        row.values = values.to_vec();
        Ok(())
    }

    async fn get_leaderboard(&self, leaderboard_id: i64) -> Result<Option<Leaderboard>, StoreError> {
        Ok(self.lock().leaderboards.get(&leaderboard_id).cloned())
    }

    async fn get_member_leaderboard_ids(&self, user_id: i64, gamemode: Gamemode) -> Result<Vec<i64>, StoreError> {
        let inner = self.lock();
        Ok(inner
            .memberships
            .values()
            .filter(|m| m.user_id == user_id)
            .filter(|m| {
                inner
                    .leaderboards
                    .get(&m.leaderboard_id)
                    .is_some_and(|l| l.gamemode == gamemode)
            })
            .map(|m| m.leaderboard_id)
            .collect())
    }

    async fn get_membership(&self, leaderboard_id: i64, user_id: i64) -> Result<Option<Membership>, StoreError> {
        let inner = self.lock();
        Ok(inner
            .memberships
            .values()
            .find(|m| m.leaderboard_id == leaderboard_id && m.user_id == user_id)
            .cloned())
    }

    async fn insert_membership(
        &self,
        leaderboard_id: i64,
        user_id: i64,
        joined_at: DateTime<Utc>
    ) -> Result<Membership, StoreError> {
        let mut inner = self.lock();
        let id = inner.allocate_id();
        let membership = Membership {
            id,
            leaderboard_id,
            user_id,
            pp: 0.0,
            score_count: 0,
            rank: 0,
            joined_at
        };
        inner.memberships.insert(id, membership.clone());
        Ok(membership)
    }

    async fn delete_membership(&self, leaderboard_id: i64, user_id: i64) -> Result<(), StoreError> {
        let mut inner = self.lock();
        let membership_id = inner
            .memberships
            .values()
            .find(|m| m.leaderboard_id == leaderboard_id && m.user_id == user_id)
            .map(|m| m.id);

        if let Some(id) = membership_id {
            inner.memberships.shift_remove(&id);
            inner.membership_scores.retain(|ms| ms.membership_id != id);
        }
        Ok(())
    }

    async fn get_membership_scores(&self, membership_id: i64) -> Result<Vec<MembershipScore>, StoreError> {
        let inner = self.lock();
        Ok(inner
            .membership_scores
            .iter()
            .filter(|ms| ms.membership_id == membership_id)
            .cloned()
            .collect())
    }

    async fn count_memberships_above(
        &self,
        leaderboard_id: i64,
        pp: f64,
        exclude_membership_id: i64
    ) -> Result<i64, StoreError> {
        let inner = self.lock();
        Ok(inner
            .memberships
            .values()
            .filter(|m| m.leaderboard_id == leaderboard_id && m.id != exclude_membership_id && m.pp > pp)
            .count() as i64)
    }

    async fn leaderboard_record(&self, leaderboard_id: i64) -> Result<Option<MembershipScore>, StoreError> {
        let inner = self.lock();
        Ok(inner
            .membership_scores
            .iter()
            .filter(|ms| ms.leaderboard_id == leaderboard_id)
            .max_by(|a, b| a.raw_pp.partial_cmp(&b.raw_pp).unwrap_or(std::cmp::Ordering::Equal))
            .cloned())
    }

    async fn top_member(&self, leaderboard_id: i64) -> Result<Option<Membership>, StoreError> {
        let inner = self.lock();
        Ok(inner
            .memberships
            .values()
            .filter(|m| m.leaderboard_id == leaderboard_id)
            .max_by(|a, b| a.pp.partial_cmp(&b.pp).unwrap_or(std::cmp::Ordering::Equal))
            .cloned())
    }

    async fn commit_membership_update(&self, update: &MembershipUpdate) -> Result<Membership, StoreError> {
        let mut inner = self.lock();

        for score in &update.inserted {
            inner.membership_scores.push(score.clone());
        }

        for score in &update.updated {
            if let Some(existing) = inner
                .membership_scores
                .iter_mut()
                .find(|ms| ms.membership_id == score.membership_id && ms.score_id == score.score_id)
            {
                existing.raw_pp = score.raw_pp;
                existing.weighted_pp = score.weighted_pp;
            }
        }

        inner.membership_scores.retain(|ms| {
            ms.membership_id != update.membership_id || !update.removed_score_ids.contains(&ms.score_id)
        });

        let membership = inner
            .memberships
            .get_mut(&update.membership_id)
            .ok_or(StoreError::MissingRow {
                entity: "membership",
                id: update.membership_id
            })?;
        membership.pp = update.pp;
        membership.score_count = update.score_count;
        membership.rank = update.rank;

        Ok(membership.clone())
    }

    async fn find_invite(&self, leaderboard_id: i64, user_id: i64) -> Result<Option<Invite>, StoreError> {
        let inner = self.lock();
        Ok(inner
            .invites
            .values()
            .find(|i| i.leaderboard_id == leaderboard_id && i.user_id == user_id)
            .cloned())
    }

    async fn delete_invite(&self, invite_id: i64) -> Result<(), StoreError> {
        self.lock().invites.shift_remove(&invite_id);
        Ok(())
    }
}
