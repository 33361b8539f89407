use chrono::Utc;
use itertools::Itertools;
use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};
use thiserror::Error;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::debug;

use crate::cache::is_fresh_performance;
use crate::calculator::CalculatorRegistry;
use crate::database::db_structs::{Beatmap, Leaderboard, Membership, MembershipScore, Score};
use crate::database::{MembershipUpdate, Store, StoreError};
use crate::messaging::events::{DeferredEvents, NotificationSink, RecordEvent};
use crate::model::{
    aggregator::{self, RankedScore},
    mutation,
    structures::{score_mutation::ScoreMutation, score_set::ScoreSet}
};

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("leaderboard {0} does not exist")]
    LeaderboardNotFound(i64),

    #[error("leaderboard {0} is archived")]
    LeaderboardArchived(i64),

    #[error("user {user_id} has no invite to leaderboard {leaderboard_id}")]
    InviteRequired { leaderboard_id: i64, user_id: i64 },

    #[error(transparent)]
    Store(#[from] StoreError)
}

/// Exclusive locks keyed by (leaderboard_id, user_id). Updates for the same
/// membership serialize on these; updates for different memberships run in
/// parallel. Guards release on every exit path, including failure.
pub struct MembershipLocks {
    locks: StdMutex<HashMap<(i64, i64), Arc<AsyncMutex<()>>>>
}

impl MembershipLocks {
    pub fn new() -> MembershipLocks {
        MembershipLocks {
            locks: StdMutex::new(HashMap::new())
        }
    }

    pub async fn acquire(&self, leaderboard_id: i64, user_id: i64) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());

            // Uncontended entries accumulate over time; sweep them once the
            // map grows noticeable.
            if locks.len() > 4096 {
                locks.retain(|_, lock| Arc::strong_count(lock) > 1);
            }

            Arc::clone(
                locks
                    .entry((leaderboard_id, user_id))
                    .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            )
        };

        lock.lock_owned().await
    }
}

impl Default for MembershipLocks {
    fn default() -> Self {
        MembershipLocks::new()
    }
}

/// Recomputes leaderboard membership state whenever a user's qualifying
/// score set changes: which scores count, the weighted total, the rank, and
/// any record notifications. Contribution rows always reference the real
/// score; under no-choke policies the raw value may come from its mutation.
pub struct MembershipEngine<S> {
    store: Arc<S>,
    registry: Arc<CalculatorRegistry>,
    sink: Arc<NotificationSink>,
    locks: MembershipLocks
}

impl<S: Store> MembershipEngine<S> {
    pub fn new(store: Arc<S>, registry: Arc<CalculatorRegistry>, sink: Arc<NotificationSink>) -> MembershipEngine<S> {
        MembershipEngine {
            store,
            registry,
            sink,
            locks: MembershipLocks::new()
        }
    }

    /// Recomputes one membership. Idempotent: with no intervening score
    /// changes, repeated calls produce identical pp, score_count and rank.
    pub async fn update_membership(&self, leaderboard_id: i64, user_id: i64) -> Result<Membership, EngineError> {
        let _guard = self.locks.acquire(leaderboard_id, user_id).await;

        let leaderboard = self
            .store
            .get_leaderboard(leaderboard_id)
            .await?
            .ok_or(EngineError::LeaderboardNotFound(leaderboard_id))?;

        let existing = self.store.get_membership(leaderboard_id, user_id).await?;

        if leaderboard.archived {
            // Archived leaderboards never recompute; joining one is rejected.
            return existing.ok_or(EngineError::LeaderboardArchived(leaderboard_id));
        }

        // Pre-update record state, read only when this leaderboard notifies.
        // Read before a first-time join so the joining member is not their
        // own "prior" top player.
        let (record_before, top_before) = if leaderboard.notification_target.is_some() {
            (
                self.store.leaderboard_record(leaderboard_id).await?,
                self.store.top_member(leaderboard_id).await?
            )
        } else {
            (None, None)
        };

        let membership = match existing {
            Some(membership) => membership,
            None => self.join(&leaderboard, user_id).await?
        };

        let mut scores = self.store.get_user_scores(user_id, leaderboard.gamemode).await?;
        if !leaderboard.allow_past_scores {
            scores.retain(|s| s.created_at >= membership.joined_at);
        }

        let beatmap_ids = scores.iter().map(|s| s.beatmap_id).unique().collect_vec();
        let beatmaps = self.store.get_beatmaps(&beatmap_ids).await?;
        scores.retain(|score| {
            beatmaps
                .get(&score.beatmap_id)
                .is_some_and(|beatmap| leaderboard.score_filter.matches(score, beatmap))
        });

        let ranked = self.resolve_ranked(&scores, &beatmaps, leaderboard.score_set).await?;
        let selected = aggregator::select_scores(ranked);
        let weighted = aggregator::weighted_values(&selected, leaderboard.decay_factor);

        let current = self.store.get_membership_scores(membership.id).await?;
        let mut update = self.diff(&leaderboard, &membership, &selected, &weighted, &current);

        update.rank = self
            .store
            .count_memberships_above(leaderboard_id, update.pp, membership.id)
            .await? as i32
            + 1;

        let deferred = self.stage_events(&leaderboard, user_id, &selected, &update, record_before, top_before);

        let updated = self.store.commit_membership_update(&update).await?;

        // Post-commit only: a rolled-back update must never notify.
        deferred.flush(&self.sink).await;

        Ok(updated)
    }

    /// Read-only convenience: the user's aggregate total over all their
    /// qualifying plays under the given policy, at the default decay.
    pub async fn aggregate_total(
        &self,
        user_id: i64,
        gamemode: crate::model::structures::gamemode::Gamemode,
        score_set: ScoreSet
    ) -> Result<f64, EngineError> {
        let scores = self.store.get_user_scores(user_id, gamemode).await?;
        let beatmap_ids = scores.iter().map(|s| s.beatmap_id).unique().collect_vec();
        let beatmaps = self.store.get_beatmaps(&beatmap_ids).await?;

        let ranked = self.resolve_ranked(&scores, &beatmaps, score_set).await?;
        Ok(aggregator::aggregate(ranked, crate::model::constants::DEFAULT_DECAY_FACTOR))
    }

    /// Removes the user's membership and its contribution rows.
    pub async fn leave(&self, leaderboard_id: i64, user_id: i64) -> Result<(), EngineError> {
        let _guard = self.locks.acquire(leaderboard_id, user_id).await;
        self.store.delete_membership(leaderboard_id, user_id).await?;
        Ok(())
    }

    async fn join(&self, leaderboard: &Leaderboard, user_id: i64) -> Result<Membership, EngineError> {
        if leaderboard.access_type.is_restricted() && leaderboard.owner_id != Some(user_id) {
            let invite = self
                .store
                .find_invite(leaderboard.id, user_id)
                .await?
                .ok_or(EngineError::InviteRequired {
                    leaderboard_id: leaderboard.id,
                    user_id
                })?;
            self.store.delete_invite(invite.id).await?;
            debug!("Consumed invite {} joining user {} to leaderboard {}", invite.id, user_id, leaderboard.id);
        }

        Ok(self.store.insert_membership(leaderboard.id, user_id, Utc::now()).await?)
    }

    /// Resolves each score's ranking value under the policy. Scores whose
    /// required calculation is missing drop out here; a membership update
    /// simply sees fewer qualifying scores.
    async fn resolve_ranked(
        &self,
        scores: &[Score],
        beatmaps: &HashMap<i64, Beatmap>,
        score_set: ScoreSet
    ) -> Result<Vec<RankedScore>, EngineError> {
        let info = self.registry.default_engine().info();
        let score_ids = scores.iter().map(|s| s.id).collect_vec();

        let own_totals: HashMap<i64, f64> = self
            .store
            .get_performance_calculations(&score_ids, &info.name)
            .await?
            .iter()
            .filter(|c| is_fresh_performance(c, info))
            .filter_map(|c| c.total().map(|total| (c.score_id, total)))
            .collect();

        let mutation_totals: HashMap<i64, f64> = if score_set == ScoreSet::Normal {
            HashMap::new()
        } else {
            let mutations = self
                .store
                .get_score_mutations(&score_ids, ScoreMutation::NoChoke)
                .await?;
            let mutation_ids = mutations.iter().map(|m| m.id).collect_vec();
            let totals_by_mutation: HashMap<i64, f64> = self
                .store
                .get_performance_calculations(&mutation_ids, &info.name)
                .await?
                .iter()
                .filter(|c| is_fresh_performance(c, info))
                .filter_map(|c| c.total().map(|total| (c.score_id, total)))
                .collect();

            mutations
                .iter()
                .filter_map(|m| {
                    let source = m.source_score_id?;
                    totals_by_mutation.get(&m.id).map(|total| (source, *total))
                })
                .collect()
        };

        Ok(scores
            .iter()
            .filter_map(|score| {
                let beatmap = beatmaps.get(&score.beatmap_id)?;
                let result = mutation::classify(score, beatmap);
                let value = aggregator::ranking_value(
                    score_set,
                    result,
                    own_totals.get(&score.id).copied(),
                    mutation_totals.get(&score.id).copied()
                )?;

                Some(RankedScore {
                    score_id: score.id,
                    beatmap_id: score.beatmap_id,
                    value
                })
            })
            .collect())
    }

    /// Diffs the freshly-selected score set against the recorded one and
    /// fills in the recomputed totals.
    fn diff(
        &self,
        leaderboard: &Leaderboard,
        membership: &Membership,
        selected: &[RankedScore],
        weighted: &[f64],
        current: &[MembershipScore]
    ) -> MembershipUpdate {
        let current_by_score: HashMap<i64, &MembershipScore> = current.iter().map(|ms| (ms.score_id, ms)).collect();

        let mut update = MembershipUpdate {
            membership_id: membership.id,
            leaderboard_id: leaderboard.id,
            pp: weighted.iter().sum(),
            score_count: selected.len() as i32,
            ..Default::default()
        };

        for (score, weight) in selected.iter().zip(weighted) {
            let row = MembershipScore {
                leaderboard_id: leaderboard.id,
                membership_id: membership.id,
                score_id: score.score_id,
                raw_pp: score.value,
                weighted_pp: *weight
            };

            match current_by_score.get(&score.score_id) {
                Some(existing) if existing.raw_pp == row.raw_pp && existing.weighted_pp == row.weighted_pp => {}
                Some(_) => update.updated.push(row),
                None => update.inserted.push(row)
            }
        }

        let selected_ids: Vec<i64> = selected.iter().map(|s| s.score_id).collect();
        update.removed_score_ids = current
            .iter()
            .filter(|ms| !selected_ids.contains(&ms.score_id))
            .map(|ms| ms.score_id)
            .collect();

        update
    }

    /// Compares pre-update record state against the recomputed membership
    /// and stages the notification events the update earns.
    fn stage_events(
        &self,
        leaderboard: &Leaderboard,
        user_id: i64,
        selected: &[RankedScore],
        update: &MembershipUpdate,
        record_before: Option<MembershipScore>,
        top_before: Option<Membership>
    ) -> DeferredEvents {
        let mut deferred = DeferredEvents::new();
        if leaderboard.notification_target.is_none() {
            return deferred;
        }

        // selected is sorted descending, so the first entry is the best play
        if let Some(best) = selected.first() {
            let beats_record = match &record_before {
                Some(record) => best.value > record.raw_pp,
                None => best.value > 0.0
            };

            if beats_record {
                deferred.push(RecordEvent::LeaderboardRecord {
                    leaderboard_id: leaderboard.id,
                    score_id: best.score_id
                });
            }
        }

        let took_top = update.rank == 1
            && update.pp > 0.0
            && top_before.as_ref().is_none_or(|top| top.user_id != user_id);

        if took_top {
            deferred.push(RecordEvent::LeaderboardTopPlayer {
                leaderboard_id: leaderboard.id,
                user_id
            });
        }

        deferred
    }
}

#[cfg(test)]
mod tests {
    use super::{EngineError, MembershipEngine};
    use crate::cache::recalculate_scores;
    use crate::calculator::{client::CalculatorClient, fixture::FixtureEngine, CalculatorRegistry, Engine};
    use crate::database::memory::MemoryStore;
    use crate::database::Store;
    use crate::messaging::events::{BufferSink, NotificationSink, RecordEvent};
    use crate::model::structures::{leaderboard_access::LeaderboardAccess, mods::Mods, score_set::ScoreSet};
    use crate::reporting::CollectingReporter;
    use crate::utils::test_utils::{generate_beatmap, generate_invite, generate_leaderboard, generate_score};
    use approx::assert_abs_diff_eq;
    use chrono::{Duration, Utc};
    use std::sync::Arc;

    struct Fixture {
        store: Arc<MemoryStore>,
        engine: MembershipEngine<MemoryStore>,
        client: CalculatorClient,
        sink: Arc<NotificationSink>
    }

    fn fixture(calculator: FixtureEngine) -> Fixture {
        let store = Arc::new(MemoryStore::new());
        let registry = Arc::new(CalculatorRegistry::new(Engine::Fixture(calculator)));
        let sink = Arc::new(NotificationSink::Buffer(BufferSink::new()));
        let client = CalculatorClient::new(Arc::clone(&registry), Arc::new(CollectingReporter::new()));
        let engine = MembershipEngine::new(Arc::clone(&store), registry, Arc::clone(&sink));

        Fixture {
            store,
            engine,
            client,
            sink
        }
    }

    fn sink_events(sink: &NotificationSink) -> Vec<RecordEvent> {
        match sink {
            NotificationSink::Buffer(buffer) => buffer.events(),
            _ => unreachable!()
        }
    }

    /// Seeds a user with one perfect-combo score per beatmap and runs a
    /// calculation pass so the cache is warm.
    async fn seed_user(fx: &Fixture, user_id: i64, beatmap_ids: &[i64]) {
        let mut scores = Vec::new();
        for beatmap_id in beatmap_ids {
            let beatmap = fx.store.add_beatmap(generate_beatmap(*beatmap_id, 5.0, 1000));
            let score = fx
                .store
                .insert_score(generate_score(0, user_id, &beatmap, 1000, 0, Mods::NONE))
                .await
                .unwrap();
            scores.push(score);
        }

        recalculate_scores(fx.store.as_ref(), &fx.client, &scores).await.unwrap();
    }

    #[tokio::test]
    async fn test_update_membership_is_idempotent() {
        let calculator = FixtureEngine::new("standard", "20250101")
            .with_performance(1, 1000, 300.0)
            .with_performance(2, 1000, 250.0);
        let fx = fixture(calculator);
        let leaderboard = fx.store.add_leaderboard(generate_leaderboard(0, ScoreSet::Normal));

        seed_user(&fx, 1, &[1, 2]).await;

        let first = fx.engine.update_membership(leaderboard.id, 1).await.unwrap();
        let second = fx.engine.update_membership(leaderboard.id, 1).await.unwrap();

        assert_abs_diff_eq!(first.pp, second.pp);
        assert_eq!(first.score_count, second.score_count);
        assert_eq!(first.rank, second.rank);
        assert_abs_diff_eq!(first.pp, 300.0 + 250.0 * 0.95);
    }

    #[tokio::test]
    async fn test_rank_ties_share_position() {
        let calculator = FixtureEngine::new("standard", "20250101")
            .with_performance(1, 1000, 500.0)
            .with_performance(2, 1000, 500.0)
            .with_performance(3, 1000, 400.0);
        let fx = fixture(calculator);
        let leaderboard = fx.store.add_leaderboard(generate_leaderboard(0, ScoreSet::Normal));

        seed_user(&fx, 1, &[1]).await;
        seed_user(&fx, 2, &[2]).await;
        seed_user(&fx, 3, &[3]).await;

        fx.engine.update_membership(leaderboard.id, 1).await.unwrap();
        fx.engine.update_membership(leaderboard.id, 2).await.unwrap();
        let third = fx.engine.update_membership(leaderboard.id, 3).await.unwrap();

        let first = fx.store.get_membership(leaderboard.id, 1).await.unwrap().unwrap();
        let second = fx.store.get_membership(leaderboard.id, 2).await.unwrap().unwrap();

        // Equal totals share the rank; the next member counts both above it.
        assert_eq!(first.rank, 1);
        assert_eq!(second.rank, 1);
        assert_eq!(third.rank, 3);
    }

    #[tokio::test]
    async fn test_record_and_top_player_notifications() {
        let calculator = FixtureEngine::new("standard", "20250101")
            .with_performance(1, 1000, 500.0)
            .with_performance(2, 1000, 400.0);
        let fx = fixture(calculator);
        let mut leaderboard = generate_leaderboard(0, ScoreSet::Normal);
        leaderboard.notification_target = Some("discord".to_string());
        let leaderboard = fx.store.add_leaderboard(leaderboard);

        seed_user(&fx, 1, &[1]).await;
        fx.engine.update_membership(leaderboard.id, 1).await.unwrap();

        // First qualification: both the record and the top spot are new.
        let events = sink_events(&fx.sink);
        assert_eq!(events.len(), 2);
        assert!(matches!(events[0], RecordEvent::LeaderboardRecord { .. }));
        assert!(matches!(
            events[1],
            RecordEvent::LeaderboardTopPlayer { user_id: 1, .. }
        ));
    }

    #[tokio::test]
    async fn test_notification_suppression_below_record() {
        let calculator = FixtureEngine::new("standard", "20250101")
            .with_performance(1, 1000, 500.0)
            .with_performance(2, 1000, 400.0);
        let fx = fixture(calculator);
        let mut leaderboard = generate_leaderboard(0, ScoreSet::Normal);
        leaderboard.notification_target = Some("discord".to_string());
        let leaderboard = fx.store.add_leaderboard(leaderboard);

        seed_user(&fx, 1, &[1]).await;
        fx.engine.update_membership(leaderboard.id, 1).await.unwrap();

        // User 2 raises their own total but neither beats the record nor
        // takes the top spot: zero new notifications.
        seed_user(&fx, 2, &[2]).await;
        fx.engine.update_membership(leaderboard.id, 2).await.unwrap();

        assert_eq!(sink_events(&fx.sink).len(), 2);
    }

    #[tokio::test]
    async fn test_no_notifications_without_target() {
        let calculator = FixtureEngine::new("standard", "20250101").with_performance(1, 1000, 500.0);
        let fx = fixture(calculator);
        let leaderboard = fx.store.add_leaderboard(generate_leaderboard(0, ScoreSet::Normal));

        seed_user(&fx, 1, &[1]).await;
        fx.engine.update_membership(leaderboard.id, 1).await.unwrap();

        assert!(sink_events(&fx.sink).is_empty());
    }

    #[tokio::test]
    async fn test_restricted_join_requires_invite() {
        let calculator = FixtureEngine::new("standard", "20250101");
        let fx = fixture(calculator);
        let mut leaderboard = generate_leaderboard(0, ScoreSet::Normal);
        leaderboard.access_type = LeaderboardAccess::Private;
        leaderboard.owner_id = Some(99);
        let leaderboard = fx.store.add_leaderboard(leaderboard);

        seed_user(&fx, 5, &[1]).await;

        let denied = fx.engine.update_membership(leaderboard.id, 5).await;
        assert!(matches!(denied, Err(EngineError::InviteRequired { .. })));

        fx.store.add_invite(generate_invite(leaderboard.id, 5));
        fx.engine.update_membership(leaderboard.id, 5).await.unwrap();

        // The invite is consumed by the successful join.
        assert!(fx.store.find_invite(leaderboard.id, 5).await.unwrap().is_none());

        // The owner never needs one.
        fx.engine.update_membership(leaderboard.id, 99).await.unwrap();
    }

    #[tokio::test]
    async fn test_archived_leaderboard_never_recomputes() {
        let calculator = FixtureEngine::new("standard", "20250101").with_performance(1, 1000, 500.0);
        let fx = fixture(calculator);
        let mut leaderboard = generate_leaderboard(0, ScoreSet::Normal);
        leaderboard.archived = true;
        let leaderboard = fx.store.add_leaderboard(leaderboard);

        // Joining an archived leaderboard is rejected.
        let join = fx.engine.update_membership(leaderboard.id, 1).await;
        assert!(matches!(join, Err(EngineError::LeaderboardArchived(_))));

        // An existing membership is returned untouched, even with new scores.
        let membership = fx.store.insert_membership(leaderboard.id, 1, Utc::now()).await.unwrap();
        seed_user(&fx, 1, &[1]).await;

        let unchanged = fx.engine.update_membership(leaderboard.id, 1).await.unwrap();
        assert_eq!(unchanged.id, membership.id);
        assert_abs_diff_eq!(unchanged.pp, 0.0);
        assert_eq!(unchanged.score_count, 0);
    }

    #[tokio::test]
    async fn test_removed_scores_leave_the_contribution_set() {
        let calculator = FixtureEngine::new("standard", "20250101")
            .with_performance(1, 1000, 300.0)
            .with_performance(2, 1000, 200.0);
        let fx = fixture(calculator);
        let leaderboard = fx.store.add_leaderboard(generate_leaderboard(0, ScoreSet::Normal));

        seed_user(&fx, 1, &[1, 2]).await;
        let membership = fx.engine.update_membership(leaderboard.id, 1).await.unwrap();
        assert_eq!(membership.score_count, 2);

        // The weaker play is superseded and deleted by ingestion.
        let scores = fx.store.get_user_scores(1, membership_gamemode()).await.unwrap();
        let weaker = scores.iter().find(|s| s.beatmap_id == 2).unwrap();
        fx.store.remove_score(weaker.id);

        let membership = fx.engine.update_membership(leaderboard.id, 1).await.unwrap();
        assert_eq!(membership.score_count, 1);
        assert_abs_diff_eq!(membership.pp, 300.0);
        assert_eq!(fx.store.membership_score_count(membership.id), 1);
    }

    #[tokio::test]
    async fn test_join_date_gates_past_scores() {
        let calculator = FixtureEngine::new("standard", "20250101").with_performance(1, 1000, 300.0);
        let fx = fixture(calculator);
        let mut leaderboard = generate_leaderboard(0, ScoreSet::Normal);
        leaderboard.allow_past_scores = false;
        let leaderboard = fx.store.add_leaderboard(leaderboard);

        let beatmap = fx.store.add_beatmap(generate_beatmap(1, 5.0, 1000));
        let mut score = generate_score(0, 1, &beatmap, 1000, 0, Mods::NONE);
        score.created_at = Utc::now() - Duration::days(30);
        let score = fx.store.insert_score(score).await.unwrap();
        recalculate_scores(fx.store.as_ref(), &fx.client, &[score]).await.unwrap();

        let membership = fx.engine.update_membership(leaderboard.id, 1).await.unwrap();

        // The play predates the join date, so nothing qualifies.
        assert_eq!(membership.score_count, 0);
        assert_abs_diff_eq!(membership.pp, 0.0);
    }

    fn membership_gamemode() -> crate::model::structures::gamemode::Gamemode {
        crate::model::structures::gamemode::Gamemode::Standard
    }
}
