use itertools::Itertools;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{info, warn};

use crate::cache;
use crate::calculator::{client::CalculatorClient, CalculatorRegistry};
use crate::database::db_structs::Score;
use crate::database::Store;
use crate::messaging::events::NotificationSink;
use crate::model::membership::{EngineError, MembershipEngine};
use crate::model::structures::{gamemode::Gamemode, score_mutation::ScoreMutation, score_set::ScoreSet};
use crate::model::mutation;
use crate::reporting::ErrorReporter;
use crate::utils::progress_utils::progress_bar;

/// Ties the pipeline together: new scores flow through the calculation
/// cache, the mutation engine derives no-choke alternates, and every
/// membership the user holds is recomputed.
pub struct Processor<S> {
    store: Arc<S>,
    client: CalculatorClient,
    membership: MembershipEngine<S>
}

impl<S: Store> Processor<S> {
    pub fn new(
        store: Arc<S>,
        registry: Arc<CalculatorRegistry>,
        reporter: Arc<dyn ErrorReporter>,
        sink: Arc<NotificationSink>
    ) -> Processor<S> {
        let client = CalculatorClient::new(Arc::clone(&registry), reporter);
        let membership = MembershipEngine::new(Arc::clone(&store), registry, sink);

        Processor {
            store,
            client,
            membership
        }
    }

    pub fn membership_engine(&self) -> &MembershipEngine<S> {
        &self.membership
    }

    /// Read-only aggregate over a user's plays under a policy.
    pub async fn aggregate_total(&self, user_id: i64, gamemode: Gamemode, score_set: ScoreSet) -> Result<f64, EngineError> {
        self.membership.aggregate_total(user_id, gamemode, score_set).await
    }

    /// Batch cache refresh over an explicit score set.
    pub async fn recalculate(&self, scores: &[Score]) -> Result<cache::RecalcSummary, EngineError> {
        Ok(cache::recalculate_scores(self.store.as_ref(), &self.client, scores).await?)
    }

    /// Batch cache refresh for every play on the given beatmaps, real and
    /// mutated alike. Used when a beatmap's difficulty changes or an engine
    /// version advance should be applied map by map.
    pub async fn recalculate_beatmaps(&self, beatmap_ids: &[i64]) -> Result<cache::RecalcSummary, EngineError> {
        let scores = self.store.get_scores_for_beatmaps(beatmap_ids).await?;
        self.recalculate(&scores).await
    }

    /// Full pipeline for one user: refresh the calculation cache, derive
    /// missing no-choke mutations, then recompute every membership.
    pub async fn process_user(&self, user_id: i64, gamemode: Gamemode) -> Result<(), EngineError> {
        let scores = self.store.get_user_scores(user_id, gamemode).await?;

        if !scores.is_empty() {
            cache::recalculate_scores(self.store.as_ref(), &self.client, &scores).await?;
            self.derive_mutations(&scores).await?;
        }

        for leaderboard_id in self.store.get_member_leaderboard_ids(user_id, gamemode).await? {
            match self.membership.update_membership(leaderboard_id, user_id).await {
                Ok(_) => {}
                // Archived boards are frozen; skipping them is the no-op the
                // state machine prescribes.
                Err(EngineError::LeaderboardArchived(_)) => {}
                Err(e) => return Err(e)
            }
        }

        Ok(())
    }

    /// Processes every user with scores in the gamemode.
    pub async fn process_all(&self, gamemode: Gamemode) -> Result<usize, EngineError> {
        let user_ids = self.store.get_user_ids(gamemode).await?;
        info!("Processing {} users", user_ids.len());

        let bar = progress_bar(user_ids.len() as u64, "Processing user scores".to_string());
        for user_id in &user_ids {
            if let Err(e) = self.process_user(*user_id, gamemode).await {
                warn!("Failed to process user {}: {}", user_id, e);
            }
            bar.inc(1);
        }
        bar.finish();

        Ok(user_ids.len())
    }

    /// Generates no-choke mutations for choke-classified plays lacking one,
    /// then routes all mutations through performance calculation. Mutations
    /// are cached as independent score rows, so they are never recomputed
    /// once produced, only regenerated if missing.
    async fn derive_mutations(&self, scores: &[Score]) -> Result<(), EngineError> {
        let beatmap_ids = scores.iter().map(|s| s.beatmap_id).unique().collect_vec();
        let beatmaps = self.store.get_beatmaps(&beatmap_ids).await?;
        let score_ids = scores.iter().map(|s| s.id).collect_vec();

        let already_mutated: HashSet<i64> = self
            .store
            .get_score_mutations(&score_ids, ScoreMutation::NoChoke)
            .await?
            .iter()
            .filter_map(|m| m.source_score_id)
            .collect();

        for score in scores {
            let Some(beatmap) = beatmaps.get(&score.beatmap_id) else {
                continue;
            };
            if !mutation::classify(score, beatmap).is_choke() || already_mutated.contains(&score.id) {
                continue;
            }

            self.store
                .insert_score(mutation::derive_no_choke(score, beatmap))
                .await?;
        }

        let mutations = self
            .store
            .get_score_mutations(&score_ids, ScoreMutation::NoChoke)
            .await?;
        if !mutations.is_empty() {
            cache::recalculate_scores(self.store.as_ref(), &self.client, &mutations).await?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::Processor;
    use crate::calculator::{fixture::FixtureEngine, CalculatorRegistry, Engine};
    use crate::database::memory::MemoryStore;
    use crate::database::Store;
    use crate::messaging::events::NotificationSink;
    use crate::model::structures::{gamemode::Gamemode, mods::Mods, score_mutation::ScoreMutation, score_set::ScoreSet};
    use crate::reporting::CollectingReporter;
    use crate::utils::test_utils::{generate_beatmap, generate_leaderboard, generate_score};
    use approx::assert_abs_diff_eq;
    use std::sync::Arc;

    fn processor_with(calculator: FixtureEngine) -> (Arc<MemoryStore>, Processor<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        let registry = Arc::new(CalculatorRegistry::new(Engine::Fixture(calculator)));
        let processor = Processor::new(
            Arc::clone(&store),
            registry,
            Arc::new(CollectingReporter::new()),
            Arc::new(NotificationSink::Disabled)
        );

        (store, processor)
    }

    #[tokio::test]
    async fn test_aggregate_total_weights_best_plays() {
        let calculator = FixtureEngine::new("standard", "20250101")
            .with_performance(1, 1000, 300.0)
            .with_performance(2, 1000, 250.0)
            .with_performance(3, 1000, 250.0)
            .with_performance(4, 1000, 100.0);
        let (store, processor) = processor_with(calculator);

        let mut scores = Vec::new();
        for beatmap_id in 1..=4 {
            let beatmap = store.add_beatmap(generate_beatmap(beatmap_id, 5.0, 1000));
            scores.push(
                store
                    .insert_score(generate_score(0, 1, &beatmap, 1000, 0, Mods::NONE))
                    .await
                    .unwrap()
            );
        }

        processor.recalculate(&scores).await.unwrap();
        let total = processor
            .aggregate_total(1, Gamemode::Standard, ScoreSet::Normal)
            .await
            .unwrap();

        // 300 + 250(0.95) + 250(0.95^2) + 100(0.95^3)
        assert_abs_diff_eq!(total, 848.8625, epsilon = 1e-9);
    }

    #[tokio::test]
    async fn test_process_user_derives_choke_mutations_once() {
        // Combo 800/1000 with one miss classifies as a choke; its no-choke
        // variant plays at max combo and scores 150 instead of 100.
        let calculator = FixtureEngine::new("standard", "20250101")
            .with_performance(1, 800, 100.0)
            .with_performance(1, 1000, 150.0);
        let (store, processor) = processor_with(calculator);

        let leaderboard = store.add_leaderboard(generate_leaderboard(0, ScoreSet::NeverChoke));
        let beatmap = store.add_beatmap(generate_beatmap(1, 5.0, 1000));
        let score = store
            .insert_score(generate_score(0, 1, &beatmap, 800, 1, Mods::NONE))
            .await
            .unwrap();
        store.insert_membership(leaderboard.id, 1, score.created_at).await.unwrap();

        processor.process_user(1, Gamemode::Standard).await.unwrap();

        let mutations = store
            .get_score_mutations(&[score.id], ScoreMutation::NoChoke)
            .await
            .unwrap();
        assert_eq!(mutations.len(), 1);
        assert_eq!(mutations[0].combo, 1000);
        assert_eq!(mutations[0].statistics.count_miss, 0);

        // The membership ranks the play with its no-choke total.
        let membership = store.get_membership(leaderboard.id, 1).await.unwrap().unwrap();
        assert_abs_diff_eq!(membership.pp, 150.0);

        // Re-processing neither duplicates the mutation nor changes the total.
        processor.process_user(1, Gamemode::Standard).await.unwrap();
        let mutations = store
            .get_score_mutations(&[score.id], ScoreMutation::NoChoke)
            .await
            .unwrap();
        assert_eq!(mutations.len(), 1);
    }

    #[tokio::test]
    async fn test_non_choke_scores_rank_with_their_own_total() {
        let calculator = FixtureEngine::new("standard", "20250101").with_performance(1, 1000, 200.0);
        let (store, processor) = processor_with(calculator);

        let beatmap = store.add_beatmap(generate_beatmap(1, 5.0, 1000));
        let score = store
            .insert_score(generate_score(0, 1, &beatmap, 1000, 0, Mods::NONE))
            .await
            .unwrap();

        processor.process_user(1, Gamemode::Standard).await.unwrap();

        // A perfect play needs no mutation.
        let mutations = store
            .get_score_mutations(&[score.id], ScoreMutation::NoChoke)
            .await
            .unwrap();
        assert!(mutations.is_empty());

        let total = processor
            .aggregate_total(1, Gamemode::Standard, ScoreSet::NeverChoke)
            .await
            .unwrap();
        assert_abs_diff_eq!(total, 200.0);
    }
}
