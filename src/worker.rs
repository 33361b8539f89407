use futures::future::join_all;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::database::Store;
use crate::model::structures::gamemode::Gamemode;
use crate::processor::Processor;

/// One independent unit of background work. No unit depends on dispatcher
/// state between units, so they are free to run on any worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkUnit {
    /// Full pipeline for one user: cache refresh, mutations, memberships.
    UserUpdate { user_id: i64, gamemode: Gamemode },
    /// Recompute a single membership.
    MembershipUpdate { leaderboard_id: i64, user_id: i64 },
    /// Refresh cached calculations for every play on a batch of beatmaps.
    BeatmapRecalculation { beatmap_ids: Vec<i64> }
}

/// mpsc-fed pool of consumers. Units for different users run in parallel;
/// units touching the same membership serialize on the engine's per-row
/// locks, not here.
pub struct WorkerPool {
    tx: mpsc::Sender<WorkUnit>,
    handles: Vec<JoinHandle<()>>
}

impl WorkerPool {
    pub fn spawn<S: Store + 'static>(processor: Arc<Processor<S>>, workers: usize) -> WorkerPool {
        let (tx, rx) = mpsc::channel::<WorkUnit>(1024);
        let rx = Arc::new(Mutex::new(rx));

        let handles = (0..workers.max(1))
            .map(|worker| {
                let rx = Arc::clone(&rx);
                let processor = Arc::clone(&processor);

                tokio::spawn(async move {
                    loop {
                        // Hold the receiver lock only while dequeuing.
                        let unit = rx.lock().await.recv().await;
                        let Some(unit) = unit else {
                            break;
                        };

                        debug!("Worker {} picked up {:?}", worker, unit);
                        if let Err(e) = handle(&processor, unit).await {
                            warn!("Work unit failed: {}", e);
                        }
                    }
                })
            })
            .collect();

        WorkerPool { tx, handles }
    }

    /// Enqueues a unit, waiting for queue capacity. Returns false when the
    /// pool has shut down.
    pub async fn submit(&self, unit: WorkUnit) -> bool {
        self.tx.send(unit).await.is_ok()
    }

    /// Closes the queue and waits for in-flight units to finish.
    pub async fn shutdown(self) {
        drop(self.tx);
        join_all(self.handles).await;
    }
}

async fn handle<S: Store>(
    processor: &Processor<S>,
    unit: WorkUnit
) -> Result<(), crate::model::membership::EngineError> {
    match unit {
        WorkUnit::UserUpdate { user_id, gamemode } => processor.process_user(user_id, gamemode).await,
        WorkUnit::MembershipUpdate {
            leaderboard_id,
            user_id
        } => processor
            .membership_engine()
            .update_membership(leaderboard_id, user_id)
            .await
            .map(|_| ()),
        WorkUnit::BeatmapRecalculation { beatmap_ids } => {
            processor.recalculate_beatmaps(&beatmap_ids).await.map(|_| ())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{WorkUnit, WorkerPool};
    use crate::calculator::{fixture::FixtureEngine, CalculatorRegistry, Engine};
    use crate::database::memory::MemoryStore;
    use crate::database::Store;
    use crate::messaging::events::NotificationSink;
    use crate::model::structures::{gamemode::Gamemode, mods::Mods, score_set::ScoreSet};
    use crate::processor::Processor;
    use crate::reporting::CollectingReporter;
    use crate::utils::test_utils::{generate_beatmap, generate_leaderboard, generate_score};
    use approx::assert_abs_diff_eq;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_pool_processes_submitted_units() {
        let store = Arc::new(MemoryStore::new());
        let calculator = FixtureEngine::new("standard", "20250101")
            .with_performance(1, 1000, 300.0)
            .with_performance(2, 1000, 200.0);
        let registry = Arc::new(CalculatorRegistry::new(Engine::Fixture(calculator)));
        let processor = Arc::new(Processor::new(
            Arc::clone(&store),
            registry,
            Arc::new(CollectingReporter::new()),
            Arc::new(NotificationSink::Disabled)
        ));

        let leaderboard = store.add_leaderboard(generate_leaderboard(0, ScoreSet::Normal));
        for (user_id, beatmap_id) in [(1, 1), (2, 2)] {
            let beatmap = store.add_beatmap(generate_beatmap(beatmap_id, 5.0, 1000));
            let score = store
                .insert_score(generate_score(0, user_id, &beatmap, 1000, 0, Mods::NONE))
                .await
                .unwrap();
            store
                .insert_membership(leaderboard.id, user_id, score.created_at)
                .await
                .unwrap();
        }

        let pool = WorkerPool::spawn(Arc::clone(&processor), 4);
        assert!(
            pool.submit(WorkUnit::UserUpdate {
                user_id: 1,
                gamemode: Gamemode::Standard
            })
            .await
        );
        assert!(
            pool.submit(WorkUnit::UserUpdate {
                user_id: 2,
                gamemode: Gamemode::Standard
            })
            .await
        );
        pool.shutdown().await;

        let first = store.get_membership(leaderboard.id, 1).await.unwrap().unwrap();
        let second = store.get_membership(leaderboard.id, 2).await.unwrap().unwrap();
        assert_abs_diff_eq!(first.pp, 300.0);
        assert_abs_diff_eq!(second.pp, 200.0);
    }
}
