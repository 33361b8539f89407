use itertools::Itertools;
use std::collections::{HashMap, HashSet};
use tracing::{debug, info};

use crate::calculator::{client::CalculatorClient, CalcRequest, EngineInfo};
use crate::database::db_structs::{DifficultyCalculation, PerformanceCalculation, Score};
use crate::database::{Store, StoreError};
use crate::model::structures::mods::Mods;
use crate::utils::progress_utils::progress_bar;

/// Counts of what one recalculation pass touched. Failed calculations stay
/// in the store without values and are retried on the next pass.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RecalcSummary {
    pub difficulty_updated: usize,
    pub difficulty_failed: usize,
    pub performance_updated: usize,
    pub performance_failed: usize,
    /// Performance calculations skipped because their difficulty row failed
    pub performance_skipped: usize
}

/// A difficulty row is fresh when its version matches the live engine
/// exactly and it carries a full value set.
pub fn is_fresh_difficulty(calculation: &DifficultyCalculation, info: &EngineInfo) -> bool {
    calculation.engine == info.name
        && calculation.calculator_version == info.version
        && !calculation.values.is_empty()
}

pub fn is_fresh_performance(calculation: &PerformanceCalculation, info: &EngineInfo) -> bool {
    calculation.engine == info.name
        && calculation.calculator_version == info.version
        && !calculation.values.is_empty()
}

/// True iff no difficulty row exists for the pair at the engine's current
/// advertised version.
pub async fn is_difficulty_stale<S: Store>(
    store: &S,
    beatmap_id: i64,
    mods: Mods,
    info: &EngineInfo
) -> Result<bool, StoreError> {
    let rows = store.get_difficulty_calculations(&[(beatmap_id, mods)], &info.name).await?;
    Ok(!rows.iter().any(|c| is_fresh_difficulty(c, info)))
}

pub async fn is_performance_stale<S: Store>(store: &S, score_id: i64, info: &EngineInfo) -> Result<bool, StoreError> {
    let rows = store.get_performance_calculations(&[score_id], &info.name).await?;
    Ok(!rows.iter().any(|c| is_fresh_performance(c, info)))
}

/// Runs one recalculation pass over the given scores: difficulty first for
/// every unique (beatmap, mods) pair lacking a fresh row, then performance
/// for every score lacking one. Upserts are keyed, so re-running an
/// up-to-date set is a pure no-op. Calculation errors have already been
/// reported by the client; they never abort the pass.
pub async fn recalculate_scores<S: Store>(
    store: &S,
    client: &CalculatorClient,
    scores: &[Score]
) -> Result<RecalcSummary, StoreError> {
    let info = client.info().clone();
    let mut summary = RecalcSummary::default();

    let pairs: Vec<(i64, Mods)> = scores.iter().map(|s| (s.beatmap_id, s.mods)).unique().collect();

    let existing = store.get_difficulty_calculations(&pairs, &info.name).await?;
    let mut difficulty_rows: HashMap<(i64, Mods), DifficultyCalculation> = existing
        .into_iter()
        .map(|c| ((c.beatmap_id, c.mods), c))
        .collect();

    let stale_pairs: Vec<(i64, Mods)> = pairs
        .iter()
        .filter(|key| !difficulty_rows.get(key).is_some_and(|c| is_fresh_difficulty(c, &info)))
        .copied()
        .collect();

    if !stale_pairs.is_empty() {
        debug!(
            "{} of {} difficulty keys stale for engine {} v{}",
            stale_pairs.len(),
            pairs.len(),
            info.name,
            info.version
        );

        let requests: Vec<CalcRequest> = stale_pairs
            .iter()
            .map(|(beatmap_id, mods)| CalcRequest::difficulty(*beatmap_id, *mods))
            .collect();

        let bar = progress_bar(stale_pairs.len() as u64, "Calculating difficulty values".to_string());
        let results = client.calculate(&requests).await;

        for ((beatmap_id, mods), result) in stale_pairs.iter().zip(results) {
            bar.inc(1);

            // None means a concurrent pass already stored a newer version;
            // nothing to do either way.
            let Some(row) = store
                .upsert_difficulty_calculation(*beatmap_id, *mods, &info.name, &info.version)
                .await?
            else {
                continue;
            };

            match result {
                Some(result) if !result.values.is_empty() => {
                    store.replace_difficulty_values(row.id, &result.values).await?;
                    summary.difficulty_updated += 1;
                    difficulty_rows.insert(
                        (*beatmap_id, *mods),
                        DifficultyCalculation {
                            values: result.values,
                            ..row
                        }
                    );
                }
                _ => {
                    // The row now sits at the current version with no
                    // values; drop it from the working set so dependent
                    // performance calculations wait for the retry.
                    summary.difficulty_failed += 1;
                    difficulty_rows.remove(&(*beatmap_id, *mods));
                }
            }
        }

        bar.finish();
    }

    // Performance second: each row references the difficulty row matching
    // its score's beatmap + mods.
    let score_ids: Vec<i64> = scores.iter().map(|s| s.id).collect();
    let existing = store.get_performance_calculations(&score_ids, &info.name).await?;
    let fresh_scores: HashSet<i64> = existing
        .iter()
        .filter(|c| is_fresh_performance(c, &info))
        .map(|c| c.score_id)
        .collect();

    let mut stale_scores = Vec::new();
    for score in scores.iter().filter(|s| !fresh_scores.contains(&s.id)) {
        match difficulty_rows.get(&(score.beatmap_id, score.mods)) {
            Some(difficulty) if !difficulty.values.is_empty() => stale_scores.push((score, difficulty.id)),
            _ => summary.performance_skipped += 1
        }
    }

    if !stale_scores.is_empty() {
        let requests: Vec<CalcRequest> = stale_scores
            .iter()
            .map(|(score, _)| CalcRequest::performance(score))
            .collect();

        let bar = progress_bar(stale_scores.len() as u64, "Calculating performance values".to_string());
        let results = client.calculate(&requests).await;

        for ((score, difficulty_id), result) in stale_scores.iter().zip(results) {
            bar.inc(1);

            let Some(row) = store
                .upsert_performance_calculation(score.id, *difficulty_id, &info.name, &info.version)
                .await?
            else {
                continue;
            };

            match result {
                Some(result) if !result.values.is_empty() => {
                    store.replace_performance_values(row.id, &result.values).await?;
                    summary.performance_updated += 1;
                }
                _ => {
                    summary.performance_failed += 1;
                }
            }
        }

        bar.finish();
    }

    info!(
        "Recalculation pass complete: {} difficulty / {} performance updated, {} / {} failed, {} skipped",
        summary.difficulty_updated,
        summary.performance_updated,
        summary.difficulty_failed,
        summary.performance_failed,
        summary.performance_skipped
    );

    Ok(summary)
}
