use crate::model::structures::{score_result::ScoreResult, score_set::ScoreSet};
use itertools::Itertools;
use std::collections::HashMap;

/// A score reduced to the value it ranks with under some aggregation policy.
/// Scores whose calculation is not yet available never become a RankedScore;
/// they are excluded from aggregation entirely rather than treated as zero.
#[derive(Debug, Clone, PartialEq)]
pub struct RankedScore {
    pub score_id: i64,
    pub beatmap_id: i64,
    pub value: f64
}

/// Resolves the value a score ranks with under the given policy.
///
/// - `Normal` uses the score's own performance total.
/// - `NeverChoke` substitutes the no-choke mutation's total when the
///   classification indicates a choke.
/// - `AlwaysFullCombo` substitutes the mutation's total whenever one exists;
///   mutations are only generated for chokes, so non-choke scores rank with
///   their own total either way.
///
/// Returns None when the required calculation is missing.
pub fn ranking_value(
    score_set: ScoreSet,
    result: ScoreResult,
    own_total: Option<f64>,
    mutation_total: Option<f64>
) -> Option<f64> {
    match score_set {
        ScoreSet::Normal => own_total,
        ScoreSet::NeverChoke => {
            if result.is_choke() {
                mutation_total
            } else {
                own_total
            }
        }
        ScoreSet::AlwaysFullCombo => mutation_total.or(own_total)
    }
}

/// Deduplicates to the single best score per beatmap, then sorts descending
/// by ranking value. The descending order is what the decay series weights
/// against, so it must be established here and preserved by callers.
pub fn select_scores(scores: Vec<RankedScore>) -> Vec<RankedScore> {
    let mut best: HashMap<i64, RankedScore> = HashMap::new();

    for score in scores {
        match best.get(&score.beatmap_id) {
            Some(current) if current.value >= score.value => {}
            _ => {
                best.insert(score.beatmap_id, score);
            }
        }
    }

    best.into_values()
        .sorted_by(|a, b| b.value.partial_cmp(&a.value).unwrap_or(std::cmp::Ordering::Equal))
        .collect()
}

/// Weighted contribution of each selected score: `value * decay^i` over the
/// descending sequence. The geometric decay drives the tail to negligibility,
/// so no length cap is needed.
pub fn weighted_values(selected: &[RankedScore], decay_factor: f64) -> Vec<f64> {
    selected
        .iter()
        .enumerate()
        .map(|(i, score)| score.value * decay_factor.powi(i as i32))
        .collect()
}

/// Total skill value for a set of scores: dedupe to the best play per map,
/// sort descending, and sum the geometric series. Empty input yields 0.
pub fn aggregate(scores: Vec<RankedScore>, decay_factor: f64) -> f64 {
    let selected = select_scores(scores);

    weighted_values(&selected, decay_factor).iter().sum()
}

#[cfg(test)]
mod tests {
    use super::{aggregate, ranking_value, select_scores, weighted_values, RankedScore};
    use crate::model::constants::DEFAULT_DECAY_FACTOR;
    use crate::model::structures::{score_result::ScoreResult, score_set::ScoreSet};
    use approx::assert_abs_diff_eq;

    fn ranked(score_id: i64, beatmap_id: i64, value: f64) -> RankedScore {
        RankedScore {
            score_id,
            beatmap_id,
            value
        }
    }

    #[test]
    fn test_empty_set_yields_zero() {
        assert_abs_diff_eq!(aggregate(Vec::new(), DEFAULT_DECAY_FACTOR), 0.0);
    }

    #[test]
    fn test_deduplicates_to_best_per_beatmap() {
        let scores = vec![ranked(1, 10, 100.0), ranked(2, 10, 200.0)];

        let selected = select_scores(scores);

        assert_eq!(selected.len(), 1);
        assert_eq!(selected[0].score_id, 2);
        assert_abs_diff_eq!(selected[0].value, 200.0);
    }

    #[test]
    fn test_expected_weighted_total() {
        let scores = vec![
            ranked(1, 10, 300.0),
            ranked(2, 11, 250.0),
            ranked(3, 12, 250.0),
            ranked(4, 13, 100.0),
        ];

        // 300 + 250(0.95) + 250(0.95^2) + 100(0.95^3)
        assert_abs_diff_eq!(aggregate(scores, 0.95), 848.8625, epsilon = 1e-9);
    }

    #[test]
    fn test_summation_order_is_significant() {
        let scores = vec![ranked(1, 10, 300.0), ranked(2, 11, 200.0), ranked(3, 12, 100.0)];

        let descending = aggregate(scores.clone(), 0.95);

        // Weighting the same values in ascending order must produce a
        // strictly lower total; equality here would mean the decay series
        // ignored ordering.
        let mut ascending_values: Vec<f64> = scores.iter().map(|s| s.value).collect();
        ascending_values.sort_by(|a, b| a.partial_cmp(b).unwrap());
        let ascending: f64 = ascending_values
            .iter()
            .enumerate()
            .map(|(i, v)| v * 0.95f64.powi(i as i32))
            .sum();

        assert!(ascending < descending);
    }

    #[test]
    fn test_weighted_values_follow_decay() {
        let selected = vec![ranked(1, 10, 100.0), ranked(2, 11, 100.0), ranked(3, 12, 100.0)];

        let weighted = weighted_values(&selected, 0.5);

        assert_abs_diff_eq!(weighted[0], 100.0);
        assert_abs_diff_eq!(weighted[1], 50.0);
        assert_abs_diff_eq!(weighted[2], 25.0);
    }

    #[test]
    fn test_ranking_value_normal() {
        let value = ranking_value(ScoreSet::Normal, ScoreResult::OneMiss, Some(120.0), Some(150.0));

        assert_eq!(value, Some(120.0));
    }

    #[test]
    fn test_ranking_value_never_choke() {
        let choked = ranking_value(ScoreSet::NeverChoke, ScoreResult::OneMiss, Some(120.0), Some(150.0));
        let clean = ranking_value(ScoreSet::NeverChoke, ScoreResult::Perfect, Some(120.0), Some(150.0));

        assert_eq!(choked, Some(150.0));
        assert_eq!(clean, Some(120.0));
    }

    #[test]
    fn test_ranking_value_always_full_combo() {
        let with_mutation = ranking_value(ScoreSet::AlwaysFullCombo, ScoreResult::Clear, Some(120.0), Some(150.0));
        let without_mutation = ranking_value(ScoreSet::AlwaysFullCombo, ScoreResult::Perfect, Some(120.0), None);

        assert_eq!(with_mutation, Some(150.0));
        assert_eq!(without_mutation, Some(120.0));
    }

    #[test]
    fn test_missing_calculation_is_excluded() {
        let value = ranking_value(ScoreSet::NeverChoke, ScoreResult::OneMiss, Some(120.0), None);

        assert_eq!(value, None);
    }
}
