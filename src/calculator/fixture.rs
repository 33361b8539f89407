use std::collections::{HashMap, HashSet};

use crate::calculator::{CalcRequest, CalcResult, CalculatorError, EngineInfo};
use crate::database::db_structs::CalculationValue;

const DEFAULT_STARS: f64 = 5.0;

/// Deterministic in-process engine used by the test-suite and local
/// development. Values are looked up from scripted overrides and fall back
/// to a stable formula, so repeated batches are always reproducible.
pub struct FixtureEngine {
    info: EngineInfo,
    difficulty: HashMap<String, f64>,
    /// Performance totals keyed by (beatmap id, combo); the combo key lets
    /// a no-choke variant score differently from its source play.
    performance: HashMap<(String, i32), f64>,
    failing_beatmaps: HashSet<String>,
    refuse_batches: bool
}

impl FixtureEngine {
    pub fn new(name: &str, version: &str) -> FixtureEngine {
        FixtureEngine {
            info: EngineInfo {
                name: name.to_string(),
                version: version.to_string()
            },
            difficulty: HashMap::new(),
            performance: HashMap::new(),
            failing_beatmaps: HashSet::new(),
            refuse_batches: false
        }
    }

    pub fn info(&self) -> &EngineInfo {
        &self.info
    }

    pub fn set_version(&mut self, version: &str) {
        self.info.version = version.to_string();
    }

    pub fn with_difficulty(mut self, beatmap_id: i64, stars: f64) -> FixtureEngine {
        self.difficulty.insert(beatmap_id.to_string(), stars);
        self
    }

    pub fn with_performance(mut self, beatmap_id: i64, combo: i32, total: f64) -> FixtureEngine {
        self.performance.insert((beatmap_id.to_string(), combo), total);
        self
    }

    /// Any batch containing this beatmap fails wholesale, as a real engine
    /// does when one input crashes it.
    pub fn with_failing_beatmap(mut self, beatmap_id: i64) -> FixtureEngine {
        self.failing_beatmaps.insert(beatmap_id.to_string());
        self
    }

    /// Refuses every multi-item batch, forcing callers down the per-item
    /// retry path.
    pub fn with_refused_batches(mut self) -> FixtureEngine {
        self.refuse_batches = true;
        self
    }

    fn stars(&self, beatmap_id: &str) -> f64 {
        self.difficulty.get(beatmap_id).copied().unwrap_or(DEFAULT_STARS)
    }

    pub(crate) async fn calculate_batch(&self, requests: &[CalcRequest]) -> Result<Vec<CalcResult>, CalculatorError> {
        if self.refuse_batches && requests.len() > 1 {
            return Err(CalculatorError::Unavailable);
        }

        if requests.iter().any(|r| self.failing_beatmaps.contains(&r.beatmap_id)) {
            return Err(CalculatorError::Unavailable);
        }

        let results = requests
            .iter()
            .map(|request| {
                let stars = self.stars(&request.beatmap_id);

                match &request.score {
                    None => CalcResult {
                        values: vec![
                            CalculationValue {
                                name: "total".to_string(),
                                value: stars
                            },
                            CalculationValue {
                                name: "aim".to_string(),
                                value: stars * 0.6
                            },
                            CalculationValue {
                                name: "speed".to_string(),
                                value: stars * 0.4
                            },
                        ]
                    },
                    Some(score) => {
                        let total = self
                            .performance
                            .get(&(request.beatmap_id.clone(), score.combo))
                            .copied()
                            .unwrap_or_else(|| {
                                let hits = score.count_300 + score.count_100 + score.count_50 + score.count_miss;
                                let accuracy = if hits == 0 {
                                    0.0
                                } else {
                                    f64::from(300 * score.count_300 + 100 * score.count_100 + 50 * score.count_50)
                                        / f64::from(300 * hits)
                                };
                                stars * accuracy * f64::from(score.combo).sqrt()
                            });

                        CalcResult {
                            values: vec![CalculationValue {
                                name: "total".to_string(),
                                value: total
                            }]
                        }
                    }
                }
            })
            .collect();

        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::FixtureEngine;
    use crate::calculator::{CalcRequest, CalculatorError};
    use crate::model::structures::mods::Mods;
    use approx::assert_abs_diff_eq;

    #[tokio::test]
    async fn test_scripted_difficulty() {
        let engine = FixtureEngine::new("standard", "20250101").with_difficulty(1, 6.3);

        let results = engine
            .calculate_batch(&[CalcRequest::difficulty(1, Mods::NONE)])
            .await
            .unwrap();

        assert_abs_diff_eq!(results[0].value("total").unwrap(), 6.3);
        assert_abs_diff_eq!(results[0].value("aim").unwrap(), 6.3 * 0.6);
    }

    #[tokio::test]
    async fn test_failing_beatmap_poisons_batch() {
        let engine = FixtureEngine::new("standard", "20250101").with_failing_beatmap(2);

        let result = engine
            .calculate_batch(&[CalcRequest::difficulty(1, Mods::NONE), CalcRequest::difficulty(2, Mods::NONE)])
            .await;

        assert!(matches!(result, Err(CalculatorError::Unavailable)));
    }
}
