use crate::database::db_structs::ScoreStatistics;
use crate::model::structures::gamemode::Gamemode;

pub mod aggregator;
pub mod constants;
pub mod membership;
pub mod mutation;
pub mod score_filter;
pub mod structures;

/// Accuracy percentage for a set of hit statistics under the given gamemode.
/// Follows the upstream game's per-mode judgement weightings. Statistics with
/// no judged objects yield 0.
pub fn accuracy(gamemode: Gamemode, statistics: &ScoreStatistics) -> f64 {
    let s = statistics;

    match gamemode {
        Gamemode::Standard => {
            let total = s.count_300 + s.count_100 + s.count_50 + s.count_miss;
            if total == 0 {
                return 0.0;
            }

            let points = 300 * s.count_300 + 100 * s.count_100 + 50 * s.count_50;
            f64::from(points) / f64::from(300 * total) * 100.0
        }
        Gamemode::Taiko => {
            let total = s.count_300 + s.count_100 + s.count_miss;
            if total == 0 {
                return 0.0;
            }

            (f64::from(s.count_300) + f64::from(s.count_100) * 0.5) / f64::from(total) * 100.0
        }
        Gamemode::Catch => {
            // katu counts droplet misses; geki is unused for catch
            let total = s.count_300 + s.count_100 + s.count_50 + s.count_miss + s.count_katu;
            if total == 0 {
                return 0.0;
            }

            f64::from(s.count_300 + s.count_100 + s.count_50) / f64::from(total) * 100.0
        }
        Gamemode::Mania => {
            let total = s.count_300 + s.count_geki + s.count_katu + s.count_100 + s.count_50 + s.count_miss;
            if total == 0 {
                return 0.0;
            }

            let points = 300 * (s.count_300 + s.count_geki) + 200 * s.count_katu + 100 * s.count_100 + 50 * s.count_50;
            f64::from(points) / f64::from(300 * total) * 100.0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::accuracy;
    use crate::database::db_structs::ScoreStatistics;
    use crate::model::structures::gamemode::Gamemode;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_standard_full_accuracy() {
        let statistics = ScoreStatistics {
            count_300: 500,
            ..Default::default()
        };

        assert_abs_diff_eq!(accuracy(Gamemode::Standard, &statistics), 100.0);
    }

    #[test]
    fn test_standard_mixed_judgements() {
        let statistics = ScoreStatistics {
            count_300: 90,
            count_100: 8,
            count_50: 1,
            count_miss: 1,
            ..Default::default()
        };

        // (300*90 + 100*8 + 50*1) / (300 * 100)
        assert_abs_diff_eq!(accuracy(Gamemode::Standard, &statistics), 92.833333, epsilon = 0.0001);
    }

    #[test]
    fn test_taiko_halves_goods() {
        let statistics = ScoreStatistics {
            count_300: 50,
            count_100: 50,
            ..Default::default()
        };

        assert_abs_diff_eq!(accuracy(Gamemode::Taiko, &statistics), 75.0);
    }

    #[test]
    fn test_catch_counts_droplet_misses() {
        let statistics = ScoreStatistics {
            count_300: 80,
            count_100: 10,
            count_50: 5,
            count_miss: 3,
            count_katu: 2,
            ..Default::default()
        };

        assert_abs_diff_eq!(accuracy(Gamemode::Catch, &statistics), 95.0);
    }

    #[test]
    fn test_empty_statistics() {
        let statistics = ScoreStatistics::default();

        assert_abs_diff_eq!(accuracy(Gamemode::Standard, &statistics), 0.0);
        assert_abs_diff_eq!(accuracy(Gamemode::Mania, &statistics), 0.0);
    }
}
