use crate::database::db_structs::{Beatmap, Score};
use crate::model::structures::{beatmap_status::BeatmapStatus, mods::Mods};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Leaderboard-scoped predicate restricting which scores may count toward
/// that leaderboard. Every clause must pass; unset clauses always pass.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ScoreFilter {
    /// Beatmap status whitelist
    pub allowed_beatmap_status: Vec<BeatmapStatus>,
    pub oldest_beatmap_date: Option<DateTime<Utc>>,
    pub newest_beatmap_date: Option<DateTime<Utc>>,
    pub oldest_score_date: Option<DateTime<Utc>>,
    pub newest_score_date: Option<DateTime<Utc>>,
    /// Every one of these mods must be present on the score
    pub required_mods: Mods,
    /// None of these mods may be present on the score
    pub disqualified_mods: Mods,
    pub lowest_star_rating: Option<f64>,
    pub highest_star_rating: Option<f64>,
    /// Accuracy bounds as percentages
    pub lowest_accuracy: Option<f64>,
    pub highest_accuracy: Option<f64>
}

impl Default for ScoreFilter {
    fn default() -> Self {
        ScoreFilter {
            allowed_beatmap_status: vec![BeatmapStatus::Ranked, BeatmapStatus::Approved],
            oldest_beatmap_date: None,
            newest_beatmap_date: None,
            oldest_score_date: None,
            newest_score_date: None,
            required_mods: Mods::NONE,
            disqualified_mods: Mods::NONE,
            lowest_star_rating: None,
            highest_star_rating: None,
            lowest_accuracy: None,
            highest_accuracy: None
        }
    }
}

impl ScoreFilter {
    /// Evaluates the filter against a score and its beatmap. Scores whose
    /// beatmap no longer qualifies (e.g. un-ranked after the fact) simply
    /// fail the status clause; that is exclusion, not an error.
    pub fn matches(&self, score: &Score, beatmap: &Beatmap) -> bool {
        if !self.allowed_beatmap_status.is_empty() && !self.allowed_beatmap_status.contains(&beatmap.status) {
            return false;
        }

        if let Some(oldest) = self.oldest_beatmap_date {
            if beatmap.last_updated < oldest {
                return false;
            }
        }

        if let Some(newest) = self.newest_beatmap_date {
            if beatmap.last_updated > newest {
                return false;
            }
        }

        if let Some(oldest) = self.oldest_score_date {
            if score.created_at < oldest {
                return false;
            }
        }

        if let Some(newest) = self.newest_score_date {
            if score.created_at > newest {
                return false;
            }
        }

        if !score.mods.contains(self.required_mods) {
            return false;
        }

        if score.mods.intersects(self.disqualified_mods) {
            return false;
        }

        if let Some(lowest) = self.lowest_star_rating {
            if beatmap.star_rating < lowest {
                return false;
            }
        }

        if let Some(highest) = self.highest_star_rating {
            if beatmap.star_rating > highest {
                return false;
            }
        }

        if let Some(lowest) = self.lowest_accuracy {
            if score.accuracy < lowest {
                return false;
            }
        }

        if let Some(highest) = self.highest_accuracy {
            if score.accuracy > highest {
                return false;
            }
        }

        true
    }
}

#[cfg(test)]
mod tests {
    use super::ScoreFilter;
    use crate::model::structures::{beatmap_status::BeatmapStatus, mods::Mods};
    use crate::utils::test_utils::{generate_beatmap, generate_score};
    use chrono::{Duration, Utc};

    #[test]
    fn test_default_passes_ranked() {
        let beatmap = generate_beatmap(1, 5.0, 1000);
        let score = generate_score(1, 1, &beatmap, 1000, 0, Mods::NONE);

        assert!(ScoreFilter::default().matches(&score, &beatmap));
    }

    #[test]
    fn test_status_whitelist_excludes() {
        let mut beatmap = generate_beatmap(1, 5.0, 1000);
        beatmap.status = BeatmapStatus::Loved;
        let score = generate_score(1, 1, &beatmap, 1000, 0, Mods::NONE);

        assert!(!ScoreFilter::default().matches(&score, &beatmap));

        let filter = ScoreFilter {
            allowed_beatmap_status: vec![BeatmapStatus::Loved],
            ..Default::default()
        };
        assert!(filter.matches(&score, &beatmap));
    }

    #[test]
    fn test_required_mods() {
        let beatmap = generate_beatmap(1, 5.0, 1000);
        let nomod = generate_score(1, 1, &beatmap, 1000, 0, Mods::NONE);
        let hdhr = generate_score(2, 1, &beatmap, 1000, 0, Mods::HIDDEN | Mods::HARD_ROCK);

        let filter = ScoreFilter {
            required_mods: Mods::HIDDEN,
            ..Default::default()
        };

        assert!(!filter.matches(&nomod, &beatmap));
        assert!(filter.matches(&hdhr, &beatmap));
    }

    #[test]
    fn test_disqualified_mods() {
        let beatmap = generate_beatmap(1, 5.0, 1000);
        let score = generate_score(1, 1, &beatmap, 1000, 0, Mods::EASY | Mods::HIDDEN);

        let filter = ScoreFilter {
            disqualified_mods: Mods::EASY,
            ..Default::default()
        };

        assert!(!filter.matches(&score, &beatmap));
    }

    #[test]
    fn test_star_rating_range() {
        let beatmap = generate_beatmap(1, 5.0, 1000);
        let score = generate_score(1, 1, &beatmap, 1000, 0, Mods::NONE);

        let too_low = ScoreFilter {
            lowest_star_rating: Some(6.0),
            ..Default::default()
        };
        let in_range = ScoreFilter {
            lowest_star_rating: Some(4.0),
            highest_star_rating: Some(6.0),
            ..Default::default()
        };

        assert!(!too_low.matches(&score, &beatmap));
        assert!(in_range.matches(&score, &beatmap));
    }

    #[test]
    fn test_accuracy_range() {
        let beatmap = generate_beatmap(1, 5.0, 1000);
        let mut score = generate_score(1, 1, &beatmap, 1000, 0, Mods::NONE);
        score.accuracy = 92.0;

        let filter = ScoreFilter {
            lowest_accuracy: Some(95.0),
            ..Default::default()
        };

        assert!(!filter.matches(&score, &beatmap));
    }

    #[test]
    fn test_score_date_range() {
        let beatmap = generate_beatmap(1, 5.0, 1000);
        let score = generate_score(1, 1, &beatmap, 1000, 0, Mods::NONE);

        let filter = ScoreFilter {
            oldest_score_date: Some(Utc::now() + Duration::days(1)),
            ..Default::default()
        };

        assert!(!filter.matches(&score, &beatmap));
    }
}
