use crate::database::db_structs::{Beatmap, Score};
use crate::model::{
    accuracy,
    constants::{END_CHOKE_COMBO_PCT, NO_BREAK_COMBO_PCT},
    structures::{score_mutation::ScoreMutation, score_result::ScoreResult}
};

/// Combo achieved as a percentage of the beatmap's maximum achievable combo.
pub fn combo_percentage(combo: i32, max_combo: i32) -> f64 {
    if max_combo <= 0 {
        return 0.0;
    }

    f64::from(combo) / f64::from(max_combo) * 100.0
}

/// Classifies how a play ended. The table is evaluated top to bottom:
/// - miss count == 1        => OneMiss
/// - combo% == 100          => Perfect
/// - combo% > 98, 0 misses  => NoBreak
/// - combo% > 85            => EndChoke
/// - miss count == 0        => SliderBreak
/// - otherwise              => Clear
///
/// The 85% and 98% boundaries are exclusive.
pub fn classify(score: &Score, beatmap: &Beatmap) -> ScoreResult {
    let miss_count = score.statistics.count_miss;
    let combo_pct = combo_percentage(score.combo, beatmap.max_combo);

    if miss_count == 1 {
        return ScoreResult::OneMiss;
    }

    if combo_pct >= 100.0 {
        return ScoreResult::Perfect;
    }

    if combo_pct > NO_BREAK_COMBO_PCT && miss_count == 0 {
        return ScoreResult::NoBreak;
    }

    if combo_pct > END_CHOKE_COMBO_PCT {
        return ScoreResult::EndChoke;
    }

    if miss_count == 0 {
        return ScoreResult::SliderBreak;
    }

    ScoreResult::Clear
}

/// Derives the hypothetical variant of a play as though the combo had never
/// broken: misses fold into 300s, combo rises to the beatmap's maximum, and
/// accuracy is recomputed from the adjusted statistics. The derived score
/// carries a back-reference to its source and no id until inserted.
pub fn derive_no_choke(score: &Score, beatmap: &Beatmap) -> Score {
    let mut statistics = score.statistics;
    statistics.count_300 += statistics.count_miss;
    statistics.count_miss = 0;

    Score {
        id: 0,
        user_id: score.user_id,
        beatmap_id: score.beatmap_id,
        gamemode: score.gamemode,
        mods: score.mods,
        statistics,
        combo: beatmap.max_combo,
        accuracy: accuracy(score.gamemode, &statistics),
        mutation: ScoreMutation::NoChoke,
        source_score_id: Some(score.id),
        created_at: score.created_at
    }
}
