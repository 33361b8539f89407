use crate::database::db_structs::{Beatmap, Invite, Leaderboard, Score, ScoreStatistics};
use crate::model::{
    accuracy,
    constants::DEFAULT_DECAY_FACTOR,
    score_filter::ScoreFilter,
    structures::{
        beatmap_status::BeatmapStatus, gamemode::Gamemode, leaderboard_access::LeaderboardAccess, mods::Mods,
        score_mutation::ScoreMutation, score_set::ScoreSet
    }
};
use chrono::Utc;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

pub fn generate_beatmap(id: i64, star_rating: f64, max_combo: i32) -> Beatmap {
    Beatmap {
        id,
        gamemode: Gamemode::Standard,
        status: BeatmapStatus::Ranked,
        artist: "Test Artist".to_string(),
        title: "Test Title".to_string(),
        version: "Test Diff".to_string(),
        creator_name: "Test Creator".to_string(),
        max_combo,
        star_rating,
        approach_rate: 9.0,
        overall_difficulty: 8.5,
        circle_size: 4.0,
        health_drain: 5.0,
        bpm: 180.0,
        length: 120,
        last_updated: Utc::now()
    }
}

/// A play over 100 judged objects: `miss_count` misses, the rest 300s.
pub fn generate_score(id: i64, user_id: i64, beatmap: &Beatmap, combo: i32, miss_count: i32, mods: Mods) -> Score {
    let statistics = ScoreStatistics {
        count_300: 100 - miss_count,
        count_100: 0,
        count_50: 0,
        count_miss: miss_count,
        count_katu: 0,
        count_geki: 0
    };

    Score {
        id,
        user_id,
        beatmap_id: beatmap.id,
        gamemode: beatmap.gamemode,
        mods,
        statistics,
        combo,
        accuracy: accuracy(beatmap.gamemode, &statistics),
        mutation: ScoreMutation::None,
        source_score_id: None,
        created_at: Utc::now()
    }
}

pub fn generate_leaderboard(id: i64, score_set: ScoreSet) -> Leaderboard {
    Leaderboard {
        id,
        gamemode: Gamemode::Standard,
        name: "Test Leaderboard".to_string(),
        description: "Generated for tests".to_string(),
        owner_id: None,
        access_type: LeaderboardAccess::Public,
        score_set,
        decay_factor: DEFAULT_DECAY_FACTOR,
        allow_past_scores: true,
        archived: false,
        score_filter: ScoreFilter::default(),
        notification_target: None
    }
}

pub fn generate_invite(leaderboard_id: i64, user_id: i64) -> Invite {
    Invite {
        id: 0,
        leaderboard_id,
        user_id,
        message: "Come play".to_string(),
        created_at: Utc::now()
    }
}

/// One play per beatmap with seeded, reproducible combos and miss counts.
pub fn generate_user_scores(user_id: i64, beatmaps: &[Beatmap]) -> Vec<Score> {
    let mut rng = ChaCha8Rng::seed_from_u64(42);

    beatmaps
        .iter()
        .map(|beatmap| {
            let combo = rng.random_range(beatmap.max_combo / 2..=beatmap.max_combo);
            let miss_count = rng.random_range(0..5);
            generate_score(0, user_id, beatmap, combo, miss_count, Mods::NONE)
        })
        .collect()
}
