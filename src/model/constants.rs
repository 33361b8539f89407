/// Default geometric weighting constant for the aggregation series.
/// Leaderboards may override it; 0.95 matches the upstream game's weighting.
pub const DEFAULT_DECAY_FACTOR: f64 = 0.95;

/// Upper bound on items sent in a single calculator RPC batch.
pub const DEFAULT_CALC_BATCH_SIZE: usize = 100;

/// Bounded timeout for one calculator batch call, in seconds.
pub const CALC_TIMEOUT_SECS: u64 = 30;

/// Combo percentage above which a miss-free play is a NoBreak.
pub const NO_BREAK_COMBO_PCT: f64 = 98.0;

/// Combo percentage above which a broken play is an EndChoke.
pub const END_CHOKE_COMBO_PCT: f64 = 85.0;

/// Name of the scalar every engine emits as the headline performance value.
pub const TOTAL_VALUE: &str = "total";
