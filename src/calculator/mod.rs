use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::calculator::{fixture::FixtureEngine, remote::RemoteEngine};
use crate::database::db_structs::{CalculationValue, Score};
use crate::model::structures::mods::Mods;

pub mod client;
pub mod fixture;
pub mod remote;

#[derive(Debug, Error)]
pub enum CalculatorError {
    #[error("calculator request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("calculator batch timed out after {0}s")]
    Timeout(u64),

    #[error("calculator returned {returned} results for {expected} requests")]
    ShapeMismatch { expected: usize, returned: usize },

    #[error("calculator engine unavailable")]
    Unavailable
}

/// Identity a calculator engine advertises independently of any single
/// calculation. A cache row is only valid while both fields match the live
/// engine exactly. Versions are sortable date-stamp strings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineInfo {
    pub name: String,
    pub version: String
}

/// Hit statistics and combo for a performance calculation. Absent counts
/// default to zero on the wire.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ScoreInput {
    pub count_300: i32,
    pub count_100: i32,
    pub count_50: i32,
    pub count_miss: i32,
    pub count_katu: i32,
    pub count_geki: i32,
    pub combo: i32
}

/// One item of a batch calculation. Beatmap ids travel as opaque strings to
/// tolerate calculators that operate on slugs rather than numeric ids.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CalcRequest {
    pub beatmap_id: String,
    pub mods: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub score: Option<ScoreInput>
}

impl CalcRequest {
    /// Difficulty request for a beatmap + mods pair.
    pub fn difficulty(beatmap_id: i64, mods: Mods) -> CalcRequest {
        CalcRequest {
            beatmap_id: beatmap_id.to_string(),
            mods: mods.bits(),
            score: None
        }
    }

    /// Performance request for a full score.
    pub fn performance(score: &Score) -> CalcRequest {
        CalcRequest {
            beatmap_id: score.beatmap_id.to_string(),
            mods: score.mods.bits(),
            score: Some(ScoreInput {
                count_300: score.statistics.count_300,
                count_100: score.statistics.count_100,
                count_50: score.statistics.count_50,
                count_miss: score.statistics.count_miss,
                count_katu: score.statistics.count_katu,
                count_geki: score.statistics.count_geki,
                combo: score.combo
            })
        }
    }
}

/// Named scalars produced for one request. An empty value set marks a failed
/// calculation; the cache stores it as failed and retries later.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CalcResult {
    pub values: Vec<CalculationValue>
}

impl CalcResult {
    pub fn value(&self, name: &str) -> Option<f64> {
        self.values.iter().find(|v| v.name == name).map(|v| v.value)
    }
}

/// A versioned, stateless scoring function. One variant per engine kind;
/// callers depend only on `info` and `calculate_batch`.
pub enum Engine {
    Remote(RemoteEngine),
    Fixture(FixtureEngine)
}

impl Engine {
    pub fn info(&self) -> &EngineInfo {
        match self {
            Engine::Remote(engine) => engine.info(),
            Engine::Fixture(engine) => engine.info()
        }
    }

    pub async fn calculate_batch(&self, requests: &[CalcRequest]) -> Result<Vec<CalcResult>, CalculatorError> {
        match self {
            Engine::Remote(engine) => engine.calculate_batch(requests).await,
            Engine::Fixture(engine) => engine.calculate_batch(requests).await
        }
    }
}

/// Explicit engine registry, constructed once at process start and passed by
/// reference to every component needing calculator lookup.
pub struct CalculatorRegistry {
    engines: Vec<Engine>,
    default_index: usize
}

impl CalculatorRegistry {
    /// Creates a registry whose first engine is the default.
    pub fn new(default_engine: Engine) -> CalculatorRegistry {
        CalculatorRegistry {
            engines: vec![default_engine],
            default_index: 0
        }
    }

    pub fn register(&mut self, engine: Engine) {
        self.engines.push(engine);
    }

    pub fn get(&self, name: &str) -> Option<&Engine> {
        self.engines.iter().find(|e| e.info().name == name)
    }

    pub fn default_engine(&self) -> &Engine {
        &self.engines[self.default_index]
    }
}
