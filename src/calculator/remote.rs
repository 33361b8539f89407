use reqwest::{Client, ClientBuilder};
use std::time::Duration;
use tracing::info;

use crate::calculator::{CalcRequest, CalcResult, CalculatorError, EngineInfo};
use crate::model::constants::CALC_TIMEOUT_SECS;

/// Calculator engine reachable over HTTP. The engine advertises its identity
/// at `/info` and accepts JSON batches at `/calculate`, one result per
/// request in request order.
pub struct RemoteEngine {
    info: EngineInfo,
    base_url: String,
    client: Client
}

impl RemoteEngine {
    /// Connects to the engine and caches its advertised identity. The
    /// version is pinned for the life of the process; engine upgrades are
    /// picked up on the next start.
    pub async fn connect(base_url: &str) -> Result<RemoteEngine, CalculatorError> {
        let client = ClientBuilder::new()
            .timeout(Duration::from_secs(CALC_TIMEOUT_SECS))
            .build()?;

        let info: EngineInfo = client
            .get(format!("{}/info", base_url))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        info!("Connected to calculator engine {} v{}", info.name, info.version);

        Ok(RemoteEngine {
            info,
            base_url: base_url.trim_end_matches('/').to_string(),
            client
        })
    }

    pub fn info(&self) -> &EngineInfo {
        &self.info
    }

    pub(crate) async fn calculate_batch(&self, requests: &[CalcRequest]) -> Result<Vec<CalcResult>, CalculatorError> {
        let results: Vec<CalcResult> = self
            .client
            .post(format!("{}/calculate", self.base_url))
            .json(&requests)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        if results.len() != requests.len() {
            return Err(CalculatorError::ShapeMismatch {
                expected: requests.len(),
                returned: results.len()
            });
        }

        Ok(results)
    }
}
