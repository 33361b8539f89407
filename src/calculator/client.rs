use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::warn;

use crate::calculator::{CalcRequest, CalcResult, CalculatorError, CalculatorRegistry, Engine, EngineInfo};
use crate::model::constants::{CALC_TIMEOUT_SECS, DEFAULT_CALC_BATCH_SIZE};
use crate::reporting::ErrorReporter;

/// Wraps the registry's default engine with bounded batching and graceful
/// per-item fallback. A wholesale batch failure retries the same items one
/// at a time; items that still fail are reported and yield no result, so
/// data loss is bounded to genuinely-failing inputs.
pub struct CalculatorClient {
    registry: Arc<CalculatorRegistry>,
    reporter: Arc<dyn ErrorReporter>,
    batch_size: usize
}

impl CalculatorClient {
    pub fn new(registry: Arc<CalculatorRegistry>, reporter: Arc<dyn ErrorReporter>) -> CalculatorClient {
        CalculatorClient {
            registry,
            reporter,
            batch_size: DEFAULT_CALC_BATCH_SIZE
        }
    }

    /// Bounds the number of items per engine call, limiting blast radius
    /// and request size.
    pub fn with_batch_size(mut self, batch_size: usize) -> CalculatorClient {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn engine(&self) -> &Engine {
        self.registry.default_engine()
    }

    pub fn info(&self) -> &EngineInfo {
        self.engine().info()
    }

    /// Calculates one result per request, in request order. Failed items are
    /// None; they have already been reported.
    pub async fn calculate(&self, requests: &[CalcRequest]) -> Vec<Option<CalcResult>> {
        let mut results = Vec::with_capacity(requests.len());

        for chunk in requests.chunks(self.batch_size) {
            match self.call_engine(chunk).await {
                Ok(chunk_results) => results.extend(chunk_results.into_iter().map(Some)),
                Err(error) => {
                    warn!(
                        "Batch of {} calculations failed ({}), retrying one item at a time",
                        chunk.len(),
                        error
                    );
                    for request in chunk {
                        results.push(self.calculate_single(request).await);
                    }
                }
            }
        }

        results
    }

    async fn calculate_single(&self, request: &CalcRequest) -> Option<CalcResult> {
        match self.call_engine(std::slice::from_ref(request)).await {
            Ok(mut results) => results.pop(),
            Err(error) => {
                self.reporter.report(
                    &error.to_string(),
                    &format!(
                        "calculation failed for beatmap {} with mods {}",
                        request.beatmap_id, request.mods
                    )
                );
                None
            }
        }
    }

    async fn call_engine(&self, requests: &[CalcRequest]) -> Result<Vec<CalcResult>, CalculatorError> {
        let results = timeout(
            Duration::from_secs(CALC_TIMEOUT_SECS),
            self.engine().calculate_batch(requests)
        )
        .await
        .map_err(|_| CalculatorError::Timeout(CALC_TIMEOUT_SECS))??;

        if results.len() != requests.len() {
            return Err(CalculatorError::ShapeMismatch {
                expected: requests.len(),
                returned: results.len()
            });
        }

        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::CalculatorClient;
    use crate::calculator::{fixture::FixtureEngine, CalcRequest, CalculatorRegistry, Engine};
    use crate::model::structures::mods::Mods;
    use crate::reporting::CollectingReporter;
    use std::sync::Arc;

    fn client_with(engine: FixtureEngine, reporter: Arc<CollectingReporter>) -> CalculatorClient {
        let registry = Arc::new(CalculatorRegistry::new(Engine::Fixture(engine)));
        CalculatorClient::new(registry, reporter)
    }

    #[tokio::test]
    async fn test_results_are_in_request_order() {
        let engine = FixtureEngine::new("standard", "20250101")
            .with_difficulty(1, 3.0)
            .with_difficulty(2, 4.0)
            .with_difficulty(3, 5.0);
        let client = client_with(engine, Arc::new(CollectingReporter::new()));

        let results = client
            .calculate(&[
                CalcRequest::difficulty(1, Mods::NONE),
                CalcRequest::difficulty(2, Mods::NONE),
                CalcRequest::difficulty(3, Mods::NONE),
            ])
            .await;

        let totals: Vec<f64> = results
            .iter()
            .map(|r| r.as_ref().unwrap().value("total").unwrap())
            .collect();
        assert_eq!(totals, vec![3.0, 4.0, 5.0]);
    }

    #[tokio::test]
    async fn test_partial_batch_failure() {
        // Item 2 always fails: the wholesale batch errors, the per-item
        // retry recovers 1 and 3, and exactly one error is reported.
        let engine = FixtureEngine::new("standard", "20250101").with_failing_beatmap(2);
        let reporter = Arc::new(CollectingReporter::new());
        let client = client_with(engine, Arc::clone(&reporter));

        let results = client
            .calculate(&[
                CalcRequest::difficulty(1, Mods::NONE),
                CalcRequest::difficulty(2, Mods::NONE),
                CalcRequest::difficulty(3, Mods::NONE),
            ])
            .await;

        assert_eq!(results.len(), 3);
        assert!(results[0].is_some());
        assert!(results[1].is_none());
        assert!(results[2].is_some());
        assert_eq!(reporter.count(), 1);
    }

    #[tokio::test]
    async fn test_refused_batches_degrade_to_single_items() {
        let engine = FixtureEngine::new("standard", "20250101").with_refused_batches();
        let reporter = Arc::new(CollectingReporter::new());
        let client = client_with(engine, Arc::clone(&reporter));

        let results = client
            .calculate(&[CalcRequest::difficulty(1, Mods::NONE), CalcRequest::difficulty(2, Mods::NONE)])
            .await;

        assert!(results.iter().all(|r| r.is_some()));
        assert_eq!(reporter.count(), 0);
    }

    #[tokio::test]
    async fn test_batch_size_bound_is_respected() {
        let engine = FixtureEngine::new("standard", "20250101").with_refused_batches();
        let reporter = Arc::new(CollectingReporter::new());
        let client = client_with(engine, Arc::clone(&reporter)).with_batch_size(1);

        // With single-item batches the refuse-batches engine never errors.
        let results = client
            .calculate(&[CalcRequest::difficulty(1, Mods::NONE), CalcRequest::difficulty(2, Mods::NONE)])
            .await;

        assert!(results.iter().all(|r| r.is_some()));
    }
}
