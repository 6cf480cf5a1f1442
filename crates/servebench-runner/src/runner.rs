use crate::aggregate::{calculate_metrics, Aggregation};
use crate::executor::RequestExecutor;
use crate::strategy::{strategy_for, WorkerSummary};
use crate::transport::build_transport;
use servebench_core::{RequestOutcome, RequestSpec, Result, RunConfig, Tokenizer};
use std::time::Duration;
use tracing::{info, instrument};

/// Validated entry point: transport, strategy and aggregation for one run.
pub struct BenchmarkRunner {
    config: RunConfig,
}

#[derive(Debug)]
pub struct BenchmarkRun {
    pub outcomes: Vec<RequestOutcome>,
    pub aggregation: Aggregation,
    pub duration: Duration,
    pub workers: Vec<WorkerSummary>,
}

impl BenchmarkRunner {
    pub fn new(config: RunConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    #[instrument(
        skip_all,
        fields(
            backend = %self.config.backend,
            model = %self.config.transport.model,
            mode = self.config.mode.label(),
            requests = requests.len()
        )
    )]
    pub async fn run(
        &self,
        requests: Vec<RequestSpec>,
        tokenizer: &dyn Tokenizer,
    ) -> Result<BenchmarkRun> {
        let requests: Vec<RequestSpec> = requests
            .into_iter()
            .map(|r| r.with_sampling(self.config.best_of, self.config.use_beam_search))
            .collect();

        let transport = build_transport(self.config.backend, &self.config.transport)?;
        let executor = RequestExecutor::new(transport);
        let strategy = strategy_for(&self.config);

        info!(
            url = %self.config.transport.api_url,
            rate = %self.config.request_rate,
            strategy = strategy.name(),
            "Starting benchmark"
        );

        let output = strategy.run(requests.clone(), executor).await?;
        let aggregation = calculate_metrics(&requests, &output.outcomes, output.duration, tokenizer);

        info!(
            completed = aggregation.metrics.completed,
            dispatched = aggregation.metrics.dispatched,
            duration_s = output.duration.as_secs_f64(),
            "Benchmark finished"
        );

        Ok(BenchmarkRun {
            outcomes: output.outcomes,
            aggregation,
            duration: output.duration,
            workers: output.workers,
        })
    }
}
