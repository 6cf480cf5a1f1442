use super::{progress_bar, LoadStrategy, RunOutput};
use crate::executor::RequestExecutor;
use crate::scheduler::ArrivalScheduler;
use async_trait::async_trait;
use futures::future::join_all;
use servebench_core::{RequestOutcome, RequestRate, RequestSpec, Result};
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{info, instrument, warn};

/// One arrival process over the whole pool; every release becomes its own task.
pub struct CooperativeStrategy {
    rate: RequestRate,
    seed: Option<u64>,
    show_progress: bool,
}

impl CooperativeStrategy {
    pub fn new(rate: RequestRate, seed: Option<u64>) -> Self {
        Self {
            rate,
            seed,
            show_progress: false,
        }
    }

    pub fn with_progress(mut self, show: bool) -> Self {
        self.show_progress = show;
        self
    }
}

#[async_trait]
impl LoadStrategy for CooperativeStrategy {
    fn name(&self) -> &'static str {
        "cooperative"
    }

    #[instrument(skip_all, fields(requests = pool.len(), rate = %self.rate))]
    async fn run(&self, pool: Vec<RequestSpec>, executor: RequestExecutor) -> Result<RunOutput> {
        let total = pool.len();
        let bar = self.show_progress.then(|| progress_bar(total, "requests"));
        let executor = Arc::new(match &bar {
            Some(bar) => executor.with_progress(bar.clone()),
            None => executor,
        });

        let mut arrivals = ArrivalScheduler::new(pool, self.rate, self.seed)?;
        info!("Starting cooperative run");

        let start = Instant::now();
        let mut prompt_lens = Vec::with_capacity(total);
        let mut tasks = Vec::with_capacity(total);
        while let Some(spec) = arrivals.next().await {
            let executor = Arc::clone(&executor);
            prompt_lens.push(spec.prompt_len);
            tasks.push(tokio::spawn(async move { executor.execute(spec).await }));
        }

        let outcomes = join_all(tasks)
            .await
            .into_iter()
            .zip(prompt_lens)
            .map(|(joined, prompt_len)| {
                joined.unwrap_or_else(|e| {
                    warn!(error = %e, "Request task aborted");
                    RequestOutcome::failure(prompt_len, format!("task aborted: {}", e))
                })
            })
            .collect::<Vec<_>>();
        let duration = start.elapsed();

        if let Some(bar) = bar {
            bar.finish_and_clear();
        }
        info!(
            dispatched = outcomes.len(),
            duration_s = duration.as_secs_f64(),
            "Cooperative run complete"
        );

        Ok(RunOutput {
            outcomes,
            duration,
            workers: Vec::new(),
        })
    }
}
