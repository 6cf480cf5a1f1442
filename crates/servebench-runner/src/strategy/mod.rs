//! Concurrency strategies: how released requests are put in flight.
//!
//! Both strategies return the same [`RunOutput`], so aggregation never needs
//! to know which one produced it.

mod cooperative;
mod partitioned;

pub use cooperative::CooperativeStrategy;
pub use partitioned::{partition, PartitionedStrategy, WorkerPartition};

use crate::executor::RequestExecutor;
use async_trait::async_trait;
use indicatif::{ProgressBar, ProgressStyle};
use serde::{Deserialize, Serialize};
use servebench_core::{ConcurrencyMode, RequestOutcome, RequestSpec, Result, RunConfig};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerSummary {
    pub id: usize,
    /// Requests in this worker's slice.
    pub assigned: usize,
    pub dispatched: usize,
    pub elapsed_s: f64,
    pub stopped_early: bool,
}

#[derive(Debug)]
pub struct RunOutput {
    /// One outcome per dispatched request, in dispatch order.
    pub outcomes: Vec<RequestOutcome>,
    pub duration: Duration,
    /// Empty for cooperative runs.
    pub workers: Vec<WorkerSummary>,
}

#[async_trait]
pub trait LoadStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    async fn run(&self, pool: Vec<RequestSpec>, executor: RequestExecutor) -> Result<RunOutput>;
}

pub fn strategy_for(config: &RunConfig) -> Box<dyn LoadStrategy> {
    match &config.mode {
        ConcurrencyMode::Cooperative => Box::new(
            CooperativeStrategy::new(config.request_rate, config.seed)
                .with_progress(config.show_progress),
        ),
        ConcurrencyMode::Partitioned(p) => Box::new(
            PartitionedStrategy::new(p.clone(), config.request_rate, config.seed)
                .with_progress(config.show_progress),
        ),
    }
}

pub(crate) fn progress_bar(len: usize, prefix: impl Into<String>) -> ProgressBar {
    let bar = ProgressBar::new(len as u64);
    if let Ok(style) =
        ProgressStyle::with_template("{prefix:>10} [{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len}")
    {
        bar.set_style(style.progress_chars("#>-"));
    }
    bar.set_prefix(prefix.into());
    bar
}
