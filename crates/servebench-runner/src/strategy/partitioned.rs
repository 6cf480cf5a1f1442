use super::{progress_bar, LoadStrategy, RunOutput, WorkerSummary};
use crate::executor::RequestExecutor;
use crate::scheduler::ArrivalScheduler;
use async_trait::async_trait;
use indicatif::MultiProgress;
use servebench_core::{
    PartitionConfig, RequestOutcome, RequestRate, RequestSpec, Result, ServeBenchError,
};
use std::thread;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::time::Instant;
use tracing::{debug, error, info, instrument};

/// A contiguous slice of the pool, owned by exactly one worker thread.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkerPartition {
    pub id: usize,
    pub start_offset: Duration,
    pub stop_deadline: Option<Duration>,
    pub requests: Vec<RequestSpec>,
}

/// Splits `pool` into `threads` contiguous slices. Early slices take the remainder.
pub fn partition(pool: Vec<RequestSpec>, config: &PartitionConfig) -> Result<Vec<WorkerPartition>> {
    let n = config.threads;
    if n == 0 {
        return Err(ServeBenchError::Config(
            "number of threads must be greater than 0".into(),
        ));
    }

    let base = pool.len() / n;
    let extra = pool.len() % n;
    let mut rest = pool.into_iter();

    Ok((0..n)
        .map(|id| {
            let size = base + usize::from(id < extra);
            WorkerPartition {
                id,
                start_offset: config.ramp_up * id as u32 / n as u32,
                stop_deadline: config.stop_deadline(),
                requests: rest.by_ref().take(size).collect(),
            }
        })
        .collect())
}

struct WorkerRun {
    outcomes: Vec<RequestOutcome>,
    summary: WorkerSummary,
}

/// Independent OS threads, each with its own runtime, arrival process and slice.
///
/// Within a worker requests run one at a time; concurrency comes from the
/// number of workers.
pub struct PartitionedStrategy {
    config: PartitionConfig,
    rate: RequestRate,
    seed: Option<u64>,
    show_progress: bool,
}

impl PartitionedStrategy {
    pub fn new(config: PartitionConfig, rate: RequestRate, seed: Option<u64>) -> Self {
        Self {
            config,
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
impl LoadStrategy for PartitionedStrategy {
    fn name(&self) -> &'static str {
        "partitioned"
    }

    #[instrument(skip_all, fields(requests = pool.len(), threads = self.config.threads))]
    async fn run(&self, pool: Vec<RequestSpec>, executor: RequestExecutor) -> Result<RunOutput> {
        let partitions = partition(pool, &self.config)?;
        let multi = self.show_progress.then(MultiProgress::new);
        let mut bars = Vec::new();

        info!(
            ramp_up_s = self.config.ramp_up.as_secs_f64(),
            stop_after_s = self.config.stop_after.as_secs_f64(),
            "Starting partitioned run"
        );

        let start = Instant::now();
        let mut workers = Vec::with_capacity(partitions.len());
        for part in partitions {
            let id = part.id;
            let mut worker_executor = executor.fork()?;
            if let Some(multi) = &multi {
                let bar = multi.add(progress_bar(part.requests.len(), format!("worker {}", id)));
                bars.push(bar.clone());
                worker_executor = worker_executor.with_progress(bar);
            }

            let rate = self.rate;
            let seed = self.seed.map(|s| s.wrapping_add(id as u64));
            let (tx, rx) = oneshot::channel();
            let handle = thread::Builder::new()
                .name(format!("servebench-worker-{}", id))
                .spawn(move || {
                    let _ = tx.send(run_worker(part, worker_executor, rate, seed));
                })
                .map_err(|e| ServeBenchError::Worker {
                    id,
                    reason: format!("failed to spawn thread: {}", e),
                })?;
            workers.push((id, rx, handle));
        }

        let mut runs = Vec::with_capacity(workers.len());
        for (id, rx, handle) in workers {
            let run = rx.await.map_err(|_| ServeBenchError::Worker {
                id,
                reason: "worker exited without reporting".into(),
            })?;
            if handle.join().is_err() {
                error!(worker = id, "Worker thread panicked after reporting");
            }
            runs.push(run?);
        }
        let duration = start.elapsed();

        for bar in bars {
            bar.finish_and_clear();
        }

        let mut outcomes = Vec::new();
        let mut summaries = Vec::with_capacity(runs.len());
        for run in runs {
            info!(
                worker = run.summary.id,
                dispatched = run.summary.dispatched,
                assigned = run.summary.assigned,
                elapsed_s = run.summary.elapsed_s,
                stopped_early = run.summary.stopped_early,
                "Worker finished"
            );
            outcomes.extend(run.outcomes);
            summaries.push(run.summary);
        }

        info!(
            dispatched = outcomes.len(),
            duration_s = duration.as_secs_f64(),
            "Partitioned run complete"
        );

        Ok(RunOutput {
            outcomes,
            duration,
            workers: summaries,
        })
    }
}

/// Body of one worker thread.
fn run_worker(
    partition: WorkerPartition,
    executor: RequestExecutor,
    rate: RequestRate,
    seed: Option<u64>,
) -> Result<WorkerRun> {
    let WorkerPartition {
        id,
        start_offset,
        stop_deadline,
        requests,
    } = partition;

    if !start_offset.is_zero() {
        debug!(worker = id, offset_s = start_offset.as_secs_f64(), "Waiting for ramp-up slot");
        thread::sleep(start_offset);
    }

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(|e| ServeBenchError::Worker {
            id,
            reason: format!("failed to create runtime: {}", e),
        })?;

    let assigned = requests.len();
    runtime.block_on(async move {
        let mut arrivals = ArrivalScheduler::new(requests, rate, seed)?;
        let started = Instant::now();
        let mut outcomes = Vec::with_capacity(assigned);
        let mut stopped_early = false;

        while let Some(spec) = arrivals.next().await {
            if stop_deadline.is_some_and(|deadline| started.elapsed() >= deadline) {
                stopped_early = true;
                break;
            }
            outcomes.push(executor.execute(spec).await);
        }

        Ok(WorkerRun {
            summary: WorkerSummary {
                id,
                assigned,
                dispatched: outcomes.len(),
                elapsed_s: started.elapsed().as_secs_f64(),
                stopped_early,
            },
            outcomes,
        })
    })
}
