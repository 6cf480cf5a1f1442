use servebench_core::{BenchmarkMetrics, LatencyStats, RequestOutcome, RequestSpec, Tokenizer};
use std::time::Duration;
use tracing::{debug, warn};

/// Metrics for a run plus the per-outcome generated token counts they were built from.
#[derive(Debug, Clone, PartialEq)]
pub struct Aggregation {
    pub metrics: BenchmarkMetrics,
    /// Parallel to the outcomes; zero for failures.
    pub output_lens: Vec<usize>,
}

/// Reduces a run's outcomes to throughput and latency distributions.
///
/// Never fails: tokenizer errors count as zero output tokens and empty
/// distributions come back as `None`.
pub fn calculate_metrics(
    requests: &[RequestSpec],
    outcomes: &[RequestOutcome],
    duration: Duration,
    tokenizer: &dyn Tokenizer,
) -> Aggregation {
    if outcomes.len() < requests.len() {
        debug!(
            dropped = requests.len() - outcomes.len(),
            "Some requests were never dispatched"
        );
    }

    let mut completed = 0;
    let mut total_input = 0;
    let mut total_output = 0;
    let mut output_lens = Vec::with_capacity(outcomes.len());
    let mut ttfts = Vec::new();
    let mut tpots = Vec::new();
    let mut tprs = Vec::new();

    for outcome in outcomes {
        let (Some(latency), Some(ttft)) = (outcome.latency(), outcome.ttft()) else {
            output_lens.push(0);
            continue;
        };

        let output_len = tokenizer
            .count_tokens(outcome.generated_text())
            .unwrap_or_else(|e| {
                warn!(error = %e, "Failed to count generated tokens");
                0
            });

        completed += 1;
        total_input += outcome.prompt_len();
        total_output += output_len;
        output_lens.push(output_len);

        ttfts.push(ttft.as_secs_f64());
        tprs.push(latency.as_secs_f64());
        if output_len > 1 {
            tpots.push((latency - ttft).as_secs_f64() / (output_len - 1) as f64);
        }
    }

    let duration_s = duration.as_secs_f64();
    let per_second = |n: usize| if duration_s > 0.0 { n as f64 / duration_s } else { 0.0 };
    let successful_rate = if outcomes.is_empty() {
        0.0
    } else {
        completed as f64 / outcomes.len() as f64
    };

    let metrics = BenchmarkMetrics {
        completed,
        dispatched: outcomes.len(),
        successful_rate,
        total_input,
        total_output,
        duration_s,
        request_throughput: per_second(completed),
        input_throughput: per_second(total_input),
        output_throughput: per_second(total_output),
        ttft: LatencyStats::from_secs(&ttfts),
        tpot: LatencyStats::from_secs(&tpots),
        tpr: LatencyStats::from_secs(&tprs),
    };

    Aggregation {
        metrics,
        output_lens,
    }
}
