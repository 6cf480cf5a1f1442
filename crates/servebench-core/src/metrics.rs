use serde::{Deserialize, Serialize};

/// Summary of one latency distribution, in milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LatencyStats {
    pub min_ms: f64,
    pub max_ms: f64,
    pub mean_ms: f64,
    pub median_ms: f64,
    pub p90_ms: f64,
    pub p99_ms: f64,
}

impl LatencyStats {
    /// Builds the summary from samples in seconds. `None` when there are no samples.
    pub fn from_secs(samples: &[f64]) -> Option<Self> {
        let mut sorted: Vec<f64> = samples.iter().map(|s| s * 1000.0).collect();
        sorted.sort_by(|a, b| a.total_cmp(b));

        let (&min_ms, &max_ms) = (sorted.first()?, sorted.last()?);
        let mean_ms = sorted.iter().sum::<f64>() / sorted.len() as f64;

        Some(Self {
            min_ms,
            max_ms,
            mean_ms,
            median_ms: percentile(&sorted, 50.0)?,
            p90_ms: percentile(&sorted, 90.0)?,
            p99_ms: percentile(&sorted, 99.0)?,
        })
    }
}

/// Linear-interpolated percentile of an ascending slice, `p` in `[0, 100]`.
pub fn percentile(sorted: &[f64], p: f64) -> Option<f64> {
    if sorted.is_empty() {
        return None;
    }
    let rank = (p.clamp(0.0, 100.0) / 100.0) * (sorted.len() - 1) as f64;
    let lower = rank.floor() as usize;
    let upper = rank.ceil() as usize;
    let frac = rank - lower as f64;
    Some(sorted[lower] + (sorted[upper] - sorted[lower]) * frac)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BenchmarkMetrics {
    pub completed: usize,
    pub dispatched: usize,
    pub successful_rate: f64,
    pub total_input: usize,
    pub total_output: usize,
    pub duration_s: f64,
    pub request_throughput: f64,
    pub input_throughput: f64,
    pub output_throughput: f64,
    /// Time to first token. `None` when no request reported one.
    pub ttft: Option<LatencyStats>,
    /// Time per output token, excluding the first.
    pub tpot: Option<LatencyStats>,
    /// Time per request.
    pub tpr: Option<LatencyStats>,
}

impl BenchmarkMetrics {
    pub fn mean_ttft_ms(&self) -> Option<f64> {
        self.ttft.map(|s| s.mean_ms)
    }

    pub fn mean_tpot_ms(&self) -> Option<f64> {
        self.tpot.map(|s| s.mean_ms)
    }

    pub fn mean_tpr_ms(&self) -> Option<f64> {
        self.tpr.map(|s| s.mean_ms)
    }

    /// Distributions in report order, paired with their short names.
    pub fn distributions(&self) -> [(&'static str, Option<LatencyStats>); 3] {
        [("ttft", self.ttft), ("tpot", self.tpot), ("tpr", self.tpr)]
    }
}
