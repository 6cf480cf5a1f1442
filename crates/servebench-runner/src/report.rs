use crate::aggregate::Aggregation;
use crate::strategy::WorkerSummary;
use serde::Serialize;
use serde_json::{json, Map, Value};
use servebench_core::{
    Backend, BenchmarkMetrics, ConcurrencyMode, LatencyStats, RequestOutcome, RequestRate,
    Result, RunConfig, ServeBenchError,
};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::info;

/// Parses `KEY=VALUE` items. Keys and values are trimmed; the value keeps any further `=`.
pub fn parse_metadata<S: AsRef<str>>(items: &[S]) -> Result<BTreeMap<String, String>> {
    items
        .iter()
        .map(|item| {
            let item = item.as_ref();
            item.split_once('=')
                .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
                .ok_or_else(|| {
                    ServeBenchError::Config(format!(
                        "invalid metadata '{}', expected KEY=VALUE",
                        item
                    ))
                })
        })
        .collect()
}

/// Describes the run that produced a report.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunMetadata {
    pub date: String,
    pub backend: Backend,
    pub model_id: String,
    pub tokenizer_id: String,
    pub best_of: u32,
    pub use_beam_search: bool,
    pub num_prompts: usize,
    pub request_rate: RequestRate,
    pub mode: ConcurrencyMode,
    /// User-supplied pairs, merged into the record verbatim.
    pub extra: BTreeMap<String, String>,
}

impl RunMetadata {
    pub fn new(config: &RunConfig, tokenizer_id: impl Into<String>, num_prompts: usize) -> Self {
        Self {
            date: chrono::Local::now().format("%Y%m%d-%H%M%S").to_string(),
            backend: config.backend,
            model_id: config.transport.model.clone(),
            tokenizer_id: tokenizer_id.into(),
            best_of: config.best_of,
            use_beam_search: config.use_beam_search,
            num_prompts,
            request_rate: config.request_rate,
            mode: config.mode.clone(),
            extra: BTreeMap::new(),
        }
    }

    pub fn with_extra(mut self, extra: BTreeMap<String, String>) -> Self {
        self.extra = extra;
        self
    }
}

/// Everything a finished run reports: metadata, metrics and per-request samples.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BenchmarkReport {
    pub metadata: RunMetadata,
    pub metrics: BenchmarkMetrics,
    pub input_lens: Vec<usize>,
    pub output_lens: Vec<usize>,
    /// Seconds; `None` for failed requests.
    pub ttfts: Vec<Option<f64>>,
    /// Seconds.
    pub itls: Vec<Vec<f64>>,
    pub generated_texts: Vec<String>,
    /// Empty for successful requests.
    pub errors: Vec<String>,
    pub workers: Vec<WorkerSummary>,
}

impl BenchmarkReport {
    pub fn assemble(
        metadata: RunMetadata,
        aggregation: Aggregation,
        outcomes: &[RequestOutcome],
        workers: Vec<WorkerSummary>,
    ) -> Self {
        Self {
            metadata,
            metrics: aggregation.metrics,
            input_lens: outcomes.iter().map(|o| o.prompt_len()).collect(),
            output_lens: aggregation.output_lens,
            ttfts: outcomes
                .iter()
                .map(|o| o.ttft().map(|t| t.as_secs_f64()))
                .collect(),
            itls: outcomes
                .iter()
                .map(|o| {
                    o.inter_token_latencies()
                        .iter()
                        .map(|d| d.as_secs_f64())
                        .collect()
                })
                .collect(),
            generated_texts: outcomes
                .iter()
                .map(|o| o.generated_text().to_string())
                .collect(),
            errors: outcomes
                .iter()
                .map(|o| o.error().unwrap_or_default().to_string())
                .collect(),
            workers,
        }
    }

    /// The flat JSON record written to disk.
    pub fn to_record(&self) -> Result<Value> {
        let meta = &self.metadata;
        let m = &self.metrics;
        let mut record = Map::new();

        record.insert("date".into(), json!(meta.date));
        record.insert("backend".into(), json!(meta.backend));
        record.insert("model_id".into(), json!(meta.model_id));
        record.insert("tokenizer_id".into(), json!(meta.tokenizer_id));
        record.insert("best_of".into(), json!(meta.best_of));
        record.insert("use_beam_search".into(), json!(meta.use_beam_search));
        record.insert("num_prompts".into(), json!(meta.num_prompts));
        record.insert("request_rate".into(), serde_json::to_value(meta.request_rate)?);
        record.insert("concurrency".into(), serde_json::to_value(&meta.mode)?);
        for (key, value) in &meta.extra {
            record.insert(key.clone(), json!(value));
        }

        record.insert("duration".into(), json!(m.duration_s));
        record.insert("completed".into(), json!(m.completed));
        record.insert("dispatched".into(), json!(m.dispatched));
        record.insert("successful_rate".into(), json!(m.successful_rate));
        record.insert("total_input_tokens".into(), json!(m.total_input));
        record.insert("total_output_tokens".into(), json!(m.total_output));
        record.insert("request_throughput".into(), json!(m.request_throughput));
        record.insert("input_throughput".into(), json!(m.input_throughput));
        record.insert("output_throughput".into(), json!(m.output_throughput));
        for (name, stats) in m.distributions() {
            for (stat, value) in stat_fields(stats) {
                record.insert(format!("{}_{}_ms", stat, name), json!(value));
            }
        }

        record.insert("input_lens".into(), json!(self.input_lens));
        record.insert("output_lens".into(), json!(self.output_lens));
        record.insert("ttfts".into(), json!(self.ttfts));
        record.insert("itls".into(), json!(self.itls));
        record.insert("generated_texts".into(), json!(self.generated_texts));
        record.insert("errors".into(), json!(self.errors));
        if !self.workers.is_empty() {
            record.insert("workers".into(), serde_json::to_value(&self.workers)?);
        }

        Ok(Value::Object(record))
    }

    /// `{backend}-{rate}qps-{model basename}-{date}.json`
    pub fn file_name(&self) -> String {
        let meta = &self.metadata;
        let model = meta.model_id.rsplit('/').next().unwrap_or(&meta.model_id);
        format!(
            "{}-{}qps-{}-{}.json",
            meta.backend, meta.request_rate, model, meta.date
        )
    }

    /// Writes the record under `dir` (or the working directory) and returns the path.
    pub fn save(&self, dir: Option<&Path>) -> Result<PathBuf> {
        let path = match dir {
            Some(dir) => {
                std::fs::create_dir_all(dir)?;
                dir.join(self.file_name())
            }
            None => PathBuf::from(self.file_name()),
        };
        let json = serde_json::to_string(&self.to_record()?)?;
        std::fs::write(&path, json)?;
        info!(path = %path.display(), "Saved benchmark result");
        Ok(path)
    }

    /// Rate, throughputs, then min/max/mean/median/p90/p99 of TTFT, TPOT and TPR.
    pub fn csv_line(&self) -> String {
        let m = &self.metrics;
        let mut fields = vec![
            m.successful_rate.to_string(),
            m.request_throughput.to_string(),
            m.input_throughput.to_string(),
            m.output_throughput.to_string(),
        ];
        for (_, stats) in m.distributions() {
            for (_, value) in stat_fields(stats) {
                fields.push(value.map_or_else(|| "NaN".to_string(), |v| v.to_string()));
            }
        }
        fields.join(",")
    }
}

fn stat_fields(stats: Option<LatencyStats>) -> [(&'static str, Option<f64>); 6] {
    [
        ("min", stats.map(|s| s.min_ms)),
        ("max", stats.map(|s| s.max_ms)),
        ("mean", stats.map(|s| s.mean_ms)),
        ("median", stats.map(|s| s.median_ms)),
        ("p90", stats.map(|s| s.p90_ms)),
        ("p99", stats.map(|s| s.p99_ms)),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::calculate_metrics;
    use servebench_core::{RequestSpec, TransportConfig, WhitespaceTokenizer};
    use std::time::Duration;
    use tempfile::tempdir;

    fn config() -> RunConfig {
        let mut config = RunConfig::new(
            Backend::Vllm,
            TransportConfig::new("http://h/v1/completions", "meta-llama/Llama-2-7b-hf"),
        );
        config.request_rate = RequestRate::PerSecond(4.0);
        config
    }

    fn report() -> BenchmarkReport {
        let outcomes = vec![
            RequestOutcome::success(
                6,
                Duration::from_millis(100),
                Duration::from_millis(400),
                vec![Duration::from_millis(150), Duration::from_millis(150)],
                "a b c".into(),
            ),
            RequestOutcome::failure(9, "HTTP error: 500"),
        ];
        let requests = vec![RequestSpec::new("x", 6, 3), RequestSpec::new("y", 9, 3)];
        let agg = calculate_metrics(&requests, &outcomes, Duration::from_secs(1), &WhitespaceTokenizer);

        let mut extra = BTreeMap::new();
        extra.insert("gpu".to_string(), "A100".to_string());
        let metadata = RunMetadata::new(&config(), "whitespace", 2).with_extra(extra);
        BenchmarkReport::assemble(metadata, agg, &outcomes, Vec::new())
    }

    #[test]
    fn test_parse_metadata() {
        let parsed = parse_metadata(&["gpu = A100", "note=a=b"]).unwrap();
        assert_eq!(parsed["gpu"], "A100");
        assert_eq!(parsed["note"], "a=b");

        let err = parse_metadata(&["novalue"]).unwrap_err();
        assert!(matches!(err, ServeBenchError::Config(_)));
    }

    #[test]
    fn test_per_request_arrays_line_up() {
        let report = report();
        assert_eq!(report.input_lens, vec![6, 9]);
        assert_eq!(report.output_lens, vec![3, 0]);
        assert_eq!(report.ttfts, vec![Some(0.1), None]);
        assert_eq!(report.itls, vec![vec![0.15, 0.15], vec![]]);
        assert_eq!(report.generated_texts, vec!["a b c".to_string(), String::new()]);
        assert_eq!(report.errors, vec![String::new(), "HTTP error: 500".to_string()]);
    }

    #[test]
    fn test_record_is_flat() {
        let record = report().to_record().unwrap();
        assert_eq!(record["backend"], "vllm");
        assert_eq!(record["model_id"], "meta-llama/Llama-2-7b-hf");
        assert_eq!(record["request_rate"], 4.0);
        assert_eq!(record["gpu"], "A100");
        assert_eq!(record["completed"], 1);
        assert_eq!(record["successful_rate"], 0.5);
        assert_eq!(record["mean_ttft_ms"], 100.0);
        assert_eq!(record["concurrency"]["mode"], "cooperative");
        assert!(record["ttfts"][1].is_null());
        assert!(record.get("workers").is_none());
    }

    #[test]
    fn test_file_name_uses_model_basename() {
        let report = report();
        let name = report.file_name();
        assert_eq!(
            name,
            format!("vllm-4.0qps-Llama-2-7b-hf-{}.json", report.metadata.date)
        );
    }

    #[test]
    fn test_save_writes_record() {
        let dir = tempdir().unwrap();
        let report = report();
        let path = report.save(Some(&dir.path().join("results"))).unwrap();

        let saved: Value = serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(saved, report.to_record().unwrap());
    }

    #[test]
    fn test_csv_marks_unavailable_as_nan() {
        let outcomes = vec![RequestOutcome::failure(3, "refused")];
        let requests = vec![RequestSpec::new("x", 3, 3)];
        let agg = calculate_metrics(&requests, &outcomes, Duration::from_secs(1), &WhitespaceTokenizer);
        let metadata = RunMetadata::new(&config(), "whitespace", 1);
        let report = BenchmarkReport::assemble(metadata, agg, &outcomes, Vec::new());

        let fields: Vec<_> = report.csv_line().split(',').map(str::to_string).collect();
        assert_eq!(fields.len(), 22);
        assert_eq!(fields[0], "0");
        assert!(fields[4..].iter().all(|f| f == "NaN"));
    }
}
