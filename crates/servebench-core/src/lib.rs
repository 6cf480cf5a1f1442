pub mod config;
pub mod error;
pub mod metrics;
pub mod request;
pub mod tokenizer;

pub use config::{
    Backend, ConcurrencyMode, PartitionConfig, RequestRate, RunConfig, TransportConfig,
};
pub use error::{Result, ServeBenchError};
pub use metrics::{percentile, BenchmarkMetrics, LatencyStats};
pub use request::{Completion, Failure, RequestOutcome, RequestSpec};
pub use tokenizer::{Tokenizer, WhitespaceTokenizer};
