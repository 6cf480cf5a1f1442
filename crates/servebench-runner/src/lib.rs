pub mod aggregate;
pub mod dataset;
pub mod executor;
pub mod report;
pub mod runner;
pub mod scheduler;
pub mod strategy;
pub mod transport;

pub use aggregate::{calculate_metrics, Aggregation};
pub use dataset::{ChatTemplate, Sampler, ShareGptSampler, SonnetSampler};
pub use executor::RequestExecutor;
pub use report::{parse_metadata, BenchmarkReport, RunMetadata};
pub use runner::{BenchmarkRun, BenchmarkRunner};
pub use scheduler::ArrivalScheduler;
pub use strategy::{
    partition, strategy_for, CooperativeStrategy, LoadStrategy, PartitionedStrategy, RunOutput,
    WorkerPartition, WorkerSummary,
};
pub use transport::{build_transport, Chunk, ChunkStream, Transport};
