mod tokenizer;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use servebench_core::{
    Backend, ConcurrencyMode, LatencyStats, PartitionConfig, RequestRate, RequestSpec, RunConfig,
    Tokenizer, TransportConfig, WhitespaceTokenizer,
};
use servebench_runner::{
    parse_metadata, BenchmarkReport, BenchmarkRunner, ChatTemplate, RunMetadata, Sampler,
    ShareGptSampler, SonnetSampler,
};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokenizer::HfTokenizer;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

const DEFAULT_OLLAMA_HOST: &str = "http://localhost:11434";

#[derive(Parser)]
#[command(name = "servebench")]
#[command(about = "servebench - open-loop load generator for LLM serving endpoints", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a serving benchmark
    Run(RunArgs),

    /// List supported backends and their default endpoints
    Backends,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum DatasetName {
    Sharegpt,
    Sonnet,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Mode {
    /// One scheduler, every request its own task
    Cooperative,
    /// Independent worker threads over disjoint slices of the pool
    Partitioned,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum OutputFormat {
    Table,
    Json,
    Csv,
}

#[derive(clap::Args, Debug)]
struct RunArgs {
    /// Serving backend wire protocol
    #[arg(long, default_value = "vllm")]
    backend: Backend,

    /// Server base URL; overrides --host and --port
    #[arg(long)]
    base_url: Option<String>,

    #[arg(long, default_value = "localhost")]
    host: String,

    #[arg(long, default_value = "8000")]
    port: u16,

    /// API endpoint; defaults to the backend's standard path
    #[arg(long)]
    endpoint: Option<String>,

    /// Model name sent to the server
    #[arg(short, long)]
    model: String,

    /// Path to a tokenizer.json; whitespace word counts are used without one
    #[arg(long)]
    tokenizer: Option<PathBuf>,

    #[arg(long, value_enum, default_value = "sharegpt")]
    dataset_name: DatasetName,

    #[arg(long)]
    dataset_path: PathBuf,

    /// Prompts to send (per worker in partitioned mode)
    #[arg(short, long, default_value = "1000")]
    num_prompts: usize,

    /// Override the recorded completion length of ShareGPT requests
    #[arg(long)]
    sharegpt_output_len: Option<usize>,

    #[arg(long, default_value_t = SonnetSampler::DEFAULT_INPUT_LEN)]
    sonnet_input_len: usize,

    #[arg(long, default_value_t = SonnetSampler::DEFAULT_OUTPUT_LEN)]
    sonnet_output_len: usize,

    #[arg(long, default_value_t = SonnetSampler::DEFAULT_PREFIX_LEN)]
    sonnet_prefix_len: usize,

    /// File with a {prompt} placeholder, used to format sonnet prompts
    #[arg(long)]
    chat_template: Option<PathBuf>,

    /// Requests per second, or "inf" to send everything at once
    #[arg(long, default_value = "inf")]
    request_rate: RequestRate,

    #[arg(long)]
    seed: Option<u64>,

    #[arg(long, default_value = "1")]
    best_of: u32,

    #[arg(long)]
    use_beam_search: bool,

    #[arg(long, value_enum, default_value = "cooperative")]
    mode: Mode,

    /// Worker threads in partitioned mode
    #[arg(long, default_value = "1")]
    num_threads: usize,

    /// Seconds over which worker starts are staggered
    #[arg(long, default_value = "0")]
    ramp_up_time: f64,

    /// Seconds after which each worker stops releasing requests; 0 disables
    #[arg(long, default_value = "0")]
    stop_time: f64,

    /// Per-request timeout in seconds
    #[arg(long)]
    timeout: Option<f64>,

    #[arg(long)]
    disable_progress: bool,

    /// Write the result record to a JSON file
    #[arg(long)]
    save_result: bool,

    #[arg(long)]
    result_dir: Option<PathBuf>,

    /// KEY=VALUE pairs added to the result record
    #[arg(long, num_args = 1..)]
    metadata: Vec<String>,

    /// Output format (table, json, csv)
    #[arg(short, long, value_enum, default_value = "table")]
    output: OutputFormat,
}

// Cooperative runs interleave on this one thread; partitioned workers bring
// their own runtimes.
#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run(args) => cmd_run(args).await?,
        Commands::Backends => cmd_backends(),
    }

    Ok(())
}

fn cmd_backends() {
    println!();
    println!("Supported Backends:");
    println!("{:-<60}", "");
    println!("  {:<14} {:<26} {}", "Name", "Endpoint", "Beam search");
    println!("{:-<60}", "");
    for backend in Backend::all() {
        let beam = if backend.supports_beam_search() { "yes" } else { "-" };
        println!("  {:<14} {:<26} {}", backend, backend.default_endpoint(), beam);
    }
    println!();
}

async fn cmd_run(args: RunArgs) -> Result<()> {
    let extra = parse_metadata(args.metadata.as_slice())?;
    let config = build_config(&args)?;
    let runner = BenchmarkRunner::new(config)?;

    let tokenizer = load_tokenizer(args.tokenizer.as_deref())?;
    let requested = match &runner.config().mode {
        ConcurrencyMode::Partitioned(p) => args.num_prompts * p.threads,
        ConcurrencyMode::Cooperative => args.num_prompts,
    };
    let requests = sample_requests(&args, requested, tokenizer.as_ref())?;
    if requests.is_empty() {
        bail!("dataset produced no usable requests");
    }

    println!();
    println!("Running benchmark...");
    println!("  Backend: {}", runner.config().backend);
    println!("  URL: {}", runner.config().transport.api_url);
    println!("  Model: {}", runner.config().transport.model);
    println!("  Request rate: {}", runner.config().request_rate);
    println!("  Mode: {}", runner.config().mode.label());
    println!("  Requests: {}", requests.len());
    println!();

    let run = runner.run(requests, tokenizer.as_ref()).await?;

    let metadata = RunMetadata::new(runner.config(), tokenizer.id(), args.num_prompts).with_extra(extra);
    let report = BenchmarkReport::assemble(metadata, run.aggregation, &run.outcomes, run.workers);

    match args.output {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&report.to_record()?)?),
        OutputFormat::Csv => println!("{}", report.csv_line()),
        OutputFormat::Table => {
            print_table(&report);
            println!("CSV format output: {}", report.csv_line());
        }
    }

    if args.save_result {
        let path = report.save(args.result_dir.as_deref())?;
        println!("Saved result to {}", path.display());
    }
    println!();

    Ok(())
}

fn build_config(args: &RunArgs) -> Result<RunConfig> {
    let mut transport = TransportConfig::new(api_url(args), args.model.clone());
    if let Some(timeout) = args.timeout {
        transport.timeout = Duration::try_from_secs_f64(timeout).context("invalid --timeout")?;
    }
    if matches!(
        args.backend,
        Backend::Vllm | Backend::OpenAi | Backend::OpenAiChat
    ) {
        transport.api_key = std::env::var("OPENAI_API_KEY").ok();
    }

    let mut config = RunConfig::new(args.backend, transport);
    config.request_rate = args.request_rate;
    config.best_of = args.best_of;
    config.use_beam_search = args.use_beam_search;
    config.seed = args.seed;
    config.show_progress = !args.disable_progress;
    config.mode = match args.mode {
        Mode::Cooperative => ConcurrencyMode::Cooperative,
        Mode::Partitioned => {
            let mut partition = PartitionConfig::new(args.num_threads);
            partition.ramp_up =
                Duration::try_from_secs_f64(args.ramp_up_time).context("invalid --ramp-up-time")?;
            partition.stop_after =
                Duration::try_from_secs_f64(args.stop_time).context("invalid --stop-time")?;
            ConcurrencyMode::Partitioned(partition)
        }
    };
    Ok(config)
}

fn api_url(args: &RunArgs) -> String {
    let endpoint = args
        .endpoint
        .as_deref()
        .unwrap_or_else(|| args.backend.default_endpoint());

    match (&args.base_url, args.backend) {
        (Some(base), _) => format!("{}{}", base.trim_end_matches('/'), endpoint),
        (None, Backend::Ollama) => {
            let host = std::env::var("OLLAMA_HOST").unwrap_or_else(|_| DEFAULT_OLLAMA_HOST.to_string());
            format!("{}{}", host.trim_end_matches('/'), endpoint)
        }
        (None, _) => format!("http://{}:{}{}", args.host, args.port, endpoint),
    }
}

fn load_tokenizer(path: Option<&Path>) -> Result<Box<dyn Tokenizer>> {
    match path {
        Some(path) => {
            let tokenizer = HfTokenizer::from_file(path)?;
            info!(tokenizer = tokenizer.id(), "Loaded tokenizer");
            Ok(Box::new(tokenizer))
        }
        None => {
            warn!("No --tokenizer given, counting whitespace-separated words as tokens");
            Ok(Box::new(WhitespaceTokenizer))
        }
    }
}

fn sample_requests(
    args: &RunArgs,
    count: usize,
    tokenizer: &dyn Tokenizer,
) -> Result<Vec<RequestSpec>> {
    let sampler: Box<dyn Sampler> = match args.dataset_name {
        DatasetName::Sharegpt => {
            let mut sampler = ShareGptSampler::new(&args.dataset_path);
            if let Some(len) = args.sharegpt_output_len {
                sampler = sampler.with_output_len(len)?;
            }
            Box::new(sampler)
        }
        DatasetName::Sonnet => {
            let template = args
                .chat_template
                .as_deref()
                .map(ChatTemplate::from_file)
                .transpose()?;
            let sampler = SonnetSampler::new(&args.dataset_path, template, args.backend.is_chat())?
                .with_lengths(
                    args.sonnet_input_len,
                    args.sonnet_output_len,
                    args.sonnet_prefix_len,
                );
            Box::new(sampler)
        }
    };

    info!(dataset = sampler.name(), count, "Sampling requests");
    Ok(sampler.sample(count, tokenizer, args.seed)?)
}

fn print_table(report: &BenchmarkReport) {
    let m = &report.metrics;

    println!("{:=^50}", " Serving Benchmark Result ");
    println!("{:<40} {:<10}", "Successful requests:", m.completed);
    println!("{:<40} {:<10.2}", "Successful rate:", m.successful_rate);
    println!("{:<40} {:<10.2}", "Benchmark duration (s):", m.duration_s);
    println!("{:<40} {:<10}", "Total input tokens:", m.total_input);
    println!("{:<40} {:<10}", "Total generated tokens:", m.total_output);
    println!("{:<40} {:<10.2}", "Request throughput (req/s):", m.request_throughput);
    println!("{:<40} {:<10.2}", "Input token throughput (tok/s):", m.input_throughput);
    println!("{:<40} {:<10.2}", "Output token throughput (tok/s):", m.output_throughput);

    print_distribution("Time to First Token", "TTFT", m.ttft);
    print_distribution("Time per Output Token (excl. 1st token)", "TPOT", m.tpot);
    print_distribution("Time per Request", "TPR", m.tpr);

    if !report.workers.is_empty() {
        println!("{:-^50}", "Workers");
        for w in &report.workers {
            let stopped = if w.stopped_early { " (stopped early)" } else { "" };
            println!(
                "  worker {:<3} {:>5}/{:<5} requests in {:.2}s{}",
                w.id, w.dispatched, w.assigned, w.elapsed_s, stopped
            );
        }
    }
    println!("{:=<50}", "");
}

fn print_distribution(title: &str, short: &str, stats: Option<LatencyStats>) {
    println!("{:-^50}", title);
    let Some(s) = stats else {
        println!("{:<40} {:<10}", format!("{} (ms):", short), "unavailable");
        return;
    };
    for (label, value) in [
        ("Min", s.min_ms),
        ("Max", s.max_ms),
        ("Mean", s.mean_ms),
        ("Median", s.median_ms),
        ("P90", s.p90_ms),
        ("P99", s.p99_ms),
    ] {
        println!("{:<40} {:<10.2}", format!("{} {} (ms):", label, short), value);
    }
}
