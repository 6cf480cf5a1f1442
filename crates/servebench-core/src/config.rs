use crate::{Result, ServeBenchError};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Wire protocol spoken by the serving endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Backend {
    Vllm,
    #[serde(rename = "openai")]
    OpenAi,
    #[serde(rename = "openai-chat")]
    OpenAiChat,
    Tgi,
    Ollama,
    Dummy,
}

impl Backend {
    pub fn as_str(&self) -> &'static str {
        match self {
            Backend::Vllm => "vllm",
            Backend::OpenAi => "openai",
            Backend::OpenAiChat => "openai-chat",
            Backend::Tgi => "tgi",
            Backend::Ollama => "ollama",
            Backend::Dummy => "dummy",
        }
    }

    pub fn default_endpoint(&self) -> &'static str {
        match self {
            Backend::Vllm | Backend::OpenAi | Backend::Dummy => "/v1/completions",
            Backend::OpenAiChat => "/v1/chat/completions",
            Backend::Tgi => "/generate_stream",
            Backend::Ollama => "/api/chat",
        }
    }

    pub fn supports_beam_search(&self) -> bool {
        matches!(self, Backend::Vllm | Backend::Dummy)
    }

    /// Chat backends apply the model's chat template server-side.
    pub fn is_chat(&self) -> bool {
        matches!(self, Backend::OpenAiChat | Backend::Ollama)
    }

    pub fn all() -> &'static [Backend] {
        &[
            Backend::Vllm,
            Backend::OpenAi,
            Backend::OpenAiChat,
            Backend::Tgi,
            Backend::Ollama,
            Backend::Dummy,
        ]
    }
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for Backend {
    type Err = ServeBenchError;

    fn from_str(s: &str) -> Result<Self> {
        Backend::all()
            .iter()
            .copied()
            .find(|b| b.as_str() == s)
            .ok_or_else(|| {
                let known: Vec<_> = Backend::all().iter().map(|b| b.as_str()).collect();
                ServeBenchError::Config(format!(
                    "unknown backend '{}', expected one of: {}",
                    s,
                    known.join(", ")
                ))
            })
    }
}

/// Target arrival rate of the open-loop load.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RequestRate {
    /// Release every request at t=0.
    Infinite,
    PerSecond(f64),
}

impl RequestRate {
    pub fn per_second(rate: f64) -> Result<Self> {
        if rate == f64::INFINITY {
            return Ok(RequestRate::Infinite);
        }
        if !rate.is_finite() || rate <= 0.0 {
            return Err(ServeBenchError::Config(format!(
                "request rate must be 'inf' or a positive number, got {}",
                rate
            )));
        }
        Ok(RequestRate::PerSecond(rate))
    }

    pub fn is_infinite(&self) -> bool {
        matches!(self, RequestRate::Infinite)
    }
}

impl Default for RequestRate {
    fn default() -> Self {
        RequestRate::Infinite
    }
}

impl fmt::Display for RequestRate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequestRate::Infinite => f.write_str("inf"),
            // Always carries a fractional part, e.g. "4.0".
            RequestRate::PerSecond(r) => write!(f, "{:?}", r),
        }
    }
}

impl FromStr for RequestRate {
    type Err = ServeBenchError;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        if s.eq_ignore_ascii_case("inf") || s.eq_ignore_ascii_case("infinity") {
            return Ok(RequestRate::Infinite);
        }
        let rate: f64 = s.parse().map_err(|_| {
            ServeBenchError::Config(format!("invalid request rate '{}'", s))
        })?;
        RequestRate::per_second(rate)
    }
}

impl Serialize for RequestRate {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match self {
            RequestRate::Infinite => serializer.serialize_str("inf"),
            RequestRate::PerSecond(r) => serializer.serialize_f64(*r),
        }
    }
}

impl<'de> Deserialize<'de> for RequestRate {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Number(f64),
            Text(String),
        }

        let rate = match Raw::deserialize(deserializer)? {
            Raw::Number(r) => RequestRate::per_second(r),
            Raw::Text(s) => s.parse(),
        };
        rate.map_err(serde::de::Error::custom)
    }
}

/// Durations are carried as fractional seconds in config files and reports.
mod secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_f64(d.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(d)?;
        Duration::try_from_secs_f64(secs).map_err(serde::de::Error::custom)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransportConfig {
    pub api_url: String,
    pub model: String,
    #[serde(default, skip_serializing)]
    pub api_key: Option<String>,
    #[serde(with = "secs")]
    pub timeout: Duration,
}

impl TransportConfig {
    /// Matches the six hour ceiling used for long generation runs.
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(6 * 60 * 60);

    pub fn new(api_url: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            api_url: api_url.into(),
            model: model.into(),
            api_key: None,
            timeout: Self::DEFAULT_TIMEOUT,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PartitionConfig {
    pub threads: usize,
    /// Window over which worker start times are evenly staggered.
    #[serde(with = "secs")]
    pub ramp_up: Duration,
    /// Per-worker stop deadline; zero means unbounded.
    #[serde(with = "secs")]
    pub stop_after: Duration,
}

impl PartitionConfig {
    pub fn new(threads: usize) -> Self {
        Self {
            threads,
            ramp_up: Duration::ZERO,
            stop_after: Duration::ZERO,
        }
    }

    pub fn stop_deadline(&self) -> Option<Duration> {
        (!self.stop_after.is_zero()).then_some(self.stop_after)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum ConcurrencyMode {
    /// One scheduling context, every request in flight as its own task.
    Cooperative,
    /// Independent worker threads, each issuing its slice sequentially.
    Partitioned(PartitionConfig),
}

impl ConcurrencyMode {
    pub fn label(&self) -> &'static str {
        match self {
            ConcurrencyMode::Cooperative => "cooperative",
            ConcurrencyMode::Partitioned(_) => "partitioned",
        }
    }

    pub fn workers(&self) -> usize {
        match self {
            ConcurrencyMode::Cooperative => 1,
            ConcurrencyMode::Partitioned(p) => p.threads,
        }
    }
}

impl Default for ConcurrencyMode {
    fn default() -> Self {
        ConcurrencyMode::Cooperative
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunConfig {
    pub backend: Backend,
    pub transport: TransportConfig,
    #[serde(default)]
    pub request_rate: RequestRate,
    #[serde(default = "default_best_of")]
    pub best_of: u32,
    #[serde(default)]
    pub use_beam_search: bool,
    #[serde(default)]
    pub mode: ConcurrencyMode,
    #[serde(default)]
    pub seed: Option<u64>,
    #[serde(default)]
    pub show_progress: bool,
}

fn default_best_of() -> u32 {
    1
}

impl RunConfig {
    pub fn new(backend: Backend, transport: TransportConfig) -> Self {
        Self {
            backend,
            transport,
            request_rate: RequestRate::Infinite,
            best_of: default_best_of(),
            use_beam_search: false,
            mode: ConcurrencyMode::Cooperative,
            seed: None,
            show_progress: false,
        }
    }

    /// Rejects configurations that must never reach the load generator.
    pub fn validate(&self) -> Result<()> {
        if self.transport.model.trim().is_empty() {
            return Err(ServeBenchError::Config("model name must not be empty".into()));
        }
        if self.best_of == 0 {
            return Err(ServeBenchError::Config("best_of must be at least 1".into()));
        }
        if self.use_beam_search && !self.backend.supports_beam_search() {
            return Err(ServeBenchError::Config(format!(
                "backend '{}' does not support beam search",
                self.backend
            )));
        }
        if let RequestRate::PerSecond(rate) = self.request_rate {
            RequestRate::per_second(rate)?;
        }
        if let ConcurrencyMode::Partitioned(p) = &self.mode {
            if p.threads == 0 {
                return Err(ServeBenchError::Config(
                    "number of threads must be greater than 0".into(),
                ));
            }
        }
        Ok(())
    }
}
