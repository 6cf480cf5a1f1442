use serde::{Deserialize, Serialize};
use std::time::Duration;

/// One prompt drawn from a dataset, ready to be dispatched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestSpec {
    pub prompt: String,
    pub prompt_len: usize,
    pub output_len: usize,
    pub best_of: u32,
    pub use_beam_search: bool,
}

impl RequestSpec {
    pub fn new(prompt: impl Into<String>, prompt_len: usize, output_len: usize) -> Self {
        Self {
            prompt: prompt.into(),
            prompt_len,
            output_len,
            best_of: 1,
            use_beam_search: false,
        }
    }

    pub fn with_sampling(mut self, best_of: u32, use_beam_search: bool) -> Self {
        self.best_of = best_of;
        self.use_beam_search = use_beam_search;
        self
    }
}

/// Timings and text of a request that ran to completion.
#[derive(Debug, Clone, PartialEq)]
pub struct Completion {
    prompt_len: usize,
    latency: Duration,
    ttft: Duration,
    inter_token_latencies: Vec<Duration>,
    generated_text: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Failure {
    prompt_len: usize,
    error: String,
}

/// Result of dispatching exactly one request.
///
/// Failures carry no timings and no text; successes always satisfy
/// `latency >= ttft`.
#[derive(Debug, Clone, PartialEq)]
pub enum RequestOutcome {
    Success(Completion),
    Failure(Failure),
}

impl RequestOutcome {
    pub fn success(
        prompt_len: usize,
        ttft: Duration,
        latency: Duration,
        inter_token_latencies: Vec<Duration>,
        generated_text: String,
    ) -> Self {
        RequestOutcome::Success(Completion {
            prompt_len,
            latency,
            ttft: ttft.min(latency),
            inter_token_latencies,
            generated_text,
        })
    }

    pub fn failure(prompt_len: usize, error: impl Into<String>) -> Self {
        RequestOutcome::Failure(Failure {
            prompt_len,
            error: error.into(),
        })
    }

    pub fn is_success(&self) -> bool {
        matches!(self, RequestOutcome::Success(_))
    }

    pub fn prompt_len(&self) -> usize {
        match self {
            RequestOutcome::Success(c) => c.prompt_len,
            RequestOutcome::Failure(f) => f.prompt_len,
        }
    }

    pub fn latency(&self) -> Option<Duration> {
        match self {
            RequestOutcome::Success(c) => Some(c.latency),
            RequestOutcome::Failure(_) => None,
        }
    }

    pub fn ttft(&self) -> Option<Duration> {
        match self {
            RequestOutcome::Success(c) => Some(c.ttft),
            RequestOutcome::Failure(_) => None,
        }
    }

    pub fn inter_token_latencies(&self) -> &[Duration] {
        match self {
            RequestOutcome::Success(c) => &c.inter_token_latencies,
            RequestOutcome::Failure(_) => &[],
        }
    }

    pub fn generated_text(&self) -> &str {
        match self {
            RequestOutcome::Success(c) => &c.generated_text,
            RequestOutcome::Failure(_) => "",
        }
    }

    pub fn error(&self) -> Option<&str> {
        match self {
            RequestOutcome::Success(_) => None,
            RequestOutcome::Failure(f) => Some(&f.error),
        }
    }
}
