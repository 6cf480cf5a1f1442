use crate::transport::Transport;
use futures::StreamExt;
use indicatif::ProgressBar;
use servebench_core::{Backend, RequestOutcome, RequestSpec, Result, ServeBenchError};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Issues single requests and turns whatever happens into a [`RequestOutcome`].
pub struct RequestExecutor {
    transport: Box<dyn Transport>,
    progress: Option<ProgressBar>,
}

struct StreamTiming {
    ttft: Duration,
    latency: Duration,
    itl: Vec<Duration>,
    text: String,
}

impl RequestExecutor {
    pub fn new(transport: Box<dyn Transport>) -> Self {
        Self {
            transport,
            progress: None,
        }
    }

    pub fn with_progress(mut self, bar: ProgressBar) -> Self {
        self.progress = Some(bar);
        self
    }

    /// A copy with its own transport and no progress bar, for use on another runtime.
    pub fn fork(&self) -> Result<Self> {
        Ok(Self::new(self.transport.fork()?))
    }

    pub fn backend(&self) -> Backend {
        self.transport.backend()
    }

    /// Runs one request to completion or failure. Never returns an error.
    pub async fn execute(&self, spec: RequestSpec) -> RequestOutcome {
        let start = Instant::now();
        let outcome = match self.stream(&spec, start).await {
            Ok(t) => {
                debug!(
                    ttft_ms = t.ttft.as_secs_f64() * 1000.0,
                    latency_ms = t.latency.as_secs_f64() * 1000.0,
                    chunks = t.itl.len() + 1,
                    "Request completed"
                );
                RequestOutcome::success(spec.prompt_len, t.ttft, t.latency, t.itl, t.text)
            }
            Err(e) => {
                warn!(error = %e, prompt_len = spec.prompt_len, "Request failed");
                RequestOutcome::failure(spec.prompt_len, e.to_string())
            }
        };

        if let Some(bar) = &self.progress {
            bar.inc(1);
        }
        outcome
    }

    async fn stream(&self, spec: &RequestSpec, start: Instant) -> Result<StreamTiming> {
        let mut chunks = self.transport.send(spec).await?;

        let mut ttft = None;
        let mut last = start;
        let mut itl = Vec::new();
        let mut text = String::new();

        while let Some(chunk) = chunks.next().await {
            let chunk = chunk?;
            if chunk.text.is_empty() {
                continue;
            }
            match ttft {
                None => ttft = Some(chunk.at.saturating_duration_since(start)),
                Some(_) => itl.push(chunk.at.saturating_duration_since(last)),
            }
            last = chunk.at;
            text.push_str(&chunk.text);
        }
        let latency = start.elapsed();

        let ttft = ttft.ok_or_else(|| ServeBenchError::Stream("no tokens received".into()))?;
        Ok(StreamTiming {
            ttft,
            latency,
            itl,
            text,
        })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::transport::{Chunk, ChunkStream};
    use async_trait::async_trait;

    /// Plays back a fixed script of `(delay before chunk, chunk text)` pairs.
    #[derive(Clone)]
    pub(crate) struct ScriptedTransport {
        pub(crate) script: Vec<(Duration, Option<&'static str>)>,
        pub(crate) connect_error: bool,
    }

    impl ScriptedTransport {
        pub(crate) fn new(script: Vec<(u64, &'static str)>) -> Self {
            Self {
                script: script
                    .into_iter()
                    .map(|(ms, t)| (Duration::from_millis(ms), Some(t)))
                    .collect(),
                connect_error: false,
            }
        }
    }

    #[async_trait]
    impl Transport for ScriptedTransport {
        fn backend(&self) -> Backend {
            Backend::Dummy
        }

        async fn send(&self, _request: &RequestSpec) -> Result<ChunkStream> {
            if self.connect_error {
                return Err(ServeBenchError::Transport("connection refused".into()));
            }
            let script = self.script.clone().into_iter();
            let stream = futures::stream::unfold(script, |mut script| async move {
                let (delay, text) = script.next()?;
                tokio::time::sleep(delay).await;
                let item = match text {
                    Some(t) => Ok(Chunk::now(t)),
                    None => Err(ServeBenchError::Stream("connection reset".into())),
                };
                Some((item, script))
            });
            Ok(Box::pin(stream))
        }

        fn fork(&self) -> Result<Box<dyn Transport>> {
            Ok(Box::new(self.clone()))
        }
    }

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    #[tokio::test(start_paused = true)]
    async fn test_captures_ttft_and_inter_token_gaps() {
        let transport = ScriptedTransport::new(vec![(100, "Hello"), (20, " big"), (30, " world")]);
        let executor = RequestExecutor::new(Box::new(transport));

        let outcome = executor.execute(RequestSpec::new("hi", 7, 3)).await;
        assert!(outcome.is_success());
        assert_eq!(outcome.ttft(), Some(ms(100)));
        assert_eq!(outcome.inter_token_latencies(), &[ms(20), ms(30)]);
        assert_eq!(outcome.latency(), Some(ms(150)));
        assert_eq!(outcome.generated_text(), "Hello big world");
        assert_eq!(outcome.prompt_len(), 7);
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_chunks_do_not_count_as_tokens() {
        let transport = ScriptedTransport::new(vec![(10, ""), (40, "a"), (5, ""), (15, "b")]);
        let executor = RequestExecutor::new(Box::new(transport));

        let outcome = executor.execute(RequestSpec::new("hi", 1, 2)).await;
        assert_eq!(outcome.ttft(), Some(ms(50)));
        assert_eq!(outcome.inter_token_latencies(), &[ms(20)]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_failure_becomes_outcome() {
        let mut transport = ScriptedTransport::new(vec![]);
        transport.connect_error = true;
        let executor = RequestExecutor::new(Box::new(transport));

        let outcome = executor.execute(RequestSpec::new("hi", 4, 2)).await;
        assert!(!outcome.is_success());
        assert_eq!(outcome.latency(), None);
        assert!(outcome.error().unwrap().contains("connection refused"));
        assert_eq!(outcome.prompt_len(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_mid_stream_error_discards_partial_text() {
        let mut transport = ScriptedTransport::new(vec![(10, "partial")]);
        transport.script.push((ms(10), None));
        let executor = RequestExecutor::new(Box::new(transport));

        let outcome = executor.execute(RequestSpec::new("hi", 1, 8)).await;
        assert!(!outcome.is_success());
        assert_eq!(outcome.generated_text(), "");
        assert!(outcome.error().unwrap().contains("connection reset"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stream_without_content_fails() {
        let transport = ScriptedTransport::new(vec![(10, ""), (10, "")]);
        let executor = RequestExecutor::new(Box::new(transport));

        let outcome = executor.execute(RequestSpec::new("hi", 1, 8)).await;
        assert!(!outcome.is_success());
        assert!(outcome.error().unwrap().contains("no tokens received"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_progress_advances_on_every_outcome() {
        let mut failing = ScriptedTransport::new(vec![]);
        failing.connect_error = true;
        let bar = ProgressBar::hidden();
        bar.set_length(2);

        let ok = RequestExecutor::new(Box::new(ScriptedTransport::new(vec![(1, "x")])))
            .with_progress(bar.clone());
        let bad = RequestExecutor::new(Box::new(failing)).with_progress(bar.clone());

        ok.execute(RequestSpec::new("a", 1, 1)).await;
        bad.execute(RequestSpec::new("b", 1, 1)).await;
        assert_eq!(bar.position(), 2);
    }
}
