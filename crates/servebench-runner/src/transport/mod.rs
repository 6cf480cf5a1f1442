//! Backend transports: one per serving wire protocol.
//!
//! Every transport turns a [`RequestSpec`] into a stream of timestamped text
//! chunks. The executor owns all timing decisions; transports only stamp each
//! chunk with the instant its bytes arrived.

mod dummy;
mod lines;
mod ollama;
mod openai;
mod tgi;

pub use dummy::DummyTransport;
pub use ollama::OllamaTransport;
pub use openai::OpenAiTransport;
pub use tgi::TgiTransport;

use async_trait::async_trait;
use futures::Stream;
use servebench_core::{Backend, RequestSpec, Result, ServeBenchError, TransportConfig};
use std::pin::Pin;
use std::time::Duration;
use tokio::time::Instant;

/// A piece of generated text and when it was received.
///
/// Stamped on the tokio clock, the same clock the executor measures with.
#[derive(Debug, Clone, PartialEq)]
pub struct Chunk {
    pub text: String,
    pub at: Instant,
}

impl Chunk {
    pub fn now(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            at: Instant::now(),
        }
    }
}

pub type ChunkStream = Pin<Box<dyn Stream<Item = Result<Chunk>> + Send>>;

#[async_trait]
pub trait Transport: Send + Sync {
    fn backend(&self) -> Backend;

    /// Issues the request and returns the body as a chunk stream.
    ///
    /// Errors before the stream starts (connect failures, non-2xx status)
    /// come back as `Err`; errors while streaming come back as stream items.
    async fn send(&self, request: &RequestSpec) -> Result<ChunkStream>;

    /// An independent copy with its own connection pool.
    fn fork(&self) -> Result<Box<dyn Transport>>;
}

pub fn build_transport(backend: Backend, config: &TransportConfig) -> Result<Box<dyn Transport>> {
    let transport: Box<dyn Transport> = match backend {
        Backend::Vllm | Backend::OpenAi | Backend::OpenAiChat => {
            Box::new(OpenAiTransport::new(backend, config.clone())?)
        }
        Backend::Tgi => Box::new(TgiTransport::new(config.clone())?),
        Backend::Ollama => Box::new(OllamaTransport::new(config.clone())?),
        Backend::Dummy => Box::new(DummyTransport::new(DummyTransport::DEFAULT_TOKEN_DELAY)),
    };
    Ok(transport)
}

pub(crate) fn http_client(timeout: Duration) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(timeout)
        .tcp_nodelay(true)
        .build()
        .map_err(|e| ServeBenchError::Http(e.to_string()))
}

/// Fails the request on a non-2xx status, keeping a prefix of the body for the error.
pub(crate) async fn check_status(resp: reqwest::Response) -> Result<reqwest::Response> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    let body: String = body.chars().take(500).collect();
    Err(ServeBenchError::Http(format!("{} - {}", status, body)))
}

/// Serves `router` on an ephemeral local port and returns its base URL.
#[cfg(test)]
pub(crate) async fn serve(router: axum::Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    format!("http://{}", addr)
}
