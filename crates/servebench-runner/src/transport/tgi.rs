use super::lines::{decode_lines, sse_data, LineEvent};
use super::{check_status, http_client, ChunkStream, Transport};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use servebench_core::{Backend, RequestSpec, Result, ServeBenchError, TransportConfig};

/// Text Generation Inference `generate_stream` client.
pub struct TgiTransport {
    config: TransportConfig,
    client: reqwest::Client,
}

#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    inputs: &'a str,
    parameters: GenerateParameters,
}

#[derive(Debug, Serialize)]
struct GenerateParameters {
    best_of: u32,
    max_new_tokens: usize,
    do_sample: bool,
    temperature: f32,
    top_p: f32,
}

#[derive(Debug, Deserialize)]
struct StreamResponse {
    #[serde(default)]
    token: Option<Token>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Token {
    text: String,
    #[serde(default)]
    special: bool,
}

impl TgiTransport {
    pub fn new(config: TransportConfig) -> Result<Self> {
        Ok(Self {
            client: http_client(config.timeout)?,
            config,
        })
    }
}

fn parse_line(line: &str) -> Result<LineEvent> {
    let Some(data) = sse_data(line) else {
        return Ok(LineEvent::Skip);
    };

    let resp: StreamResponse = serde_json::from_str(data)
        .map_err(|e| ServeBenchError::Stream(format!("malformed event: {}", e)))?;

    if let Some(error) = resp.error {
        return Err(ServeBenchError::Stream(format!("server error: {}", error)));
    }

    match resp.token {
        Some(token) if !token.special => Ok(LineEvent::Text(token.text)),
        _ => Ok(LineEvent::Skip),
    }
}

#[async_trait]
impl Transport for TgiTransport {
    fn backend(&self) -> Backend {
        Backend::Tgi
    }

    async fn send(&self, request: &RequestSpec) -> Result<ChunkStream> {
        let body = GenerateRequest {
            inputs: &request.prompt,
            parameters: GenerateParameters {
                best_of: request.best_of,
                max_new_tokens: request.output_len,
                do_sample: true,
                temperature: 0.01,
                top_p: 0.99,
            },
        };

        let resp = self
            .client
            .post(&self.config.api_url)
            .json(&body)
            .send()
            .await
            .map_err(|e| ServeBenchError::Transport(e.to_string()))?;
        let resp = check_status(resp).await?;

        Ok(decode_lines(Box::pin(resp.bytes_stream()), parse_line))
    }

    fn fork(&self) -> Result<Box<dyn Transport>> {
        Ok(Box::new(Self::new(self.config.clone())?))
    }
}
