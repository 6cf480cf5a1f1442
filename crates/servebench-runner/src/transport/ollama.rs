use super::lines::{decode_lines, LineEvent};
use super::{check_status, http_client, ChunkStream, Transport};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use servebench_core::{Backend, RequestSpec, Result, ServeBenchError, TransportConfig};

/// Ollama `/api/chat` client, newline-delimited JSON stream.
#[derive(Debug, Clone)]
pub struct OllamaTransport {
    config: TransportConfig,
    client: reqwest::Client,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    stream: bool,
    options: ChatOptions,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct ChatOptions {
    temperature: f32,
    num_predict: usize,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    message: Option<ResponseMessage>,
    #[serde(default)]
    done: bool,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: String,
}

impl OllamaTransport {
    pub fn new(config: TransportConfig) -> Result<Self> {
        Ok(Self {
            client: http_client(config.timeout)?,
            config,
        })
    }
}

fn parse_line(line: &str) -> Result<LineEvent> {
    let resp: ChatResponse = serde_json::from_str(line).map_err(|e| {
        ServeBenchError::Stream(format!(
            "Failed to parse response: {} - Body: {}",
            e,
            line.chars().take(200).collect::<String>()
        ))
    })?;

    if let Some(error) = resp.error {
        return Err(ServeBenchError::Stream(format!("Ollama error: {}", error)));
    }

    let content = resp.message.map(|m| m.content).unwrap_or_default();
    match (content.is_empty(), resp.done) {
        (false, _) => Ok(LineEvent::Text(content)),
        (true, true) => Ok(LineEvent::Done),
        (true, false) => Ok(LineEvent::Skip),
    }
}

#[async_trait]
impl Transport for OllamaTransport {
    fn backend(&self) -> Backend {
        Backend::Ollama
    }

    async fn send(&self, request: &RequestSpec) -> Result<ChunkStream> {
        let body = ChatRequest {
            model: &self.config.model,
            messages: vec![ChatMessage {
                role: "user",
                content: &request.prompt,
            }],
            stream: true,
            options: ChatOptions {
                temperature: 0.0,
                num_predict: request.output_len,
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
