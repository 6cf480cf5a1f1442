use super::lines::{decode_lines, sse_data, LineEvent};
use super::{check_status, http_client, ChunkStream, Transport};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use servebench_core::{Backend, RequestSpec, Result, ServeBenchError, TransportConfig};
use tracing::debug;

/// OpenAI-compatible streaming client: completions (`vllm`, `openai`) and
/// chat completions (`openai-chat`).
pub struct OpenAiTransport {
    backend: Backend,
    config: TransportConfig,
    client: reqwest::Client,
}

#[derive(Debug, Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    temperature: f32,
    best_of: u32,
    max_tokens: usize,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    use_beam_search: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    ignore_eos: Option<bool>,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
    max_tokens: usize,
    stream: bool,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct StreamChunk {
    #[serde(default)]
    choices: Vec<StreamChoice>,
    #[serde(default)]
    error: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    delta: Option<Delta>,
}

#[derive(Debug, Deserialize)]
struct Delta {
    #[serde(default)]
    content: Option<String>,
}

impl OpenAiTransport {
    pub fn new(backend: Backend, config: TransportConfig) -> Result<Self> {
        Ok(Self {
            backend,
            client: http_client(config.timeout)?,
            config,
        })
    }

    fn body(&self, request: &RequestSpec) -> Result<serde_json::Value> {
        let value = match self.backend {
            Backend::OpenAiChat => serde_json::to_value(ChatRequest {
                model: &self.config.model,
                messages: vec![ChatMessage {
                    role: "user",
                    content: &request.prompt,
                }],
                temperature: 0.0,
                max_tokens: request.output_len,
                stream: true,
            })?,
            Backend::Vllm => serde_json::to_value(CompletionRequest {
                model: &self.config.model,
                prompt: &request.prompt,
                temperature: 0.0,
                best_of: request.best_of,
                max_tokens: request.output_len,
                stream: true,
                use_beam_search: Some(request.use_beam_search),
                ignore_eos: Some(true),
            })?,
            _ => serde_json::to_value(CompletionRequest {
                model: &self.config.model,
                prompt: &request.prompt,
                temperature: 0.0,
                best_of: request.best_of,
                max_tokens: request.output_len,
                stream: true,
                use_beam_search: None,
                ignore_eos: None,
            })?,
        };
        Ok(value)
    }
}

/// Decodes one SSE line of an OpenAI-style stream.
pub(crate) fn parse_line(line: &str) -> Result<LineEvent> {
    let Some(data) = sse_data(line) else {
        return Ok(LineEvent::Skip);
    };
    if data == "[DONE]" {
        return Ok(LineEvent::Done);
    }

    let chunk: StreamChunk = serde_json::from_str(data).map_err(|e| {
        ServeBenchError::Stream(format!(
            "malformed chunk: {} - {}",
            e,
            data.chars().take(200).collect::<String>()
        ))
    })?;

    if let Some(error) = chunk.error {
        return Err(ServeBenchError::Stream(format!("server error: {}", error)));
    }

    let text = chunk.choices.into_iter().next().and_then(|choice| {
        choice
            .text
            .or_else(|| choice.delta.and_then(|d| d.content))
    });

    Ok(text.map_or(LineEvent::Skip, LineEvent::Text))
}

#[async_trait]
impl Transport for OpenAiTransport {
    fn backend(&self) -> Backend {
        self.backend
    }

    async fn send(&self, request: &RequestSpec) -> Result<ChunkStream> {
        let body = self.body(request)?;
        debug!(url = %self.config.api_url, backend = %self.backend, "Sending request");

        let mut builder = self.client.post(&self.config.api_url).json(&body);
        if let Some(key) = &self.config.api_key {
            builder = builder.bearer_auth(key);
        }

        let resp = builder
            .send()
            .await
            .map_err(|e| ServeBenchError::Transport(e.to_string()))?;
        let resp = check_status(resp).await?;

        Ok(decode_lines(Box::pin(resp.bytes_stream()), parse_line))
    }

    fn fork(&self) -> Result<Box<dyn Transport>> {
        Ok(Box::new(Self::new(self.backend, self.config.clone())?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::serve;
    use axum::{routing::post, Json, Router};
    use futures::StreamExt;

    #[test]
    fn test_parse_completion_chunk() {
        let line = r#"data: {"id":"x","choices":[{"index":0,"text":" Hello","finish_reason":null}]}"#;
        assert_eq!(parse_line(line).unwrap(), LineEvent::Text(" Hello".into()));
    }

    #[test]
    fn test_parse_chat_chunk() {
        let line = r#"data: {"choices":[{"index":0,"delta":{"role":"assistant","content":"Hi"}}]}"#;
        assert_eq!(parse_line(line).unwrap(), LineEvent::Text("Hi".into()));

        let role_only = r#"data: {"choices":[{"index":0,"delta":{"role":"assistant"}}]}"#;
        assert_eq!(parse_line(role_only).unwrap(), LineEvent::Skip);
    }

    #[test]
    fn test_parse_control_lines() {
        assert_eq!(parse_line("data: [DONE]").unwrap(), LineEvent::Done);
        assert_eq!(parse_line(": ping").unwrap(), LineEvent::Skip);
        assert_eq!(parse_line(r#"data: {"choices":[]}"#).unwrap(), LineEvent::Skip);
    }

    #[test]
    fn test_parse_errors() {
        assert!(parse_line("data: {not json").is_err());
        let err = parse_line(r#"data: {"error":{"message":"overloaded"}}"#).unwrap_err();
        assert!(err.to_string().contains("overloaded"));
    }

    #[test]
    fn test_vllm_body_carries_beam_search() {
        let config = TransportConfig::new("http://h/v1/completions", "m");
        let transport = OpenAiTransport::new(Backend::Vllm, config.clone()).unwrap();
        let spec = RequestSpec::new("p", 3, 7).with_sampling(2, true);
        let body = transport.body(&spec).unwrap();
        assert_eq!(body["use_beam_search"], true);
        assert_eq!(body["best_of"], 2);
        assert_eq!(body["max_tokens"], 7);

        let transport = OpenAiTransport::new(Backend::OpenAi, config.clone()).unwrap();
        let body = transport.body(&spec).unwrap();
        assert!(body.get("use_beam_search").is_none());

        let transport = OpenAiTransport::new(Backend::OpenAiChat, config).unwrap();
        let body = transport.body(&spec).unwrap();
        assert_eq!(body["messages"][0]["content"], "p");
    }

    #[tokio::test]
    async fn test_streams_from_server() {
        let router = Router::new().route(
            "/v1/completions",
            post(|Json(body): Json<serde_json::Value>| async move {
                assert_eq!(body["stream"], true);
                "data: {\"choices\":[{\"text\":\"a\"}]}\n\n\
                 data: {\"choices\":[{\"text\":\"\"}]}\n\n\
                 data: {\"choices\":[{\"text\":\" b\"}]}\n\n\
                 data: [DONE]\n\n"
            }),
        );
        let base = serve(router).await;

        let config = TransportConfig::new(format!("{}/v1/completions", base), "m");
        let transport = OpenAiTransport::new(Backend::OpenAi, config).unwrap();
        let stream = transport.send(&RequestSpec::new("hi", 1, 4)).await.unwrap();
        let texts: Vec<String> = stream.map(|c| c.unwrap().text).collect().await;
        assert_eq!(texts, vec!["a", "", " b"]);
    }

    #[tokio::test]
    async fn test_non_success_status_fails_before_streaming() {
        let router = Router::new().route(
            "/v1/completions",
            post(|| async { (axum::http::StatusCode::SERVICE_UNAVAILABLE, "busy") }),
        );
        let base = serve(router).await;

        let config = TransportConfig::new(format!("{}/v1/completions", base), "m");
        let transport = OpenAiTransport::new(Backend::OpenAi, config).unwrap();
        let err = transport
            .send(&RequestSpec::new("hi", 1, 4))
            .await
            .err()
            .unwrap();
        assert!(err.to_string().contains("503"));
        assert!(err.to_string().contains("busy"));
    }
}
