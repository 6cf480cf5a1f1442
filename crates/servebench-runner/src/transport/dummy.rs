use super::{Chunk, ChunkStream, Transport};
use async_trait::async_trait;
use servebench_core::{Backend, RequestSpec, Result};
use std::time::Duration;

/// Generates `output_len` tokens locally at a fixed pace. No network.
#[derive(Debug, Clone)]
pub struct DummyTransport {
    per_token: Duration,
}

impl DummyTransport {
    pub const DEFAULT_TOKEN_DELAY: Duration = Duration::from_millis(10);

    pub fn new(per_token: Duration) -> Self {
        Self { per_token }
    }
}

#[async_trait]
impl Transport for DummyTransport {
    fn backend(&self) -> Backend {
        Backend::Dummy
    }

    async fn send(&self, request: &RequestSpec) -> Result<ChunkStream> {
        let per_token = self.per_token;
        let stream = futures::stream::unfold(request.output_len, move |left| async move {
            if left == 0 {
                return None;
            }
            tokio::time::sleep(per_token).await;
            Some((Ok(Chunk::now("tok ")), left - 1))
        });
        Ok(Box::pin(stream))
    }

    fn fork(&self) -> Result<Box<dyn Transport>> {
        Ok(Box::new(self.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    #[tokio::test(start_paused = true)]
    async fn test_emits_output_len_tokens() {
        let transport = DummyTransport::new(Duration::from_millis(5));
        let start = tokio::time::Instant::now();
        let stream = transport.send(&RequestSpec::new("p", 1, 6)).await.unwrap();
        let chunks: Vec<_> = stream.collect().await;
        assert_eq!(chunks.len(), 6);
        assert!(chunks.iter().all(|c| c.as_ref().unwrap().text == "tok "));
        assert_eq!(start.elapsed(), Duration::from_millis(30));
    }
}
