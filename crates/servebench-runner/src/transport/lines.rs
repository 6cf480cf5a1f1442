use super::{Chunk, ChunkStream};
use futures::{Stream, StreamExt};
use servebench_core::{Result, ServeBenchError};
use std::collections::VecDeque;
use tokio::time::Instant;

/// What one decoded line of a response body means.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum LineEvent {
    Skip,
    Text(String),
    Done,
}

/// Splits a byte stream into lines, buffering partial lines across network chunks.
#[derive(Debug, Default)]
pub(crate) struct LineDecoder {
    buf: Vec<u8>,
    // Bytes of `buf` already searched for a newline.
    scanned: usize,
}

impl LineDecoder {
    pub(crate) fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        self.buf.extend_from_slice(bytes);
        let mut lines = Vec::new();
        let mut start = 0;
        for pos in self.scanned..self.buf.len() {
            if self.buf[pos] != b'\n' {
                continue;
            }
            let line = String::from_utf8_lossy(&self.buf[start..pos]);
            let line = line.trim();
            if !line.is_empty() {
                lines.push(line.to_string());
            }
            start = pos + 1;
        }
        self.buf.drain(..start);
        self.scanned = self.buf.len();
        lines
    }

    pub(crate) fn finish(&mut self) -> Option<String> {
        let rest = String::from_utf8_lossy(&self.buf).trim().to_string();
        self.buf.clear();
        self.scanned = 0;
        (!rest.is_empty()).then_some(rest)
    }
}

/// Strips the `data:` field name from a server-sent-event line.
///
/// Returns `None` for comments and other SSE fields.
pub(crate) fn sse_data(line: &str) -> Option<&str> {
    line.strip_prefix("data:").map(str::trim_start)
}

struct LineState<S, P> {
    body: S,
    decoder: LineDecoder,
    pending: VecDeque<Result<Chunk>>,
    parse: P,
    finished: bool,
}

impl<S, P> LineState<S, P>
where
    P: FnMut(&str) -> Result<LineEvent>,
{
    fn accept(&mut self, lines: Vec<String>, at: Instant) {
        for line in lines {
            if self.finished {
                return;
            }
            match (self.parse)(&line) {
                Ok(LineEvent::Skip) => {}
                Ok(LineEvent::Text(text)) => self.pending.push_back(Ok(Chunk { text, at })),
                Ok(LineEvent::Done) => self.finished = true,
                Err(e) => {
                    self.pending.push_back(Err(e));
                    self.finished = true;
                }
            }
        }
    }
}

/// Turns a line-oriented response body into a [`ChunkStream`].
///
/// All lines decoded from one network read share that read's timestamp.
pub(crate) fn decode_lines<S, B, E, P>(body: S, parse: P) -> ChunkStream
where
    S: Stream<Item = std::result::Result<B, E>> + Send + Unpin + 'static,
    B: AsRef<[u8]> + Send + 'static,
    E: std::fmt::Display + Send + 'static,
    P: FnMut(&str) -> Result<LineEvent> + Send + 'static,
{
    let state = LineState {
        body,
        decoder: LineDecoder::default(),
        pending: VecDeque::new(),
        parse,
        finished: false,
    };

    let stream = futures::stream::unfold(state, |mut state| async move {
        loop {
            if let Some(item) = state.pending.pop_front() {
                return Some((item, state));
            }
            if state.finished {
                return None;
            }
            match state.body.next().await {
                Some(Ok(bytes)) => {
                    let at = Instant::now();
                    let lines = state.decoder.push(bytes.as_ref());
                    state.accept(lines, at);
                }
                Some(Err(e)) => {
                    state
                        .pending
                        .push_back(Err(ServeBenchError::Stream(e.to_string())));
                    state.finished = true;
                }
                None => {
                    let at = Instant::now();
                    let rest = state.decoder.finish().into_iter().collect();
                    state.accept(rest, at);
                    state.finished = true;
                }
            }
        }
    });

    Box::pin(stream)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn body(parts: &[&str]) -> impl Stream<Item = std::result::Result<Vec<u8>, String>> + Unpin {
        let parts: Vec<_> = parts.iter().map(|p| Ok(p.as_bytes().to_vec())).collect();
        futures::stream::iter(parts)
    }

    fn echo(line: &str) -> Result<LineEvent> {
        match line {
            "END" => Ok(LineEvent::Done),
            "BAD" => Err(ServeBenchError::Stream("bad line".into())),
            l if l.starts_with('#') => Ok(LineEvent::Skip),
            l => Ok(LineEvent::Text(l.to_string())),
        }
    }

    async fn collect(stream: ChunkStream) -> Vec<std::result::Result<String, String>> {
        stream
            .map(|item| item.map(|c| c.text).map_err(|e| e.to_string()))
            .collect()
            .await
    }

    #[test]
    fn test_decoder_joins_split_lines() {
        let mut decoder = LineDecoder::default();
        assert!(decoder.push(b"data: {\"a\"").is_empty());
        assert_eq!(decoder.push(b": 1}\n\ndata: x\r\n"), vec!["data: {\"a\": 1}", "data: x"]);
        assert!(decoder.push(b"tail").is_empty());
        assert_eq!(decoder.finish(), Some("tail".to_string()));
        assert_eq!(decoder.finish(), None);
    }

    #[test]
    fn test_decoder_scans_each_byte_once() {
        let mut decoder = LineDecoder::default();
        for _ in 0..1000 {
            assert!(decoder.push(b"xxxxxxxxxx").is_empty());
        }
        assert_eq!(decoder.scanned, 10_000);

        let lines = decoder.push(b"y\nnext\npartial");
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0].len(), 10_001);
        assert_eq!(lines[1], "next");
        assert_eq!(decoder.scanned, "partial".len());
        assert_eq!(decoder.finish(), Some("partial".to_string()));
        assert_eq!(decoder.scanned, 0);
    }

    #[test]
    fn test_sse_data_prefix() {
        assert_eq!(sse_data("data: {}"), Some("{}"));
        assert_eq!(sse_data("data:[DONE]"), Some("[DONE]"));
        assert_eq!(sse_data(": keep-alive"), None);
        assert_eq!(sse_data("event: message"), None);
    }

    #[tokio::test]
    async fn test_stream_stops_at_done() {
        let stream = decode_lines(body(&["a\n#c\nb", "\nEND\nafter\n"]), echo);
        let items = collect(stream).await;
        assert_eq!(items, vec![Ok("a".to_string()), Ok("b".to_string())]);
    }

    #[tokio::test]
    async fn test_stream_flushes_unterminated_tail() {
        let stream = decode_lines(body(&["a\n", "b"]), echo);
        let items = collect(stream).await;
        assert_eq!(items, vec![Ok("a".to_string()), Ok("b".to_string())]);
    }

    #[tokio::test]
    async fn test_stream_surfaces_parse_error() {
        let stream = decode_lines(body(&["a\nBAD\nb\n"]), echo);
        let items = collect(stream).await;
        assert_eq!(items.len(), 2);
        assert!(items[1].as_ref().unwrap_err().contains("bad line"));
    }

    #[tokio::test]
    async fn test_stream_surfaces_body_error() {
        let parts: Vec<std::result::Result<Vec<u8>, String>> =
            vec![Ok(b"a\n".to_vec()), Err("connection reset".to_string())];
        let stream = decode_lines(futures::stream::iter(parts), echo);
        let items = collect(stream).await;
        assert_eq!(items.len(), 2);
        assert!(items[1].as_ref().unwrap_err().contains("connection reset"));
    }
}
