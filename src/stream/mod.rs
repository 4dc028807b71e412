mod utf8;

pub use utf8::Utf8Decoder;

use std::collections::VecDeque;
use std::fmt;
use std::pin::Pin;

use bytes::Bytes;
use futures_util::{Stream, StreamExt};

use crate::error::ChatError;
use crate::protocol::{DecodeEvent, DecoderChain, ProviderKind, StreamDecoder};

/// Message carried by the error emitted when a body ends before the provider's
/// completion signal.
pub const TRUNCATED_STREAM: &str = "response ended before completion signal";

/// Binds a [`DecoderChain`] to one response body at a time.
///
/// The pipeline itself buffers nothing; partial lines live in the decoder and
/// partial characters in a per-call [`Utf8Decoder`].
#[derive(Debug)]
pub struct StreamPipeline {
    decoder: DecoderChain,
}

struct PipelineState<'a, S> {
    body: Pin<Box<S>>,
    decoder: &'a mut DecoderChain,
    utf8: Utf8Decoder,
    pending: VecDeque<DecodeEvent>,
    scratch: Vec<DecodeEvent>,
    done: bool,
}

impl<S> PipelineState<'_, S> {
    fn drain_scratch(&mut self) {
        self.pending.extend(self.scratch.drain(..));
    }
}

impl StreamPipeline {
    #[must_use]
    pub fn new(decoder: DecoderChain) -> Self {
        Self { decoder }
    }

    #[must_use]
    pub fn provider(&self) -> ProviderKind {
        self.decoder.provider()
    }

    /// Full answer text accumulated by the current (or last) stream.
    #[must_use]
    pub fn full_text(&self) -> &str {
        self.decoder.full_text()
    }

    /// Decode a `reqwest` response body. The caller has already checked the status.
    pub fn process(
        &mut self,
        response: reqwest::Response,
    ) -> impl Stream<Item = DecodeEvent> + Send + '_ {
        self.process_bytes(response.bytes_stream())
    }

    /// Decode an arbitrary byte stream into events.
    ///
    /// The decoder is reset first. The returned stream ends after the decoder
    /// finishes, after a read error, or after the body ends; dropping it early
    /// releases the body.
    pub fn process_bytes<'a, S, E>(
        &'a mut self,
        body: S,
    ) -> impl Stream<Item = DecodeEvent> + Send + 'a
    where
        S: Stream<Item = Result<Bytes, E>> + Send + 'a,
        E: fmt::Display + Send + 'a,
    {
        self.decoder.reset();

        let state = PipelineState {
            body: Box::pin(body),
            decoder: &mut self.decoder,
            utf8: Utf8Decoder::new(),
            pending: VecDeque::with_capacity(8),
            scratch: Vec::with_capacity(8),
            done: false,
        };

        futures_util::stream::unfold(state, |mut state| async move {
            loop {
                if let Some(event) = state.pending.pop_front() {
                    return Some((event, state));
                }
                if state.done || state.decoder.is_finished() {
                    return None;
                }

                match state.body.as_mut().next().await {
                    Some(Ok(bytes)) => {
                        let text = state.utf8.decode(&bytes);
                        if !text.is_empty() {
                            state.decoder.feed(&text, &mut state.scratch);
                            state.drain_scratch();
                        }
                    }
                    Some(Err(err)) => {
                        state.done = true;
                        tracing::debug!(error = %err, "response body read failed");
                        state.pending.push_back(DecodeEvent::Error(ChatError::network(
                            format!("failed to read response body: {err}"),
                        )));
                    }
                    None => {
                        state.done = true;
                        let tail = state.utf8.finish();
                        if !tail.is_empty() {
                            state.decoder.feed(&tail, &mut state.scratch);
                        }
                        state.decoder.end_of_input(&mut state.scratch);
                        state.drain_scratch();
                        if !state.decoder.is_finished() {
                            state
                                .pending
                                .push_back(DecodeEvent::Error(ChatError::stream(TRUNCATED_STREAM)));
                        }
                    }
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::ThinkTagFilter;

    fn chunks(parts: &[&[u8]]) -> impl Stream<Item = Result<Bytes, std::io::Error>> + Send {
        let owned: Vec<Result<Bytes, std::io::Error>> =
            parts.iter().map(|p| Ok(Bytes::copy_from_slice(p))).collect();
        futures_util::stream::iter(owned)
    }

    async fn collect<S>(pipeline: &mut StreamPipeline, body: S) -> Vec<DecodeEvent>
    where
        S: Stream<Item = Result<Bytes, std::io::Error>> + Send,
    {
        pipeline.process_bytes(body).collect().await
    }

    #[tokio::test]
    async fn test_openai_stream_completes() {
        let mut pipeline = StreamPipeline::new(DecoderChain::new(ProviderKind::OpenAi));
        let body = chunks(&[
            b"data: {\"choices\":[{\"delta\":{\"content\":\"He\"}}]}\n\nda",
            b"ta: {\"choices\":[{\"delta\":{\"content\":\"llo\"}}]}\n\ndata: [DONE]\n\n",
        ]);
        let events = collect(&mut pipeline, body).await;
        assert_eq!(events.last(), Some(&DecodeEvent::Finish("Hello".into())));
        assert_eq!(pipeline.full_text(), "Hello");
    }

    #[tokio::test]
    async fn test_stream_stops_reading_after_finish() {
        let mut pipeline = StreamPipeline::new(DecoderChain::new(ProviderKind::Ollama));
        let body = futures_util::stream::iter(vec![
            Ok(Bytes::from_static(b"{\"response\":\"a\",\"done\":true}\n")),
            Err(std::io::Error::other("must not be read")),
        ]);
        let events = collect(&mut pipeline, body).await;
        assert_eq!(
            events,
            vec![
                DecodeEvent::Start,
                DecodeEvent::Token("a".into()),
                DecodeEvent::Finish("a".into()),
            ]
        );
    }

    #[tokio::test]
    async fn test_read_error_is_network_error() {
        let mut pipeline = StreamPipeline::new(DecoderChain::new(ProviderKind::Ollama));
        let body = futures_util::stream::iter(vec![
            Ok(Bytes::from_static(b"{\"response\":\"a\"}\n")),
            Err(std::io::Error::other("connection reset")),
        ]);
        let events = collect(&mut pipeline, body).await;
        let Some(DecodeEvent::Error(err)) = events.last() else {
            panic!("expected error, got {events:?}");
        };
        assert!(err.is_retryable());
        assert!(err.to_string().contains("connection reset"));
    }

    #[tokio::test]
    async fn test_truncated_body_is_stream_error() {
        let mut pipeline = StreamPipeline::new(DecoderChain::new(ProviderKind::OpenAi));
        let body = chunks(&[b"data: {\"choices\":[{\"delta\":{\"content\":\"x\"}}]}\n"]);
        let events = collect(&mut pipeline, body).await;
        assert_eq!(
            events.last(),
            Some(&DecodeEvent::Error(ChatError::stream(TRUNCATED_STREAM)))
        );
    }

    #[tokio::test]
    async fn test_empty_body_is_stream_error() {
        let mut pipeline = StreamPipeline::new(DecoderChain::new(ProviderKind::Gemini));
        let events = collect(&mut pipeline, chunks(&[])).await;
        assert_eq!(events, vec![DecodeEvent::Error(ChatError::stream(TRUNCATED_STREAM))]);
    }

    #[tokio::test]
    async fn test_multibyte_split_between_chunks() {
        let line = "{\"response\":\"é😀\",\"done\":true}\n".as_bytes();
        let split = line.iter().position(|&b| b >= 0x80).unwrap_or(0) + 1;
        let mut pipeline = StreamPipeline::new(DecoderChain::new(ProviderKind::Ollama));
        let events = collect(&mut pipeline, chunks(&[&line[..split], &line[split..]])).await;
        assert_eq!(events.last(), Some(&DecodeEvent::Finish("é😀".into())));
    }

    #[tokio::test]
    async fn test_pipeline_resets_between_calls() {
        let mut pipeline = StreamPipeline::new(
            DecoderChain::new(ProviderKind::Ollama).with_think_filter(ThinkTagFilter::default()),
        );
        let body = b"{\"response\":\"<think>r</think>a\",\"done\":true}\n";
        let first = collect(&mut pipeline, chunks(&[&body[..]])).await;
        let second = collect(&mut pipeline, chunks(&[&body[..]])).await;
        assert_eq!(first, second);
        assert_eq!(pipeline.full_text(), "a");
    }
}
