//! Stream responses: chunks first, then the backend's answer.
//!
//! [`StreamResponses`] yields one [`StreamResponse`] per chunk with only
//! `raw_response` set. When the wrapped stream is exhausted, the buffered
//! chunks are rebuilt in the provider's non-streaming shape
//! ([`ProviderChunk::collect_response`]) and handed to the after-stream
//! callback, which reports them. One closing item then carries the
//! `request_id` and `prompt_blueprint` from the backend's answer, along
//! with the last chunk again.
//!
//! Unlike [`TrackedIter`](super::TrackedIter) this reports on exhaustion,
//! not on the terminal chunk. Stopping early reports nothing.
//! [`StreamResponseStream`] is the async counterpart.

use std::future::Future;
use std::pin::Pin;
use std::task::{ready, Context, Poll};

use futures_util::future::BoxFuture;
use futures_util::Stream;
use pin_project_lite::pin_project;
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::debug;

use crate::normalize::to_payload;
use crate::provider::{ChunkItem, ProviderChunk};
use crate::types::RequestId;

/// One item of a stream response.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StreamResponse<T> {
    /// Only on the closing item, when the backend returned one
    pub request_id: Option<RequestId>,
    pub raw_response: Option<T>,
    /// Only on the closing item, when the backend returned one
    pub prompt_blueprint: Option<Value>,
}

impl<T> StreamResponse<T> {
    fn chunk(item: T) -> Self {
        Self {
            request_id: None,
            raw_response: Some(item),
            prompt_blueprint: None,
        }
    }

    fn closing(last: Option<T>, answer: &Map<String, Value>) -> Self {
        Self {
            request_id: answer.get("request_id").and_then(RequestId::from_json),
            raw_response: last,
            prompt_blueprint: answer.get("prompt_blueprint").filter(|v| !v.is_null()).cloned(),
        }
    }
}

fn collected_payload<C: ProviderChunk>(results: &[C]) -> Option<Value> {
    match C::collect_response(results) {
        Some(response) => Some(to_payload(&response)),
        None => {
            debug!("stream produced no chunks, nothing to report");
            None
        }
    }
}

fn last_item<T: ChunkItem>(results: &[T::Chunk]) -> Option<T> {
    results.last().cloned().map(T::from_chunk)
}

type ChunkOf<T> = <T as ChunkItem>::Chunk;

// --- Blocking ---

/// See the module docs. `F` receives the collected response as JSON and
/// returns the backend's answer.
pub struct StreamResponses<I, F>
where
    I: Iterator,
    I::Item: ChunkItem,
{
    inner: I,
    results: Vec<ChunkOf<I::Item>>,
    after_stream: Option<F>,
}

impl<I, F> StreamResponses<I, F>
where
    I: Iterator,
    I::Item: ChunkItem,
    F: FnOnce(Value) -> Map<String, Value>,
{
    pub fn new(inner: I, after_stream: F) -> Self {
        Self {
            inner,
            results: Vec::new(),
            after_stream: Some(after_stream),
        }
    }

    /// Every chunk seen so far, in arrival order.
    pub fn results(&self) -> &[ChunkOf<I::Item>] {
        &self.results
    }
}

impl<I, F> Iterator for StreamResponses<I, F>
where
    I: Iterator,
    I::Item: ChunkItem,
    F: FnOnce(Value) -> Map<String, Value>,
{
    type Item = StreamResponse<I::Item>;

    fn next(&mut self) -> Option<Self::Item> {
        self.after_stream.as_ref()?;
        if let Some(item) = self.inner.next() {
            if let Some(chunk) = item.chunk() {
                self.results.push(chunk.clone());
            }
            return Some(StreamResponse::chunk(item));
        }

        let after_stream = self.after_stream.take()?;
        let answer = match collected_payload(&self.results) {
            Some(payload) => after_stream(payload),
            None => Map::new(),
        };
        Some(StreamResponse::closing(
            last_item::<I::Item>(&self.results),
            &answer,
        ))
    }
}

// --- Async ---

/// What an async after-stream callback returns.
pub type AfterStream = BoxFuture<'static, Map<String, Value>>;

pin_project! {
    /// See the module docs. The stream suspends on the callback's future
    /// before yielding the closing item.
    pub struct StreamResponseStream<S, F>
    where
        S: Stream,
        S::Item: ChunkItem,
    {
        #[pin]
        inner: S,
        results: Vec<ChunkOf<S::Item>>,
        after_stream: Option<F>,
        pending: Option<AfterStream>,
        done: bool,
    }
}

impl<S, F> StreamResponseStream<S, F>
where
    S: Stream,
    S::Item: ChunkItem,
    F: FnOnce(Value) -> AfterStream,
{
    pub fn new(inner: S, after_stream: F) -> Self {
        Self {
            inner,
            results: Vec::new(),
            after_stream: Some(after_stream),
            pending: None,
            done: false,
        }
    }

    /// Every chunk seen so far, in arrival order.
    pub fn results(&self) -> &[ChunkOf<S::Item>] {
        &self.results
    }
}

impl<S, F> Stream for StreamResponseStream<S, F>
where
    S: Stream,
    S::Item: ChunkItem,
    F: FnOnce(Value) -> AfterStream,
{
    type Item = StreamResponse<S::Item>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let mut this = self.project();
        if let Some(pending) = this.pending.as_mut() {
            let answer = ready!(pending.as_mut().poll(cx));
            *this.pending = None;
            *this.done = true;
            return Poll::Ready(Some(StreamResponse::closing(
                last_item::<S::Item>(this.results),
                &answer,
            )));
        }
        if *this.done {
            return Poll::Ready(None);
        }

        if let Some(item) = ready!(this.inner.as_mut().poll_next(cx)) {
            if let Some(chunk) = item.chunk() {
                this.results.push(chunk.clone());
            }
            return Poll::Ready(Some(StreamResponse::chunk(item)));
        }

        let after_stream = this.after_stream.take();
        match (after_stream, collected_payload(this.results.as_slice())) {
            (Some(after_stream), Some(payload)) => {
                let mut pending = after_stream(payload);
                match pending.as_mut().poll(cx) {
                    Poll::Ready(answer) => {
                        *this.done = true;
                        Poll::Ready(Some(StreamResponse::closing(
                            last_item::<S::Item>(this.results),
                            &answer,
                        )))
                    }
                    Poll::Pending => {
                        *this.pending = Some(pending);
                        Poll::Pending
                    }
                }
            }
            _ => {
                *this.done = true;
                Poll::Ready(Some(StreamResponse::closing(
                    last_item::<S::Item>(this.results),
                    &Map::new(),
                )))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::{AnthropicChunk, OpenAiChunk};
    use futures_util::{stream, FutureExt, StreamExt};
    use serde_json::json;
    use std::cell::RefCell;
    use std::sync::{Arc, Mutex};

    fn rt() -> tokio::runtime::Runtime {
        tokio::runtime::Runtime::new().unwrap()
    }

    fn chat_chunk(role: Option<&str>, content: Option<&str>, finish: Option<&str>) -> OpenAiChunk {
        serde_json::from_value(json!({
            "id": "chatcmpl-7",
            "object": "chat.completion.chunk",
            "created": 1700000000,
            "model": "gpt-4o-mini",
            "choices": [{
                "index": 0,
                "delta": {"role": role, "content": content},
                "finish_reason": finish
            }]
        }))
        .unwrap()
    }

    fn chat_stream() -> Vec<OpenAiChunk> {
        vec![
            chat_chunk(Some("assistant"), Some("Hi"), None),
            chat_chunk(None, Some("!"), None),
            chat_chunk(None, None, Some("stop")),
        ]
    }

    #[test]
    fn test_chunks_then_closing_item() {
        let reported = RefCell::new(None);
        let responses: Vec<_> = StreamResponses::new(chat_stream().into_iter(), |response| {
            *reported.borrow_mut() = Some(response);
            let mut answer = Map::new();
            answer.insert("request_id".to_string(), json!(44));
            answer.insert("prompt_blueprint".to_string(), json!({"prompt_template": {}}));
            answer
        })
        .collect();

        assert_eq!(responses.len(), 4);
        for (response, chunk) in responses.iter().zip(chat_stream()) {
            assert_eq!(response.raw_response.as_ref(), Some(&chunk));
            assert_eq!(response.request_id, None);
        }

        let closing = &responses[3];
        assert_eq!(closing.request_id, Some(RequestId::from("44")));
        assert_eq!(closing.prompt_blueprint, Some(json!({"prompt_template": {}})));
        assert_eq!(closing.raw_response.as_ref(), chat_stream().last());

        let reported = reported.into_inner().unwrap();
        assert_eq!(reported["object"], "chat.completion");
        assert_eq!(reported["choices"][0]["message"]["content"], "Hi!");
        assert_eq!(reported["choices"][0]["finish_reason"], "stop");
    }

    #[test]
    fn test_stopping_early_reports_nothing() {
        let mut calls = 0;
        let mut responses = StreamResponses::new(chat_stream().into_iter(), |_| {
            calls += 1;
            Map::new()
        });
        responses.next();
        assert_eq!(responses.results().len(), 1);
        drop(responses);
        assert_eq!(calls, 0);
    }

    #[test]
    fn test_empty_stream_closes_without_report() {
        let mut calls = 0;
        let responses: Vec<StreamResponse<AnthropicChunk>> =
            StreamResponses::new(std::iter::empty(), |_| {
                calls += 1;
                Map::new()
            })
            .collect();
        assert_eq!(responses.len(), 1);
        assert_eq!(responses[0].raw_response, None);
        assert_eq!(calls, 0);
    }

    #[test]
    fn test_fallible_items_close_with_last_good_chunk() {
        let items: Vec<Result<OpenAiChunk, String>> = vec![
            Ok(chat_chunk(Some("assistant"), Some("a"), None)),
            Err("dropped".to_string()),
            Ok(chat_chunk(None, None, Some("stop"))),
        ];
        let responses: Vec<_> = StreamResponses::new(items.into_iter(), |_| Map::new()).collect();
        assert_eq!(responses.len(), 4);
        assert_eq!(responses[1].raw_response, Some(Err("dropped".to_string())));
        assert_eq!(
            responses[3].raw_response,
            Some(Ok(chat_chunk(None, None, Some("stop"))))
        );
    }

    #[test]
    fn test_async_closing_item_waits_for_answer() {
        let rt = rt();
        let reported = Arc::new(Mutex::new(Vec::new()));
        let sink = reported.clone();

        let responses: Vec<_> = rt.block_on(
            StreamResponseStream::new(stream::iter(chat_stream()), move |response| {
                async move {
                    tokio::task::yield_now().await;
                    sink.lock().unwrap().push(response);
                    let mut answer = Map::new();
                    answer.insert("request_id".to_string(), json!("r-9"));
                    answer
                }
                .boxed()
            })
            .collect(),
        );

        assert_eq!(responses.len(), 4);
        assert!(responses[..3].iter().all(|r| r.request_id.is_none()));
        assert_eq!(responses[3].request_id, Some(RequestId::from("r-9")));
        assert_eq!(responses[3].prompt_blueprint, None);

        let reported = reported.lock().unwrap();
        assert_eq!(reported.len(), 1);
        assert_eq!(reported[0]["choices"][0]["message"]["content"], "Hi!");
    }
}
