//! Async stream proxy.
//!
//! [`TrackedStream`] is the `futures::Stream` counterpart of
//! [`TrackedIter`](super::TrackedIter). The only difference is how the
//! report is sent: the terminal chunk's record goes through the dispatch
//! bridge, and the proxy suspends on it before yielding that chunk. No
//! other item ever waits on the backend.

use std::future::Future;
use std::pin::Pin;
use std::task::{ready, Context, Poll};

use futures_util::future::BoxFuture;
use futures_util::Stream;
use pin_project_lite::pin_project;
use tracing::trace;

use super::session::StreamSession;
use crate::backend::Backend;
use crate::provider::ChunkItem;
use crate::types::{CallMetadata, RequestId};

type ChunkOf<S> = <<S as Stream>::Item as ChunkItem>::Chunk;

pin_project! {
    /// Stream proxy that reports the stream once it completes.
    pub struct TrackedStream<S>
    where
        S: Stream,
        S::Item: ChunkItem,
    {
        #[pin]
        inner: S,
        session: StreamSession<ChunkOf<S>>,
        backend: Backend,
        // terminal item held back until its report has been sent
        held: Option<S::Item>,
        dispatch: Option<BoxFuture<'static, Option<RequestId>>>,
    }
}

impl<S> TrackedStream<S>
where
    S: Stream,
    S::Item: ChunkItem,
{
    pub fn new(inner: S, call: CallMetadata, backend: Backend) -> Self {
        Self {
            inner,
            session: StreamSession::new(call),
            backend,
            held: None,
            dispatch: None,
        }
    }

    pub fn session(&self) -> &StreamSession<ChunkOf<S>> {
        &self.session
    }

    /// Yield `(item, request_id)` pairs. The id is only ever present on
    /// the terminal item, and only when the call opted in.
    pub fn with_request_ids(self) -> RequestIdStream<S> {
        RequestIdStream { inner: self }
    }

    /// Yield only text deltas while still buffering every chunk.
    pub fn text_stream(self) -> TextStream<S> {
        TextStream { inner: self }
    }

    fn poll_step(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<(S::Item, Option<RequestId>)>> {
        let mut this = self.project();
        loop {
            if let Some(dispatch) = this.dispatch.as_mut() {
                let request_id = ready!(dispatch.as_mut().poll(cx));
                *this.dispatch = None;
                trace!(request_id = ?request_id, "stream reported");
                if let Some(item) = this.held.take() {
                    return Poll::Ready(Some((item, request_id)));
                }
                continue;
            }

            let Some(item) = ready!(this.inner.as_mut().poll_next(cx)) else {
                return Poll::Ready(None);
            };
            let Some(record) = item.chunk().and_then(|chunk| this.session.observe(chunk)) else {
                return Poll::Ready(Some((item, None)));
            };

            let backend = this.backend.clone();
            let want_id = this.session.wants_request_id();
            *this.dispatch = Some(Box::pin(async move {
                backend.track_request_async(record, want_id).await
            }));
            *this.held = Some(item);
        }
    }
}

impl<S> Stream for TrackedStream<S>
where
    S: Stream,
    S::Item: ChunkItem,
{
    type Item = S::Item;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<S::Item>> {
        self.poll_step(cx).map(|step| step.map(|(item, _)| item))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

// --- Views ---

pin_project! {
    /// See [`TrackedStream::with_request_ids`].
    pub struct RequestIdStream<S>
    where
        S: Stream,
        S::Item: ChunkItem,
    {
        #[pin]
        inner: TrackedStream<S>,
    }
}

impl<S> RequestIdStream<S>
where
    S: Stream,
    S::Item: ChunkItem,
{
    pub fn session(&self) -> &StreamSession<ChunkOf<S>> {
        self.inner.session()
    }
}

impl<S> Stream for RequestIdStream<S>
where
    S: Stream,
    S::Item: ChunkItem,
{
    type Item = (S::Item, Option<RequestId>);

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.project().inner.poll_step(cx)
    }
}

pin_project! {
    /// See [`TrackedStream::text_stream`].
    pub struct TextStream<S>
    where
        S: Stream,
        S::Item: ChunkItem,
    {
        #[pin]
        inner: TrackedStream<S>,
    }
}

impl<S> TextStream<S>
where
    S: Stream,
    S::Item: ChunkItem,
{
    pub fn session(&self) -> &StreamSession<ChunkOf<S>> {
        self.inner.session()
    }
}

impl<S> Stream for TextStream<S>
where
    S: Stream,
    S::Item: ChunkItem,
{
    type Item = <S::Item as ChunkItem>::Text;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let mut this = self.project();
        loop {
            let Some(item) = ready!(this.inner.as_mut().poll_next(cx)) else {
                return Poll::Ready(None);
            };
            if let Some(text) = item.into_text() {
                return Poll::Ready(Some(text));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::AnthropicChunk;
    use crate::test_support::{backend, block_on_plain, RecordingTransport};
    use crate::types::ProviderType;
    use futures_util::{stream, StreamExt};
    use serde_json::{json, Value};

    fn rt() -> tokio::runtime::Runtime {
        tokio::runtime::Runtime::new().unwrap()
    }

    fn chunk(value: Value) -> AnthropicChunk {
        serde_json::from_value(value).unwrap()
    }

    fn message_stream() -> Vec<AnthropicChunk> {
        vec![
            chunk(json!({"type": "message_start", "message": {
                "id": "msg_1", "type": "message", "role": "assistant", "content": [],
                "model": "claude-3-haiku-20240307", "stop_reason": null, "stop_sequence": null,
                "usage": {"input_tokens": 5, "output_tokens": 1}
            }})),
            chunk(json!({"type": "content_block_start", "index": 0,
                "content_block": {"type": "text", "text": ""}})),
            chunk(json!({"type": "content_block_delta", "index": 0,
                "delta": {"type": "text_delta", "text": "Hi"}})),
            chunk(json!({"type": "content_block_delta", "index": 0,
                "delta": {"type": "text_delta", "text": " there"}})),
            chunk(json!({"type": "content_block_stop", "index": 0})),
            chunk(json!({"type": "message_delta",
                "delta": {"stop_reason": "end_turn", "stop_sequence": null},
                "usage": {"output_tokens": 3}})),
            chunk(json!({"type": "message_stop"})),
        ]
    }

    fn call() -> CallMetadata {
        CallMetadata::new("anthropic.messages.create", ProviderType::Anthropic)
    }

    #[test]
    fn test_forwards_every_chunk_and_reports_once() {
        let rt = rt();
        let transport = RecordingTransport::ok(json!({"success": true, "request_id": "r-1"}));
        let chunks = message_stream();

        let seen: Vec<AnthropicChunk> = rt.block_on(
            TrackedStream::new(stream::iter(chunks.clone()), call(), backend(&transport)).collect(),
        );

        assert_eq!(seen, chunks);
        assert_eq!(transport.count(), 1);
        let body = transport.requests()[0].body.clone().unwrap();
        assert_eq!(body["request_response"]["content"][0]["text"], "Hi there");
        assert_eq!(body["request_response"]["usage"], Value::Null);
    }

    #[test]
    fn test_report_sent_before_terminal_item_is_yielded() {
        let rt = rt();
        let transport = RecordingTransport::ok(json!({"success": true}));
        rt.block_on(async {
            let mut tracked =
                TrackedStream::new(stream::iter(message_stream()), call(), backend(&transport));
            for _ in 0..6 {
                tracked.next().await.unwrap();
            }
            assert_eq!(transport.count(), 0);

            let last = tracked.next().await.unwrap();
            assert!(matches!(
                last,
                AnthropicChunk::Event(crate::provider::anthropic::StreamEvent::MessageStop)
            ));
            assert_eq!(transport.count(), 1);
            assert!(tracked.next().await.is_none());
        });
    }

    #[test]
    fn test_abandoned_stream_is_never_reported() {
        let rt = rt();
        let transport = RecordingTransport::ok(json!({"success": true}));
        rt.block_on(async {
            let mut tracked =
                TrackedStream::new(stream::iter(message_stream()), call(), backend(&transport));
            tracked.next().await;
            tracked.next().await;
            assert_eq!(tracked.session().results().len(), 2);
        });
        assert_eq!(transport.count(), 0);
    }

    #[test]
    fn test_request_ids_and_backend_failure() {
        let rt = rt();

        let ok = RecordingTransport::ok(json!({"success": true, "request_id": 12}));
        let ids: Vec<Option<RequestId>> = rt.block_on(
            TrackedStream::new(
                stream::iter(message_stream()),
                call().return_request_id(true),
                backend(&ok),
            )
            .with_request_ids()
            .map(|(_, id)| id)
            .collect(),
        );
        assert_eq!(ids.len(), 7);
        assert_eq!(ids[6], Some(RequestId::from("12")));
        assert!(ids[..6].iter().all(Option::is_none));

        let down = RecordingTransport::unreachable();
        let pairs: Vec<_> = rt.block_on(
            TrackedStream::new(
                stream::iter(message_stream()),
                call().return_request_id(true),
                backend(&down),
            )
            .with_request_ids()
            .collect(),
        );
        assert_eq!(pairs.len(), 7);
        assert!(pairs.iter().all(|(_, id)| id.is_none()));
        assert_eq!(down.count(), 1);
    }

    #[test]
    fn test_text_view() {
        let rt = rt();
        let transport = RecordingTransport::ok(json!({"success": true}));
        let text: Vec<String> = rt.block_on(
            TrackedStream::new(stream::iter(message_stream()), call(), backend(&transport))
                .text_stream()
                .collect(),
        );
        assert_eq!(text.concat(), "Hi there");
        assert_eq!(transport.count(), 1);
    }

    #[test]
    fn test_polled_outside_a_runtime() {
        let transport = RecordingTransport::ok(json!({"success": true, "request_id": "r-2"}));
        let chunks = message_stream();

        let pairs: Vec<(AnthropicChunk, Option<RequestId>)> = block_on_plain(
            TrackedStream::new(
                stream::iter(chunks.clone()),
                call().return_request_id(true),
                backend(&transport),
            )
            .with_request_ids()
            .collect(),
        );

        assert_eq!(pairs.len(), chunks.len());
        assert!(pairs.iter().zip(&chunks).all(|((seen, _), sent)| seen == sent));
        assert_eq!(pairs[6].1, Some(RequestId::from("r-2")));
        assert_eq!(transport.count(), 1);
    }
}
