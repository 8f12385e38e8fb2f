//! Request/response orchestrator.
//!
//! [`Tracker`] is what provider wrappers call after (or around) an SDK call:
//!
//! - a finished response is serialized and reported right away, and handed
//!   back together with the backend's request id
//! - a stream is wrapped in a proxy and handed back; it reports itself when
//!   its terminal chunk goes by
//! - or, through [`Tracker::stream_response`], a stream is consumed as
//!   stream responses that close with the backend's answer
//!
//! Reporting never changes what the caller gets from the provider.

use std::future::Future;
use std::sync::Arc;

use futures_util::{FutureExt, Stream};
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::{debug, field, info_span, Instrument, Span};

use crate::backend::Backend;
use crate::config::TrackerConfig;
use crate::error::Result;
use crate::normalize::{to_payload, ProviderOutput, ResponseKind};
use crate::provider::{ChunkItem, ProviderChunk};
use crate::stream::respond::AfterStream;
use crate::stream::{
    StreamResponseStream, StreamResponses, TrackedIter, TrackedManager, TrackedStream,
};
use crate::transport::HttpTransport;
use crate::types::{now_timestamp, CallMetadata, RequestId, RequestRecord};

/// What the caller gets back from a tracked call.
#[derive(Debug)]
pub enum Handled<R, P> {
    /// The provider's response, untouched, and its request id if one was
    /// asked for and the backend returned it
    Response {
        response: R,
        request_id: Option<RequestId>,
    },
    /// A proxy over the provider's stream
    Stream(P),
}

impl<R, P> Handled<R, P> {
    pub fn is_stream(&self) -> bool {
        matches!(self, Handled::Stream(_))
    }

    pub fn request_id(&self) -> Option<&RequestId> {
        match self {
            Handled::Response { request_id, .. } => request_id.as_ref(),
            Handled::Stream(_) => None,
        }
    }

    pub fn into_response(self) -> Option<R> {
        match self {
            Handled::Response { response, .. } => Some(response),
            Handled::Stream(_) => None,
        }
    }

    pub fn into_stream(self) -> Option<P> {
        match self {
            Handled::Stream(proxy) => Some(proxy),
            Handled::Response { .. } => None,
        }
    }
}

/// Entry point for tracked provider calls.
#[derive(Clone)]
pub struct Tracker {
    backend: Backend,
}

impl Tracker {
    pub fn new(backend: Backend) -> Self {
        Self { backend }
    }

    /// Build a tracker talking HTTP to the configured backend.
    ///
    /// The API key is resolved first, so a missing key fails before any
    /// client is built.
    pub fn from_config(config: &TrackerConfig) -> Result<Self> {
        let api_key = config.api_key()?;
        let transport = HttpTransport::new(&config.base_url, config.timeout())?;
        Ok(Self::new(Backend::new(Arc::new(transport), api_key)))
    }

    pub fn backend(&self) -> &Backend {
        &self.backend
    }

    // --- Blocking call sites ---

    /// Report a finished response, or wrap a blocking chunk iterator.
    pub fn handle<R, I>(
        &self,
        call: CallMetadata,
        output: ProviderOutput<R, I>,
        request_end_time: f64,
    ) -> Handled<R, TrackedIter<I>>
    where
        R: Serialize,
        I: Iterator,
        I::Item: ChunkItem,
    {
        debug!(
            function = %call.function_name,
            kind = %output.kind(ResponseKind::SyncStream),
            "handling provider output"
        );
        match output {
            ProviderOutput::Response(response) => {
                let record = RequestRecord::new(&call, request_end_time, to_payload(&response));
                let request_id = self.backend.track_request(&record, call.return_request_id);
                Handled::Response {
                    response,
                    request_id,
                }
            }
            ProviderOutput::Stream(stream) => {
                Handled::Stream(TrackedIter::new(stream, call, self.backend.clone()))
            }
        }
    }

    /// Run a blocking provider call and track its result.
    ///
    /// A failed call is returned as is and nothing is reported.
    pub fn track<R, I, E, F>(
        &self,
        call: CallMetadata,
        provider_call: F,
    ) -> std::result::Result<Handled<R, TrackedIter<I>>, E>
    where
        F: FnOnce() -> std::result::Result<ProviderOutput<R, I>, E>,
        R: Serialize,
        I: Iterator,
        I::Item: ChunkItem,
    {
        let output = provider_call()?;
        let request_end_time = now_timestamp();
        Ok(self.handle(call, output, request_end_time))
    }

    /// Hold a stream manager until it is entered.
    pub fn track_manager<M>(&self, call: CallMetadata, manager: M) -> TrackedManager<M> {
        debug!(
            function = %call.function_name,
            kind = %ResponseKind::StreamManager,
            "handling provider output"
        );
        TrackedManager::new(manager, call, self.backend.clone())
    }

    // --- Async call sites ---

    /// [`Tracker::handle`] for async streams. A finished response is
    /// reported through the dispatch bridge.
    pub async fn handle_async<R, S>(
        &self,
        call: CallMetadata,
        output: ProviderOutput<R, S>,
        request_end_time: f64,
    ) -> Handled<R, TrackedStream<S>>
    where
        R: Serialize,
        S: Stream,
        S::Item: ChunkItem,
    {
        debug!(
            function = %call.function_name,
            kind = %output.kind(ResponseKind::AsyncStream),
            "handling provider output"
        );
        match output {
            ProviderOutput::Response(response) => {
                let record = RequestRecord::new(&call, request_end_time, to_payload(&response));
                let request_id = self
                    .backend
                    .track_request_async(record, call.return_request_id)
                    .await;
                Handled::Response {
                    response,
                    request_id,
                }
            }
            ProviderOutput::Stream(stream) => {
                Handled::Stream(TrackedStream::new(stream, call, self.backend.clone()))
            }
        }
    }

    /// Await a provider call, stamp its end time, and track its result.
    ///
    /// The call runs in a `tracked_call` span, a child of the caller's
    /// current span. Once the provider has answered, the reported payload
    /// (or `"<stream>"`) is recorded as `function_output` on both spans.
    /// The caller's span only keeps it if it declares that field, e.g.
    /// `info_span!("chat", function_output = tracing::field::Empty)`.
    pub async fn track_async<R, S, E, Fut>(
        &self,
        call: CallMetadata,
        provider_call: Fut,
    ) -> std::result::Result<Handled<R, TrackedStream<S>>, E>
    where
        Fut: Future<Output = std::result::Result<ProviderOutput<R, S>, E>>,
        R: Serialize,
        S: Stream,
        S::Item: ChunkItem,
    {
        let caller = Span::current();
        let span = info_span!(
            "tracked_call",
            function = %call.function_name,
            function_output = field::Empty
        );

        async move {
            let output = provider_call.await?;
            let request_end_time = now_timestamp();

            let function_output = match &output {
                ProviderOutput::Response(response) => to_payload(response).to_string(),
                ProviderOutput::Stream(_) => "<stream>".to_string(),
            };
            Span::current().record("function_output", field::display(&function_output));
            caller.record("function_output", field::display(&function_output));

            Ok::<_, E>(self.handle_async(call, output, request_end_time).await)
        }
        .instrument(span)
        .await
    }

    // --- Stream responses ---

    /// Consume a blocking stream as [`StreamResponse`](crate::stream::StreamResponse) items:
    /// one item per chunk, then, once the stream is exhausted, a report in
    /// the provider's non-streaming shape and a closing item carrying the
    /// backend's `request_id` and `prompt_blueprint`.
    pub fn stream_response<I>(
        &self,
        call: CallMetadata,
        stream: I,
    ) -> StreamResponses<I, impl FnOnce(Value) -> Map<String, Value>>
    where
        I: Iterator,
        I::Item: ChunkItem,
    {
        let call = for_chunks::<<I::Item as ChunkItem>::Chunk>(call);
        let backend = self.backend.clone();
        StreamResponses::new(stream, move |response| {
            backend.track_record(&RequestRecord::new(&call, now_timestamp(), response))
        })
    }

    /// [`Tracker::stream_response`] for async streams; the report goes
    /// through the dispatch bridge.
    pub fn stream_response_async<S>(
        &self,
        call: CallMetadata,
        stream: S,
    ) -> StreamResponseStream<S, impl FnOnce(Value) -> AfterStream>
    where
        S: Stream,
        S::Item: ChunkItem,
    {
        let call = for_chunks::<<S::Item as ChunkItem>::Chunk>(call);
        let backend = self.backend.clone();
        StreamResponseStream::new(stream, move |response| {
            let record = RequestRecord::new(&call, now_timestamp(), response);
            async move { backend.track_record_async(record).await }.boxed()
        })
    }
}

/// The chunk type decides the provider a stream is reported under.
fn for_chunks<C: ProviderChunk>(mut call: CallMetadata) -> CallMetadata {
    call.provider_type = C::PROVIDER;
    call
}
