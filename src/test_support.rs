//! Test doubles shared by the unit tests.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::pin::pin;
use std::sync::{Arc, Mutex, Once, OnceLock};
use std::task::{Context, Poll, Wake, Waker};
use std::thread::{self, Thread};

use serde_json::Value;
use tracing::field::{Field, Visit};
use tracing::span::{Attributes, Id, Record};
use tracing::Subscriber;
use tracing_subscriber::layer::{self, Layer, SubscriberExt};
use tracing_subscriber::registry::LookupSpan;

use crate::backend::Backend;
use crate::error::{Result, TrackError};
use crate::transport::{ApiRequest, ApiResponse, Transport};

enum Reply {
    Respond { status: u16, text: String },
    Unreachable,
}

/// Transport that records every request and answers with a canned reply.
pub(crate) struct RecordingTransport {
    requests: Mutex<Vec<ApiRequest>>,
    reply: Reply,
}

impl RecordingTransport {
    pub(crate) fn ok(body: Value) -> Arc<Self> {
        Self::status(200, &body.to_string())
    }

    pub(crate) fn status(status: u16, text: &str) -> Arc<Self> {
        Arc::new(Self {
            requests: Mutex::new(Vec::new()),
            reply: Reply::Respond {
                status,
                text: text.to_string(),
            },
        })
    }

    pub(crate) fn unreachable() -> Arc<Self> {
        Arc::new(Self {
            requests: Mutex::new(Vec::new()),
            reply: Reply::Unreachable,
        })
    }

    pub(crate) fn requests(&self) -> Vec<ApiRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub(crate) fn count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

impl Transport for RecordingTransport {
    fn send(&self, request: ApiRequest) -> Result<ApiResponse> {
        let path = request.path.clone();
        self.requests.lock().unwrap().push(request);
        match &self.reply {
            Reply::Respond { status, text } => Ok(ApiResponse {
                status: *status,
                text: text.clone(),
            }),
            Reply::Unreachable => Err(TrackError::Network {
                path,
                reason: "connection refused".to_string(),
            }),
        }
    }
}

pub(crate) fn backend(transport: &Arc<RecordingTransport>) -> Backend {
    Backend::new(transport.clone(), "test-key")
}

// --- Executor without a runtime ---

struct ParkWaker(Thread);

impl Wake for ParkWaker {
    fn wake(self: Arc<Self>) {
        self.0.unpark();
    }
}

/// Drive `future` to completion on the current thread with no tokio
/// runtime (and no reactor) around.
pub(crate) fn block_on_plain<F: Future>(future: F) -> F::Output {
    let waker = Waker::from(Arc::new(ParkWaker(thread::current())));
    let mut cx = Context::from_waker(&waker);
    let mut future = pin!(future);
    loop {
        if let Poll::Ready(output) = future.as_mut().poll(&mut cx) {
            return output;
        }
        thread::park();
    }
}

// --- Span capture ---

/// A span as seen by the capturing subscriber, with its latest field values.
#[derive(Debug, Clone)]
pub(crate) struct CapturedSpan {
    pub(crate) name: &'static str,
    pub(crate) fields: HashMap<String, String>,
}

#[derive(Default)]
pub(crate) struct SpanCapture {
    spans: Mutex<Vec<CapturedSpan>>,
    // span id -> index in `spans`; ids are reused once a span closes
    live: Mutex<HashMap<u64, usize>>,
}

impl SpanCapture {
    /// The last span named `name` whose field `key` was recorded as `value`.
    pub(crate) fn find(&self, name: &str, key: &str, value: &str) -> Option<CapturedSpan> {
        self.spans
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find(|span| {
                span.name == name && span.fields.get(key).map(String::as_str) == Some(value)
            })
            .cloned()
    }
}

struct FieldVisitor<'a>(&'a mut HashMap<String, String>);

impl Visit for FieldVisitor<'_> {
    fn record_str(&mut self, field: &Field, value: &str) {
        self.0.insert(field.name().to_string(), value.to_string());
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        self.0.insert(field.name().to_string(), format!("{:?}", value));
    }
}

struct CaptureLayer(&'static SpanCapture);

impl<S> Layer<S> for CaptureLayer
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    fn on_new_span(&self, attrs: &Attributes<'_>, id: &Id, _ctx: layer::Context<'_, S>) {
        let mut fields = HashMap::new();
        attrs.record(&mut FieldVisitor(&mut fields));
        let mut spans = self.0.spans.lock().unwrap();
        spans.push(CapturedSpan {
            name: attrs.metadata().name(),
            fields,
        });
        self.0
            .live
            .lock()
            .unwrap()
            .insert(id.into_u64(), spans.len() - 1);
    }

    fn on_record(&self, id: &Id, values: &Record<'_>, _ctx: layer::Context<'_, S>) {
        let index = self.0.live.lock().unwrap().get(&id.into_u64()).copied();
        if let Some(index) = index {
            let mut spans = self.0.spans.lock().unwrap();
            values.record(&mut FieldVisitor(&mut spans[index].fields));
        }
    }
}

/// Install (once per test binary) a global subscriber that records every
/// span, and return its capture. Global so that spans stay visible on
/// worker threads.
pub(crate) fn span_capture() -> &'static SpanCapture {
    static CAPTURE: OnceLock<SpanCapture> = OnceLock::new();
    static INSTALL: Once = Once::new();

    let capture = CAPTURE.get_or_init(SpanCapture::default);
    INSTALL.call_once(|| {
        let subscriber = tracing_subscriber::registry().with(CaptureLayer(capture));
        let _ = tracing::subscriber::set_global_default(subscriber);
    });
    capture
}
