//! Response normalizer.
//!
//! Provider wrappers declare what a call produced by handing the tracker a
//! [`ProviderOutput`]: either a finished response or a stream of chunks.
//! There is no guessing from type names; the variant *is* the capability tag.
//!
//! Finished responses are turned into the JSON payload the backend stores
//! with [`to_payload`].

use std::fmt;

use serde::Serialize;
use serde_json::Value;
use tracing::warn;

/// How a provider call delivered its result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseKind {
    /// A complete response object
    SingleShot,
    /// A blocking iterator of chunks
    SyncStream,
    /// An async `Stream` of chunks
    AsyncStream,
    /// An object that yields its stream when entered
    StreamManager,
}

impl fmt::Display for ResponseKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ResponseKind::SingleShot => "single-shot",
            ResponseKind::SyncStream => "sync-stream",
            ResponseKind::AsyncStream => "async-stream",
            ResponseKind::StreamManager => "stream-manager",
        };
        f.write_str(name)
    }
}

/// What a provider call returned: a response `R` or a chunk stream `S`.
#[derive(Debug)]
pub enum ProviderOutput<R, S> {
    Response(R),
    Stream(S),
}

impl<R, S> ProviderOutput<R, S> {
    /// Classify the output. `stream_kind` names the kind a `Stream` variant
    /// stands for at this call site (sync iterator or async stream).
    pub fn kind(&self, stream_kind: ResponseKind) -> ResponseKind {
        match self {
            ProviderOutput::Response(_) => ResponseKind::SingleShot,
            ProviderOutput::Stream(_) => stream_kind,
        }
    }
}

/// Turn a response into the plain JSON payload the backend stores.
///
/// A value that cannot be serialized is logged and reported as `null`
/// rather than failing the caller.
pub fn to_payload<T: Serialize + ?Sized>(response: &T) -> Value {
    match serde_json::to_value(response) {
        Ok(value) => value,
        Err(e) => {
            warn!(error = %e, "could not serialize the provider response; logging null");
            Value::Null
        }
    }
}
