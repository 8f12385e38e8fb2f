//! The state shared by every tracked stream: the chunk buffer, the frozen
//! call snapshot and the dispatched flag.

use tracing::{debug, trace};

use crate::normalize::to_payload;
use crate::provider::{ProviderChunk, ReassembledResponse};
use crate::types::{now_timestamp, CallMetadata, RequestRecord};

/// Accumulation state of one stream.
///
/// Chunks are buffered in arrival order. The first terminal chunk turns the
/// buffer into a [`RequestRecord`]; later chunks are still buffered but
/// never produce a second record.
#[derive(Debug, Clone)]
pub struct StreamSession<C> {
    results: Vec<C>,
    call: CallMetadata,
    dispatched: bool,
}

impl<C: ProviderChunk> StreamSession<C> {
    pub fn new(mut call: CallMetadata) -> Self {
        if call.provider_type != C::PROVIDER {
            debug!(
                declared = %call.provider_type,
                chunks = %C::PROVIDER,
                "provider type follows the chunk type"
            );
            call.provider_type = C::PROVIDER;
        }
        Self {
            results: Vec::new(),
            call,
            dispatched: false,
        }
    }

    pub fn call(&self) -> &CallMetadata {
        &self.call
    }

    /// Every chunk seen so far, in arrival order.
    pub fn results(&self) -> &[C] {
        &self.results
    }

    /// True once the terminal chunk has produced a record.
    pub fn is_dispatched(&self) -> bool {
        self.dispatched
    }

    /// Whether the backend's request id should be parsed and surfaced.
    pub fn wants_request_id(&self) -> bool {
        self.call.return_request_id
    }

    /// Buffer `chunk`. Returns the record to report when `chunk` is the
    /// first terminal chunk of the session.
    pub fn observe(&mut self, chunk: &C) -> Option<RequestRecord> {
        self.results.push(chunk.clone());
        trace!(buffered = self.results.len(), "chunk buffered");

        if self.dispatched || !chunk.is_terminal() {
            return None;
        }
        self.dispatched = true;

        let request_end_time = now_timestamp();
        let response = C::reassemble(&self.results);
        debug!(
            function = %self.call.function_name,
            chunks = self.results.len(),
            "stream finished, reporting reassembled response"
        );
        Some(RequestRecord::new(
            &self.call,
            request_end_time,
            to_payload(&response),
        ))
    }

    /// Reassemble whatever has been buffered, terminal chunk or not.
    /// `None` while the buffer is empty.
    pub fn reassemble(&self) -> Option<ReassembledResponse> {
        if self.results.is_empty() {
            return None;
        }
        Some(C::reassemble(&self.results))
    }
}
