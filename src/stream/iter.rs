//! Blocking stream proxy.
//!
//! [`TrackedIter`] wraps a provider's chunk iterator. Each `next()`:
//!
//! 1. pulls one item from the wrapped iterator (exhaustion passes through)
//! 2. buffers the chunk in the [`StreamSession`]
//! 3. on the terminal chunk, reassembles the stream and posts it to the
//!    backend inline
//! 4. hands the original item back unchanged
//!
//! The backend post uses a blocking HTTP client. Drive this iterator from
//! ordinary threads; async code should use [`TrackedStream`](super::TrackedStream).

use tracing::trace;

use super::session::StreamSession;
use crate::backend::Backend;
use crate::provider::ChunkItem;
use crate::types::{CallMetadata, RequestId};

type ChunkOf<I> = <<I as Iterator>::Item as ChunkItem>::Chunk;

/// Iterator proxy that reports the stream once it completes.
pub struct TrackedIter<I>
where
    I: Iterator,
    I::Item: ChunkItem,
{
    inner: I,
    session: StreamSession<ChunkOf<I>>,
    backend: Backend,
}

impl<I> TrackedIter<I>
where
    I: Iterator,
    I::Item: ChunkItem,
{
    pub fn new(inner: I, call: CallMetadata, backend: Backend) -> Self {
        Self {
            inner,
            session: StreamSession::new(call),
            backend,
        }
    }

    pub fn session(&self) -> &StreamSession<ChunkOf<I>> {
        &self.session
    }

    /// The wrapped iterator.
    pub fn get_ref(&self) -> &I {
        &self.inner
    }

    /// Yield `(item, request_id)` pairs. The id is only ever present on
    /// the terminal item, and only when the call opted in.
    pub fn with_request_ids(self) -> RequestIdIter<I> {
        RequestIdIter { inner: self }
    }

    /// Yield only text deltas. Every chunk is still buffered, so the
    /// report covers the whole stream.
    pub fn text_stream(self) -> TextIter<I> {
        TextIter { inner: self }
    }

    fn step(&mut self) -> Option<(I::Item, Option<RequestId>)> {
        let item = self.inner.next()?;
        let request_id = match item.chunk().and_then(|chunk| self.session.observe(chunk)) {
            Some(record) => {
                let id = self
                    .backend
                    .track_request(&record, self.session.wants_request_id());
                trace!(request_id = ?id, "stream reported");
                id
            }
            None => None,
        };
        Some((item, request_id))
    }
}

impl<I> Iterator for TrackedIter<I>
where
    I: Iterator,
    I::Item: ChunkItem,
{
    type Item = I::Item;

    fn next(&mut self) -> Option<I::Item> {
        self.step().map(|(item, _)| item)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

// --- Views ---

/// See [`TrackedIter::with_request_ids`].
pub struct RequestIdIter<I>
where
    I: Iterator,
    I::Item: ChunkItem,
{
    inner: TrackedIter<I>,
}

impl<I> RequestIdIter<I>
where
    I: Iterator,
    I::Item: ChunkItem,
{
    pub fn session(&self) -> &StreamSession<ChunkOf<I>> {
        self.inner.session()
    }
}

impl<I> Iterator for RequestIdIter<I>
where
    I: Iterator,
    I::Item: ChunkItem,
{
    type Item = (I::Item, Option<RequestId>);

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.step()
    }
}

/// See [`TrackedIter::text_stream`].
pub struct TextIter<I>
where
    I: Iterator,
    I::Item: ChunkItem,
{
    inner: TrackedIter<I>,
}

impl<I> TextIter<I>
where
    I: Iterator,
    I::Item: ChunkItem,
{
    pub fn session(&self) -> &StreamSession<ChunkOf<I>> {
        self.inner.session()
    }
}

impl<I> Iterator for TextIter<I>
where
    I: Iterator,
    I::Item: ChunkItem,
{
    type Item = <I::Item as ChunkItem>::Text;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let item = self.inner.next()?;
            if let Some(text) = item.into_text() {
                return Some(text);
            }
        }
    }
}
