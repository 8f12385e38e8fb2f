//! Stream managers.
//!
//! Some SDKs hand back an object that has to be *entered* before it yields
//! chunks (a scoped stream). [`TrackedManager`] holds such an object with
//! the frozen call snapshot; entering it unwraps one layer and wraps the
//! inner stream in a fresh proxy. Leaving the scope is plain `drop` and
//! sends nothing.

use async_trait::async_trait;
use futures_util::Stream;

use super::iter::TrackedIter;
use super::tracked::TrackedStream;
use crate::backend::Backend;
use crate::provider::ChunkItem;
use crate::types::CallMetadata;

/// An object that yields a blocking chunk iterator when entered.
pub trait StreamManager {
    type Stream: Iterator;

    fn enter(self) -> Self::Stream;
}

/// An object that yields an async chunk stream when entered.
#[async_trait]
pub trait AsyncStreamManager: Send {
    type Stream: Stream + Send;

    async fn enter(self) -> Self::Stream;
}

/// A stream manager whose stream will be tracked once entered.
pub struct TrackedManager<M> {
    manager: M,
    call: CallMetadata,
    backend: Backend,
}

impl<M> TrackedManager<M> {
    pub fn new(manager: M, call: CallMetadata, backend: Backend) -> Self {
        Self {
            manager,
            call,
            backend,
        }
    }

    pub fn get_ref(&self) -> &M {
        &self.manager
    }

    pub fn enter(self) -> TrackedIter<M::Stream>
    where
        M: StreamManager,
        <M::Stream as Iterator>::Item: ChunkItem,
    {
        TrackedIter::new(self.manager.enter(), self.call, self.backend)
    }

    pub async fn enter_async(self) -> TrackedStream<M::Stream>
    where
        M: AsyncStreamManager,
        <M::Stream as Stream>::Item: ChunkItem,
    {
        let stream = self.manager.enter().await;
        TrackedStream::new(stream, self.call, self.backend)
    }
}
