//! Stream accumulation and reassembly.
//!
//! Key concepts:
//! - **Session**: the chunk buffer of one stream plus the call snapshot
//!   taken when the stream was created. See [`StreamSession`].
//! - **Proxy**: wraps the provider's stream and yields its items unchanged.
//!   [`TrackedIter`] for blocking iterators, [`TrackedStream`] for async
//!   streams.
//! - **Terminal chunk**: the chunk that ends the stream by provider rules.
//!   Seeing it triggers reassembly and a single report to the backend.
//!
//! Stopping early, or a stream that ends without a terminal chunk, sends
//! nothing. The buffer is still available from the session.
//!
//! [`StreamResponses`] is the other way to consume a stream: it reports on
//! exhaustion, in the provider's non-streaming shape, and closes with the
//! backend's answer.

pub mod iter;
pub mod manager;
pub mod respond;
pub mod session;
pub mod tracked;

pub use iter::{RequestIdIter, TextIter, TrackedIter};
pub use manager::{AsyncStreamManager, StreamManager, TrackedManager};
pub use respond::{StreamResponse, StreamResponseStream, StreamResponses};
pub use session::StreamSession;
pub use tracked::{RequestIdStream, TextStream, TrackedStream};
