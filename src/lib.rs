//! llmtap: request tracking for OpenAI and Anthropic calls.
//!
//! Wrap a provider call with a [`Tracker`] and its result is reported to the
//! tracking backend. Streams are proxied: the caller iterates them as usual
//! while every chunk is buffered, and once the provider's terminal chunk goes
//! by the stream is folded back into one response and reported.
//!
//! ```no_run
//! use llmtap::{CallMetadata, ProviderOutput, ProviderType, Tracker, TrackerConfig};
//! use llmtap::provider::OpenAiChunk;
//!
//! # fn chunks() -> Vec<OpenAiChunk> { Vec::new() }
//! let tracker = Tracker::from_config(&TrackerConfig::load()?)?;
//! let call = CallMetadata::new("openai.chat.completions.create", ProviderType::OpenAi)
//!     .tag("docs");
//! let handled = tracker.handle::<serde_json::Value, _>(
//!     call,
//!     ProviderOutput::Stream(chunks().into_iter()),
//!     0.0,
//! );
//! for chunk in handled.into_stream().into_iter().flatten() {
//!     println!("{:?}", chunk);
//! }
//! # Ok::<(), llmtap::TrackError>(())
//! ```

pub mod backend;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod normalize;
pub mod provider;
pub mod sse;
pub mod stream;
pub mod tracker;
pub mod transport;
pub mod types;

#[cfg(test)]
mod test_support;

pub use backend::{Backend, GroupId};
pub use config::TrackerConfig;
pub use error::{Result, TrackError};
pub use normalize::{ProviderOutput, ResponseKind};
pub use provider::{ChunkItem, ProviderChunk, ReassembledResponse};
pub use stream::{StreamSession, TrackedIter, TrackedManager, TrackedStream};
pub use tracker::{Handled, Tracker};
pub use transport::{HttpTransport, Transport};
pub use types::{CallMetadata, ProviderType, RequestId, RequestRecord};
