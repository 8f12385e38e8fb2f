//! Provider adapters.
//!
//! Each supported provider declares, through [`ProviderChunk`], how to read
//! its streaming chunks:
//!
//! - **delta**: decode a chunk once into a normalized [`ChunkDelta`]
//!   (role, text, stop) so the fold never pokes at provider fields
//! - **is_terminal**: whether the chunk ends the stream
//! - **reassemble**: fold a finished stream back into one response, the
//!   record a tracked stream reports
//! - **collect_response**: rebuild the full non-streaming response object
//!   (finish reason, usage, stop reason), for stream responses
//!
//! Chunk shapes are closed enums decoded from the provider's JSON with
//! serde; there is no runtime shape sniffing.

pub mod anthropic;
pub mod openai;

use serde::{Serialize, Serializer};

use crate::types::ProviderType;

pub use anthropic::AnthropicChunk;
pub use openai::OpenAiChunk;

/// Provider-neutral view of a single chunk.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChunkDelta<'a> {
    /// Role announced by this chunk, if any
    pub role: Option<&'a str>,
    /// Text to append to the running response, if any
    pub text: Option<&'a str>,
    /// True when this chunk terminates the stream
    pub stop: bool,
}

/// A streaming chunk of a known provider.
pub trait ProviderChunk: Clone + Send + 'static {
    const PROVIDER: ProviderType;

    fn delta(&self) -> ChunkDelta<'_>;

    fn is_terminal(&self) -> bool {
        self.delta().stop
    }

    /// Fold a buffered stream, in arrival order, into one response.
    ///
    /// Callers pass at least one chunk. Never mutates the chunks.
    fn reassemble(chunks: &[Self]) -> ReassembledResponse;

    /// Rebuild the response the provider would have sent without
    /// streaming. `None` when there is nothing to rebuild from.
    fn collect_response(chunks: &[Self]) -> Option<CollectedResponse>;
}

/// What a wrapped stream yields.
///
/// Plain chunks and fallible `Result<chunk, error>` items are both
/// supported; only successful chunks are buffered.
pub trait ChunkItem {
    type Chunk: ProviderChunk;
    /// What a text-only view yields for this item.
    type Text;

    fn chunk(&self) -> Option<&Self::Chunk>;

    /// Wrap a buffered chunk back into an item.
    fn from_chunk(chunk: Self::Chunk) -> Self;

    /// Narrow the item to its text, or `None` to skip it in a text view.
    fn into_text(self) -> Option<Self::Text>;
}

impl ChunkItem for OpenAiChunk {
    type Chunk = OpenAiChunk;
    type Text = String;

    fn chunk(&self) -> Option<&Self::Chunk> {
        Some(self)
    }

    fn from_chunk(chunk: Self::Chunk) -> Self {
        chunk
    }

    fn into_text(self) -> Option<String> {
        self.delta().text.map(str::to_string)
    }
}

impl ChunkItem for AnthropicChunk {
    type Chunk = AnthropicChunk;
    type Text = String;

    fn chunk(&self) -> Option<&Self::Chunk> {
        Some(self)
    }

    fn from_chunk(chunk: Self::Chunk) -> Self {
        chunk
    }

    fn into_text(self) -> Option<String> {
        self.delta().text.map(str::to_string)
    }
}

impl<C: ProviderChunk, E> ChunkItem for Result<C, E> {
    type Chunk = C;
    type Text = Result<String, E>;

    fn chunk(&self) -> Option<&C> {
        self.as_ref().ok()
    }

    fn from_chunk(chunk: C) -> Self {
        Ok(chunk)
    }

    fn into_text(self) -> Option<Result<String, E>> {
        match self {
            Ok(chunk) => chunk.delta().text.map(|t| Ok(t.to_string())),
            Err(e) => Some(Err(e)),
        }
    }
}

/// One logical response rebuilt from a finished stream.
#[derive(Debug, Clone, PartialEq)]
pub enum ReassembledResponse {
    /// OpenAI legacy completion: last chunk with the concatenated text
    OpenAiCompletion(openai::Completion),
    /// OpenAI chat: last chunk with its first choice replaced by the
    /// accumulated `{role, content}` message
    OpenAiChat(openai::ChatStreamResult),
    /// Anthropic legacy completion: last chunk with the concatenated completion
    AnthropicCompletion(anthropic::Completion),
    /// Anthropic message stream: the opening message with one text block
    AnthropicMessage(anthropic::Message),
    /// No known shape; serializes as an empty string
    Unrecognized,
}

impl Serialize for ReassembledResponse {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            ReassembledResponse::OpenAiCompletion(c) => c.serialize(serializer),
            ReassembledResponse::OpenAiChat(c) => c.serialize(serializer),
            ReassembledResponse::AnthropicCompletion(c) => c.serialize(serializer),
            ReassembledResponse::AnthropicMessage(m) => m.serialize(serializer),
            ReassembledResponse::Unrecognized => serializer.serialize_str(""),
        }
    }
}

/// A finished stream in the provider's non-streaming response shape.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum CollectedResponse {
    OpenAiChat(openai::ChatCompletion),
    OpenAiCompletion(openai::Completion),
    AnthropicMessage(anthropic::Message),
    AnthropicCompletion(anthropic::Completion),
}
