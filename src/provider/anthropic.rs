//! Anthropic streaming chunks.
//!
//! Two stream shapes exist:
//! - **Messages API** (`/v1/messages`, `stream: true`): a sequence of typed
//!   events, `message_start` → `content_block_*` → `message_delta` →
//!   `message_stop`
//! - **Legacy Text Completions** (`/v1/complete`): each event carries a
//!   `completion` text fragment, the last one a `stop_reason`
//!
//! Key differences from OpenAI:
//! - the end of a message stream is an explicit `message_stop` event
//!   rather than a finish reason on a choice
//! - text lives in content blocks, not in choices

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::{ChunkDelta, CollectedResponse, ProviderChunk, ReassembledResponse};
use crate::types::ProviderType;

// --- Chunk Types ---

/// One chunk of an Anthropic stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AnthropicChunk {
    Event(StreamEvent),
    Completion(Completion),
}

/// Messages API stream events.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    MessageStart {
        message: Message,
    },
    ContentBlockStart {
        index: u32,
        content_block: ContentBlock,
    },
    ContentBlockDelta {
        index: u32,
        delta: BlockDelta,
    },
    ContentBlockStop {
        index: u32,
    },
    MessageDelta {
        delta: MessageDeltaBody,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        usage: Option<DeltaUsage>,
    },
    MessageStop,
    Ping,
    Error {
        error: Value,
    },
}

/// Legacy completion event; also the shape of a reassembled legacy stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Completion {
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(default)]
    pub id: String,
    pub completion: String,
    #[serde(default)]
    pub model: String,
    #[serde(default)]
    pub stop_reason: Option<String>,
    /// Older streams flag their last event with `stop: true`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    #[serde(rename = "type", default = "message_type")]
    pub kind: String,
    pub role: String,
    #[serde(default)]
    pub content: Vec<ContentBlock>,
    #[serde(default)]
    pub model: String,
    #[serde(default)]
    pub stop_reason: Option<String>,
    #[serde(default)]
    pub stop_sequence: Option<String>,
    #[serde(default)]
    pub usage: Option<Usage>,
}

fn message_type() -> String {
    "message".to_string()
}

/// A content block; fields other than `type` and `text` are kept verbatim.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentBlock {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ContentBlock {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            kind: "text".to_string(),
            text: Some(text.into()),
            extra: Map::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlockDelta {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub partial_json: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MessageDeltaBody {
    #[serde(default)]
    pub stop_reason: Option<String>,
    #[serde(default)]
    pub stop_sequence: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Usage {
    #[serde(default)]
    pub input_tokens: u64,
    #[serde(default)]
    pub output_tokens: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeltaUsage {
    #[serde(default)]
    pub output_tokens: u64,
}

// --- Implementation ---

impl Completion {
    fn is_stop(&self) -> bool {
        self.stop_reason.is_some() || matches!(self.stop, Some(Value::Bool(true)))
    }
}

impl ProviderChunk for AnthropicChunk {
    const PROVIDER: ProviderType = ProviderType::Anthropic;

    fn delta(&self) -> ChunkDelta<'_> {
        match self {
            AnthropicChunk::Completion(c) => ChunkDelta {
                role: None,
                text: Some(c.completion.as_str()),
                stop: c.is_stop(),
            },
            AnthropicChunk::Event(event) => match event {
                StreamEvent::MessageStart { message } => ChunkDelta {
                    role: Some(message.role.as_str()),
                    text: None,
                    stop: message.stop_reason.is_some(),
                },
                StreamEvent::ContentBlockStart { content_block, .. } => ChunkDelta {
                    text: content_block.text.as_deref(),
                    ..ChunkDelta::default()
                },
                StreamEvent::ContentBlockDelta { delta, .. } => ChunkDelta {
                    text: delta.text.as_deref(),
                    ..ChunkDelta::default()
                },
                StreamEvent::MessageStop => ChunkDelta {
                    stop: true,
                    ..ChunkDelta::default()
                },
                StreamEvent::ContentBlockStop { .. }
                | StreamEvent::MessageDelta { .. }
                | StreamEvent::Ping
                | StreamEvent::Error { .. } => ChunkDelta::default(),
            },
        }
    }

    fn reassemble(chunks: &[Self]) -> ReassembledResponse {
        let text: String = chunks.iter().filter_map(|c| c.delta().text).collect();

        match chunks.last() {
            Some(AnthropicChunk::Event(StreamEvent::MessageStop)) => {
                message_from_events(chunks, text)
            }
            Some(AnthropicChunk::Completion(last)) => {
                let mut result = last.clone();
                result.completion = text;
                ReassembledResponse::AnthropicCompletion(result)
            }
            _ => ReassembledResponse::Unrecognized,
        }
    }

    fn collect_response(chunks: &[Self]) -> Option<CollectedResponse> {
        match chunks.first()? {
            AnthropicChunk::Event(_) => {
                Some(CollectedResponse::AnthropicMessage(collect_message(chunks)))
            }
            AnthropicChunk::Completion(_) => {
                collect_completion(chunks).map(CollectedResponse::AnthropicCompletion)
            }
        }
    }
}

/// Rebuild a message from a finished event stream: the `message_start`
/// template, usage cleared, holding a single block shaped like the
/// stream's first content block.
fn message_from_events(chunks: &[AnthropicChunk], text: String) -> ReassembledResponse {
    let Some(AnthropicChunk::Event(StreamEvent::MessageStart { message })) = chunks.first() else {
        return ReassembledResponse::Unrecognized;
    };
    let mut message = message.clone();
    message.usage = None;

    let mut block = match chunks.get(1) {
        Some(AnthropicChunk::Event(StreamEvent::ContentBlockStart { content_block, .. })) => {
            content_block.clone()
        }
        _ => ContentBlock::text(""),
    };
    block.text = Some(text);
    message.content = vec![block];

    for chunk in chunks {
        if let AnthropicChunk::Event(StreamEvent::MessageDelta { delta, .. }) = chunk {
            if delta.stop_reason.is_some() {
                message.stop_reason = delta.stop_reason.clone();
                message.stop_sequence = delta.stop_sequence.clone();
            }
        }
    }

    ReassembledResponse::AnthropicMessage(message)
}

/// Rebuild the full non-streaming message: the `message_start` message
/// (or an empty assistant message), all `text_delta`s in one text block,
/// and the output tokens and stop reason from `message_delta`.
fn collect_message(chunks: &[AnthropicChunk]) -> Message {
    let mut message = Message {
        id: String::new(),
        kind: message_type(),
        role: "assistant".to_string(),
        content: Vec::new(),
        model: String::new(),
        stop_reason: Some("stop_sequence".to_string()),
        stop_sequence: None,
        usage: Some(Usage::default()),
    };
    let mut text = String::new();

    for chunk in chunks {
        let AnthropicChunk::Event(event) = chunk else {
            continue;
        };
        match event {
            StreamEvent::MessageStart { message: start } => message = start.clone(),
            StreamEvent::ContentBlockDelta { delta, .. } if delta.kind == "text_delta" => {
                text.push_str(delta.text.as_deref().unwrap_or_default());
            }
            StreamEvent::MessageDelta { delta, usage } => {
                if let Some(usage) = usage {
                    message.usage.get_or_insert_with(Usage::default).output_tokens =
                        usage.output_tokens;
                }
                message.stop_reason = delta.stop_reason.clone();
                message.stop_sequence = delta.stop_sequence.clone();
            }
            _ => {}
        }
    }

    message.content.push(ContentBlock::text(text));
    message
}

fn collect_completion(chunks: &[AnthropicChunk]) -> Option<Completion> {
    let completions = || {
        chunks.iter().filter_map(|chunk| match chunk {
            AnthropicChunk::Completion(c) => Some(c),
            AnthropicChunk::Event(_) => None,
        })
    };
    let last = completions().last()?;

    Some(Completion {
        kind: Some("completion".to_string()),
        id: last.id.clone(),
        completion: completions().map(|c| c.completion.as_str()).collect(),
        model: last.model.clone(),
        stop_reason: Some(last.stop_reason.clone().unwrap_or_else(|| "stop".to_string())),
        stop: None,
    })
}
