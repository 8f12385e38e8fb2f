//! OpenAI streaming chunks.
//!
//! Two stream shapes exist:
//! - **Chat completions** (`/v1/chat/completions`, `stream: true`): every
//!   choice carries a `delta` with optional `role` and `content`
//! - **Legacy completions** (`/v1/completions`): every choice carries a
//!   `text` fragment
//!
//! A stream ends when the first choice reports `finish_reason` "stop" or
//! "length".

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{ChunkDelta, CollectedResponse, ProviderChunk, ReassembledResponse};
use crate::types::ProviderType;

// --- Chunk Types ---

/// One chunk of an OpenAI stream, decoded by shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OpenAiChunk {
    Chat(ChatCompletionChunk),
    Completion(Completion),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatCompletionChunk {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub object: String,
    #[serde(default)]
    pub created: i64,
    #[serde(default)]
    pub model: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_fingerprint: Option<String>,
    pub choices: Vec<ChatChunkChoice>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatChunkChoice {
    #[serde(default)]
    pub index: u32,
    pub delta: ChatDelta,
    #[serde(default)]
    pub finish_reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub logprobs: Option<Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChatDelta {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<Value>>,
}

/// Legacy completion object; used both for stream chunks and for the
/// reassembled response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Completion {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub object: String,
    #[serde(default)]
    pub created: i64,
    #[serde(default)]
    pub model: String,
    pub choices: Vec<CompletionChoice>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_fingerprint: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletionChoice {
    pub text: String,
    #[serde(default)]
    pub index: u32,
    #[serde(default)]
    pub logprobs: Option<Value>,
    #[serde(default)]
    pub finish_reason: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Usage {
    #[serde(default)]
    pub prompt_tokens: u64,
    #[serde(default)]
    pub completion_tokens: u64,
    #[serde(default)]
    pub total_tokens: u64,
}

// --- Reassembled Types ---

/// Role and content accumulated over a chat stream.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccumulatedMessage {
    pub role: String,
    pub content: String,
}

/// A chat stream folded into one object: the last chunk, with its first
/// choice replaced by the accumulated message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatStreamResult {
    pub id: String,
    pub object: String,
    pub created: i64,
    pub model: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_fingerprint: Option<String>,
    pub choices: Vec<ChatResultChoice>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ChatResultChoice {
    Message(AccumulatedMessage),
    Chunk(ChatChunkChoice),
}

/// Non-streaming chat completion, as `/v1/chat/completions` answers
/// without `stream: true`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatCompletion {
    pub id: String,
    pub object: String,
    pub created: i64,
    pub model: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_fingerprint: Option<String>,
    pub choices: Vec<ChatChoice>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatChoice {
    pub index: u32,
    pub message: AccumulatedMessage,
    pub finish_reason: Option<String>,
    #[serde(default)]
    pub logprobs: Option<Value>,
}

// --- Implementation ---

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Shape {
    Text,
    Delta,
}

impl OpenAiChunk {
    /// Shape of the stream as told by this chunk's first choice.
    fn shape(&self) -> Option<Shape> {
        match self {
            OpenAiChunk::Completion(c) if !c.choices.is_empty() => Some(Shape::Text),
            OpenAiChunk::Chat(c) if !c.choices.is_empty() => Some(Shape::Delta),
            _ => None,
        }
    }

    fn as_completion(&self) -> Option<&Completion> {
        match self {
            OpenAiChunk::Completion(c) => Some(c),
            OpenAiChunk::Chat(_) => None,
        }
    }

    fn as_chat(&self) -> Option<&ChatCompletionChunk> {
        match self {
            OpenAiChunk::Chat(c) => Some(c),
            OpenAiChunk::Completion(_) => None,
        }
    }
}

fn is_stop(finish_reason: Option<&str>) -> bool {
    matches!(finish_reason, Some("stop") | Some("length"))
}

impl ProviderChunk for OpenAiChunk {
    const PROVIDER: ProviderType = ProviderType::OpenAi;

    fn delta(&self) -> ChunkDelta<'_> {
        match self {
            OpenAiChunk::Completion(c) => {
                let choice = c.choices.first();
                ChunkDelta {
                    role: None,
                    text: choice.map(|ch| ch.text.as_str()),
                    stop: is_stop(choice.and_then(|ch| ch.finish_reason.as_deref())),
                }
            }
            OpenAiChunk::Chat(c) => {
                let choice = c.choices.first();
                ChunkDelta {
                    role: choice.and_then(|ch| ch.delta.role.as_deref()),
                    text: choice.and_then(|ch| ch.delta.content.as_deref()),
                    stop: is_stop(choice.and_then(|ch| ch.finish_reason.as_deref())),
                }
            }
        }
    }

    fn reassemble(chunks: &[Self]) -> ReassembledResponse {
        match chunks.first().and_then(OpenAiChunk::shape) {
            Some(Shape::Text) => reassemble_completion(chunks),
            Some(Shape::Delta) => reassemble_chat(chunks),
            None => ReassembledResponse::Unrecognized,
        }
    }

    fn collect_response(chunks: &[Self]) -> Option<CollectedResponse> {
        match chunks.first()? {
            OpenAiChunk::Chat(_) => collect_chat(chunks).map(CollectedResponse::OpenAiChat),
            OpenAiChunk::Completion(_) => {
                collect_completion(chunks).map(CollectedResponse::OpenAiCompletion)
            }
        }
    }
}

fn reassemble_completion(chunks: &[OpenAiChunk]) -> ReassembledResponse {
    let text: String = chunks
        .iter()
        .filter_map(OpenAiChunk::as_completion)
        .filter_map(|c| c.choices.first())
        .map(|choice| choice.text.as_str())
        .collect();

    let Some(last) = chunks.iter().rev().find_map(OpenAiChunk::as_completion) else {
        return ReassembledResponse::Unrecognized;
    };
    let mut result = last.clone();
    match result.choices.first_mut() {
        Some(choice) => choice.text = text,
        None => result.choices.push(CompletionChoice {
            text,
            index: 0,
            logprobs: None,
            finish_reason: None,
        }),
    }
    ReassembledResponse::OpenAiCompletion(result)
}

fn reassemble_chat(chunks: &[OpenAiChunk]) -> ReassembledResponse {
    let mut message = AccumulatedMessage::default();
    for chunk in chunks {
        let delta = chunk.delta();
        if let Some(role) = delta.role {
            message.role = role.to_string();
        }
        if let Some(text) = delta.text {
            message.content.push_str(text);
        }
    }

    let Some(last) = chunks.iter().rev().find_map(OpenAiChunk::as_chat) else {
        return ReassembledResponse::Unrecognized;
    };
    let mut choices = vec![ChatResultChoice::Message(message)];
    choices.extend(last.choices.iter().skip(1).cloned().map(ChatResultChoice::Chunk));

    ReassembledResponse::OpenAiChat(ChatStreamResult {
        id: last.id.clone(),
        object: last.object.clone(),
        created: last.created,
        model: last.model.clone(),
        system_fingerprint: last.system_fingerprint.clone(),
        choices,
        usage: last.usage.clone(),
    })
}

fn collect_chat(chunks: &[OpenAiChunk]) -> Option<ChatCompletion> {
    let chats = || chunks.iter().filter_map(OpenAiChunk::as_chat);
    let last = chats().last()?;
    let first_choice = |c: &ChatCompletionChunk| c.choices.first().cloned();

    let content: String = chats()
        .filter_map(|c| c.choices.first())
        .filter_map(|choice| choice.delta.content.as_deref())
        .collect();
    let role = chats()
        .filter_map(first_choice)
        .filter_map(|choice| choice.delta.role)
        .last()
        .unwrap_or_else(|| "assistant".to_string());
    let finish_reason = chats()
        .filter_map(first_choice)
        .filter_map(|choice| choice.finish_reason)
        .last()
        .unwrap_or_else(|| "stop".to_string());

    Some(ChatCompletion {
        id: last.id.clone(),
        object: "chat.completion".to_string(),
        created: last.created,
        model: last.model.clone(),
        system_fingerprint: chats().rev().find_map(|c| c.system_fingerprint.clone()),
        choices: vec![ChatChoice {
            index: 0,
            message: AccumulatedMessage { role, content },
            finish_reason: Some(finish_reason),
            logprobs: None,
        }],
        usage: chats().rev().find_map(|c| c.usage.clone()),
    })
}

fn collect_completion(chunks: &[OpenAiChunk]) -> Option<Completion> {
    let completions = || chunks.iter().filter_map(OpenAiChunk::as_completion);
    let last = completions().last()?;

    let text: String = completions()
        .filter_map(|c| c.choices.first())
        .map(|choice| choice.text.as_str())
        .collect();
    let finish_reason = completions()
        .filter_map(|c| c.choices.first())
        .filter_map(|choice| choice.finish_reason.clone())
        .last()
        .unwrap_or_else(|| "stop".to_string());

    Some(Completion {
        id: last.id.clone(),
        object: "text_completion".to_string(),
        created: last.created,
        model: last.model.clone(),
        choices: vec![CompletionChoice {
            text,
            index: 0,
            logprobs: None,
            finish_reason: Some(finish_reason),
        }],
        usage: completions().rev().find_map(|c| c.usage.clone()),
        system_fingerprint: completions()
            .rev()
            .find_map(|c| c.system_fingerprint.clone()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn chat_chunk(role: Option<&str>, content: Option<&str>, finish: Option<&str>) -> OpenAiChunk {
        let mut delta = serde_json::Map::new();
        if let Some(role) = role {
            delta.insert("role".to_string(), json!(role));
        }
        if let Some(content) = content {
            delta.insert("content".to_string(), json!(content));
        }
        serde_json::from_value(json!({
            "id": "chatcmpl-1",
            "object": "chat.completion.chunk",
            "created": 1700000000,
            "model": "gpt-4o",
            "choices": [{"index": 0, "delta": delta, "finish_reason": finish}]
        }))
        .unwrap()
    }

    fn text_chunk(text: &str, finish: Option<&str>) -> OpenAiChunk {
        serde_json::from_value(json!({
            "id": "cmpl-1",
            "object": "text_completion",
            "created": 1700000000,
            "model": "gpt-3.5-turbo-instruct",
            "choices": [{"text": text, "index": 0, "logprobs": null, "finish_reason": finish}]
        }))
        .unwrap()
    }

    #[test]
    fn test_decodes_by_shape() {
        assert!(matches!(chat_chunk(None, Some("x"), None), OpenAiChunk::Chat(_)));
        assert!(matches!(text_chunk("x", None), OpenAiChunk::Completion(_)));
    }

    #[test]
    fn test_terminal_on_stop_and_length() {
        assert!(!chat_chunk(None, Some("a"), None).is_terminal());
        assert!(chat_chunk(None, None, Some("stop")).is_terminal());
        assert!(text_chunk("a", Some("length")).is_terminal());
        assert!(!chat_chunk(None, None, Some("tool_calls")).is_terminal());
    }

    #[test]
    fn test_chat_reassembly_accumulates_role_and_content() {
        let chunks = vec![
            chat_chunk(None, Some("Hel"), None),
            chat_chunk(None, Some("lo"), None),
            chat_chunk(None, Some(" world"), None),
            chat_chunk(Some("assistant"), None, Some("stop")),
        ];
        let ReassembledResponse::OpenAiChat(result) = OpenAiChunk::reassemble(&chunks) else {
            panic!("expected chat result");
        };
        assert_eq!(
            result.choices[0],
            ChatResultChoice::Message(AccumulatedMessage {
                role: "assistant".to_string(),
                content: "Hello world".to_string(),
            })
        );
        assert_eq!(result.id, "chatcmpl-1");
        assert_eq!(result.model, "gpt-4o");
    }

    #[test]
    fn test_chat_role_last_non_null_wins() {
        let chunks = vec![
            chat_chunk(Some("system"), Some("a"), None),
            chat_chunk(None, Some("b"), None),
            chat_chunk(Some("assistant"), None, None),
            chat_chunk(None, None, Some("stop")),
        ];
        let ReassembledResponse::OpenAiChat(result) = OpenAiChunk::reassemble(&chunks) else {
            panic!("expected chat result");
        };
        let value = serde_json::to_value(&result).unwrap();
        assert_eq!(value["choices"][0], json!({"role": "assistant", "content": "ab"}));
    }

    #[test]
    fn test_text_reassembly_concatenates() {
        let chunks = vec![
            text_chunk("A", None),
            text_chunk("B", None),
            text_chunk("C", Some("stop")),
        ];
        let ReassembledResponse::OpenAiCompletion(result) = OpenAiChunk::reassemble(&chunks)
        else {
            panic!("expected completion");
        };
        assert_eq!(result.choices[0].text, "ABC");
        assert_eq!(result.choices[0].finish_reason.as_deref(), Some("stop"));
        // the buffered chunks are left alone
        assert_eq!(chunks[2].delta().text, Some("C"));
    }

    #[test]
    fn test_reassembly_keeps_trailing_usage_chunk_fields() {
        let usage_chunk: OpenAiChunk = serde_json::from_value(json!({
            "id": "chatcmpl-1",
            "object": "chat.completion.chunk",
            "created": 1700000000,
            "model": "gpt-4o",
            "choices": [],
            "usage": {"prompt_tokens": 5, "completion_tokens": 2, "total_tokens": 7}
        }))
        .unwrap();
        let chunks = vec![
            chat_chunk(Some("assistant"), Some("Hi"), None),
            chat_chunk(None, None, Some("stop")),
            usage_chunk,
        ];
        let ReassembledResponse::OpenAiChat(result) = OpenAiChunk::reassemble(&chunks) else {
            panic!("expected chat result");
        };
        assert_eq!(result.choices.len(), 1);
        assert_eq!(result.usage.unwrap().total_tokens, 7);
    }

    #[test]
    fn test_empty_choices_is_unrecognized() {
        let chunk: OpenAiChunk = serde_json::from_value(json!({
            "id": "x", "object": "chat.completion.chunk", "created": 0, "model": "m", "choices": []
        }))
        .unwrap();
        assert_eq!(OpenAiChunk::reassemble(&[chunk]), ReassembledResponse::Unrecognized);
    }

    #[test]
    fn test_collected_chat_matches_non_streaming_shape() {
        let usage_chunk: OpenAiChunk = serde_json::from_value(json!({
            "id": "chatcmpl-1",
            "object": "chat.completion.chunk",
            "created": 1700000000,
            "model": "gpt-4o",
            "system_fingerprint": "fp_1",
            "choices": [],
            "usage": {"prompt_tokens": 9, "completion_tokens": 3, "total_tokens": 12}
        }))
        .unwrap();
        let chunks = vec![
            chat_chunk(Some("assistant"), Some(""), None),
            chat_chunk(None, Some("Hello"), None),
            chat_chunk(None, Some(" world"), None),
            chat_chunk(None, None, Some("length")),
            usage_chunk,
        ];

        let collected = OpenAiChunk::collect_response(&chunks).unwrap();
        assert_eq!(
            serde_json::to_value(&collected).unwrap(),
            json!({
                "id": "chatcmpl-1",
                "object": "chat.completion",
                "created": 1700000000,
                "model": "gpt-4o",
                "system_fingerprint": "fp_1",
                "choices": [{
                    "index": 0,
                    "message": {"role": "assistant", "content": "Hello world"},
                    "finish_reason": "length",
                    "logprobs": null
                }],
                "usage": {"prompt_tokens": 9, "completion_tokens": 3, "total_tokens": 12}
            })
        );
    }

    #[test]
    fn test_collected_completion_defaults() {
        let chunks = vec![text_chunk("A", None), text_chunk("B", None)];
        let Some(CollectedResponse::OpenAiCompletion(result)) =
            OpenAiChunk::collect_response(&chunks)
        else {
            panic!("expected completion");
        };
        assert_eq!(result.object, "text_completion");
        assert_eq!(result.choices.len(), 1);
        assert_eq!(result.choices[0].text, "AB");
        // no finish reason streamed: the non-streaming default
        assert_eq!(result.choices[0].finish_reason.as_deref(), Some("stop"));
        assert_eq!(result.usage, None);

        assert_eq!(OpenAiChunk::collect_response(&[]), None);
    }
}
