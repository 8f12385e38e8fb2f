//! Decoding provider streams into typed chunks.
//!
//! Providers stream Server-Sent Events: `data: {json}` lines, optionally
//! preceded by `event:` lines, terminated by `data: [DONE]` (OpenAI) or by
//! simply closing the connection (Anthropic). Captured streams are also
//! accepted as JSON Lines, one chunk object per line.
//!
//! - [`read_chunks`] reads a blocking source (a file, a pipe)
//! - [`SseChunkStream`] decodes an async byte stream, such as a
//!   `reqwest` response body
//!
//! Both yield `Result<chunk>`; a line that fails to decode is an `Err` item
//! and decoding carries on with the next line.

use std::collections::VecDeque;
use std::fmt;
use std::io::BufRead;
use std::marker::PhantomData;
use std::pin::Pin;
use std::task::{ready, Context, Poll};

use futures_util::Stream;
use pin_project_lite::pin_project;
use serde::de::DeserializeOwned;
use tracing::trace;

use crate::error::{Result, TrackError};

/// One classified line of an event stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SseLine<'a> {
    /// A JSON payload
    Data(&'a str),
    /// The `[DONE]` sentinel
    Done,
    /// Blank lines, comments, `event:`/`id:`/`retry:` fields
    Skip,
}

pub fn parse_line(line: &str) -> SseLine<'_> {
    let line = line.trim_end_matches('\r');
    let data = if let Some(data) = line.strip_prefix("data:") {
        data.trim_start()
    } else if line.trim_start().starts_with('{') {
        line.trim_start()
    } else {
        return SseLine::Skip;
    };

    match data.trim_end() {
        "" => SseLine::Skip,
        "[DONE]" => SseLine::Done,
        payload => SseLine::Data(payload),
    }
}

fn decode<C: DeserializeOwned>(data: &str) -> Result<C> {
    Ok(serde_json::from_str(data)?)
}

// --- Blocking sources ---

/// Iterator over the chunks of a blocking SSE or JSONL source.
pub struct ChunkReader<C, R> {
    lines: std::io::Lines<R>,
    done: bool,
    _chunk: PhantomData<fn() -> C>,
}

pub fn read_chunks<C, R>(reader: R) -> ChunkReader<C, R>
where
    C: DeserializeOwned,
    R: BufRead,
{
    ChunkReader {
        lines: reader.lines(),
        done: false,
        _chunk: PhantomData,
    }
}

impl<C, R> Iterator for ChunkReader<C, R>
where
    C: DeserializeOwned,
    R: BufRead,
{
    type Item = Result<C>;

    fn next(&mut self) -> Option<Result<C>> {
        while !self.done {
            let line = match self.lines.next()? {
                Ok(line) => line,
                Err(e) => {
                    self.done = true;
                    return Some(Err(TrackError::Stream(format!(
                        "failed to read chunk source: {}",
                        e
                    ))));
                }
            };
            match parse_line(&line) {
                SseLine::Data(data) => return Some(decode(data)),
                SseLine::Done => self.done = true,
                SseLine::Skip => {}
            }
        }
        None
    }
}

// --- Async byte streams ---

pin_project! {
    /// Decodes an async stream of byte chunks into typed chunks.
    ///
    /// Network reads may split lines (and UTF-8 sequences) anywhere, so
    /// bytes are buffered until a full line is available.
    pub struct SseChunkStream<S, C> {
        #[pin]
        inner: S,
        buffer: Vec<u8>,
        ready: VecDeque<Result<C>>,
        done: bool,
    }
}

impl<S, C> SseChunkStream<S, C> {
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            buffer: Vec::new(),
            ready: VecDeque::new(),
            done: false,
        }
    }
}

fn push_line<C: DeserializeOwned>(line: &[u8], ready: &mut VecDeque<Result<C>>, done: &mut bool) {
    if *done {
        return;
    }
    let line = String::from_utf8_lossy(line);
    match parse_line(&line) {
        SseLine::Data(data) => ready.push_back(decode(data)),
        SseLine::Done => *done = true,
        SseLine::Skip => {}
    }
}

impl<S, B, E, C> Stream for SseChunkStream<S, C>
where
    S: Stream<Item = std::result::Result<B, E>>,
    B: AsRef<[u8]>,
    E: fmt::Display,
    C: DeserializeOwned,
{
    type Item = Result<C>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Result<C>>> {
        let mut this = self.project();
        loop {
            if let Some(item) = this.ready.pop_front() {
                return Poll::Ready(Some(item));
            }
            if *this.done {
                return Poll::Ready(None);
            }

            match ready!(this.inner.as_mut().poll_next(cx)) {
                Some(Ok(bytes)) => {
                    this.buffer.extend_from_slice(bytes.as_ref());
                    while let Some(pos) = this.buffer.iter().position(|b| *b == b'\n') {
                        let line: Vec<u8> = this.buffer.drain(..=pos).collect();
                        push_line(&line[..pos], this.ready, this.done);
                    }
                    trace!(pending = this.buffer.len(), "sse bytes buffered");
                }
                Some(Err(e)) => {
                    this.ready
                        .push_back(Err(TrackError::Stream(format!("stream read error: {}", e))));
                    *this.done = true;
                }
                None => {
                    let rest = std::mem::take(this.buffer);
                    push_line(&rest, this.ready, this.done);
                    *this.done = true;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::{AnthropicChunk, OpenAiChunk, ProviderChunk};
    use bytes::Bytes;
    use futures_util::{stream, StreamExt};
    use std::io::Cursor;

    fn rt() -> tokio::runtime::Runtime {
        tokio::runtime::Runtime::new().unwrap()
    }

    const OPENAI_SSE: &str = concat!(
        ": keep-alive\n",
        "data: {\"id\":\"c\",\"object\":\"chat.completion.chunk\",\"created\":1,\"model\":\"m\",",
        "\"choices\":[{\"index\":0,\"delta\":{\"role\":\"assistant\",\"content\":\"Hé\"},\"finish_reason\":null}]}\n",
        "\n",
        "data: {\"id\":\"c\",\"object\":\"chat.completion.chunk\",\"created\":1,\"model\":\"m\",",
        "\"choices\":[{\"index\":0,\"delta\":{},\"finish_reason\":\"stop\"}]}\r\n",
        "\n",
        "data: [DONE]\n",
        "data: {\"ignored\": true}\n",
    );

    const ANTHROPIC_SSE: &str = concat!(
        "event: message_start\n",
        "data: {\"type\":\"message_start\",\"message\":{\"id\":\"msg\",\"type\":\"message\",",
        "\"role\":\"assistant\",\"content\":[],\"model\":\"claude\",\"stop_reason\":null,",
        "\"stop_sequence\":null,\"usage\":{\"input_tokens\":1,\"output_tokens\":1}}}\n\n",
        "event: content_block_delta\n",
        "data: {\"type\":\"content_block_delta\",\"index\":0,\"delta\":{\"type\":\"text_delta\",\"text\":\"ok\"}}\n\n",
        "event: message_stop\n",
        "data: {\"type\":\"message_stop\"}\n\n",
    );

    #[test]
    fn test_parse_line() {
        assert_eq!(parse_line("data: {\"a\":1}"), SseLine::Data("{\"a\":1}"));
        assert_eq!(parse_line("data:{\"a\":1}\r"), SseLine::Data("{\"a\":1}"));
        assert_eq!(parse_line("data: [DONE]"), SseLine::Done);
        assert_eq!(parse_line("{\"a\":1}"), SseLine::Data("{\"a\":1}"));
        assert_eq!(parse_line("event: ping"), SseLine::Skip);
        assert_eq!(parse_line(": comment"), SseLine::Skip);
        assert_eq!(parse_line(""), SseLine::Skip);
        assert_eq!(parse_line("data: "), SseLine::Skip);
    }

    #[test]
    fn test_read_openai_sse_stops_at_done() {
        let chunks: Vec<OpenAiChunk> = read_chunks(Cursor::new(OPENAI_SSE))
            .collect::<Result<_>>()
            .unwrap();
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].delta().text, Some("Hé"));
        assert!(chunks[1].is_terminal());
    }

    #[test]
    fn test_read_anthropic_sse_and_jsonl() {
        let chunks: Vec<AnthropicChunk> = read_chunks(Cursor::new(ANTHROPIC_SSE))
            .collect::<Result<_>>()
            .unwrap();
        assert_eq!(chunks.len(), 3);
        assert!(chunks[2].is_terminal());

        let jsonl = concat!(
            "{\"completion\":\"foo\",\"stop_reason\":null}\n",
            "{\"completion\":\"bar\",\"stop_reason\":\"stop_sequence\"}\n",
        );
        let chunks: Vec<AnthropicChunk> = read_chunks(Cursor::new(jsonl))
            .collect::<Result<_>>()
            .unwrap();
        assert_eq!(chunks.len(), 2);
    }

    #[test]
    fn test_bad_line_is_an_error_item() {
        let source = "data: {not json}\n{\"completion\":\"x\",\"stop_reason\":null}\n";
        let items: Vec<Result<AnthropicChunk>> = read_chunks(Cursor::new(source)).collect();
        assert_eq!(items.len(), 2);
        assert!(matches!(items[0], Err(TrackError::Json(_))));
        assert!(items[1].is_ok());
    }

    #[test]
    fn test_async_stream_reassembles_split_lines() {
        let rt = rt();
        // 7-byte pieces split lines and the two-byte 'é' alike
        let pieces: Vec<std::result::Result<Bytes, std::io::Error>> = OPENAI_SSE
            .as_bytes()
            .chunks(7)
            .map(|piece| Ok(Bytes::copy_from_slice(piece)))
            .collect();

        let chunks: Vec<Result<OpenAiChunk>> =
            rt.block_on(SseChunkStream::new(stream::iter(pieces)).collect());
        assert_eq!(chunks.len(), 2);
        let first = chunks[0].as_ref().unwrap();
        assert_eq!(first.delta().text, Some("Hé"));
        assert!(chunks[1].as_ref().unwrap().is_terminal());
    }

    #[test]
    fn test_async_stream_flushes_unterminated_last_line() {
        let rt = rt();
        let body = "{\"completion\":\"tail\",\"stop_reason\":\"stop_sequence\"}";
        let pieces = vec![Ok::<_, std::io::Error>(Bytes::from(body))];

        let chunks: Vec<Result<AnthropicChunk>> =
            rt.block_on(SseChunkStream::new(stream::iter(pieces)).collect());
        assert_eq!(chunks.len(), 1);
        assert!(chunks[0].as_ref().unwrap().is_terminal());
    }

    #[test]
    fn test_async_read_error_ends_stream() {
        let rt = rt();
        let pieces = vec![
            Ok(Bytes::from("{\"completion\":\"a\",\"stop_reason\":null}\n")),
            Err(std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset")),
            Ok(Bytes::from("{\"completion\":\"b\",\"stop_reason\":null}\n")),
        ];

        let chunks: Vec<Result<AnthropicChunk>> =
            rt.block_on(SseChunkStream::new(stream::iter(pieces)).collect());
        assert_eq!(chunks.len(), 2);
        assert!(chunks[0].is_ok());
        assert!(matches!(chunks[1], Err(TrackError::Stream(_))));
    }
}
