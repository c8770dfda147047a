//! Response consumption: turn raw API output into text + token usage.
//!
//! The API can answer in two shapes:
//!
//! * **Stream** (`:streamGenerateContent?alt=sse`) — server-sent events, one
//!   `data: {json}` line per chunk, blank lines in between.
//! * **Document** (`:generateContent`) — one JSON object, or a JSON array of
//!   chunk objects when the stream method is called without `alt=sse`.
//!
//! Both go through [`ResponseParser`]: feed it lines with
//! [`ResponseParser::push_line`] or a whole body with
//! [`ResponseParser::push_document`], then call [`ResponseParser::finish`].
//! Callers never see which transport was used.
//!
//! A chunk that does not parse as JSON is skipped and counted; it never
//! aborts the extraction, so one corrupt frame only loses its own text.

use crate::usage::TokenUsage;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, warn};

/// Framing marker in front of each server-sent event payload.
const SSE_DATA_PREFIX: &str = "data:";

/// One `GenerateContentResponse` chunk. Unknown fields are ignored.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ResponseChunk {
    #[serde(default)]
    candidates: Vec<Candidate>,
    #[serde(default)]
    usage_metadata: Option<UsageMetadata>,
}

#[derive(Debug, Default, Deserialize)]
struct Candidate {
    #[serde(default)]
    content: Option<CandidateContent>,
}

#[derive(Debug, Default, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Debug, Default, Deserialize)]
struct ResponsePart {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Default, Clone, Copy, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UsageMetadata {
    #[serde(default)]
    prompt_token_count: Option<u64>,
    #[serde(default)]
    candidates_token_count: Option<u64>,
    #[serde(default)]
    total_token_count: Option<u64>,
}

impl From<UsageMetadata> for TokenUsage {
    fn from(m: UsageMetadata) -> Self {
        let input = m.prompt_token_count.unwrap_or(0);
        let output = m.candidates_token_count.unwrap_or(0);
        TokenUsage {
            input_tokens: input,
            output_tokens: output,
            total_tokens: m.total_token_count.unwrap_or(input + output),
        }
    }
}

/// Result of consuming one response.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ParsedResponse {
    /// All text fragments in arrival order, concatenated (untrimmed).
    pub text: String,
    /// Reported usage; all zero when `usage_reported` is false.
    pub usage: TokenUsage,
    pub usage_reported: bool,
    /// Chunks successfully parsed.
    pub chunks: usize,
    /// Chunks dropped because they were not valid JSON.
    pub skipped_chunks: usize,
}

/// Incremental response consumer shared by both transports.
#[derive(Debug, Default)]
pub struct ResponseParser {
    out: ParsedResponse,
}

impl ResponseParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one line of a streamed body.
    ///
    /// Blank lines and SSE comments are ignored; a leading `data:` marker is
    /// stripped before parsing.
    pub fn push_line(&mut self, line: &str) {
        let line = line.trim();
        if line.is_empty() || line.starts_with(':') {
            return;
        }
        let payload = line
            .strip_prefix(SSE_DATA_PREFIX)
            .map(str::trim_start)
            .unwrap_or(line);
        if payload == "[DONE]" {
            return;
        }
        match serde_json::from_str::<Value>(payload) {
            Ok(value) => self.push_value(value),
            Err(e) => self.skip(payload, &e),
        }
    }

    /// Feed a complete non-streamed body: one chunk object or an array of them.
    pub fn push_document(&mut self, body: &str) {
        match serde_json::from_str::<Value>(body.trim()) {
            Ok(Value::Array(items)) => {
                for item in items {
                    self.push_value(item);
                }
            }
            Ok(value) => self.push_value(value),
            Err(e) => self.skip(body, &e),
        }
    }

    fn push_value(&mut self, value: Value) {
        let chunk: ResponseChunk = match serde_json::from_value(value) {
            Ok(c) => c,
            Err(e) => {
                // Valid JSON, wrong shape (e.g. `"candidates": 3`).
                warn!("Skipping response chunk with unexpected shape: {}", e);
                self.out.skipped_chunks += 1;
                return;
            }
        };
        self.out.chunks += 1;

        if let Some(content) = chunk.candidates.into_iter().next().and_then(|c| c.content) {
            for text in content.parts.into_iter().filter_map(|p| p.text) {
                self.out.text.push_str(&text);
            }
        }

        // Streamed counters are cumulative: the last chunk that reports wins.
        if let Some(meta) = chunk.usage_metadata {
            self.out.usage = meta.into();
            self.out.usage_reported = true;
        }
    }

    fn skip(&mut self, payload: &str, err: &serde_json::Error) {
        let preview: String = payload.chars().take(80).collect();
        warn!("Skipping unparseable response chunk ({}): {:?}", err, preview);
        self.out.skipped_chunks += 1;
    }

    /// Finish consumption.
    pub fn finish(self) -> ParsedResponse {
        debug!(
            "Parsed {} chunks ({} skipped), {} chars",
            self.out.chunks,
            self.out.skipped_chunks,
            self.out.text.chars().count()
        );
        self.out
    }
}

/// Consume a complete non-streamed body.
pub fn parse_document(body: &str) -> ParsedResponse {
    let mut parser = ResponseParser::new();
    parser.push_document(body);
    parser.finish()
}

/// Splits a byte stream into lines as chunks arrive from the network.
///
/// Network chunk boundaries fall anywhere, including inside a multi-byte
/// UTF-8 sequence, so bytes are buffered until a `\n` completes a line.
#[derive(Debug, Default)]
pub struct LineBuffer {
    buf: Vec<u8>,
    /// Bytes of `buf` already known to hold no `\n`.
    scanned: usize,
}

impl LineBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append bytes and hand every completed line to `on_line`.
    ///
    /// Only the newly appended bytes are searched for a line break.
    pub fn feed(&mut self, bytes: &[u8], mut on_line: impl FnMut(&str)) {
        self.buf.extend_from_slice(bytes);
        let mut start = 0;
        let mut from = self.scanned;
        while let Some(offset) = self.buf[from..].iter().position(|&b| b == b'\n') {
            let end = from + offset;
            on_line(&String::from_utf8_lossy(&self.buf[start..=end]));
            start = end + 1;
            from = start;
        }
        self.buf.drain(..start);
        self.scanned = self.buf.len();
    }

    /// Flush a trailing line that had no terminating newline.
    pub fn finish(self, mut on_line: impl FnMut(&str)) {
        if !self.buf.is_empty() {
            on_line(&String::from_utf8_lossy(&self.buf));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_stream<'a>(lines: impl IntoIterator<Item = &'a str>) -> ParsedResponse {
        let mut parser = ResponseParser::new();
        for line in lines {
            parser.push_line(line);
        }
        parser.finish()
    }

    fn sse(json: &str) -> String {
        format!("data: {json}\n\n")
    }

    #[test]
    fn stream_concatenates_fragments_in_order() {
        let body = [
            sse(r#"{"candidates":[{"content":{"role":"model","parts":[{"text":"Chapter 1\n"}]}}]}"#),
            sse(r#"{"candidates":[{"content":{"parts":[{"text":"The cell "},{"text":"is small."}]}}]}"#),
            sse(
                r#"{"candidates":[{"content":{"parts":[{"text":"\n"}]},"finishReason":"STOP"}],
                   "usageMetadata":{"promptTokenCount":1290,"candidatesTokenCount":412,"totalTokenCount":1702}}"#
                    .replace('\n', "")
                    .as_str(),
            ),
        ]
        .concat();

        let parsed = parse_stream(body.lines());
        assert_eq!(parsed.text, "Chapter 1\nThe cell is small.\n");
        assert_eq!(parsed.usage, TokenUsage::new(1290, 412, 1702));
        assert!(parsed.usage_reported);
        assert_eq!(parsed.chunks, 3);
        assert_eq!(parsed.skipped_chunks, 0);
    }

    #[test]
    fn malformed_chunk_is_skipped_not_fatal() {
        let lines = [
            r#"data: {"candidates":[{"content":{"parts":[{"text":"alpha "}]}}]}"#,
            r#"data: {"candidates":[{"content":{"parts":[{"text":"BROKEN"#,
            r#"data: {"candidates":[{"content":{"parts":[{"text":"omega"}]}}]}"#,
        ];
        let parsed = parse_stream(lines);
        assert_eq!(parsed.text, "alpha omega");
        assert_eq!(parsed.chunks, 2);
        assert_eq!(parsed.skipped_chunks, 1);
    }

    #[test]
    fn lines_without_framing_marker_are_accepted() {
        let lines = [r#"{"candidates":[{"content":{"parts":[{"text":"plain"}]}}]}"#];
        assert_eq!(parse_stream(lines).text, "plain");
    }

    #[test]
    fn missing_usage_defaults_to_zero() {
        let parsed =
            parse_document(r#"{"candidates":[{"content":{"parts":[{"text":"hello"}]}}]}"#);
        assert_eq!(parsed.text, "hello");
        assert_eq!(parsed.usage, TokenUsage::default());
        assert!(!parsed.usage_reported);
    }

    #[test]
    fn usage_counters_are_copied_exactly() {
        let parsed = parse_document(
            r#"{"candidates":[],"usageMetadata":{"promptTokenCount":9007199254740993,
                "candidatesTokenCount":7,"totalTokenCount":9007199254741000}}"#,
        );
        assert_eq!(parsed.usage.input_tokens, 9_007_199_254_740_993);
        assert_eq!(parsed.usage.output_tokens, 7);
        assert_eq!(parsed.usage.total_tokens, 9_007_199_254_741_000);
    }

    #[test]
    fn missing_total_is_derived_from_parts() {
        let parsed = parse_document(
            r#"{"usageMetadata":{"promptTokenCount":100,"candidatesTokenCount":20}}"#,
        );
        assert_eq!(parsed.usage, TokenUsage::new(100, 20, 120));
    }

    #[test]
    fn document_array_is_parsed_chunk_by_chunk() {
        let parsed = parse_document(
            r#"[{"candidates":[{"content":{"parts":[{"text":"a"}]}}]},
                {"candidates":[{"content":{"parts":[{"text":"b"}]}}],
                 "usageMetadata":{"promptTokenCount":3,"candidatesTokenCount":2,"totalTokenCount":5}}]"#,
        );
        assert_eq!(parsed.text, "ab");
        assert_eq!(parsed.chunks, 2);
        assert_eq!(parsed.usage.total_tokens, 5);
    }

    #[test]
    fn garbage_document_yields_empty_text() {
        let parsed = parse_document("<html>502 Bad Gateway</html>");
        assert_eq!(parsed.text, "");
        assert_eq!(parsed.skipped_chunks, 1);
        assert_eq!(parsed.usage, TokenUsage::default());
    }

    #[test]
    fn wrong_shape_chunk_is_skipped() {
        let parsed = parse_stream([r#"data: {"candidates": 3}"#, r#"data: [DONE]"#, ": keep-alive"]);
        assert_eq!(parsed.chunks, 0);
        assert_eq!(parsed.skipped_chunks, 1);
    }

    #[test]
    fn line_buffer_reassembles_split_lines() {
        let mut lb = LineBuffer::new();
        let mut lines = Vec::new();
        // "é" is two bytes in UTF-8; split it across two network chunks.
        let bytes = "data: caf\u{e9}\ndata: two\npartial".as_bytes();
        let split = bytes.iter().position(|&b| b == 0xC3).unwrap() + 1;
        lb.feed(&bytes[..split], |l| lines.push(l.to_string()));
        lb.feed(&bytes[split..], |l| lines.push(l.to_string()));
        lb.finish(|l| lines.push(l.to_string()));
        assert_eq!(lines, vec!["data: caf\u{e9}\n", "data: two\n", "partial"]);
    }

    #[test]
    fn long_frame_fed_byte_by_byte_is_scanned_once() {
        let frame = format!("data: {}\n", "ü".repeat(5_000));
        let tail = "data: next\n";
        let mut lb = LineBuffer::new();
        let mut lines = Vec::new();

        for byte in frame.as_bytes() {
            lb.feed(std::slice::from_ref(byte), |l| lines.push(l.to_string()));
            // Everything buffered has been searched; nothing is rescanned.
            assert_eq!(lb.scanned, lb.buf.len());
        }
        assert_eq!(lines, vec![frame.clone()]);
        assert!(lb.buf.is_empty());

        // Several lines in one chunk, with a remainder carried over.
        lb.feed(format!("{tail}{tail}data: pa").as_bytes(), |l| lines.push(l.to_string()));
        lb.feed(b"rt\n", |l| lines.push(l.to_string()));
        assert_eq!(&lines[1..], &[tail, tail, "data: part\n"]);
        assert_eq!(lb.scanned, 0);
    }
}
