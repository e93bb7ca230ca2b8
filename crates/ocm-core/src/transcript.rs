use crate::model::SessionRecord;
use chrono::DateTime;
use serde_json::Value;
use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

pub const DEFAULT_TRANSCRIPT_LIMIT: usize = 20;
/// Files at or below this size are parsed front to back in one read.
pub const FULL_SCAN_MAX_BYTES: u64 = 64 * 1024;
/// Backward read granularity for larger files.
pub const TAIL_CHUNK_BYTES: u64 = 16 * 1024;
pub const TEXT_PREVIEW_CHARS: usize = 200;
pub const TOOL_RESULT_PREVIEW_CHARS: usize = 80;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TranscriptRole {
    User,
    Assistant,
    Tool,
    Other(String),
}

impl TranscriptRole {
    pub fn from_wire(raw: &str) -> Self {
        match raw {
            "user" => TranscriptRole::User,
            "assistant" => TranscriptRole::Assistant,
            "tool" | "toolResult" => TranscriptRole::Tool,
            other => TranscriptRole::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            TranscriptRole::User => "user",
            TranscriptRole::Assistant => "assistant",
            TranscriptRole::Tool => "tool",
            TranscriptRole::Other(raw) => raw,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranscriptMessage {
    /// ISO-8601 as written in the log.
    pub timestamp: String,
    pub role: TranscriptRole,
    pub content: String,
}

impl TranscriptMessage {
    /// `HH:MM` in the timestamp's own offset, `??:??` when unreadable.
    pub fn clock_label(&self) -> String {
        let raw = self.timestamp.trim();
        if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
            return parsed.format("%H:%M").to_string();
        }
        let time_part = raw
            .split_once('T')
            .or_else(|| raw.split_once(' '))
            .map(|(_, rest)| rest);
        match time_part {
            Some(rest) if rest.len() >= 5 && rest.is_char_boundary(5) => rest[..5].to_string(),
            _ => "??:??".to_string(),
        }
    }
}

/// What the transcript panel shows for a selection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TranscriptView {
    Empty,
    Messages(Vec<TranscriptMessage>),
}

impl From<Vec<TranscriptMessage>> for TranscriptView {
    fn from(messages: Vec<TranscriptMessage>) -> Self {
        if messages.is_empty() {
            TranscriptView::Empty
        } else {
            TranscriptView::Messages(messages)
        }
    }
}

/// Per-session JSONL logs under `<root>/agents/<agent>/sessions/<id>.jsonl`.
#[derive(Debug, Clone)]
pub struct TranscriptStore {
    root: PathBuf,
}

impl TranscriptStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn session_path(&self, agent_id: &str, session_id: &str) -> Option<PathBuf> {
        if !is_safe_component(agent_id) || !is_safe_component(session_id) {
            return None;
        }
        Some(
            self.root
                .join("agents")
                .join(agent_id)
                .join("sessions")
                .join(format!("{session_id}.jsonl")),
        )
    }

    /// Last `limit` messages for a session, oldest first. Missing or
    /// unreadable logs yield an empty list.
    pub fn read_transcript(
        &self,
        session_id: &str,
        agent_id: &str,
        limit: usize,
    ) -> Vec<TranscriptMessage> {
        match self.session_path(agent_id, session_id) {
            Some(path) => read_transcript_at(&path, limit),
            None => {
                warn!("transcript_path_rejected: agent={agent_id:?} session={session_id:?}");
                Vec::new()
            }
        }
    }

    /// Prefer the gateway-reported transcript path, fall back to the derived one.
    pub fn transcript_for(&self, record: &SessionRecord, limit: usize) -> Vec<TranscriptMessage> {
        if let Some(path) = record
            .transcript_path
            .as_deref()
            .map(str::trim)
            .filter(|path| !path.is_empty())
        {
            return read_transcript_at(Path::new(path), limit);
        }
        if record.session_id.trim().is_empty() {
            debug!("transcript_unavailable: key={} has no session id", record.key);
            return Vec::new();
        }
        self.read_transcript(&record.session_id, record.agent_id(), limit)
    }
}

fn is_safe_component(value: &str) -> bool {
    !value.is_empty() && value != "." && value != ".." && !value.contains(['/', '\\'])
}

pub fn read_transcript_at(path: &Path, limit: usize) -> Vec<TranscriptMessage> {
    match tail_messages(path, limit) {
        Ok(messages) => messages,
        Err(err) if err.kind() == io::ErrorKind::NotFound => {
            debug!("transcript_missing: {}", path.display());
            Vec::new()
        }
        Err(err) => {
            warn!("transcript_read_error: {}: {err}", path.display());
            Vec::new()
        }
    }
}

fn tail_messages(path: &Path, limit: usize) -> io::Result<Vec<TranscriptMessage>> {
    if limit == 0 {
        return Ok(Vec::new());
    }
    let mut file = File::open(path)?;
    let size = file.metadata()?.len();
    if size <= FULL_SCAN_MAX_BYTES {
        let mut bytes = Vec::with_capacity(size as usize);
        file.read_to_end(&mut bytes)?;
        return Ok(scan_forward(&bytes, limit));
    }
    scan_backward(&mut file, size, limit, TAIL_CHUNK_BYTES)
}

fn scan_forward(bytes: &[u8], limit: usize) -> Vec<TranscriptMessage> {
    let mut messages: Vec<TranscriptMessage> = bytes
        .split(|byte| *byte == b'\n')
        .filter_map(parse_line)
        .collect();
    let skip = messages.len().saturating_sub(limit);
    messages.drain(..skip);
    messages
}

/// Walk `reader` from `size` toward the start in `chunk_bytes` steps. The
/// bytes before the first newline of a chunk may belong to a line that
/// started in an earlier chunk, so they are carried into the next step.
fn scan_backward<R: Read + Seek>(
    reader: &mut R,
    size: u64,
    limit: usize,
    chunk_bytes: u64,
) -> io::Result<Vec<TranscriptMessage>> {
    let chunk_bytes = chunk_bytes.max(1);
    let mut collected = Vec::with_capacity(limit);
    let mut carry: Vec<u8> = Vec::new();
    let mut pos = size;

    while pos > 0 && collected.len() < limit {
        let start = pos.saturating_sub(chunk_bytes);
        reader.seek(SeekFrom::Start(start))?;
        let mut buf = vec![0u8; (pos - start) as usize];
        reader.read_exact(&mut buf)?;
        buf.extend_from_slice(&carry);
        pos = start;

        let complete_from = if pos == 0 {
            0
        } else {
            match buf.iter().position(|byte| *byte == b'\n') {
                Some(index) => index + 1,
                None => {
                    carry = buf;
                    continue;
                }
            }
        };

        for line in buf[complete_from..].rsplit(|byte| *byte == b'\n') {
            if let Some(message) = parse_line(line) {
                collected.push(message);
                if collected.len() == limit {
                    break;
                }
            }
        }

        carry = if complete_from == 0 {
            Vec::new()
        } else {
            buf[..complete_from - 1].to_vec()
        };
    }

    collected.reverse();
    Ok(collected)
}

fn parse_line(line: &[u8]) -> Option<TranscriptMessage> {
    let text = String::from_utf8_lossy(line);
    let text = text.trim();
    if text.is_empty() {
        return None;
    }
    let record: Value = match serde_json::from_str(text) {
        Ok(value) => value,
        Err(err) => {
            debug!("transcript_line_malformed: {err}");
            return None;
        }
    };
    message_from_record(&record)
}

/// Turn one log record into a display message. Non-message records yield `None`.
pub fn message_from_record(record: &Value) -> Option<TranscriptMessage> {
    let object = record.as_object()?;
    if object.get("type").and_then(Value::as_str) != Some("message") {
        return None;
    }
    let Some(message) = object.get("message").and_then(Value::as_object) else {
        debug!("transcript_record_without_message");
        return None;
    };

    let role = TranscriptRole::from_wire(
        message
            .get("role")
            .and_then(Value::as_str)
            .unwrap_or_default(),
    );
    let timestamp = object
        .get("timestamp")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    let content = extract_content(message.get("content").unwrap_or(&Value::Null));

    Some(TranscriptMessage {
        timestamp,
        role,
        content,
    })
}

fn extract_content(content: &Value) -> String {
    match content {
        Value::String(text) => truncate_chars(text, TEXT_PREVIEW_CHARS),
        Value::Array(blocks) => blocks
            .iter()
            .filter_map(Value::as_object)
            .find_map(|block| match block.get("type").and_then(Value::as_str) {
                Some("text") => Some(truncate_chars(
                    block.get("text").and_then(Value::as_str).unwrap_or_default(),
                    TEXT_PREVIEW_CHARS,
                )),
                Some("toolCall") => {
                    let name = ["name", "tool"]
                        .iter()
                        .filter_map(|field| block.get(*field).and_then(Value::as_str))
                        .find(|name| !name.is_empty())
                        .unwrap_or("unknown");
                    Some(format!("[tool: {name}]"))
                }
                Some("toolResult") => Some(tool_result_preview(
                    block.get("content").unwrap_or(&Value::Null),
                )),
                _ => None,
            })
            .unwrap_or_default(),
        Value::Null => String::new(),
        other => truncate_chars(&other.to_string(), TEXT_PREVIEW_CHARS),
    }
}

fn tool_result_preview(result: &Value) -> String {
    match result {
        Value::String(text) => truncate_chars(text, TOOL_RESULT_PREVIEW_CHARS),
        Value::Array(items) => items
            .iter()
            .filter_map(Value::as_object)
            .find(|item| item.get("type").and_then(Value::as_str) == Some("text"))
            .map(|item| {
                truncate_chars(
                    item.get("text").and_then(Value::as_str).unwrap_or_default(),
                    TOOL_RESULT_PREVIEW_CHARS,
                )
            })
            .unwrap_or_default(),
        Value::Null => String::new(),
        other => truncate_chars(&other.to_string(), TOOL_RESULT_PREVIEW_CHARS),
    }
}

fn truncate_chars(text: &str, max: usize) -> String {
    text.chars().take(max).collect()
}
