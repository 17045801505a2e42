//! Incremental decoder for the newline-delimited JSON result stream.
//!
//! Network chunks can split a record anywhere (including inside a UTF-8
//! sequence), so bytes are buffered until a full line is available.
//! A corrupt line is logged and skipped; it never aborts the stream.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use tracing::warn;

use crate::model::{Column, QueryStatistics, Row};

/// One decoded unit of the server's incremental response.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    Meta(Vec<Column>),
    Data { rows: Vec<Row>, rows_count: Option<u64> },
    Progress { rows_read: u64 },
    Done { limit_reached: bool, statistics: QueryStatistics },
    Error { code: Option<i64>, message: String },
}

/*──────────────────────── wire records ────────────────────────*/
#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum WireRecord {
    Meta {
        #[serde(default)]
        data: Vec<Column>,
    },
    Data {
        #[serde(default)]
        data: Vec<Row>,
        #[serde(default)]
        rows_count: Option<u64>,
    },
    Progress {
        #[serde(default)]
        rows_read: serde_json::Value,
    },
    Done {
        #[serde(default)]
        limit_reached: bool,
        // Some servers send `"statistics": null` on empty results.
        #[serde(default)]
        statistics: Option<QueryStatistics>,
    },
    Error {
        error: WireError,
    },
}

#[derive(Deserialize)]
struct WireError {
    #[serde(default)]
    message: String,
    #[serde(default)]
    code: Option<serde_json::Value>,
}

impl From<WireRecord> for StreamEvent {
    fn from(rec: WireRecord) -> Self {
        match rec {
            WireRecord::Meta { data } => StreamEvent::Meta(data),
            WireRecord::Data { data, rows_count } => StreamEvent::Data { rows: data, rows_count },
            WireRecord::Progress { rows_read } => StreamEvent::Progress {
                rows_read: json_u64(&rows_read).unwrap_or(0),
            },
            WireRecord::Done { limit_reached, statistics } => {
                StreamEvent::Done { limit_reached, statistics: statistics.unwrap_or_default() }
            }
            WireRecord::Error { error } => {
                let code = error
                    .code
                    .as_ref()
                    .and_then(json_i64)
                    .or_else(|| error_code_from_message(&error.message));
                StreamEvent::Error { code, message: error.message }
            }
        }
    }
}

fn json_u64(v: &serde_json::Value) -> Option<u64> {
    match v {
        serde_json::Value::Number(n) => n.as_u64(),
        serde_json::Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

fn json_i64(v: &serde_json::Value) -> Option<i64> {
    match v {
        serde_json::Value::Number(n) => n.as_i64(),
        serde_json::Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

static CODE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\bCode:\s*(\d+)").expect("static regex")
});

/// Server messages look like `Code: 62. DB::Exception: Syntax error ...`.
pub fn error_code_from_message(message: &str) -> Option<i64> {
    CODE_RE
        .captures(message)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse().ok())
}

/*──────────────────────── decoder ─────────────────────────────*/
#[derive(Debug, Default)]
pub struct StreamDecoder {
    buffer: Vec<u8>,
    scanned: usize, // bytes of `buffer` already known to hold no '\n'
    skipped: usize,
}

impl StreamDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one transport chunk; returns every event completed by it.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<StreamEvent> {
        self.buffer.extend_from_slice(chunk);
        let mut events = Vec::new();
        let mut consumed = 0usize;

        while let Some(pos) = self.buffer[self.scanned..].iter().position(|&b| b == b'\n') {
            let end = self.scanned + pos;
            if let Some(ev) = decode_line(&self.buffer[consumed..end], &mut self.skipped) {
                events.push(ev);
            }
            consumed = end + 1;
            self.scanned = consumed;
        }

        self.buffer.drain(..consumed);
        self.scanned = self.buffer.len();
        events
    }

    /// Decode whatever is left once the stream has ended.
    pub fn flush(&mut self) -> Vec<StreamEvent> {
        let rest = std::mem::take(&mut self.buffer);
        self.scanned = 0;
        decode_line(&rest, &mut self.skipped).into_iter().collect()
    }

    /// Number of lines dropped as undecodable so far.
    pub fn skipped_lines(&self) -> usize {
        self.skipped
    }
}

fn decode_line(line: &[u8], skipped: &mut usize) -> Option<StreamEvent> {
    let line = line.trim_ascii();
    if line.is_empty() {
        return None;
    }
    match serde_json::from_slice::<WireRecord>(line) {
        Ok(rec) => Some(rec.into()),
        Err(e) => {
            *skipped += 1;
            let preview = String::from_utf8_lossy(&line[..line.len().min(120)]);
            warn!(error = %e, line = %preview, "skipping undecodable stream line");
            None
        }
    }
}
