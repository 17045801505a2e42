// Shared fixtures: a scripted in-process transport and NDJSON builders.
#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::stream::{self, StreamExt};
use serde_json::{json, Value};
use tokio::sync::Notify;

use rime::history::HistoryRecorder;
use rime::transport::ByteStream;
use rime::{
    ExecutionCoordinator, ExecutionPolicy, QueryId, QueryRequest, RunStateStore, Transport,
    TransportError,
};

/// What the fake server answers for one statement.
#[derive(Clone)]
pub enum Reply {
    /// Body delivered as these chunks, in order.
    Chunks(Vec<String>),
    /// Body held back until the gate is notified.
    Gated(Arc<Notify>, Vec<String>),
    /// `head` arrives at once, `tail` only after the gate is notified.
    Paused { head: Vec<String>, gate: Arc<Notify>, tail: Vec<String> },
    /// These chunks, then the connection drops.
    BreaksAfter(Vec<String>, String),
    /// Connection could not be made.
    ConnectFailure(String),
    /// HTTP 401 before any body.
    Unauthorized(String),
}

#[derive(Default)]
pub struct ScriptedTransport {
    replies: Mutex<HashMap<String, Reply>>,
    requests: Mutex<Vec<QueryRequest>>,
    cancels: Mutex<Vec<QueryId>>,
}

impl ScriptedTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn reply(&self, sql: &str, reply: Reply) {
        self.replies.lock().unwrap().insert(sql.to_owned(), reply);
    }

    /// Whole body in one chunk.
    pub fn answer(&self, sql: &str, lines: &[String]) {
        self.reply(sql, Reply::Chunks(vec![lines.concat()]));
    }

    pub fn requests(&self) -> Vec<QueryRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn statements(&self) -> Vec<String> {
        self.requests().into_iter().map(|r| r.sql).collect()
    }

    pub fn cancels(&self) -> Vec<QueryId> {
        self.cancels.lock().unwrap().clone()
    }
}

fn body(chunks: Vec<String>) -> impl futures_util::Stream<Item = Result<Bytes, TransportError>> {
    stream::iter(chunks.into_iter().map(|c| Ok(Bytes::from(c))))
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn execute(&self, request: &QueryRequest) -> Result<ByteStream, TransportError> {
        self.requests.lock().unwrap().push(request.clone());
        let reply = self.replies.lock().unwrap().get(&request.sql).cloned();
        match reply {
            Some(Reply::Chunks(chunks)) => Ok(Box::pin(body(chunks))),
            Some(Reply::Gated(gate, chunks)) => {
                let wait = stream::once(async move { gate.notified().await })
                    .filter_map(|_| async { None::<Result<Bytes, TransportError>> });
                Ok(Box::pin(wait.chain(body(chunks))))
            }
            Some(Reply::Paused { head, gate, tail }) => {
                let wait = stream::once(async move { gate.notified().await })
                    .filter_map(|_| async { None::<Result<Bytes, TransportError>> });
                Ok(Box::pin(body(head).chain(wait).chain(body(tail))))
            }
            Some(Reply::BreaksAfter(chunks, reason)) => {
                let broken = stream::once(async move { Err::<Bytes, _>(TransportError::Stream(reason)) });
                Ok(Box::pin(body(chunks).chain(broken)))
            }
            Some(Reply::ConnectFailure(msg)) => Err(TransportError::Connect(msg)),
            Some(Reply::Unauthorized(message)) => {
                Err(TransportError::Unauthorized { status: 401, message })
            }
            None => Err(TransportError::Status {
                status: 500,
                message: format!("unscripted statement: {}", request.sql),
            }),
        }
    }

    async fn cancel(&self, query_id: &QueryId) -> Result<(), TransportError> {
        self.cancels.lock().unwrap().push(query_id.clone());
        Ok(())
    }
}

/*──────────────────────── NDJSON builders ─────────────────────*/
fn line(v: Value) -> String {
    format!("{v}\n")
}

pub fn meta(columns: &[(&str, &str)]) -> String {
    let data: Vec<Value> = columns.iter().map(|(n, t)| json!({ "name": n, "type": t })).collect();
    line(json!({ "type": "meta", "data": data }))
}

pub fn data(rows: Vec<Value>) -> String {
    line(json!({ "type": "data", "data": rows }))
}

pub fn progress(rows_read: u64) -> String {
    line(json!({ "type": "progress", "rows_read": rows_read }))
}

pub fn done(rows_read: u64, bytes_read: u64) -> String {
    line(json!({
        "type": "done",
        "limit_reached": false,
        "statistics": { "elapsed": 0.001, "rows_read": rows_read, "bytes_read": bytes_read }
    }))
}

/// Completion record of a result cut short by the server's row limit.
pub fn done_at_limit(rows_read: u64) -> String {
    line(json!({
        "type": "done",
        "limit_reached": true,
        "statistics": { "elapsed": 0.002, "rows_read": rows_read, "bytes_read": rows_read * 8 }
    }))
}

pub fn error(code: i64, message: &str) -> String {
    line(json!({ "type": "error", "error": { "code": code, "message": message } }))
}

/// Single-column, single-row answer.
pub fn scalar(column: &str, value: Value) -> Vec<String> {
    vec![meta(&[(column, "UInt8")]), data(vec![json!([value])]), done(1, 1)]
}

/// Answer of a statement that returns no data.
pub fn ok_no_rows() -> Vec<String> {
    vec![done(0, 0)]
}

/*──────────────────────── harness ─────────────────────────────*/
pub struct Harness {
    pub transport: Arc<ScriptedTransport>,
    pub store: RunStateStore,
    pub coordinator: ExecutionCoordinator,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_policy(ExecutionPolicy { publish_interval: Duration::ZERO, keep_empty_results: false })
    }

    pub fn with_policy(policy: ExecutionPolicy) -> Self {
        let transport = ScriptedTransport::new();
        let store = RunStateStore::new();
        let coordinator = ExecutionCoordinator::new(
            transport.clone(),
            store.clone(),
            HistoryRecorder::in_memory(100).shared(),
            policy,
        );
        Self { transport, store, coordinator }
    }

    pub fn history_len(&self) -> usize {
        self.coordinator.history().lock().unwrap().len()
    }

    pub fn history(&self) -> Vec<rime::HistoryEntry> {
        self.coordinator.history().lock().unwrap().list()
    }
}

/// Yield to other tasks until `cond` holds; panics after a second.
pub async fn wait_until(mut cond: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(1);
    while !cond() {
        assert!(tokio::time::Instant::now() < deadline, "condition not reached in time");
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
}
