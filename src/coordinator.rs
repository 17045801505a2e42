//! Execution coordinator: drives one user "run" over every statement of a
//! script, streaming each statement's response into the tab's run state.
//!
//! Every write to the store is guarded by the run's correlation id. Once a
//! run has been cancelled or superseded, the loop stops at its next
//! suspension point and touches nothing further.

use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::StreamExt;
use tracing::{debug, info, warn};

use crate::decoder::{StreamDecoder, StreamEvent};
use crate::history::{HistoryEntry, SharedHistory};
use crate::model::{QueryId, QueryResult, QueryStatistics, Row, RunError, RunStatus, TabId};
use crate::splitter::{split_sql, statement_at_position};
use crate::store::{RunPatch, RunStateStore};
use crate::transport::{Page, QueryRequest, Transport};

/// Server codes meaning the session itself was rejected.
const AUTH_ERROR_CODES: [i64; 2] = [194, 516];

#[derive(Clone, Debug)]
pub struct ExecutionPolicy {
    /// Minimum gap between visible row updates while a statement streams.
    /// Zero publishes every batch.
    pub publish_interval: Duration,
    /// Treat a statement that returned columns but zero rows as
    /// result-bearing (empty table with headers).
    pub keep_empty_results: bool,
}

impl Default for ExecutionPolicy {
    fn default() -> Self {
        Self {
            publish_interval: Duration::from_millis(200),
            keep_empty_results: false,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RejectReason {
    EmptySql,
    AlreadyRunning,
    NoStatements,
}

/// How a run ended, as seen by the caller that started it.
#[derive(Clone, Debug, PartialEq)]
pub enum RunOutcome {
    /// Nothing was started; the store is untouched.
    Rejected(RejectReason),
    Completed,
    Failed(RunError),
    Cancelled,
    /// A newer run took over the tab; this run's late events were dropped.
    Superseded,
}

/// Which slot of the tab a run publishes into.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Target {
    Result,
    Explain,
}

enum StatementOutcome {
    Finished(QueryResult),
    Failed(RunError),
    Abandoned,
}

#[derive(Clone)]
pub struct ExecutionCoordinator {
    transport: Arc<dyn Transport>,
    store: RunStateStore,
    history: SharedHistory,
    policy: ExecutionPolicy,
    user: Option<String>,
}

impl ExecutionCoordinator {
    pub fn new(
        transport: Arc<dyn Transport>,
        store: RunStateStore,
        history: SharedHistory,
        policy: ExecutionPolicy,
    ) -> Self {
        Self { transport, store, history, policy, user: None }
    }

    /// Acting user stamped on history entries.
    pub fn with_user(mut self, user: Option<String>) -> Self {
        self.user = user;
        self
    }

    pub fn store(&self) -> &RunStateStore {
        &self.store
    }

    pub fn history(&self) -> &SharedHistory {
        &self.history
    }

    /// Run every statement in `sql`, in order.
    pub async fn run(&self, tab: &TabId, sql: &str) -> RunOutcome {
        self.start(tab, sql, None, Target::Result).await
    }

    /// Run only the statement under the cursor (character offset).
    pub async fn run_at_cursor(&self, tab: &TabId, sql: &str, cursor: usize) -> RunOutcome {
        if sql.trim().is_empty() {
            return RunOutcome::Rejected(RejectReason::EmptySql);
        }
        match statement_at_position(sql, cursor) {
            Some(stmt) => self.run(tab, &stmt).await,
            None => RunOutcome::Rejected(RejectReason::NoStatements),
        }
    }

    /// Fresh run asking the server for one page of each statement's rows.
    /// Changing page discards the previous page; nothing is fetched
    /// incrementally.
    pub async fn run_page(&self, tab: &TabId, sql: &str, page: Page) -> RunOutcome {
        self.start(tab, sql, Some(page), Target::Result).await
    }

    /// `EXPLAIN` the statement under the cursor (or the first statement)
    /// into the tab's explain slot. The regular result and the history log
    /// are left alone.
    pub async fn explain(&self, tab: &TabId, sql: &str, cursor: Option<usize>) -> RunOutcome {
        if sql.trim().is_empty() {
            return RunOutcome::Rejected(RejectReason::EmptySql);
        }
        let stmt = match cursor {
            Some(c) => statement_at_position(sql, c),
            None => split_sql(sql).into_iter().next(),
        };
        let Some(stmt) = stmt else {
            return RunOutcome::Rejected(RejectReason::NoStatements);
        };
        let explained = if stmt.get(..7).is_some_and(|p| p.eq_ignore_ascii_case("EXPLAIN")) {
            stmt
        } else {
            format!("EXPLAIN {stmt}")
        };
        self.start(tab, &explained, None, Target::Explain).await
    }

    async fn start(&self, tab: &TabId, sql: &str, page: Option<Page>, target: Target) -> RunOutcome {
        if sql.trim().is_empty() {
            return RunOutcome::Rejected(RejectReason::EmptySql);
        }
        if self.store.get(tab).is_running {
            debug!(%tab, "run rejected: tab already running");
            return RunOutcome::Rejected(RejectReason::AlreadyRunning);
        }
        let statements = split_sql(sql);
        if statements.is_empty() {
            return RunOutcome::Rejected(RejectReason::NoStatements);
        }

        let query_id = QueryId::generate();
        let total = statements.len();
        let mut begin = RunPatch::new()
            .status(RunStatus::Running)
            .running(true)
            .query_id(Some(query_id.clone()))
            .error(None)
            .rows_read(0)
            .progress(Some((0, total)));
        begin = match target {
            Target::Result => begin.result(None),
            Target::Explain => begin.explain_result(None),
        };
        if !self.store.update_if(tab, begin, |s| !s.is_running) {
            return RunOutcome::Rejected(RejectReason::AlreadyRunning);
        }
        info!(%tab, %query_id, statements = total, "run started");

        let started = Instant::now();
        let mut totals = QueryStatistics::default();
        let mut retained: Option<QueryResult> = None;

        for (idx, stmt) in statements.iter().enumerate() {
            // Superseded or cancelled runs stop here without touching the tab.
            let step = RunPatch::new().progress(Some((idx + 1, total))).rows_read(0);
            if !self.publish(tab, &query_id, step) {
                return self.abandoned(tab, &query_id);
            }

            let request = QueryRequest::new(stmt.as_str(), query_id.clone()).with_page(page);
            match self.execute_statement(tab, &query_id, &request, target).await {
                StatementOutcome::Finished(result) => {
                    totals.accumulate(&result.statistics);
                    let bearing = result.has_rows()
                        || (self.policy.keep_empty_results && !result.columns.is_empty());
                    if bearing {
                        retained = Some(result);
                    }
                }
                StatementOutcome::Failed(err) => {
                    return self.fail(tab, &query_id, sql, err, started, &totals, target);
                }
                StatementOutcome::Abandoned => return self.abandoned(tab, &query_id),
            }
        }

        self.complete(tab, &query_id, sql, total, retained, &totals, started, target)
    }

    async fn execute_statement(
        &self,
        tab: &TabId,
        query_id: &QueryId,
        request: &QueryRequest,
        target: Target,
    ) -> StatementOutcome {
        let stmt_started = Instant::now();
        let mut stream = match self.transport.execute(request).await {
            Ok(s) => s,
            Err(e) => {
                warn!(%tab, %query_id, error = %e, "transport failure");
                return StatementOutcome::Failed(RunError::from(&e));
            }
        };

        let mut decoder = StreamDecoder::new();
        let mut acc = QueryResult::default();
        let mut saw_event = false;
        let mut last_publish: Option<Instant> = None;

        loop {
            let chunk = stream.next().await;
            if !self.store.owns(tab, query_id) {
                debug!(%tab, %query_id, "dropping stream of stale run");
                return StatementOutcome::Abandoned;
            }

            let (events, ended) = match chunk {
                Some(Ok(bytes)) => (decoder.feed(&bytes), false),
                Some(Err(e)) => {
                    warn!(%tab, %query_id, error = %e, "stream broke off");
                    return StatementOutcome::Failed(RunError::from(&e));
                }
                None => (decoder.flush(), true),
            };

            for event in events {
                saw_event = true;
                match event {
                    StreamEvent::Meta(columns) => {
                        if acc.columns.is_empty() {
                            acc.columns = columns;
                        } else {
                            debug!(%query_id, "ignoring repeated column metadata");
                        }
                    }
                    StreamEvent::Data { rows, .. } => {
                        let arity = acc.columns.len();
                        acc.row_count += rows.len();
                        acc.rows.extend(rows.into_iter().map(|r| bind_row(r, arity)));

                        let due = last_publish
                            .map_or(true, |t| t.elapsed() >= self.policy.publish_interval);
                        if due {
                            let snapshot = Some(Arc::new(acc.clone()));
                            let patch = match target {
                                Target::Result => RunPatch::new().result(snapshot),
                                Target::Explain => RunPatch::new().explain_result(snapshot),
                            };
                            if !self.publish(tab, query_id, patch) {
                                return StatementOutcome::Abandoned;
                            }
                            last_publish = Some(Instant::now());
                        }
                    }
                    StreamEvent::Progress { rows_read } => {
                        if !self.publish(tab, query_id, RunPatch::new().rows_read(rows_read)) {
                            return StatementOutcome::Abandoned;
                        }
                    }
                    StreamEvent::Error { code, message } => {
                        return StatementOutcome::Failed(classify_server_error(code, message));
                    }
                    StreamEvent::Done { limit_reached, statistics } => {
                        acc.limit_reached = limit_reached;
                        acc.statistics = statistics;
                        return StatementOutcome::Finished(acc);
                    }
                }
            }

            if ended {
                break;
            }
        }

        if !saw_event {
            return StatementOutcome::Failed(RunError::network(
                "response ended before any result was received",
            ));
        }
        warn!(%tab, %query_id, "stream ended without a completion record");
        acc.statistics.elapsed = stmt_started.elapsed().as_secs_f64();
        StatementOutcome::Finished(acc)
    }

    #[allow(clippy::too_many_arguments)]
    fn complete(
        &self,
        tab: &TabId,
        query_id: &QueryId,
        sql: &str,
        total: usize,
        retained: Option<QueryResult>,
        totals: &QueryStatistics,
        started: Instant,
        target: Target,
    ) -> RunOutcome {
        let (result, rows_returned) = match retained {
            Some(r) => {
                let rows = r.row_count as u64;
                (r, rows)
            }
            None => {
                let text = format!("{total} statement(s) executed successfully");
                (QueryResult::message(text, totals.clone()), 0)
            }
        };

        let published = Some(Arc::new(result));
        let mut patch = RunPatch::new()
            .status(RunStatus::Completed)
            .running(false)
            .error(None)
            .rows_read(totals.rows_read)
            .progress(None);
        patch = match target {
            Target::Result => patch.result(published),
            Target::Explain => patch.explain_result(published),
        };
        if !self.publish(tab, query_id, patch) {
            return self.abandoned(tab, query_id);
        }
        info!(%tab, %query_id, rows = rows_returned, "run completed");

        if target == Target::Result {
            let mut entry = self.entry(sql, started, totals);
            entry.rows_returned = Some(rows_returned);
            self.record(entry);
        }
        RunOutcome::Completed
    }

    #[allow(clippy::too_many_arguments)]
    fn fail(
        &self,
        tab: &TabId,
        query_id: &QueryId,
        sql: &str,
        error: RunError,
        started: Instant,
        totals: &QueryStatistics,
        target: Target,
    ) -> RunOutcome {
        let mut patch = RunPatch::new()
            .status(RunStatus::Failed)
            .running(false)
            .error(Some(error.clone()))
            .progress(None);
        patch = match target {
            Target::Result => patch.result(None),
            Target::Explain => patch.explain_result(None),
        };
        if !self.publish(tab, query_id, patch) {
            return self.abandoned(tab, query_id);
        }
        warn!(%tab, %query_id, kind = ?error.kind, error = %error, "run failed");

        if target == Target::Result {
            let mut entry = self.entry(sql, started, totals);
            entry.error = Some(error.to_string());
            self.record(entry);
        }
        RunOutcome::Failed(error)
    }

    fn abandoned(&self, tab: &TabId, query_id: &QueryId) -> RunOutcome {
        let state = self.store.get(tab);
        if state.status == RunStatus::Cancelled && !state.is_running {
            debug!(%tab, %query_id, "run loop stopped after cancellation");
            RunOutcome::Cancelled
        } else {
            debug!(%tab, %query_id, "run loop stopped: superseded");
            RunOutcome::Superseded
        }
    }

    fn publish(&self, tab: &TabId, query_id: &QueryId, patch: RunPatch) -> bool {
        self.store.update_if(tab, patch, |s| s.is_owned_by(query_id))
    }

    fn entry(&self, sql: &str, started: Instant, totals: &QueryStatistics) -> HistoryEntry {
        let mut entry = HistoryEntry::new(sql);
        entry.duration_ms = Some(started.elapsed().as_millis() as u64);
        entry.rows_read = Some(totals.rows_read);
        entry.bytes_read = Some(totals.bytes_read);
        entry.memory_usage = totals.memory_usage;
        entry.user = self.user.clone();
        entry
    }

    fn record(&self, entry: HistoryEntry) {
        let mut history = self.history.lock().unwrap_or_else(|e| e.into_inner());
        if let Err(e) = history.append(entry) {
            warn!(error = %e, "could not persist history entry");
        }
    }
}

/// Rows bind to columns by position; pad or cut to the declared arity.
fn bind_row(mut row: Row, arity: usize) -> Row {
    if arity > 0 && row.len() != arity {
        row.resize(arity, serde_json::Value::Null);
    }
    row
}

fn classify_server_error(code: Option<i64>, message: String) -> RunError {
    let auth = code.is_some_and(|c| AUTH_ERROR_CODES.contains(&c))
        || message.contains("Authentication failed");
    if auth {
        RunError::authentication(code, message)
    } else {
        RunError::statement(code, message)
    }
}
