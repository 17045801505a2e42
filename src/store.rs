//! Per-tab run state.
//!
//! The store is storage only: it applies field-level patches and notifies
//! observers, but holds no run policy. Ownership checks ("is this still my
//! run?") are done by callers through [`RunStateStore::update_if`] so the
//! check and the write happen under one lock.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::watch;

use crate::model::{QueryId, QueryResult, RunError, RunStatus, TabId};

/// Everything the presentation layer may read about one tab.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RunState {
    pub sql: String,
    pub status: RunStatus,
    pub is_running: bool,
    pub query_id: Option<QueryId>,
    pub result: Option<Arc<QueryResult>>,
    pub error: Option<RunError>,
    pub explain_result: Option<Arc<QueryResult>>,
    /// Rows read by the server so far for the statement in flight.
    pub rows_read: u64,
    /// (1-based statement in flight, statements in run)
    pub progress: Option<(usize, usize)>,
}

impl RunState {
    /// True while `query_id` is the live run of this tab.
    pub fn is_owned_by(&self, query_id: &QueryId) -> bool {
        self.is_running && self.query_id.as_ref() == Some(query_id)
    }
}

/// Partial update; `None` leaves a field untouched.
#[derive(Clone, Debug, Default)]
pub struct RunPatch {
    sql: Option<String>,
    status: Option<RunStatus>,
    is_running: Option<bool>,
    query_id: Option<Option<QueryId>>,
    result: Option<Option<Arc<QueryResult>>>,
    error: Option<Option<RunError>>,
    explain_result: Option<Option<Arc<QueryResult>>>,
    rows_read: Option<u64>,
    progress: Option<Option<(usize, usize)>>,
}

impl RunPatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sql(mut self, sql: impl Into<String>) -> Self {
        self.sql = Some(sql.into());
        self
    }

    pub fn status(mut self, status: RunStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn running(mut self, running: bool) -> Self {
        self.is_running = Some(running);
        self
    }

    pub fn query_id(mut self, id: Option<QueryId>) -> Self {
        self.query_id = Some(id);
        self
    }

    pub fn result(mut self, result: Option<Arc<QueryResult>>) -> Self {
        self.result = Some(result);
        self
    }

    pub fn error(mut self, error: Option<RunError>) -> Self {
        self.error = Some(error);
        self
    }

    pub fn explain_result(mut self, result: Option<Arc<QueryResult>>) -> Self {
        self.explain_result = Some(result);
        self
    }

    pub fn rows_read(mut self, rows: u64) -> Self {
        self.rows_read = Some(rows);
        self
    }

    pub fn progress(mut self, progress: Option<(usize, usize)>) -> Self {
        self.progress = Some(progress);
        self
    }

    fn apply(self, state: &mut RunState) {
        if let Some(v) = self.sql { state.sql = v; }
        if let Some(v) = self.status { state.status = v; }
        if let Some(v) = self.is_running { state.is_running = v; }
        if let Some(v) = self.query_id { state.query_id = v; }
        if let Some(v) = self.result { state.result = v; }
        if let Some(v) = self.error { state.error = v; }
        if let Some(v) = self.explain_result { state.explain_result = v; }
        if let Some(v) = self.rows_read { state.rows_read = v; }
        if let Some(v) = self.progress { state.progress = v; }
    }
}

#[derive(Default)]
struct StoreInner {
    tabs: HashMap<TabId, RunState>,
    revision: u64,
}

/// Shared handle; clones see the same tabs.
#[derive(Clone)]
pub struct RunStateStore {
    inner: Arc<Mutex<StoreInner>>,
    changes: Arc<watch::Sender<u64>>,
}

impl Default for RunStateStore {
    fn default() -> Self {
        Self::new()
    }
}

impl RunStateStore {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(0);
        Self {
            inner: Arc::new(Mutex::new(StoreInner::default())),
            changes: Arc::new(tx),
        }
    }

    fn lock(&self) -> MutexGuard<'_, StoreInner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Latest merged state of `tab` (idle default for unknown tabs).
    pub fn get(&self, tab: &TabId) -> RunState {
        self.lock().tabs.get(tab).cloned().unwrap_or_default()
    }

    /// Ownership check without cloning the tab state.
    pub fn owns(&self, tab: &TabId, query_id: &QueryId) -> bool {
        self.lock()
            .tabs
            .get(tab)
            .is_some_and(|s| s.is_owned_by(query_id))
    }

    pub fn tabs(&self) -> Vec<TabId> {
        let mut tabs: Vec<TabId> = self.lock().tabs.keys().cloned().collect();
        tabs.sort();
        tabs
    }

    pub fn update(&self, tab: &TabId, patch: RunPatch) {
        self.update_if(tab, patch, |_| true);
    }

    /// Apply `patch` only if `guard` accepts the current state. Returns
    /// whether the patch was applied.
    pub fn update_if(
        &self,
        tab: &TabId,
        patch: RunPatch,
        guard: impl FnOnce(&RunState) -> bool,
    ) -> bool {
        let mut inner = self.lock();
        let accepted = match inner.tabs.get(tab) {
            Some(state) => guard(state),
            None => guard(&RunState::default()),
        };
        if !accepted {
            return false;
        }
        patch.apply(inner.tabs.entry(tab.clone()).or_default());
        inner.revision += 1;
        self.changes.send_replace(inner.revision);
        true
    }

    /// Tab SQL text is independent of run state.
    pub fn set_sql(&self, tab: &TabId, sql: impl Into<String>) {
        self.update(tab, RunPatch::new().sql(sql));
    }

    pub fn remove(&self, tab: &TabId) -> Option<RunState> {
        let mut inner = self.lock();
        let removed = inner.tabs.remove(tab);
        if removed.is_some() {
            inner.revision += 1;
            self.changes.send_replace(inner.revision);
        }
        removed
    }

    /// Monotonic counter bumped by every applied mutation.
    pub fn revision(&self) -> u64 {
        self.lock().revision
    }

    /// Observers wake on every applied mutation.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.changes.subscribe()
    }
}
