//! Cancellation runs as two independent halves:
//!
//! * local: the tab flips to `Cancelled` immediately and loses its
//!   correlation id, which is what stops the coordinator's loop;
//! * remote: a fire-and-forget kill request for that id. The server may
//!   still finish the query; nobody waits for the answer.

use std::sync::Arc;

use tokio::runtime::Handle;
use tracing::{debug, info, warn};

use crate::model::{QueryId, RunError, RunStatus, TabId};
use crate::store::{RunPatch, RunStateStore};
use crate::transport::Transport;

#[derive(Clone)]
pub struct CancellationController {
    transport: Arc<dyn Transport>,
    store: RunStateStore,
    runtime: Option<Handle>,
}

impl CancellationController {
    /// Captures the current tokio runtime (if any) so `cancel` also works
    /// from threads outside it, e.g. a Ctrl-C handler.
    pub fn new(transport: Arc<dyn Transport>, store: RunStateStore) -> Self {
        Self { transport, store, runtime: Handle::try_current().ok() }
    }

    pub fn with_runtime(mut self, handle: Handle) -> Self {
        self.runtime = Some(handle);
        self
    }

    /// Cancel the running run of `tab`. Returns `false` when there was
    /// nothing to cancel. The local transition is complete when this
    /// returns.
    pub fn cancel(&self, tab: &TabId) -> bool {
        let mut target: Option<QueryId> = None;
        let patch = RunPatch::new()
            .status(RunStatus::Cancelled)
            .running(false)
            .query_id(None)
            .error(Some(RunError::cancelled()))
            .progress(None);

        let applied = self.store.update_if(tab, patch, |s| {
            if s.is_running {
                target = s.query_id.clone();
            }
            target.is_some()
        });
        let Some(query_id) = target.filter(|_| applied) else {
            debug!(%tab, "cancel ignored: nothing running");
            return false;
        };

        info!(%tab, %query_id, "run cancelled");
        self.request_remote_cancel(query_id);
        true
    }

    fn request_remote_cancel(&self, query_id: QueryId) {
        let Some(handle) = Handle::try_current().ok().or_else(|| self.runtime.clone()) else {
            warn!(%query_id, "no async runtime; remote cancel not sent");
            return;
        };
        let transport = Arc::clone(&self.transport);
        handle.spawn(async move {
            match transport.cancel(&query_id).await {
                Ok(()) => debug!(%query_id, "remote cancel acknowledged"),
                Err(e) => warn!(%query_id, error = %e, "remote cancel failed"),
            }
        });
    }
}
