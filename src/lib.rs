
// src/lib.rs
// Query execution core shared by the binary and the integration tests
pub mod cancel;
pub mod config;
pub mod coordinator;
pub mod decoder;
pub mod error;
pub mod history;
pub mod locked_file;
pub mod model;
pub mod output;
pub mod splitter;
pub mod store;
pub mod syntax;
pub mod transport;

pub use cancel::CancellationController;
pub use coordinator::{ExecutionCoordinator, ExecutionPolicy, RejectReason, RunOutcome};
pub use error::{RimeError, TransportError};
pub use history::{HistoryEntry, HistoryRecorder, SharedHistory};
pub use model::{
    Column, QueryId, QueryResult, QueryStatistics, RunError, RunErrorKind, RunStatus, TabId,
};
pub use store::{RunState, RunStateStore};
pub use transport::{HttpTransport, Page, QueryRequest, Transport};
