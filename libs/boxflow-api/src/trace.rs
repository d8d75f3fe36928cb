//! Trace-id propagation.
//!
//! An 8-hex-char correlation id held in tokio task-local storage. Every log
//! record and outgoing IPC message of a run carries the current id. On
//! fan-out the spawner snapshots the id and re-scopes it in each worker so
//! logs stay correlatable.

use std::cell::RefCell;
use std::future::Future;

tokio::task_local! {
    static TRACE_ID: RefCell<String>;
}

/// Generate a new 8-character trace id without storing it.
pub fn generate_trace_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()[..8].to_string()
}

/// Current trace id, generating and storing a fresh one if the scope holds
/// none. Outside any scope a fresh id is returned each call.
pub fn get_trace_id() -> String {
    TRACE_ID
        .try_with(|cell| {
            let mut id = cell.borrow_mut();
            if id.is_empty() {
                *id = generate_trace_id();
            }
            id.clone()
        })
        .unwrap_or_else(|_| generate_trace_id())
}

/// Set the trace id for the current scope, truncated to 8 characters.
/// No-op outside a trace scope.
pub fn set_trace_id(trace_id: &str) {
    let id: String = trace_id.chars().take(8).collect();
    let _ = TRACE_ID.try_with(|cell| *cell.borrow_mut() = id.clone());
}

/// Run `fut` inside a trace-id scope. `None` generates a fresh id; the
/// previous scope (if any) is restored afterwards.
pub async fn with_trace_id<F>(trace_id: Option<String>, fut: F) -> F::Output
where
    F: Future,
{
    let id = trace_id
        .map(|s| s.chars().take(8).collect())
        .unwrap_or_else(generate_trace_id);
    TRACE_ID.scope(RefCell::new(id), fut).await
}

/// Synchronous variant of [`with_trace_id`] for non-async callers.
pub fn with_trace_id_sync<F, R>(trace_id: Option<String>, f: F) -> R
where
    F: FnOnce() -> R,
{
    let id = trace_id
        .map(|s: String| s.chars().take(8).collect())
        .unwrap_or_else(generate_trace_id);
    TRACE_ID.sync_scope(RefCell::new(id), f)
}
