//! Request correlation.
//!
//! The current request id lives in a tokio task-local so that any code running
//! inside a request (including spawned fan-out tasks that re-enter the scope)
//! can attach it to log lines. It carries no business meaning.

use std::future::Future;

pub const REQUEST_ID_HEADER: &str = "x-request-id";

tokio::task_local! {
    static REQUEST_ID: String;
}

/// Scoped access to the current request id
pub struct RequestContext;

impl RequestContext {
    /// Run `fut` with `request_id` as the current request id
    pub async fn scope<F>(request_id: String, fut: F) -> F::Output
    where
        F: Future,
    {
        REQUEST_ID.scope(request_id, fut).await
    }

    /// Run `fut` under `request_id` when present, otherwise as-is
    pub async fn scope_opt<F>(request_id: Option<String>, fut: F) -> F::Output
    where
        F: Future,
    {
        match request_id {
            Some(id) => Self::scope(id, fut).await,
            None => fut.await,
        }
    }
}

/// The request id of the enclosing scope, if any
pub fn current_request_id() -> Option<String> {
    REQUEST_ID.try_with(|id| id.clone()).ok()
}
