//! Fault-tolerant concurrent fan-out.
//!
//! Every operation runs in its own task behind a guard that turns a failure
//! (error or panic) into a [`PartialError`] and a placeholder. All tasks are
//! launched before any is awaited, so the fan-out takes as long as its slowest
//! source. Aggregation itself never fails.

use crate::context::{current_request_id, RequestContext};
use crate::error::Result;
use crate::metrics;
use futures::FutureExt;
use serde::Serialize;
use std::any::Any;
use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;
use tokio::task::JoinHandle;
use tracing::{error, info, Instrument};

/// A contained per-source failure
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PartialError {
    pub service: String,
    pub message: String,
}

/// Errors shared by the guarded tasks of one aggregation, in completion order
#[derive(Debug, Clone, Default)]
pub struct ErrorSink {
    errors: Arc<Mutex<Vec<PartialError>>>,
}

impl ErrorSink {
    pub fn push(&self, service: impl Into<String>, message: impl Into<String>) {
        let service = service.into();
        metrics::record_partial_error(&service);
        self.errors
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(PartialError {
                service,
                message: message.into(),
            });
    }

    pub fn len(&self) -> usize {
        self.errors.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drain the collected errors
    pub fn take(&self) -> Vec<PartialError> {
        std::mem::take(&mut *self.errors.lock().unwrap_or_else(PoisonError::into_inner))
    }
}

/// Composite outcome of [`aggregate`]
#[derive(Debug)]
pub struct AggregationResult<T> {
    /// One entry per label; failed sources hold `T::default()`
    pub results: HashMap<String, T>,
    pub errors: Vec<PartialError>,
}

/// Await `op`, recording any error or panic under `label` instead of
/// propagating it.
pub async fn guard<T, F>(label: String, op: F, errors: ErrorSink) -> Option<T>
where
    F: Future<Output = Result<T>>,
{
    match AssertUnwindSafe(op).catch_unwind().await {
        Ok(Ok(value)) => Some(value),
        Ok(Err(e)) => {
            let message = e.to_string();
            error!(
                label = %label,
                error = %message,
                request_id = ?current_request_id(),
                "Source failed but continuing"
            );
            errors.push(label, message);
            None
        }
        Err(panic) => {
            let message = panic_message(&*panic);
            error!(
                label = %label,
                error = %message,
                request_id = ?current_request_id(),
                "Source panicked but continuing"
            );
            errors.push(label, message);
            None
        }
    }
}

/// Spawn a guarded operation on the runtime.
///
/// The task keeps the caller's request id and tracing span.
pub fn spawn_guarded<T, F>(label: impl Into<String>, op: F, errors: &ErrorSink) -> JoinHandle<Option<T>>
where
    T: Send + 'static,
    F: Future<Output = Result<T>> + Send + 'static,
{
    let request_id = current_request_id();
    let task = guard(label.into(), op, errors.clone());
    tokio::spawn(RequestContext::scope_opt(request_id, task).in_current_span())
}

/// Wait for a guarded task, substituting the default for a failed source
pub async fn join_guarded<T: Default>(
    label: &str,
    handle: JoinHandle<Option<T>>,
    errors: &ErrorSink,
) -> T {
    match handle.await {
        Ok(value) => value.unwrap_or_default(),
        Err(e) => {
            // Panics are caught by the guard, so this is cancellation.
            error!(label = %label, error = %e, "Source task did not complete");
            errors.push(label, format!("task did not complete: {}", e));
            T::default()
        }
    }
}

/// Run every `(label, operation)` concurrently and collect a best-effort
/// composite. A repeated label keeps the last operation's result.
pub async fn aggregate<T, L, F, I>(sources: I) -> AggregationResult<T>
where
    T: Default + Send + 'static,
    L: Into<String>,
    F: Future<Output = Result<T>> + Send + 'static,
    I: IntoIterator<Item = (L, F)>,
{
    let errors = ErrorSink::default();

    let handles: Vec<(String, JoinHandle<Option<T>>)> = sources
        .into_iter()
        .map(|(label, op)| {
            let label = label.into();
            let handle = spawn_guarded(label.clone(), op, &errors);
            (label, handle)
        })
        .collect();

    let run = AggregationRun::start("aggregation", handles.len());

    let mut results = HashMap::with_capacity(handles.len());
    for (label, handle) in handles {
        let value = join_guarded(&label, handle, &errors).await;
        results.insert(label, value);
    }

    let errors = run.finish(&errors);
    AggregationResult { results, errors }
}

/// Timing, logging and metrics shared by every fan-out
pub struct AggregationRun {
    name: &'static str,
    sources: usize,
    started: Instant,
}

impl AggregationRun {
    pub fn start(name: &'static str, sources: usize) -> Self {
        info!(
            aggregation = name,
            sources,
            request_id = ?current_request_id(),
            "Aggregation START"
        );
        Self {
            name,
            sources,
            started: Instant::now(),
        }
    }

    /// Drain the sink, log the outcome and record the aggregation metric
    pub fn finish(self, errors: &ErrorSink) -> Vec<PartialError> {
        let errors = errors.take();
        let elapsed = self.started.elapsed();

        if errors.is_empty() {
            info!(
                aggregation = self.name,
                sources = self.sources,
                duration_ms = elapsed.as_millis() as u64,
                request_id = ?current_request_id(),
                "Aggregation completed"
            );
        } else {
            error!(
                aggregation = self.name,
                sources = self.sources,
                errors = errors.len(),
                duration_ms = elapsed.as_millis() as u64,
                request_id = ?current_request_id(),
                "Aggregation completed with partial tolerance"
            );
        }
        metrics::record_aggregation(elapsed, errors.len());

        errors
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "Unknown error".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{DashboardError, FetchError};
    use futures::future::BoxFuture;
    use std::time::Duration;

    fn ok_after(ms: u64, items: Vec<u32>) -> BoxFuture<'static, Result<Vec<u32>>> {
        Box::pin(async move {
            tokio::time::sleep(Duration::from_millis(ms)).await;
            Ok(items)
        })
    }

    fn fail_after(ms: u64, message: &'static str) -> BoxFuture<'static, Result<Vec<u32>>> {
        Box::pin(async move {
            tokio::time::sleep(Duration::from_millis(ms)).await;
            Err(DashboardError::Fetch(FetchError::status(500, message)))
        })
    }

    #[tokio::test]
    async fn test_one_failure_is_contained() {
        let result = aggregate(vec![
            ("a", ok_after(5, vec![1, 2])),
            ("b", fail_after(5, "b is down")),
            ("c", ok_after(5, vec![3])),
        ])
        .await;

        assert_eq!(result.results["a"], vec![1, 2]);
        assert_eq!(result.results["b"], Vec::<u32>::new());
        assert_eq!(result.results["c"], vec![3]);
        assert_eq!(
            result.errors,
            vec![PartialError {
                service: "b".to_string(),
                message: "b is down".to_string()
            }]
        );
    }

    #[tokio::test]
    async fn test_two_failures_keep_third_source() {
        let result = aggregate(vec![
            ("a", fail_after(10, "a failed")),
            ("b", fail_after(10, "b failed")),
            ("c", ok_after(10, vec![7, 8, 9])),
        ])
        .await;

        assert_eq!(result.errors.len(), 2);
        assert_eq!(result.results["c"], vec![7, 8, 9]);
        assert!(result.results["a"].is_empty());
        assert!(result.results["b"].is_empty());
    }

    #[tokio::test]
    async fn test_errors_follow_completion_order() {
        let result = aggregate(vec![
            ("slow", fail_after(80, "slow failed")),
            ("fast", fail_after(5, "fast failed")),
        ])
        .await;

        let order: Vec<&str> = result.errors.iter().map(|e| e.service.as_str()).collect();
        assert_eq!(order, vec!["fast", "slow"]);
    }

    #[tokio::test]
    async fn test_sources_run_concurrently() {
        let started = Instant::now();
        let result = aggregate(vec![
            ("a", ok_after(150, vec![1])),
            ("b", ok_after(150, vec![2])),
            ("c", ok_after(150, vec![3])),
        ])
        .await;

        assert_eq!(result.results.len(), 3);
        assert!(started.elapsed() < Duration::from_millis(400));
    }

    #[tokio::test]
    async fn test_panic_is_contained() {
        let panicking: BoxFuture<'static, Result<Vec<u32>>> = Box::pin(async {
            if true {
                panic!("upstream parser exploded");
            }
            Ok::<_, DashboardError>(vec![])
        });

        let result = aggregate(vec![("boom", panicking), ("fine", ok_after(1, vec![1]))]).await;

        assert_eq!(result.results["fine"], vec![1]);
        assert!(result.results["boom"].is_empty());
        assert_eq!(result.errors.len(), 1);
        assert_eq!(result.errors[0].message, "upstream parser exploded");
    }

    #[tokio::test]
    async fn test_empty_sources() {
        let result = aggregate(Vec::<(String, BoxFuture<'static, Result<Vec<u32>>>)>::new()).await;
        assert!(result.results.is_empty());
        assert!(result.errors.is_empty());
    }

    #[tokio::test]
    async fn test_request_id_reaches_spawned_sources() {
        let result = RequestContext::scope("req-42".to_string(), async {
            aggregate(vec![(
                "a",
                Box::pin(async { Ok::<_, DashboardError>(current_request_id().unwrap_or_default()) })
                    as BoxFuture<'static, Result<String>>,
            )])
            .await
        })
        .await;

        assert_eq!(result.results["a"], "req-42");
    }

    #[test]
    fn test_aggregation_run_drains_sink() {
        let sink = ErrorSink::default();
        let run = AggregationRun::start("test", 2);
        sink.push("a", "down");

        let errors = run.finish(&sink);
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].service, "a");
        assert!(sink.is_empty());
    }

    #[test]
    fn test_error_sink_take_drains() {
        let sink = ErrorSink::default();
        sink.push("a", "first");
        sink.clone().push("b", "second");

        assert_eq!(sink.len(), 2);
        let errors = sink.take();
        assert_eq!(errors[0].service, "a");
        assert_eq!(errors[1].service, "b");
        assert!(sink.is_empty());
    }
}
