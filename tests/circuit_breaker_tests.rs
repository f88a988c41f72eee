use dashboard_aggregator::circuit_breaker::{
    CircuitBreakerConfig, CircuitBreakerRegistry, CircuitState,
};
use std::time::Duration;
use tokio::time::sleep;

fn fast_config() -> CircuitBreakerConfig {
    CircuitBreakerConfig {
        failure_threshold: 3,
        open_duration_ms: 100,
        half_open_requests: 1,
    }
}

#[tokio::test]
async fn test_circuit_breaker_lifecycle() {
    let registry = CircuitBreakerRegistry::new(fast_config());
    let label = "coffees";

    // Initially circuit should be closed
    assert_eq!(registry.state(label).await, CircuitState::Closed);
    assert!(registry.can_proceed(label).await);

    // Two failures keep it closed, the third opens it
    for expected in [CircuitState::Closed, CircuitState::Closed, CircuitState::Open] {
        registry.record_failure(label).await;
        assert_eq!(registry.state(label).await, expected);
    }
    assert!(!registry.can_proceed(label).await);

    // Wait for the open duration to elapse
    sleep(Duration::from_millis(150)).await;

    // The next admission check performs the half-open transition
    assert_eq!(registry.state(label).await, CircuitState::Open);
    assert!(registry.can_proceed(label).await);
    assert_eq!(registry.state(label).await, CircuitState::HalfOpen);

    // A successful trial closes the circuit
    registry.record_success(label).await;
    let snapshot = registry.snapshot(label).await.unwrap();
    assert_eq!(snapshot.state, CircuitState::Closed);
    assert_eq!(snapshot.failure_count, 0);
    assert!(snapshot.opened_at.is_none());
    assert!(registry.can_proceed(label).await);
}

#[tokio::test]
async fn test_half_open_failure_reopens_circuit() {
    let registry = CircuitBreakerRegistry::new(fast_config());
    let label = "beers";

    for _ in 0..3 {
        registry.record_failure(label).await;
    }
    let first_opened_at = registry.snapshot(label).await.unwrap().opened_at.unwrap();

    sleep(Duration::from_millis(150)).await;
    assert!(registry.can_proceed(label).await);
    assert_eq!(registry.state(label).await, CircuitState::HalfOpen);

    // Fail in half-open state: reopen with a fresh timestamp
    registry.record_failure(label).await;
    let snapshot = registry.snapshot(label).await.unwrap();
    assert_eq!(snapshot.state, CircuitState::Open);
    assert!(snapshot.opened_at.unwrap() > first_opened_at);
    assert!(!registry.can_proceed(label).await);
}

#[tokio::test]
async fn test_half_open_admits_single_trial() {
    let registry = CircuitBreakerRegistry::new(fast_config());
    let label = "characters";

    for _ in 0..3 {
        registry.record_failure(label).await;
    }
    sleep(Duration::from_millis(150)).await;

    assert!(registry.can_proceed(label).await);
    assert!(!registry.can_proceed(label).await);
    assert!(!registry.can_proceed(label).await);

    let metrics = registry.metrics(label).await.unwrap();
    assert_eq!(metrics.circuit_half_opened_count, 1);
    assert_eq!(metrics.rejected_requests, 2);
}

#[tokio::test]
async fn test_rejection_is_not_a_failure() {
    let registry = CircuitBreakerRegistry::new(CircuitBreakerConfig::default());
    let label = "coffees";

    for _ in 0..3 {
        registry.record_failure(label).await;
    }
    for _ in 0..5 {
        assert!(!registry.can_proceed(label).await);
    }

    let metrics = registry.metrics(label).await.unwrap();
    assert_eq!(metrics.failed_requests, 3);
    assert_eq!(metrics.rejected_requests, 5);
    assert_eq!(metrics.circuit_opened_count, 1);
}

#[tokio::test]
async fn test_multiple_labels() {
    let registry = CircuitBreakerRegistry::new(CircuitBreakerConfig {
        failure_threshold: 2,
        ..Default::default()
    });

    // Label 1: Keep it closed with successes
    assert!(registry.can_proceed("beers").await);
    registry.record_success("beers").await;

    // Label 2: Open it with failures
    for _ in 0..2 {
        assert!(registry.can_proceed("coffees").await);
        registry.record_failure("coffees").await;
    }

    assert_eq!(registry.state("beers").await, CircuitState::Closed);
    assert!(registry.can_proceed("beers").await);
    assert_eq!(registry.state("coffees").await, CircuitState::Open);
    assert!(!registry.can_proceed("coffees").await);

    let all_metrics = registry.all_metrics().await;
    assert_eq!(all_metrics.len(), 2);

    let beers = all_metrics
        .iter()
        .find(|(label, _, _)| label == "beers")
        .unwrap();
    assert_eq!(beers.2, CircuitState::Closed);
    assert_eq!(beers.1.successful_requests, 1);

    let coffees = all_metrics
        .iter()
        .find(|(label, _, _)| label == "coffees")
        .unwrap();
    assert_eq!(coffees.2, CircuitState::Open);
    assert_eq!(coffees.1.failed_requests, 2);
}

#[tokio::test]
async fn test_success_resets_consecutive_failures() {
    let registry = CircuitBreakerRegistry::new(CircuitBreakerConfig::default());
    let label = "characters";

    registry.record_failure(label).await;
    registry.record_failure(label).await;
    registry.record_success(label).await;
    registry.record_failure(label).await;
    registry.record_failure(label).await;

    let snapshot = registry.snapshot(label).await.unwrap();
    assert_eq!(snapshot.state, CircuitState::Closed);
    assert_eq!(snapshot.failure_count, 2);
}

#[tokio::test]
async fn test_concurrent_failures_are_tallied_per_label() {
    let registry = CircuitBreakerRegistry::new(CircuitBreakerConfig {
        failure_threshold: 1000,
        ..Default::default()
    });

    let handles: Vec<_> = (0..40)
        .map(|i| {
            let registry = registry.clone();
            let label = if i % 2 == 0 { "even" } else { "odd" };
            tokio::spawn(async move { registry.record_failure(label).await })
        })
        .collect();
    for handle in handles {
        handle.await.unwrap();
    }

    assert_eq!(registry.snapshot("even").await.unwrap().failure_count, 20);
    assert_eq!(registry.snapshot("odd").await.unwrap().failure_count, 20);
}
