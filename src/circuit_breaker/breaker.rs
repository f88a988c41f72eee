use super::types::{CircuitBreakerConfig, CircuitBreakerMetrics, CircuitSnapshot, CircuitState};
use crate::metrics;
use std::time::Instant;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// Circuit breaker for a single upstream label
#[derive(Debug)]
pub struct CircuitBreaker {
    /// Configuration
    config: CircuitBreakerConfig,
    /// Current state, serialized per label
    state: RwLock<State>,
    /// Upstream label
    label: String,
}

#[derive(Debug)]
struct State {
    /// Current circuit state
    circuit_state: CircuitState,
    /// Consecutive failures; always 0 while closed after a reset
    failure_count: u32,
    /// Trial requests admitted while half-open and not yet recorded
    half_open_in_flight: u32,
    /// When the latest half-open trial was admitted
    trial_admitted_at: Option<Instant>,
    /// Time when the circuit was (re)opened
    opened_at: Option<Instant>,
    /// Metrics
    metrics: CircuitBreakerMetrics,
}

impl CircuitBreaker {
    /// Create a new circuit breaker
    pub fn new(label: String, config: CircuitBreakerConfig) -> Self {
        debug!(
            label = %label,
            failure_threshold = config.failure_threshold,
            open_duration_ms = config.open_duration_ms,
            half_open_requests = config.half_open_requests,
            "Creating circuit breaker"
        );

        Self {
            config,
            state: RwLock::new(State {
                circuit_state: CircuitState::Closed,
                failure_count: 0,
                half_open_in_flight: 0,
                trial_admitted_at: None,
                opened_at: None,
                metrics: CircuitBreakerMetrics::default(),
            }),
            label,
        }
    }

    /// Decide whether a request may be attempted.
    ///
    /// An open circuit whose open duration has elapsed moves to half-open here;
    /// there is no background timer. A rejection is not a failure and is not
    /// recorded as one.
    pub async fn can_proceed(&self) -> bool {
        let mut state = self.state.write().await;

        match state.circuit_state {
            CircuitState::Closed => {
                state.metrics.total_requests += 1;
                true
            }
            CircuitState::Open => {
                let Some(opened_at) = state.opened_at else {
                    warn!(label = %self.label, "Circuit open but no opened_at timestamp");
                    state.metrics.rejected_requests += 1;
                    return false;
                };

                if opened_at.elapsed() >= self.config.open_duration() {
                    self.transition_to_half_open(&mut state);
                    self.admit_trial(&mut state);
                    true
                } else {
                    state.metrics.rejected_requests += 1;
                    debug!(
                        label = %self.label,
                        time_remaining = ?self.config.open_duration().saturating_sub(opened_at.elapsed()),
                        "Circuit breaker open, rejecting request"
                    );
                    false
                }
            }
            CircuitState::HalfOpen => {
                // A trial that never recorded (its caller was cancelled) holds
                // its slot for at most one open duration.
                let lease_expired = state
                    .trial_admitted_at
                    .is_some_and(|at| at.elapsed() >= self.config.open_duration());
                if state.half_open_in_flight >= self.config.half_open_requests && lease_expired {
                    warn!(
                        label = %self.label,
                        abandoned = state.half_open_in_flight,
                        "Half-open trial never recorded, reclaiming slots"
                    );
                    state.half_open_in_flight = 0;
                }

                if state.half_open_in_flight < self.config.half_open_requests {
                    self.admit_trial(&mut state);
                    debug!(
                        label = %self.label,
                        in_flight = state.half_open_in_flight,
                        max = self.config.half_open_requests,
                        "Allowing half-open trial request"
                    );
                    true
                } else {
                    state.metrics.rejected_requests += 1;
                    debug!(label = %self.label, "Half-open trial in flight, rejecting");
                    false
                }
            }
        }
    }

    /// Record a successful request
    pub async fn record_success(&self) {
        let mut state = self.state.write().await;
        state.metrics.successful_requests += 1;

        match state.circuit_state {
            CircuitState::Closed => {
                state.failure_count = 0;
            }
            CircuitState::HalfOpen => {
                debug!(label = %self.label, "Half-open trial succeeded");
                self.transition_to_closed(&mut state);
            }
            CircuitState::Open => {
                // A call admitted before the circuit opened finished late.
                debug!(label = %self.label, "Recording success in open state");
            }
        }
    }

    /// Record a failed request
    pub async fn record_failure(&self) {
        let mut state = self.state.write().await;
        state.metrics.failed_requests += 1;

        match state.circuit_state {
            CircuitState::Closed => {
                state.failure_count += 1;

                debug!(
                    label = %self.label,
                    failure_count = state.failure_count,
                    threshold = self.config.failure_threshold,
                    "Request failed in closed state"
                );

                if state.failure_count >= self.config.failure_threshold {
                    self.transition_to_open(&mut state);
                }
            }
            CircuitState::HalfOpen => {
                warn!(label = %self.label, "Half-open trial failed, reopening circuit");
                state.failure_count += 1;
                self.transition_to_open(&mut state);
            }
            CircuitState::Open => {
                debug!(label = %self.label, "Recording failure in open state");
            }
        }
    }

    /// Get current state
    pub async fn state(&self) -> CircuitState {
        self.state.read().await.circuit_state
    }

    /// Get a snapshot of the circuit
    pub async fn snapshot(&self) -> CircuitSnapshot {
        let state = self.state.read().await;
        CircuitSnapshot {
            label: self.label.clone(),
            state: state.circuit_state,
            failure_count: state.failure_count,
            opened_at: state.opened_at,
        }
    }

    /// Get metrics
    pub async fn metrics(&self) -> CircuitBreakerMetrics {
        self.state.read().await.metrics.clone()
    }

    fn transition_to_open(&self, state: &mut State) {
        info!(
            label = %self.label,
            failure_count = state.failure_count,
            open_duration_ms = self.config.open_duration_ms,
            "Circuit breaker opening"
        );

        state.circuit_state = CircuitState::Open;
        state.opened_at = Some(Instant::now());
        state.half_open_in_flight = 0;
        state.trial_admitted_at = None;
        state.metrics.circuit_opened_count += 1;
        metrics::record_circuit_state(&self.label, CircuitState::Open);
    }

    fn admit_trial(&self, state: &mut State) {
        state.metrics.total_requests += 1;
        state.half_open_in_flight += 1;
        state.trial_admitted_at = Some(Instant::now());
    }

    fn transition_to_half_open(&self, state: &mut State) {
        info!(label = %self.label, "Circuit breaker transitioning to half-open");

        state.circuit_state = CircuitState::HalfOpen;
        state.opened_at = None;
        state.half_open_in_flight = 0;
        state.metrics.circuit_half_opened_count += 1;
        metrics::record_circuit_state(&self.label, CircuitState::HalfOpen);
    }

    fn transition_to_closed(&self, state: &mut State) {
        info!(label = %self.label, "Circuit breaker closing");

        state.circuit_state = CircuitState::Closed;
        state.opened_at = None;
        state.failure_count = 0;
        state.half_open_in_flight = 0;
        state.trial_admitted_at = None;
        state.metrics.circuit_closed_count += 1;
        metrics::record_circuit_state(&self.label, CircuitState::Closed);
    }
}
