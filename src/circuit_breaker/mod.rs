pub mod breaker;
pub mod registry;
pub mod retry;
pub mod types;

pub use breaker::CircuitBreaker;
pub use registry::CircuitBreakerRegistry;
pub use retry::{DoublingBackoff, RetryExecutor};
pub use types::{
    CircuitBreakerConfig, CircuitBreakerMetrics, CircuitSnapshot, CircuitState, RetryConfig,
};
