pub mod cache;
pub mod circuit_breaker;
pub mod health_monitor;
pub mod manager;
pub mod registry;
pub mod scorer;
pub mod status;

#[cfg(test)]
mod manager_tests;

pub use cache::{CacheStats, RoutingCache};
pub use circuit_breaker::CircuitBreaker;
pub use health_monitor::{HealthMonitor, ProbeResult};
pub use manager::{ExpertStats, HealthSummary, LoadBalanceManager};
pub use registry::ExpertRegistry;
pub use scorer::{alternatives, confidence, rationale, RankedExpert, Scorer, MAX_ALTERNATIVES};
pub use status::{percentile, CircuitTransition, ExpertStatusCell, HealthTransition, StatusChange};
