//! Toolroute Load Balance Library
//!
//! This library provides expert selection functionality for the toolroute system including:
//! - Expert registry built from configuration
//! - Deterministic four-component scoring
//! - Per-expert runtime status, concurrency slots and circuit breaking
//! - Periodic health probing
//! - Routing decision cache

pub mod loadbalance;

// Re-export commonly used types
pub use loadbalance::{
    CacheStats, CircuitBreaker, ExpertRegistry, ExpertStats, HealthMonitor, HealthSummary,
    LoadBalanceManager, ProbeResult, RankedExpert, RoutingCache, Scorer,
};
