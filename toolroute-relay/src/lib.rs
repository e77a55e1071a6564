//! Toolroute Relay Library
//!
//! This library provides request routing functionality for the toolroute system including:
//! - The router (`route` / `execute_with_routing`)
//! - Feature flags and percentage rollout
//! - Fallback execution on the pre-routing handlers
//! - Routing metrics and alert evaluation

pub mod relay;

// Re-export commonly used types
pub use relay::{
    evaluate_alerts, rollout_bucket, Alert, AlertKind, AlertSeverity, BypassReason,
    ExecutionEvent, FallbackExecutor, FeatureFlagService, LatencySummary, MetricsCollector,
    MetricsSnapshot, Router, RoutingEvent, ROUTING_FLAG,
};
