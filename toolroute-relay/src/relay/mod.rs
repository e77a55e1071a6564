pub mod alerts;
pub mod fallback;
pub mod flags;
pub mod metrics;
pub mod router;

pub use alerts::{evaluate_alerts, Alert, AlertKind, AlertSeverity};
pub use fallback::FallbackExecutor;
pub use flags::{rollout_bucket, BypassReason, FeatureFlagService, ROUTING_FLAG};
pub use metrics::{
    ExecutionEvent, ExpertCounters, LatencySummary, MetricsCollector, MetricsSnapshot,
    RoutingEvent, ToolCounters,
};
pub use router::Router;
