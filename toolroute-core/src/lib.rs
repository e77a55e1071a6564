//! Toolroute Core Library
//!
//! This library provides core functionality for the toolroute system including:
//! - Configuration management and validation
//! - Request / decision / response data model
//! - Expert definitions and the executor seam
//! - Error taxonomy shared by all crates

pub mod config;
pub mod error;
pub mod expert;
pub mod types;

// Re-export commonly used types
pub use config::loader::{load_config, load_config_from_path, load_config_from_str};
pub use config::model::{
    AlertSettings, CacheSettings, CircuitBreakerSettings, Config, ExpertConfig, FlagConfig,
    HealthSettings, LoadBalanceSettings, MetricsSettings, RouterSettings, ToolConfig,
};
pub use error::{
    CacheError, ConfigurationError, ExpertExecutionError, RejectedExpert, RoutingError,
};
pub use expert::{Expert, ToolExecutor};
pub use types::{
    Alternative, CircuitState, ExecutionMetadata, ExpertCapabilities, ExpertDefinition,
    ExpertRuntimeStatus, ExpertType, HealthState, Priority, RequestMetadata, RoutingDecision,
    ScoreBreakdown, ToolOutcome, ToolRequest, ToolResponse, ToolType, WeightProfile, WeightTable,
    FALLBACK_EXPERT_ID,
};
