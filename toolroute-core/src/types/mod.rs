pub mod decision;
pub mod expert;
pub mod request;
pub mod response;
pub mod weights;

pub use decision::{Alternative, RoutingDecision, ScoreBreakdown, FALLBACK_EXPERT_ID};
pub use expert::{
    CircuitState, ExpertCapabilities, ExpertDefinition, ExpertRuntimeStatus, ExpertType,
    HealthState,
};
pub use request::{Priority, RequestMetadata, ToolRequest, ToolType};
pub use response::{ExecutionMetadata, ToolOutcome, ToolResponse};
pub use weights::{WeightProfile, WeightTable};
