use serde::Serialize;
use thiserror::Error;

use crate::types::ToolType;

/// 被排除的专家及原因
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RejectedExpert {
    pub expert_id: String,
    pub reason: String,
}

/// 路由错误
///
/// 只有在回退被禁用时才会传播给调用方，与工具自身的业务错误是不同类型。
#[derive(Debug, Clone, Error)]
pub enum RoutingError {
    #[error(
        "no eligible expert for tool '{tool}' (request '{request_id}'): {supporting_experts} supporting, {} rejected",
        .rejected.len()
    )]
    NoEligibleExpert {
        request_id: String,
        tool: ToolType,
        supporting_experts: usize,
        rejected: Vec<RejectedExpert>,
    },
    #[error("routing decision for request '{request_id}' exceeded budget of {budget_ms}ms")]
    DecisionBudgetExceeded { request_id: String, budget_ms: u64 },
}

/// 专家执行错误（抛出异常或超时）
#[derive(Debug, Clone, Error)]
pub enum ExpertExecutionError {
    #[error("expert '{expert_id}' timed out after {timeout_ms}ms")]
    Timeout { expert_id: String, timeout_ms: u64 },
    #[error("expert '{expert_id}' failed: {message}")]
    Failed { expert_id: String, message: String },
    #[error("expert '{expert_id}' is at max concurrency")]
    Saturated { expert_id: String },
}

impl ExpertExecutionError {
    /// 用于指标错误分类的短标签
    pub fn kind(&self) -> &'static str {
        match self {
            ExpertExecutionError::Timeout { .. } => "timeout",
            ExpertExecutionError::Failed { .. } => "failed",
            ExpertExecutionError::Saturated { .. } => "saturated",
        }
    }

    pub fn expert_id(&self) -> &str {
        match self {
            ExpertExecutionError::Timeout { expert_id, .. }
            | ExpertExecutionError::Failed { expert_id, .. }
            | ExpertExecutionError::Saturated { expert_id } => expert_id,
        }
    }
}

/// 缓存错误（非致命：记录日志并绕过缓存）
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("failed to encode cache key: {0}")]
    KeyEncoding(#[from] serde_json::Error),
    #[error("invalid invalidation pattern '{pattern}': {reason}")]
    InvalidPattern { pattern: String, reason: String },
}

/// 配置错误，只在启动时致命
#[derive(Debug, Error)]
pub enum ConfigurationError {
    #[error("weight profile for tool '{tool}' has invalid {component} weight {value} (must be within [0, 1])")]
    InvalidWeight {
        tool: String,
        component: String,
        value: f64,
    },
    #[error("weight profile for tool '{tool}' has no positive component")]
    ZeroWeightProfile { tool: String },
    #[error("no weight profile mapped for tool '{tool}'")]
    MissingWeights { tool: String },
    #[error("unknown tool '{tool}' referenced in {context}")]
    UnknownTool { context: String, tool: String },
    #[error("expert '{expert_id}' is invalid: {reason}")]
    InvalidExpert { expert_id: String, reason: String },
    #[error("expert '{expert_id}' has no executor registered")]
    MissingExecutor { expert_id: String },
    #[error("setting '{setting}' is invalid: {reason}")]
    InvalidSetting { setting: String, reason: String },
    #[error("failed to read config file '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
}
