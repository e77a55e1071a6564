use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

/// 执行结果：数据或错误
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum ToolOutcome {
    Data(Value),
    Error(String),
}

/// 执行元数据
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct ExecutionMetadata {
    pub expert_id: String,
    pub routing_latency: Duration,
    pub execution_latency: Duration,
    pub total_latency: Duration,
    pub cache_hit: bool,
    pub used_fallback: bool,
    /// 对所选专家的调用次数（含重试）
    pub attempts: u32,
}

/// 工具调用响应
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResponse {
    pub request_id: String,
    pub success: bool,
    pub outcome: ToolOutcome,
    pub metadata: ExecutionMetadata,
}

impl ToolResponse {
    pub fn success(request_id: &str, data: Value, metadata: ExecutionMetadata) -> Self {
        Self {
            request_id: request_id.to_string(),
            success: true,
            outcome: ToolOutcome::Data(data),
            metadata,
        }
    }

    pub fn failure(request_id: &str, error: impl Into<String>, metadata: ExecutionMetadata) -> Self {
        Self {
            request_id: request_id.to_string(),
            success: false,
            outcome: ToolOutcome::Error(error.into()),
            metadata,
        }
    }

    pub fn data(&self) -> Option<&Value> {
        match &self.outcome {
            ToolOutcome::Data(value) => Some(value),
            ToolOutcome::Error(_) => None,
        }
    }

    pub fn error(&self) -> Option<&str> {
        match &self.outcome {
            ToolOutcome::Data(_) => None,
            ToolOutcome::Error(message) => Some(message),
        }
    }
}
