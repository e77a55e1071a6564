use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

use super::request::ToolType;

/// 专家类型标签
///
/// 只用于评分加成，不代表行为上的继承层次：所有专家实现同一组操作。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ExpertType {
    Accuracy,
    Latency,
    #[default]
    Balanced,
    Specialized,
}

/// 专家能力声明
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExpertCapabilities {
    pub supported_tools: BTreeSet<ToolType>,
    pub max_concurrency: usize,
    /// 声明的平均延迟（毫秒）
    pub avg_latency_ms: f64,
    /// 声明的准确度 (0.0-1.0)
    pub accuracy_score: f64,
}

impl ExpertCapabilities {
    pub fn supports(&self, tool: ToolType) -> bool {
        self.supported_tools.contains(&tool)
    }
}

/// 专家定义，启动时加载，之后不可变
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExpertDefinition {
    pub id: String,
    pub expert_type: ExpertType,
    pub capabilities: ExpertCapabilities,
    /// 基础分配权重
    pub base_weight: f64,
    /// 同分时的优先级加成，按 `priority / 10000` 计入总分
    pub priority: i32,
}

impl ExpertDefinition {
    /// 只支持一种工具的 specialized 专家享受评分加成
    pub fn is_single_tool_specialist(&self) -> bool {
        self.expert_type == ExpertType::Specialized
            && self.capabilities.supported_tools.len() == 1
    }
}

/// 专家健康状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthState {
    Healthy,
    Degraded,
    Unhealthy,
    WarmingUp,
}

impl HealthState {
    /// 只有 healthy / degraded 可以参与路由
    pub fn is_routable(&self) -> bool {
        matches!(self, HealthState::Healthy | HealthState::Degraded)
    }

    /// 分配权重中的健康系数
    pub fn multiplier(&self) -> f64 {
        match self {
            HealthState::Healthy => 1.0,
            HealthState::Degraded => 0.5,
            HealthState::Unhealthy | HealthState::WarmingUp => 0.0,
        }
    }
}

impl fmt::Display for HealthState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            HealthState::Healthy => "healthy",
            HealthState::Degraded => "degraded",
            HealthState::Unhealthy => "unhealthy",
            HealthState::WarmingUp => "warming_up",
        };
        f.write_str(name)
    }
}

/// 熔断器状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    /// 冷却中，选择权重强制为 0
    Open,
    /// 冷却结束，等待探测成功后关闭
    HalfOpen,
}

impl CircuitState {
    pub fn allows_selection(&self) -> bool {
        *self == CircuitState::Closed
    }
}

/// 专家运行时状态快照
///
/// 由负载均衡器独占写入，其它组件只拿到读时复制的快照。
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExpertRuntimeStatus {
    pub expert_id: String,
    pub health: HealthState,
    pub circuit: CircuitState,
    /// 当前负载 (0.0-1.0)
    pub load: f64,
    pub active_requests: usize,
    /// 最近 N 次结果的成功率
    pub success_rate: f64,
    pub p95_latency_ms: Option<f64>,
    pub sample_count: usize,
    pub consecutive_probe_failures: u32,
    pub consecutive_probe_successes: u32,
}

impl ExpertRuntimeStatus {
    /// 是否可被选中：健康状态可路由且熔断器关闭
    pub fn is_selectable(&self) -> bool {
        self.health.is_routable() && self.circuit.allows_selection()
    }
}
