use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::request::ToolType;

/// 回退路径使用的保留专家 ID
pub const FALLBACK_EXPERT_ID: &str = "__fallback__";

/// 四分量评分明细
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct ScoreBreakdown {
    pub accuracy: f64,
    pub latency: f64,
    pub reliability: f64,
    pub efficiency: f64,
    pub total: f64,
}

/// 备选专家
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alternative {
    pub expert_id: String,
    pub score: f64,
    pub reason: String,
}

/// 路由决策，生成后不可变
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoutingDecision {
    pub request_id: String,
    pub tool: ToolType,
    pub expert_id: String,
    /// 置信度 (0.0-1.0)
    pub confidence: f64,
    pub score: ScoreBreakdown,
    /// 最多 3 个按分数排序的备选
    pub alternatives: Vec<Alternative>,
    pub rationale: String,
    pub decided_at: DateTime<Utc>,
    pub decision_latency: Duration,
    #[serde(default)]
    pub cache_hit: bool,
}

impl RoutingDecision {
    /// 没有可用专家时的合成回退决策
    pub fn fallback(
        request_id: &str,
        tool: ToolType,
        rationale: impl Into<String>,
        decision_latency: Duration,
    ) -> Self {
        Self {
            request_id: request_id.to_string(),
            tool,
            expert_id: FALLBACK_EXPERT_ID.to_string(),
            confidence: 1.0,
            score: ScoreBreakdown {
                reliability: 1.0,
                ..ScoreBreakdown::default()
            },
            alternatives: Vec::new(),
            rationale: rationale.into(),
            decided_at: Utc::now(),
            decision_latency,
            cache_hit: false,
        }
    }

    pub fn is_fallback(&self) -> bool {
        self.expert_id == FALLBACK_EXPERT_ID
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fallback_decision_shape() {
        let decision =
            RoutingDecision::fallback("r1", ToolType::Search, "no experts", Duration::ZERO);
        assert!(decision.is_fallback());
        assert_eq!(decision.confidence, 1.0);
        assert_eq!(decision.score.reliability, 1.0);
        assert_eq!(decision.score.accuracy, 0.0);
        assert_eq!(decision.score.latency, 0.0);
        assert_eq!(decision.score.efficiency, 0.0);
        assert_eq!(decision.score.total, 0.0);
        assert!(decision.alternatives.is_empty());
    }
}
