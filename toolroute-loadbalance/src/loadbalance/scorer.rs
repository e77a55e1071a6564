use std::cmp::Ordering;
use toolroute_core::{
    Alternative, ExpertDefinition, ExpertRuntimeStatus, ScoreBreakdown, ToolRequest, WeightProfile,
};

/// 负载对准确度的折损系数
const ACCURACY_LOAD_PENALTY: f64 = 0.1;
/// 专家平均延迟超过请求上限时的延迟分惩罚
const LATENCY_CONSTRAINT_PENALTY: f64 = 0.5;
/// 单工具 specialized 专家的加成
const SPECIALIST_BONUS: f64 = 1.1;
const PRIORITY_DIVISOR: f64 = 10_000.0;
/// 最多保留的备选数量
pub const MAX_ALTERNATIVES: usize = 3;

/// 排序后的候选专家
#[derive(Debug, Clone, PartialEq)]
pub struct RankedExpert {
    pub expert_id: String,
    /// total 为加成和优先级调整后的最终分
    pub score: ScoreBreakdown,
}

/// 专家评分器
///
/// 纯函数：结果只取决于专家快照、请求和权重，不读时钟也不含随机数。
#[derive(Debug, Clone, Copy)]
pub struct Scorer {
    latency_baseline_ms: f64,
}

impl Default for Scorer {
    fn default() -> Self {
        Self::new(200.0)
    }
}

impl Scorer {
    pub fn new(latency_baseline_ms: f64) -> Self {
        Self {
            latency_baseline_ms,
        }
    }

    /// 四分量加权评分
    pub fn score(
        &self,
        definition: &ExpertDefinition,
        status: &ExpertRuntimeStatus,
        request: &ToolRequest,
        weights: &WeightProfile,
    ) -> ScoreBreakdown {
        let capabilities = &definition.capabilities;
        let load = status.load.clamp(0.0, 1.0);

        let accuracy = capabilities.accuracy_score * (1.0 - load * ACCURACY_LOAD_PENALTY);

        let mut latency = (1.0 - capabilities.avg_latency_ms / self.latency_baseline_ms).max(0.0);
        if let Some(max_latency_ms) = request.max_latency_ms {
            if capabilities.avg_latency_ms > max_latency_ms as f64 {
                latency *= LATENCY_CONSTRAINT_PENALTY;
            }
        }

        let reliability = status.success_rate;
        let efficiency = 1.0 - load;

        let total = weights.accuracy * accuracy
            + weights.latency * latency
            + weights.reliability * reliability
            + weights.efficiency * efficiency;

        ScoreBreakdown {
            accuracy,
            latency,
            reliability,
            efficiency,
            total,
        }
    }

    /// 评分并排序：specialized 加成、优先级微调，同分按 ID 字典序
    pub fn rank<'a, I>(
        &self,
        candidates: I,
        request: &ToolRequest,
        weights: &WeightProfile,
    ) -> Vec<RankedExpert>
    where
        I: IntoIterator<Item = (&'a ExpertDefinition, &'a ExpertRuntimeStatus)>,
    {
        let mut ranked: Vec<RankedExpert> = candidates
            .into_iter()
            .map(|(definition, status)| {
                let mut score = self.score(definition, status, request, weights);
                if definition.is_single_tool_specialist() {
                    score.total *= SPECIALIST_BONUS;
                }
                score.total += definition.priority as f64 / PRIORITY_DIVISOR;
                RankedExpert {
                    expert_id: definition.id.clone(),
                    score,
                }
            })
            .collect();

        ranked.sort_by(|a, b| {
            b.score
                .total
                .partial_cmp(&a.score.total)
                .unwrap_or(Ordering::Equal)
                .then_with(|| a.expert_id.cmp(&b.expert_id))
        });
        ranked
    }
}

/// 置信度：只有一个候选时为 1.0，否则由与第二名的分差决定
pub fn confidence(ranked: &[RankedExpert]) -> f64 {
    match ranked {
        [] => 0.0,
        [_] => 1.0,
        [first, second, ..] => (0.5 + 2.0 * (first.score.total - second.score.total)).clamp(0.0, 1.0),
    }
}

/// 生成备选列表（不含选中的专家）
pub fn alternatives(ranked: &[RankedExpert], weights: &WeightProfile) -> Vec<Alternative> {
    let Some(selected) = ranked.first() else {
        return Vec::new();
    };

    ranked
        .iter()
        .skip(1)
        .take(MAX_ALTERNATIVES)
        .map(|alt| Alternative {
            expert_id: alt.expert_id.clone(),
            score: alt.score.total,
            reason: alternative_reason(&selected.score, &alt.score, weights),
        })
        .collect()
}

/// 找出备选相对选中专家加权差距最大的分量
fn alternative_reason(
    selected: &ScoreBreakdown,
    alternative: &ScoreBreakdown,
    weights: &WeightProfile,
) -> String {
    let gaps = [
        ("accuracy", weights.accuracy, selected.accuracy, alternative.accuracy),
        ("latency", weights.latency, selected.latency, alternative.latency),
        (
            "reliability",
            weights.reliability,
            selected.reliability,
            alternative.reliability,
        ),
        (
            "efficiency",
            weights.efficiency,
            selected.efficiency,
            alternative.efficiency,
        ),
    ];

    let worst = gaps
        .iter()
        .map(|(name, weight, sel, alt)| (*name, weight * (sel - alt), *sel, *alt))
        .filter(|(_, gap, _, _)| *gap > 0.0)
        .max_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(Ordering::Equal));

    match worst {
        Some((name, _, sel, alt)) => format!("lower {name} ({alt:.2} vs {sel:.2})"),
        None => "lost on priority or specialist bonus".to_string(),
    }
}

/// 决策说明文字
pub fn rationale(ranked: &[RankedExpert], eligible: usize) -> String {
    match ranked.first() {
        Some(selected) => format!(
            "selected {} with score {:.3} (accuracy {:.2}, latency {:.2}, reliability {:.2}, efficiency {:.2}) among {} eligible",
            selected.expert_id,
            selected.score.total,
            selected.score.accuracy,
            selected.score.latency,
            selected.score.reliability,
            selected.score.efficiency,
            eligible
        ),
        None => "no eligible expert".to_string(),
    }
}
