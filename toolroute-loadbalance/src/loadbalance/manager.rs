use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::OwnedSemaphorePermit;
use toolroute_core::{
    CircuitState, Expert, ExpertExecutionError, ExpertRuntimeStatus, HealthState,
    LoadBalanceSettings, RouterSettings, ToolType,
};
use tracing::{debug, info, warn};

use super::cache::RoutingCache;
use super::registry::ExpertRegistry;
use super::status::{ExpertStatusCell, StatusChange};

/// 负载均衡管理器
///
/// 专家运行时状态的唯一写入方。路由器只读取快照，执行结果和探测结果
/// 通过这里回写。健康状态变为 unhealthy 时同步清理指向该专家的缓存。
pub struct LoadBalanceManager {
    registry: Arc<ExpertRegistry>,
    cells: HashMap<String, Arc<ExpertStatusCell>>,
    cache: Arc<RoutingCache>,
    load_balance: LoadBalanceSettings,
    overload_threshold: f64,
}

/// 单个专家的统计信息
#[derive(Debug, Clone, Serialize)]
pub struct ExpertStats {
    pub expert_id: String,
    pub status: ExpertRuntimeStatus,
    pub distribution_weight: f64,
    pub circuit_error_rate: f64,
    pub circuit_trips: u64,
    pub unhealthy_for: Option<Duration>,
}

/// 健康状态汇总
#[derive(Debug, Clone, Serialize)]
pub struct HealthSummary {
    pub total_experts: usize,
    pub healthy_experts: usize,
    pub degraded_experts: usize,
    pub unhealthy_experts: usize,
    pub warming_up_experts: usize,
    pub open_circuits: usize,
    pub experts: Vec<ExpertStats>,
}

impl HealthSummary {
    /// 可参与路由的专家占比
    pub fn routable_ratio(&self) -> f64 {
        if self.total_experts == 0 {
            0.0
        } else {
            (self.healthy_experts + self.degraded_experts) as f64 / self.total_experts as f64
        }
    }
}

impl std::fmt::Display for HealthSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Health: {}/{} healthy, {} degraded, {} unhealthy, {} warming up, {} open circuits",
            self.healthy_experts,
            self.total_experts,
            self.degraded_experts,
            self.unhealthy_experts,
            self.warming_up_experts,
            self.open_circuits
        )
    }
}

impl LoadBalanceManager {
    pub fn new(
        registry: Arc<ExpertRegistry>,
        cache: Arc<RoutingCache>,
        settings: &RouterSettings,
    ) -> Self {
        let cells = registry
            .all()
            .iter()
            .map(|expert| {
                let cell = ExpertStatusCell::new(
                    expert.id(),
                    expert.capabilities().max_concurrency,
                    &settings.health,
                    &settings.circuit_breaker,
                );
                (expert.id().to_string(), Arc::new(cell))
            })
            .collect();

        Self {
            registry,
            cells,
            cache,
            load_balance: settings.load_balance.clone(),
            overload_threshold: settings.overload_threshold,
        }
    }

    pub fn registry(&self) -> &Arc<ExpertRegistry> {
        &self.registry
    }

    pub fn cache(&self) -> &Arc<RoutingCache> {
        &self.cache
    }

    pub fn overload_threshold(&self) -> f64 {
        self.overload_threshold
    }

    /// 获取专家状态快照
    pub fn snapshot(&self, expert_id: &str) -> Option<ExpertRuntimeStatus> {
        self.cells
            .get(expert_id)
            .map(|cell| cell.snapshot(Instant::now()))
    }

    /// 支持该工具的专家及其快照，按专家 ID 排序
    pub fn snapshots_for(&self, tool: ToolType) -> Vec<(Expert, ExpertRuntimeStatus)> {
        let now = Instant::now();
        self.registry
            .supporting(tool)
            .into_iter()
            .filter_map(|expert| {
                self.cells
                    .get(expert.id())
                    .map(|cell| (expert.clone(), cell.snapshot(now)))
            })
            .collect()
    }

    pub fn all_snapshots(&self) -> Vec<ExpertRuntimeStatus> {
        let now = Instant::now();
        self.registry
            .all()
            .iter()
            .filter_map(|expert| self.cells.get(expert.id()).map(|cell| cell.snapshot(now)))
            .collect()
    }

    pub fn get_load(&self, expert_id: &str) -> f64 {
        self.cells.get(expert_id).map_or(0.0, |cell| cell.load())
    }

    /// 健康状态可路由且熔断器关闭
    pub fn is_selectable(&self, expert_id: &str) -> bool {
        self.cells
            .get(expert_id)
            .is_some_and(|cell| {
                cell.health().is_routable() && cell.circuit(Instant::now()).allows_selection()
            })
    }

    /// 非阻塞占用专家的并发槽位
    pub fn try_acquire(&self, expert_id: &str) -> Result<OwnedSemaphorePermit, ExpertExecutionError> {
        self.cells
            .get(expert_id)
            .and_then(|cell| cell.try_acquire())
            .ok_or_else(|| ExpertExecutionError::Saturated {
                expert_id: expert_id.to_string(),
            })
    }

    /// 在限定时间内等待专家的并发槽位
    pub async fn acquire_within(
        &self,
        expert_id: &str,
        timeout: Duration,
    ) -> Result<OwnedSemaphorePermit, ExpertExecutionError> {
        let saturated = || ExpertExecutionError::Saturated {
            expert_id: expert_id.to_string(),
        };

        let cell = self.cells.get(expert_id).ok_or_else(saturated)?;
        cell.acquire_within(timeout).await.ok_or_else(saturated)
    }

    /// 回写一次执行结果
    pub async fn record_outcome(&self, expert_id: &str, success: bool, latency: Duration) {
        let Some(cell) = self.cells.get(expert_id) else {
            return;
        };
        let change = cell.record_outcome(success, latency, Instant::now());
        self.apply_change(change).await;
    }

    /// 回写一次健康探测结果
    pub async fn record_probe(&self, expert_id: &str, success: bool) {
        let Some(cell) = self.cells.get(expert_id) else {
            return;
        };
        let change = cell.record_probe(success, Instant::now());
        self.apply_change(change).await;
    }

    /// 管理员强制设置健康状态
    pub async fn force_health(&self, expert_id: &str, state: HealthState) -> bool {
        let Some(cell) = self.cells.get(expert_id) else {
            warn!("Cannot force health of unknown expert '{}'", expert_id);
            return false;
        };
        info!("Forcing health of expert '{}' to {}", expert_id, state);
        let change = cell.force(state, Instant::now());
        self.apply_change(change).await;
        true
    }

    async fn apply_change(&self, change: StatusChange) {
        if change.is_empty() {
            return;
        }

        if let Some(transition) = &change.health {
            match transition.to {
                HealthState::Unhealthy | HealthState::Degraded => warn!(
                    "Expert '{}' health changed: {} -> {}",
                    transition.expert_id, transition.from, transition.to
                ),
                _ => info!(
                    "Expert '{}' health changed: {} -> {}",
                    transition.expert_id, transition.from, transition.to
                ),
            }

            if transition.to == HealthState::Unhealthy {
                let purged = self.cache.invalidate_expert(&transition.expert_id).await;
                debug!(
                    "Purged {} cached decisions for unhealthy expert '{}'",
                    purged, transition.expert_id
                );
            }
        }

        if let Some(transition) = &change.circuit {
            match transition.to {
                CircuitState::Open => {
                    warn!("Circuit opened for expert '{}'", transition.expert_id);
                    self.cache.invalidate_expert(&transition.expert_id).await;
                }
                CircuitState::HalfOpen => {
                    debug!("Circuit half-open for expert '{}'", transition.expert_id)
                }
                CircuitState::Closed => {
                    info!("Circuit closed for expert '{}'", transition.expert_id)
                }
            }
        }
    }

    /// 有效分配权重
    ///
    /// `base × 健康系数 × (1 − load×factor) × min(1, 期望p95 / 实际p95)`，
    /// 期望 p95 为声明平均延迟乘以惩罚倍数。熔断未关闭时为 0。
    pub fn distribution_weight(&self, expert_id: &str) -> f64 {
        let (Some(expert), Some(cell)) = (self.registry.get(expert_id), self.cells.get(expert_id))
        else {
            return 0.0;
        };
        let status = cell.snapshot(Instant::now());
        self.weight_for(expert, &status)
    }

    fn weight_for(&self, expert: &Expert, status: &ExpertRuntimeStatus) -> f64 {
        if !status.circuit.allows_selection() {
            return 0.0;
        }

        let base = expert.definition().base_weight;
        let health_multiplier = status.health.multiplier();
        let load_multiplier = (1.0 - status.load * self.load_balance.load_multiplier_factor).max(0.0);

        let expected_p95 =
            expert.capabilities().avg_latency_ms.max(1.0) * self.load_balance.latency_penalty_ratio;
        let latency_factor = match status.p95_latency_ms {
            Some(recent) if recent > 0.0 => (expected_p95 / recent).min(1.0),
            _ => 1.0,
        };

        base * health_multiplier * load_multiplier * latency_factor
    }

    /// 该工具下各专家的分配权重，按权重降序（同权重按 ID）
    pub fn distribution_weights(&self, tool: ToolType) -> Vec<(String, f64)> {
        let mut weights: Vec<(String, f64)> = self
            .snapshots_for(tool)
            .iter()
            .map(|(expert, status)| (expert.id().to_string(), self.weight_for(expert, status)))
            .collect();
        weights.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.cmp(&b.0))
        });
        weights
    }

    pub fn expert_stats(&self, expert_id: &str) -> Option<ExpertStats> {
        let expert = self.registry.get(expert_id)?;
        let cell = self.cells.get(expert_id)?;
        let now = Instant::now();
        let status = cell.snapshot(now);

        Some(ExpertStats {
            expert_id: expert_id.to_string(),
            distribution_weight: self.weight_for(expert, &status),
            status,
            circuit_error_rate: cell.circuit_error_rate(),
            circuit_trips: cell.circuit_trips(),
            unhealthy_for: cell.unhealthy_for(now),
        })
    }

    pub fn health_summary(&self) -> HealthSummary {
        let experts: Vec<ExpertStats> = self
            .registry
            .ids()
            .into_iter()
            .filter_map(|id| self.expert_stats(id))
            .collect();

        let count = |state: HealthState| experts.iter().filter(|s| s.status.health == state).count();

        HealthSummary {
            total_experts: experts.len(),
            healthy_experts: count(HealthState::Healthy),
            degraded_experts: count(HealthState::Degraded),
            unhealthy_experts: count(HealthState::Unhealthy),
            warming_up_experts: count(HealthState::WarmingUp),
            open_circuits: experts
                .iter()
                .filter(|s| s.status.circuit != CircuitState::Closed)
                .count(),
            experts,
        }
    }
}
