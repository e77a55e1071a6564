use chrono::Utc;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::OwnedSemaphorePermit;
use toolroute_core::{
    Config, ConfigurationError, ExecutionMetadata, Expert, ExpertDefinition,
    ExpertExecutionError, ExpertRuntimeStatus, RejectedExpert, RouterSettings, RoutingDecision, RoutingError,
    ToolExecutor, ToolRequest, ToolResponse, ToolType, WeightProfile, WeightTable,
    FALLBACK_EXPERT_ID,
};
use toolroute_loadbalance::loadbalance::scorer::{alternatives, confidence, rationale};
use toolroute_loadbalance::{
    ExpertRegistry, HealthMonitor, LoadBalanceManager, RoutingCache, Scorer,
};
use tracing::{debug, info, warn};

use super::alerts::{evaluate_alerts, Alert};
use super::fallback::FallbackExecutor;
use super::flags::FeatureFlagService;
use super::metrics::{ExecutionEvent, MetricsCollector, RoutingEvent};

/// 专家执行失败时的结果：错误和已尝试次数
struct ExecutionFailure {
    error: ExpertExecutionError,
    attempts: u32,
}

/// 请求路由器
///
/// 组合缓存、评分、负载均衡、开关、指标和回退，对外提供
/// [`Router::route`] 和 [`Router::execute_with_routing`]。
pub struct Router {
    settings: RouterSettings,
    weights: WeightTable,
    idempotent: HashMap<ToolType, bool>,
    scorer: Scorer,
    manager: Arc<LoadBalanceManager>,
    cache: Arc<RoutingCache>,
    monitor: Arc<HealthMonitor>,
    flags: Arc<FeatureFlagService>,
    metrics: Arc<MetricsCollector>,
    fallback: Arc<FallbackExecutor>,
}

impl Router {
    /// 校验配置并构建路由器，配置错误在这里直接失败
    pub fn new(
        config: Config,
        executors: HashMap<String, Arc<dyn ToolExecutor>>,
        fallback: FallbackExecutor,
    ) -> Result<Self, ConfigurationError> {
        config.validate()?;

        let settings = config.settings.clone();
        let weights = config.weight_table()?;
        let idempotent = ToolType::ALL
            .iter()
            .map(|tool| (*tool, config.is_idempotent(*tool)))
            .collect();

        let registry = Arc::new(ExpertRegistry::from_config(&config, &executors)?);
        for tool in ToolType::ALL {
            if registry.supporting(tool).is_empty() {
                warn!("No expert supports tool '{}', requests will use fallback", tool);
            }
            if !fallback.has_handler(tool) {
                debug!("No fallback handler registered for tool '{}'", tool);
            }
        }

        let cache = Arc::new(RoutingCache::new(&settings.cache));
        let manager = Arc::new(LoadBalanceManager::new(
            registry.clone(),
            cache.clone(),
            &settings,
        ));
        let monitor = Arc::new(HealthMonitor::new(manager.clone(), &settings.health));
        let flags = Arc::new(FeatureFlagService::new(&config.flags)?);

        let metrics = Arc::new(MetricsCollector::new(settings.metrics.reservoir_size));
        if let Some(baseline) = settings.metrics.baseline_latency_ms {
            metrics.set_baseline(baseline);
        }

        let fallback = Arc::new(fallback.with_timeout(settings.fallback_timeout()));

        info!(
            "Router initialized with {} experts (cache: {}, fallback: {})",
            registry.len(),
            cache.is_enabled(),
            settings.fallback_enabled
        );

        Ok(Self {
            scorer: Scorer::new(settings.latency_baseline_ms),
            settings,
            weights,
            idempotent,
            manager,
            cache,
            monitor,
            flags,
            metrics,
            fallback,
        })
    }

    /// 启动后台健康探测
    pub fn start(&self) {
        self.monitor.start();
    }

    pub async fn stop(&self) {
        self.monitor.stop().await;
    }

    pub fn settings(&self) -> &RouterSettings {
        &self.settings
    }

    pub fn manager(&self) -> &Arc<LoadBalanceManager> {
        &self.manager
    }

    pub fn cache(&self) -> &Arc<RoutingCache> {
        &self.cache
    }

    pub fn health_monitor(&self) -> &Arc<HealthMonitor> {
        &self.monitor
    }

    pub fn flags(&self) -> &Arc<FeatureFlagService> {
        &self.flags
    }

    pub fn metrics(&self) -> &Arc<MetricsCollector> {
        &self.metrics
    }

    pub fn weight_profile(&self, tool: ToolType) -> WeightProfile {
        self.weights
            .get(tool)
            .copied()
            .unwrap_or_else(|| WeightProfile::default_for(tool))
    }

    pub fn is_idempotent(&self, tool: ToolType) -> bool {
        self.idempotent
            .get(&tool)
            .copied()
            .unwrap_or_else(|| tool.default_idempotent())
    }

    /// 为请求选择专家
    ///
    /// 只读取状态快照，不修改任何专家的运行时状态。
    pub async fn route(&self, request: &ToolRequest) -> Result<RoutingDecision, RoutingError> {
        let start = Instant::now();

        let cache_key = self.cache_key(request);
        if let Some(key) = &cache_key {
            let manager = &self.manager;
            if let Some(mut decision) = self.cache.get(key, |id| manager.is_selectable(id)).await {
                decision.request_id = request.request_id.clone();
                decision.cache_hit = true;
                decision.decision_latency = start.elapsed();
                self.record_decision(&decision);
                return Ok(decision);
            }
        }

        let candidates = self.manager.snapshots_for(request.tool);
        let (eligible, rejected) = self.filter_eligible(&candidates);

        if eligible.is_empty() {
            if !self.settings.fallback_enabled {
                warn!(
                    "No eligible expert for request '{}' ({}) and fallback disabled",
                    request.request_id, request.tool
                );
                self.metrics.record_error("no_eligible_expert");
                return Err(RoutingError::NoEligibleExpert {
                    request_id: request.request_id.clone(),
                    tool: request.tool,
                    supporting_experts: candidates.len(),
                    rejected,
                });
            }

            let decision = RoutingDecision::fallback(
                &request.request_id,
                request.tool,
                format!(
                    "no eligible expert ({} supporting, {} rejected)",
                    candidates.len(),
                    rejected.len()
                ),
                start.elapsed(),
            );
            self.record_decision(&decision);
            return Ok(decision);
        }

        let weights = self.weight_profile(request.tool);
        let ranked = self.scorer.rank(eligible.iter().copied(), request, &weights);
        let Some(selected) = ranked.first() else {
            return Err(RoutingError::NoEligibleExpert {
                request_id: request.request_id.clone(),
                tool: request.tool,
                supporting_experts: candidates.len(),
                rejected,
            });
        };

        let decision = RoutingDecision {
            request_id: request.request_id.clone(),
            tool: request.tool,
            expert_id: selected.expert_id.clone(),
            confidence: confidence(&ranked),
            score: selected.score,
            alternatives: alternatives(&ranked, &weights),
            rationale: rationale(&ranked, eligible.len()),
            decided_at: Utc::now(),
            decision_latency: start.elapsed(),
            cache_hit: false,
        };

        if let Some(key) = cache_key {
            let manager = &self.manager;
            self.cache
                .put_if(key, decision.clone(), |id| manager.is_selectable(id))
                .await;
        }

        self.record_decision(&decision);
        Ok(decision)
    }

    /// 路由并执行
    ///
    /// 回退开启时所有失败都转成普通的 [`ToolResponse`]；
    /// 只有回退关闭时路由错误才会返回给调用方。
    pub async fn execute_with_routing(
        &self,
        request: &ToolRequest,
    ) -> Result<ToolResponse, RoutingError> {
        let start = Instant::now();

        if !self.settings.routing_enabled {
            return Ok(self
                .run_fallback(request, start, Duration::ZERO, "routing disabled", 0, false)
                .await);
        }

        if let Some(reason) = self.flags.bypass_reason(request) {
            debug!(
                "Routing bypassed for request '{}': {}",
                request.request_id, reason
            );
            return Ok(self
                .run_fallback(request, start, Duration::ZERO, reason.as_str(), 0, false)
                .await);
        }

        // 路由本身几乎不让出执行权，超时之外还要核对实际耗时
        let budget = self.settings.decision_budget();
        let decision =
            match tokio::time::timeout(budget, self.route(request)).await {
                Ok(result) if start.elapsed() <= budget => result?,
                _ => {
                    warn!(
                        "Routing decision for '{}' exceeded budget of {}ms",
                        request.request_id, self.settings.decision_budget_ms
                    );
                    self.metrics.record_error("decision_budget_exceeded");
                    if !self.settings.fallback_enabled {
                        return Err(RoutingError::DecisionBudgetExceeded {
                            request_id: request.request_id.clone(),
                            budget_ms: self.settings.decision_budget_ms,
                        });
                    }
                    return Ok(self
                        .run_fallback(
                            request,
                            start,
                            start.elapsed(),
                            "decision budget exceeded",
                            0,
                            false,
                        )
                        .await);
                }
            };
        let routing_latency = start.elapsed();

        if decision.is_fallback() {
            return Ok(self
                .run_fallback(
                    request,
                    start,
                    routing_latency,
                    &decision.rationale,
                    0,
                    decision.cache_hit,
                )
                .await);
        }

        let Some((expert, _permit)) = self.acquire_slot(&decision).await else {
            self.metrics.record_error("saturated");
            if self.settings.fallback_enabled {
                return Ok(self
                    .run_fallback(
                        request,
                        start,
                        routing_latency,
                        "all candidates at max concurrency",
                        0,
                        decision.cache_hit,
                    )
                    .await);
            }
            let error = ExpertExecutionError::Saturated {
                expert_id: decision.expert_id.clone(),
            };
            let response = self.failure_response(
                request,
                &decision.expert_id,
                &error,
                start,
                routing_latency,
                Duration::ZERO,
                decision.cache_hit,
                0,
            );
            return Ok(response);
        };

        let exec_start = Instant::now();
        let result = self.execute_on_expert(&expert, request).await;
        let execution_latency = exec_start.elapsed();

        match result {
            Ok((data, attempts)) => {
                let metadata = ExecutionMetadata {
                    expert_id: expert.id().to_string(),
                    routing_latency,
                    execution_latency,
                    total_latency: start.elapsed(),
                    cache_hit: decision.cache_hit,
                    used_fallback: false,
                    attempts,
                };
                self.record_response(request, &metadata, true);
                Ok(ToolResponse::success(&request.request_id, data, metadata))
            }
            Err(ExecutionFailure { error, attempts }) => {
                warn!(
                    "Expert '{}' failed request '{}' after {} attempt(s): {}",
                    expert.id(),
                    request.request_id,
                    attempts,
                    error
                );
                if self.settings.fallback_enabled {
                    Ok(self
                        .run_fallback(
                            request,
                            start,
                            routing_latency,
                            "expert execution failed",
                            attempts,
                            decision.cache_hit,
                        )
                        .await)
                } else {
                    Ok(self.failure_response(
                        request,
                        expert.id(),
                        &error,
                        start,
                        routing_latency,
                        execution_latency,
                        decision.cache_hit,
                        attempts,
                    ))
                }
            }
        }
    }

    /// 当前告警
    pub fn alerts(&self) -> Vec<Alert> {
        evaluate_alerts(
            &self.metrics.snapshot(),
            &self.manager.health_summary(),
            &self.settings.alerts,
        )
    }

    /// Prometheus 文本格式导出
    pub fn export_metrics(&self) -> String {
        self.metrics.observe_health(&self.manager.health_summary());
        self.metrics.export_text()
    }

    fn cache_key(&self, request: &ToolRequest) -> Option<String> {
        if !self.cache.is_enabled() || request.is_high_priority() {
            return None;
        }
        match self.cache.key_for(request) {
            Ok(key) => Some(key),
            Err(e) => {
                warn!(
                    "Bypassing routing cache for request '{}': {}",
                    request.request_id, e
                );
                self.metrics.record_error("cache");
                None
            }
        }
    }

    /// 资格过滤：健康可路由、熔断关闭、负载低于阈值
    fn filter_eligible<'a>(
        &self,
        candidates: &'a [(Expert, ExpertRuntimeStatus)],
    ) -> (
        Vec<(&'a ExpertDefinition, &'a ExpertRuntimeStatus)>,
        Vec<RejectedExpert>,
    ) {
        let mut eligible = Vec::new();
        let mut rejected = Vec::new();
        let threshold = self.settings.overload_threshold;

        for (expert, status) in candidates {
            let reason = if !status.health.is_routable() {
                Some(format!("health is {}", status.health))
            } else if !status.circuit.allows_selection() {
                Some(format!("circuit is {:?}", status.circuit))
            } else if status.load >= threshold {
                Some(format!("overloaded ({:.2} >= {:.2})", status.load, threshold))
            } else {
                None
            };

            match reason {
                Some(reason) => rejected.push(RejectedExpert {
                    expert_id: expert.id().to_string(),
                    reason,
                }),
                None => eligible.push((expert.definition(), status)),
            }
        }

        (eligible, rejected)
    }

    /// 占用并发槽位：先选中的专家，再按分配权重尝试备选，最后有限等待
    async fn acquire_slot(
        &self,
        decision: &RoutingDecision,
    ) -> Option<(Expert, OwnedSemaphorePermit)> {
        let registry = self.manager.registry();

        if let Ok(permit) = self.manager.try_acquire(&decision.expert_id) {
            let expert = registry.get(&decision.expert_id)?.clone();
            return Some((expert, permit));
        }

        let mut overflow: Vec<(String, f64)> = decision
            .alternatives
            .iter()
            .map(|alt| {
                (
                    alt.expert_id.clone(),
                    self.manager.distribution_weight(&alt.expert_id),
                )
            })
            .filter(|(_, weight)| *weight > 0.0)
            .collect();
        overflow.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.cmp(&b.0))
        });

        for (expert_id, _) in overflow {
            if !self.manager.is_selectable(&expert_id) {
                continue;
            }
            if let Ok(permit) = self.manager.try_acquire(&expert_id) {
                debug!(
                    "Expert '{}' saturated, overflowing request '{}' to '{}'",
                    decision.expert_id, decision.request_id, expert_id
                );
                let expert = registry.get(&expert_id)?.clone();
                return Some((expert, permit));
            }
        }

        match self
            .manager
            .acquire_within(&decision.expert_id, self.settings.queue_timeout())
            .await
        {
            Ok(permit) => {
                let expert = registry.get(&decision.expert_id)?.clone();
                Some((expert, permit))
            }
            Err(e) => {
                debug!("{}", e);
                None
            }
        }
    }

    /// 在同一个专家上执行，幂等工具失败后有限重试
    async fn execute_on_expert(
        &self,
        expert: &Expert,
        request: &ToolRequest,
    ) -> Result<(Value, u32), ExecutionFailure> {
        let max_attempts = if self.is_idempotent(request.tool) {
            1 + self.settings.max_retries
        } else {
            1
        };
        let timeout = self.settings.execution_timeout();
        let mut attempt = 0;

        loop {
            attempt += 1;
            let started = Instant::now();

            let result = match tokio::time::timeout(timeout, expert.execute(request)).await {
                Ok(Ok(value)) => Ok(value),
                Ok(Err(e)) => Err(ExpertExecutionError::Failed {
                    expert_id: expert.id().to_string(),
                    message: e.to_string(),
                }),
                Err(_) => Err(ExpertExecutionError::Timeout {
                    expert_id: expert.id().to_string(),
                    timeout_ms: self.settings.execution_timeout_ms,
                }),
            };

            self.manager
                .record_outcome(expert.id(), result.is_ok(), started.elapsed())
                .await;

            match result {
                Ok(value) => return Ok((value, attempt)),
                Err(error) => {
                    self.metrics.record_error(error.kind());

                    if attempt >= max_attempts || !self.manager.is_selectable(expert.id()) {
                        return Err(ExecutionFailure {
                            error,
                            attempts: attempt,
                        });
                    }

                    warn!(
                        "Expert '{}' failed on attempt {}, retrying: {}",
                        expert.id(),
                        attempt,
                        error
                    );
                    tokio::time::sleep(self.settings.retry_backoff() * attempt).await;
                }
            }
        }
    }

    async fn run_fallback(
        &self,
        request: &ToolRequest,
        start: Instant,
        routing_latency: Duration,
        reason: &str,
        attempts: u32,
        cache_hit: bool,
    ) -> ToolResponse {
        info!(
            "Executing request '{}' ({}) via fallback: {}",
            request.request_id, request.tool, reason
        );

        let exec_start = Instant::now();
        let result = self.fallback.execute(request).await;
        let metadata = ExecutionMetadata {
            expert_id: FALLBACK_EXPERT_ID.to_string(),
            routing_latency,
            execution_latency: exec_start.elapsed(),
            total_latency: start.elapsed(),
            cache_hit,
            used_fallback: true,
            attempts,
        };

        match result {
            Ok(data) => {
                self.record_response(request, &metadata, true);
                ToolResponse::success(&request.request_id, data, metadata)
            }
            Err(e) => {
                warn!("Fallback failed for request '{}': {}", request.request_id, e);
                self.metrics.record_error(&format!("fallback_{}", e.kind()));
                self.record_response(request, &metadata, false);
                ToolResponse::failure(&request.request_id, e.to_string(), metadata)
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn failure_response(
        &self,
        request: &ToolRequest,
        expert_id: &str,
        error: &ExpertExecutionError,
        start: Instant,
        routing_latency: Duration,
        execution_latency: Duration,
        cache_hit: bool,
        attempts: u32,
    ) -> ToolResponse {
        let metadata = ExecutionMetadata {
            expert_id: expert_id.to_string(),
            routing_latency,
            execution_latency,
            total_latency: start.elapsed(),
            cache_hit,
            used_fallback: false,
            attempts,
        };
        self.record_response(request, &metadata, false);
        ToolResponse::failure(&request.request_id, error.to_string(), metadata)
    }

    fn record_decision(&self, decision: &RoutingDecision) {
        self.metrics.record_routing(&RoutingEvent {
            request_id: decision.request_id.clone(),
            tool: decision.tool,
            expert_id: decision.expert_id.clone(),
            confidence: decision.confidence,
            cache_hit: decision.cache_hit,
            fallback: decision.is_fallback(),
            latency: decision.decision_latency,
        });
    }

    fn record_response(&self, request: &ToolRequest, metadata: &ExecutionMetadata, success: bool) {
        self.metrics.record_execution(&ExecutionEvent {
            request_id: request.request_id.clone(),
            tool: request.tool,
            expert_id: metadata.expert_id.clone(),
            success,
            used_fallback: metadata.used_fallback,
            cache_hit: metadata.cache_hit,
            attempts: metadata.attempts,
            routing_latency: metadata.routing_latency,
            execution_latency: metadata.execution_latency,
            total_latency: metadata.total_latency,
        });
    }
}
