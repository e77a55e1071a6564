use chrono::{DateTime, Utc};
use once_cell::sync::OnceCell;
use parking_lot::Mutex;
use prometheus::{
    CounterVec, Encoder, Gauge, GaugeVec, HistogramOpts, HistogramVec, Opts, Registry,
    TextEncoder,
};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::time::Duration;
use toolroute_core::{HealthState, ToolType};
use toolroute_loadbalance::loadbalance::percentile;
use toolroute_loadbalance::HealthSummary;
use tracing::{error, info};

const NAMESPACE: &str = "toolroute";

/// 路由决策事件
#[derive(Debug, Clone)]
pub struct RoutingEvent {
    pub request_id: String,
    pub tool: ToolType,
    pub expert_id: String,
    pub confidence: f64,
    pub cache_hit: bool,
    pub fallback: bool,
    pub latency: Duration,
}

/// 执行结果事件
#[derive(Debug, Clone)]
pub struct ExecutionEvent {
    pub request_id: String,
    pub tool: ToolType,
    pub expert_id: String,
    pub success: bool,
    pub used_fallback: bool,
    pub cache_hit: bool,
    pub attempts: u32,
    pub routing_latency: Duration,
    pub execution_latency: Duration,
    pub total_latency: Duration,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ToolCounters {
    pub requests: u64,
    pub successes: u64,
    pub failures: u64,
    pub fallbacks: u64,
    pub cache_hits: u64,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ExpertCounters {
    pub selections: u64,
    pub successes: u64,
    pub failures: u64,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct LatencySummary {
    pub count: usize,
    pub avg_ms: f64,
    pub p50_ms: f64,
    pub p95_ms: f64,
    pub p99_ms: f64,
}

impl LatencySummary {
    fn from_samples(samples: &VecDeque<f64>) -> Self {
        if samples.is_empty() {
            return Self::default();
        }
        Self {
            count: samples.len(),
            avg_ms: samples.iter().sum::<f64>() / samples.len() as f64,
            p50_ms: percentile(samples, 0.50).unwrap_or_default(),
            p95_ms: percentile(samples, 0.95).unwrap_or_default(),
            p99_ms: percentile(samples, 0.99).unwrap_or_default(),
        }
    }
}

/// 指标快照
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub captured_at: DateTime<Utc>,
    pub total_requests: u64,
    pub successful_requests: u64,
    pub failed_requests: u64,
    pub fallback_requests: u64,
    pub cache_hits: u64,
    pub routing_decisions: u64,
    pub error_rate: f64,
    pub fallback_rate: f64,
    pub cache_hit_rate: f64,
    pub routing_latency: LatencySummary,
    pub execution_latency: LatencySummary,
    pub total_latency: LatencySummary,
    pub by_tool: BTreeMap<String, ToolCounters>,
    pub by_expert: BTreeMap<String, ExpertCounters>,
    pub errors: BTreeMap<String, u64>,
    pub baseline_latency_ms: Option<f64>,
    pub speed_improvement_ratio: Option<f64>,
}

#[derive(Debug, Default)]
struct MetricsState {
    total_requests: u64,
    successful_requests: u64,
    failed_requests: u64,
    fallback_requests: u64,
    cache_hits: u64,
    routing_decisions: u64,
    routing_ms: VecDeque<f64>,
    execution_ms: VecDeque<f64>,
    total_ms: VecDeque<f64>,
    by_tool: HashMap<ToolType, ToolCounters>,
    by_expert: HashMap<String, ExpertCounters>,
    errors: HashMap<String, u64>,
}

/// Prometheus 指标
struct PrometheusMetrics {
    registry: Registry,
    requests_total: CounterVec,
    routing_decisions_total: CounterVec,
    errors_total: CounterVec,
    routing_latency_seconds: HistogramVec,
    execution_latency_seconds: HistogramVec,
    total_latency_seconds: HistogramVec,
    expert_health: GaugeVec,
    expert_load: GaugeVec,
    speed_improvement_ratio: Gauge,
}

impl PrometheusMetrics {
    fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let requests_total = CounterVec::new(
            Opts::new("requests_total", "Total number of routed tool requests").namespace(NAMESPACE),
            &["tool", "expert", "outcome"],
        )?;

        let routing_decisions_total = CounterVec::new(
            Opts::new("routing_decisions_total", "Total number of routing decisions")
                .namespace(NAMESPACE),
            &["tool", "expert", "cache"],
        )?;

        let errors_total = CounterVec::new(
            Opts::new("errors_total", "Total number of errors by kind").namespace(NAMESPACE),
            &["kind"],
        )?;

        let routing_latency_seconds = HistogramVec::new(
            HistogramOpts::new("routing_latency_seconds", "Routing decision latency in seconds")
                .namespace(NAMESPACE),
            &["tool"],
        )?;

        let execution_latency_seconds = HistogramVec::new(
            HistogramOpts::new("execution_latency_seconds", "Expert execution latency in seconds")
                .namespace(NAMESPACE),
            &["tool"],
        )?;

        let total_latency_seconds = HistogramVec::new(
            HistogramOpts::new("total_latency_seconds", "End-to-end request latency in seconds")
                .namespace(NAMESPACE),
            &["tool"],
        )?;

        let expert_health = GaugeVec::new(
            Opts::new(
                "expert_health_status",
                "Health of experts (1 = healthy, 0.5 = degraded, 0 = unhealthy or warming up)",
            )
            .namespace(NAMESPACE),
            &["expert"],
        )?;

        let expert_load = GaugeVec::new(
            Opts::new("expert_load", "Current load of experts (0.0-1.0)").namespace(NAMESPACE),
            &["expert"],
        )?;

        let speed_improvement_ratio = Gauge::with_opts(
            Opts::new(
                "speed_improvement_ratio",
                "Pre-routing baseline latency divided by current average latency",
            )
            .namespace(NAMESPACE),
        )?;

        registry.register(Box::new(requests_total.clone()))?;
        registry.register(Box::new(routing_decisions_total.clone()))?;
        registry.register(Box::new(errors_total.clone()))?;
        registry.register(Box::new(routing_latency_seconds.clone()))?;
        registry.register(Box::new(execution_latency_seconds.clone()))?;
        registry.register(Box::new(total_latency_seconds.clone()))?;
        registry.register(Box::new(expert_health.clone()))?;
        registry.register(Box::new(expert_load.clone()))?;
        registry.register(Box::new(speed_improvement_ratio.clone()))?;

        Ok(Self {
            registry,
            requests_total,
            routing_decisions_total,
            errors_total,
            routing_latency_seconds,
            execution_latency_seconds,
            total_latency_seconds,
            expert_health,
            expert_load,
            speed_improvement_ratio,
        })
    }

    fn inc_counter(counter: &CounterVec, labels: &[&str]) {
        match counter.get_metric_with_label_values(labels) {
            Ok(metric) => metric.inc(),
            Err(e) => error!("Failed to record counter {:?}: {}", labels, e),
        }
    }

    fn observe(histogram: &HistogramVec, labels: &[&str], value: Duration) {
        match histogram.get_metric_with_label_values(labels) {
            Ok(metric) => metric.observe(value.as_secs_f64()),
            Err(e) => error!("Failed to record histogram {:?}: {}", labels, e),
        }
    }

    fn set_gauge(gauge: &GaugeVec, labels: &[&str], value: f64) {
        match gauge.get_metric_with_label_values(labels) {
            Ok(metric) => metric.set(value),
            Err(e) => error!("Failed to set gauge {:?}: {}", labels, e),
        }
    }
}

/// 指标收集器
///
/// 记录路由和执行事件，派生计数器、延迟分布和错误分类。
/// 记录操作不会阻塞或中断路由，内部失败只写日志。
pub struct MetricsCollector {
    reservoir_size: usize,
    state: Mutex<MetricsState>,
    baseline_ms: OnceCell<f64>,
    prometheus: Option<PrometheusMetrics>,
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new(1000)
    }
}

impl MetricsCollector {
    pub fn new(reservoir_size: usize) -> Self {
        let prometheus = match PrometheusMetrics::new() {
            Ok(metrics) => Some(metrics),
            Err(e) => {
                error!("Failed to initialize prometheus metrics: {}", e);
                None
            }
        };

        Self {
            reservoir_size: reservoir_size.max(1),
            state: Mutex::new(MetricsState::default()),
            baseline_ms: OnceCell::new(),
            prometheus,
        }
    }

    /// 记录接入路由前的平均延迟基线，只生效一次
    pub fn set_baseline(&self, latency_ms: f64) -> bool {
        if !(latency_ms.is_finite() && latency_ms > 0.0) {
            error!("Ignoring invalid latency baseline: {}", latency_ms);
            return false;
        }
        let stored = self.baseline_ms.set(latency_ms).is_ok();
        if stored {
            info!("Captured pre-routing latency baseline: {:.2}ms", latency_ms);
        }
        stored
    }

    pub fn baseline(&self) -> Option<f64> {
        self.baseline_ms.get().copied()
    }

    pub fn record_routing(&self, event: &RoutingEvent) {
        {
            let mut state = self.state.lock();
            state.routing_decisions += 1;
            push_sample(
                &mut state.routing_ms,
                event.latency,
                self.reservoir_size,
            );
            if !event.fallback {
                state
                    .by_expert
                    .entry(event.expert_id.clone())
                    .or_default()
                    .selections += 1;
            }
        }

        tracing::debug!(
            "Routing decision for '{}' ({}): expert={}, confidence={:.2}, cache_hit={}",
            event.request_id,
            event.tool,
            event.expert_id,
            event.confidence,
            event.cache_hit
        );

        if let Some(prom) = &self.prometheus {
            let cache = if event.cache_hit { "hit" } else { "miss" };
            PrometheusMetrics::inc_counter(
                &prom.routing_decisions_total,
                &[event.tool.as_str(), &event.expert_id, cache],
            );
            PrometheusMetrics::observe(
                &prom.routing_latency_seconds,
                &[event.tool.as_str()],
                event.latency,
            );
        }
    }

    pub fn record_execution(&self, event: &ExecutionEvent) {
        {
            let mut state = self.state.lock();
            let reservoir = self.reservoir_size;

            state.total_requests += 1;
            if event.success {
                state.successful_requests += 1;
            } else {
                state.failed_requests += 1;
            }
            if event.used_fallback {
                state.fallback_requests += 1;
            }
            if event.cache_hit {
                state.cache_hits += 1;
            }

            push_sample(&mut state.execution_ms, event.execution_latency, reservoir);
            push_sample(&mut state.total_ms, event.total_latency, reservoir);

            let tool = state.by_tool.entry(event.tool).or_default();
            tool.requests += 1;
            if event.success {
                tool.successes += 1;
            } else {
                tool.failures += 1;
            }
            if event.used_fallback {
                tool.fallbacks += 1;
            }
            if event.cache_hit {
                tool.cache_hits += 1;
            }

            if !event.used_fallback {
                let expert = state.by_expert.entry(event.expert_id.clone()).or_default();
                if event.success {
                    expert.successes += 1;
                } else {
                    expert.failures += 1;
                }
            }
        }

        if let Some(prom) = &self.prometheus {
            let outcome = match (event.success, event.used_fallback) {
                (true, false) => "success",
                (true, true) => "fallback_success",
                (false, false) => "failure",
                (false, true) => "fallback_failure",
            };
            let tool = event.tool.as_str();
            PrometheusMetrics::inc_counter(
                &prom.requests_total,
                &[tool, &event.expert_id, outcome],
            );
            PrometheusMetrics::observe(
                &prom.execution_latency_seconds,
                &[tool],
                event.execution_latency,
            );
            PrometheusMetrics::observe(&prom.total_latency_seconds, &[tool], event.total_latency);
        }
    }

    /// 记录错误分类
    pub fn record_error(&self, kind: &str) {
        *self
            .state
            .lock()
            .errors
            .entry(kind.to_string())
            .or_insert(0) += 1;

        if let Some(prom) = &self.prometheus {
            PrometheusMetrics::inc_counter(&prom.errors_total, &[kind]);
        }
    }

    /// 同步专家健康和负载到 Prometheus 指标
    pub fn observe_health(&self, summary: &HealthSummary) {
        let Some(prom) = &self.prometheus else {
            return;
        };
        for stats in &summary.experts {
            let health = match stats.status.health {
                HealthState::Healthy => 1.0,
                HealthState::Degraded => 0.5,
                HealthState::Unhealthy | HealthState::WarmingUp => 0.0,
            };
            PrometheusMetrics::set_gauge(&prom.expert_health, &[&stats.expert_id], health);
            PrometheusMetrics::set_gauge(&prom.expert_load, &[&stats.expert_id], stats.status.load);
        }
    }

    /// 速度提升比 = 基线延迟 / 当前平均总延迟
    pub fn speed_improvement_ratio(&self) -> Option<f64> {
        let baseline = self.baseline()?;
        let state = self.state.lock();
        if state.total_ms.is_empty() {
            return None;
        }
        let avg = state.total_ms.iter().sum::<f64>() / state.total_ms.len() as f64;
        if avg <= 0.0 {
            return None;
        }
        Some(baseline / avg)
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let speed_improvement_ratio = self.speed_improvement_ratio();
        let state = self.state.lock();
        let ratio = |count: u64| {
            if state.total_requests == 0 {
                0.0
            } else {
                count as f64 / state.total_requests as f64
            }
        };

        MetricsSnapshot {
            captured_at: Utc::now(),
            total_requests: state.total_requests,
            successful_requests: state.successful_requests,
            failed_requests: state.failed_requests,
            fallback_requests: state.fallback_requests,
            cache_hits: state.cache_hits,
            routing_decisions: state.routing_decisions,
            error_rate: ratio(state.failed_requests),
            fallback_rate: ratio(state.fallback_requests),
            cache_hit_rate: ratio(state.cache_hits),
            routing_latency: LatencySummary::from_samples(&state.routing_ms),
            execution_latency: LatencySummary::from_samples(&state.execution_ms),
            total_latency: LatencySummary::from_samples(&state.total_ms),
            by_tool: state
                .by_tool
                .iter()
                .map(|(tool, counters)| (tool.to_string(), counters.clone()))
                .collect(),
            by_expert: state
                .by_expert
                .iter()
                .map(|(id, counters)| (id.clone(), counters.clone()))
                .collect(),
            errors: state
                .errors
                .iter()
                .map(|(kind, count)| (kind.clone(), *count))
                .collect(),
            baseline_latency_ms: self.baseline(),
            speed_improvement_ratio,
        }
    }

    /// Prometheus 文本格式导出
    pub fn export_text(&self) -> String {
        let Some(prom) = &self.prometheus else {
            return String::new();
        };

        if let Some(ratio) = self.speed_improvement_ratio() {
            prom.speed_improvement_ratio.set(ratio);
        }

        let encoder = TextEncoder::new();
        let metric_families = prom.registry.gather();
        let mut buffer = Vec::new();
        if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
            error!("Failed to encode metrics: {}", e);
            return String::new();
        }

        String::from_utf8(buffer).unwrap_or_else(|e| {
            error!("Metrics output is not valid UTF-8: {}", e);
            String::new()
        })
    }

    pub fn reset(&self) {
        *self.state.lock() = MetricsState::default();
    }
}

fn push_sample(samples: &mut VecDeque<f64>, value: Duration, capacity: usize) {
    samples.push_back(value.as_secs_f64() * 1000.0);
    while samples.len() > capacity {
        samples.pop_front();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn execution(tool: ToolType, expert: &str, success: bool, fallback: bool, total_ms: u64) -> ExecutionEvent {
        ExecutionEvent {
            request_id: "r1".to_string(),
            tool,
            expert_id: expert.to_string(),
            success,
            used_fallback: fallback,
            cache_hit: false,
            attempts: 1,
            routing_latency: Duration::from_millis(1),
            execution_latency: Duration::from_millis(total_ms.saturating_sub(1)),
            total_latency: Duration::from_millis(total_ms),
        }
    }

    #[test]
    fn test_counters_and_breakdowns() {
        let metrics = MetricsCollector::new(100);
        metrics.record_execution(&execution(ToolType::Search, "e1", true, false, 10));
        metrics.record_execution(&execution(ToolType::Search, "e1", false, false, 20));
        metrics.record_execution(&execution(ToolType::Install, "__fallback__", true, true, 30));
        metrics.record_error("timeout");
        metrics.record_error("timeout");

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.total_requests, 3);
        assert_eq!(snapshot.successful_requests, 2);
        assert_eq!(snapshot.failed_requests, 1);
        assert_eq!(snapshot.fallback_requests, 1);
        assert_eq!(snapshot.by_tool["search"].requests, 2);
        assert_eq!(snapshot.by_tool["install"].fallbacks, 1);
        assert_eq!(snapshot.by_expert["e1"].failures, 1);
        assert!(!snapshot.by_expert.contains_key("__fallback__"));
        assert_eq!(snapshot.errors["timeout"], 2);
        assert!((snapshot.error_rate - 1.0 / 3.0).abs() < 1e-9);
        assert_eq!(snapshot.total_latency.count, 3);
        assert!((snapshot.total_latency.avg_ms - 20.0).abs() < 1e-9);
    }

    #[test]
    fn test_speed_improvement_ratio() {
        let metrics = MetricsCollector::new(100);
        assert!(metrics.speed_improvement_ratio().is_none());

        assert!(metrics.set_baseline(100.0));
        assert!(!metrics.set_baseline(50.0));
        assert_eq!(metrics.baseline(), Some(100.0));
        assert!(metrics.speed_improvement_ratio().is_none());

        metrics.record_execution(&execution(ToolType::Search, "e1", true, false, 20));
        metrics.record_execution(&execution(ToolType::Search, "e1", true, false, 30));
        let ratio = metrics.speed_improvement_ratio().unwrap();
        assert!((ratio - 4.0).abs() < 1e-9);
        assert_eq!(metrics.snapshot().speed_improvement_ratio, Some(ratio));
    }

    #[test]
    fn test_reservoir_is_bounded() {
        let metrics = MetricsCollector::new(5);
        for i in 0..20 {
            metrics.record_execution(&execution(ToolType::Search, "e1", true, false, i + 1));
        }
        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.total_requests, 20);
        assert_eq!(snapshot.total_latency.count, 5);
        assert_eq!(snapshot.total_latency.p50_ms, 18.0);
    }

    #[test]
    fn test_text_export() {
        let metrics = MetricsCollector::default();
        metrics.record_routing(&RoutingEvent {
            request_id: "r1".to_string(),
            tool: ToolType::Search,
            expert_id: "e1".to_string(),
            confidence: 1.0,
            cache_hit: false,
            fallback: false,
            latency: Duration::from_micros(300),
        });
        metrics.record_execution(&execution(ToolType::Search, "e1", true, false, 10));
        metrics.record_error("failed");

        let text = metrics.export_text();
        assert!(text.contains("toolroute_routing_decisions_total"));
        assert!(text.contains("toolroute_requests_total"));
        assert!(text.contains("toolroute_total_latency_seconds_bucket"));
        assert!(text.contains("kind=\"failed\""));
        assert_eq!(metrics.snapshot().by_expert["e1"].selections, 1);
    }
}
