use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use toolroute_core::{
    CircuitBreakerSettings, CircuitState, ExpertRuntimeStatus, HealthSettings, HealthState,
};

use super::circuit_breaker::CircuitBreaker;

/// 健康状态变化
#[derive(Debug, Clone, PartialEq)]
pub struct HealthTransition {
    pub expert_id: String,
    pub from: HealthState,
    pub to: HealthState,
}

/// 熔断状态变化
#[derive(Debug, Clone, PartialEq)]
pub struct CircuitTransition {
    pub expert_id: String,
    pub to: CircuitState,
}

/// 一次状态更新产生的变化
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StatusChange {
    pub health: Option<HealthTransition>,
    pub circuit: Option<CircuitTransition>,
}

impl StatusChange {
    pub fn is_empty(&self) -> bool {
        self.health.is_none() && self.circuit.is_none()
    }
}

#[derive(Debug)]
struct StatusInner {
    health: HealthState,
    outcomes: VecDeque<bool>,
    latencies_ms: VecDeque<f64>,
    consecutive_probe_failures: u32,
    consecutive_probe_successes: u32,
    unhealthy_since: Option<Instant>,
    breaker: CircuitBreaker,
}

/// 单个专家的运行时状态
///
/// 所有写入都经过内部的互斥锁，读取方只能拿到 [`ExpertRuntimeStatus`] 快照。
/// 并发槽位由信号量管理，许可在 drop 时自动归还。
#[derive(Debug)]
pub struct ExpertStatusCell {
    expert_id: String,
    max_concurrency: usize,
    slots: Arc<Semaphore>,
    settings: HealthSettings,
    inner: Mutex<StatusInner>,
}

impl ExpertStatusCell {
    pub fn new(
        expert_id: &str,
        max_concurrency: usize,
        health: &HealthSettings,
        circuit_breaker: &CircuitBreakerSettings,
    ) -> Self {
        Self {
            expert_id: expert_id.to_string(),
            max_concurrency,
            slots: Arc::new(Semaphore::new(max_concurrency)),
            settings: health.clone(),
            inner: Mutex::new(StatusInner {
                health: HealthState::Healthy,
                outcomes: VecDeque::with_capacity(health.window_size),
                latencies_ms: VecDeque::with_capacity(health.window_size),
                consecutive_probe_failures: 0,
                consecutive_probe_successes: 0,
                unhealthy_since: None,
                breaker: CircuitBreaker::new(circuit_breaker.clone()),
            }),
        }
    }

    pub fn expert_id(&self) -> &str {
        &self.expert_id
    }

    pub fn max_concurrency(&self) -> usize {
        self.max_concurrency
    }

    /// 非阻塞获取并发槽位
    pub fn try_acquire(&self) -> Option<OwnedSemaphorePermit> {
        self.slots.clone().try_acquire_owned().ok()
    }

    /// 在限定时间内等待并发槽位
    pub async fn acquire_within(&self, timeout: Duration) -> Option<OwnedSemaphorePermit> {
        match tokio::time::timeout(timeout, self.slots.clone().acquire_owned()).await {
            Ok(Ok(permit)) => Some(permit),
            _ => None,
        }
    }

    pub fn active_requests(&self) -> usize {
        self.max_concurrency
            .saturating_sub(self.slots.available_permits())
    }

    /// 当前负载 = 活跃请求 / 最大并发
    pub fn load(&self) -> f64 {
        if self.max_concurrency == 0 {
            return 1.0;
        }
        (self.active_requests() as f64 / self.max_concurrency as f64).min(1.0)
    }

    pub fn health(&self) -> HealthState {
        self.inner.lock().health
    }

    pub fn circuit(&self, now: Instant) -> CircuitState {
        self.inner.lock().breaker.state(now)
    }

    /// 记录一次执行结果
    pub fn record_outcome(&self, success: bool, latency: Duration, now: Instant) -> StatusChange {
        let mut inner = self.inner.lock();
        let window = self.settings.window_size;

        inner.outcomes.push_back(success);
        while inner.outcomes.len() > window {
            inner.outcomes.pop_front();
        }
        inner.latencies_ms.push_back(latency.as_secs_f64() * 1000.0);
        while inner.latencies_ms.len() > window {
            inner.latencies_ms.pop_front();
        }

        let mut change = StatusChange::default();

        if inner.breaker.record(success, now) {
            change.circuit = Some(CircuitTransition {
                expert_id: self.expert_id.clone(),
                to: CircuitState::Open,
            });
        }

        let from = inner.health;
        let to = self.rate_based_state(&inner);
        change.health = self.transition(&mut inner, from, to, now);
        change
    }

    /// 记录一次健康探测结果
    pub fn record_probe(&self, success: bool, now: Instant) -> StatusChange {
        let mut inner = self.inner.lock();
        let from = inner.health;

        let to = if success {
            inner.consecutive_probe_failures = 0;
            inner.consecutive_probe_successes += 1;
            match from {
                HealthState::Unhealthy => HealthState::WarmingUp,
                HealthState::WarmingUp => {
                    if inner.consecutive_probe_successes >= self.settings.recovery_threshold {
                        HealthState::Healthy
                    } else {
                        HealthState::WarmingUp
                    }
                }
                HealthState::Healthy | HealthState::Degraded => self.rate_based_state(&inner),
            }
        } else {
            inner.consecutive_probe_successes = 0;
            inner.consecutive_probe_failures += 1;
            match from {
                HealthState::Unhealthy | HealthState::WarmingUp => HealthState::Unhealthy,
                HealthState::Healthy | HealthState::Degraded => {
                    if inner.consecutive_probe_failures >= self.settings.unhealthy_threshold {
                        HealthState::Unhealthy
                    } else {
                        HealthState::Degraded
                    }
                }
            }
        };

        let mut change = StatusChange::default();
        if inner.breaker.record_probe(success, now) {
            change.circuit = Some(CircuitTransition {
                expert_id: self.expert_id.clone(),
                to: inner.breaker.state(now),
            });
        }
        change.health = self.transition(&mut inner, from, to, now);
        change
    }

    /// 管理员强制设置健康状态
    pub fn force(&self, state: HealthState, now: Instant) -> StatusChange {
        let mut inner = self.inner.lock();
        let from = inner.health;
        inner.consecutive_probe_failures = 0;
        inner.consecutive_probe_successes = 0;

        let mut change = StatusChange::default();
        if state == HealthState::Healthy && inner.breaker.state(now) != CircuitState::Closed {
            inner.breaker.reset();
            change.circuit = Some(CircuitTransition {
                expert_id: self.expert_id.clone(),
                to: CircuitState::Closed,
            });
        }
        change.health = self.transition(&mut inner, from, state, now);
        change
    }

    /// 读时复制的状态快照
    pub fn snapshot(&self, now: Instant) -> ExpertRuntimeStatus {
        let inner = self.inner.lock();
        let active_requests = self.active_requests();

        ExpertRuntimeStatus {
            expert_id: self.expert_id.clone(),
            health: inner.health,
            circuit: inner.breaker.state(now),
            load: self.load(),
            active_requests,
            success_rate: success_rate(&inner.outcomes),
            p95_latency_ms: percentile(&inner.latencies_ms, 0.95),
            sample_count: inner.outcomes.len(),
            consecutive_probe_failures: inner.consecutive_probe_failures,
            consecutive_probe_successes: inner.consecutive_probe_successes,
        }
    }

    /// 处于 unhealthy 的持续时间
    pub fn unhealthy_for(&self, now: Instant) -> Option<Duration> {
        self.inner
            .lock()
            .unhealthy_since
            .map(|since| now.saturating_duration_since(since))
    }

    pub fn circuit_error_rate(&self) -> f64 {
        self.inner.lock().breaker.error_rate()
    }

    pub fn circuit_trips(&self) -> u64 {
        self.inner.lock().breaker.trips()
    }

    /// 根据滚动成功率在 healthy / degraded 之间切换；其它状态只由探测驱动
    fn rate_based_state(&self, inner: &StatusInner) -> HealthState {
        match inner.health {
            HealthState::Healthy | HealthState::Degraded => {
                let enough = inner.outcomes.len() >= self.settings.min_samples;
                let low_rate =
                    enough && success_rate(&inner.outcomes) < self.settings.degraded_success_rate;
                if low_rate || inner.consecutive_probe_failures > 0 {
                    HealthState::Degraded
                } else {
                    HealthState::Healthy
                }
            }
            other => other,
        }
    }

    fn transition(
        &self,
        inner: &mut StatusInner,
        from: HealthState,
        to: HealthState,
        now: Instant,
    ) -> Option<HealthTransition> {
        if from == to {
            return None;
        }

        inner.health = to;
        match to {
            HealthState::Unhealthy => inner.unhealthy_since = Some(now),
            HealthState::WarmingUp => {
                inner.unhealthy_since = None;
                inner.consecutive_probe_successes = 0;
            }
            HealthState::Healthy => {
                inner.unhealthy_since = None;
                if from == HealthState::WarmingUp {
                    // 恢复后不沿用故障期间的结果窗口
                    inner.outcomes.clear();
                    inner.latencies_ms.clear();
                }
            }
            HealthState::Degraded => inner.unhealthy_since = None,
        }

        Some(HealthTransition {
            expert_id: self.expert_id.clone(),
            from,
            to,
        })
    }
}

fn success_rate(outcomes: &VecDeque<bool>) -> f64 {
    if outcomes.is_empty() {
        return 1.0;
    }
    outcomes.iter().filter(|ok| **ok).count() as f64 / outcomes.len() as f64
}

/// 最近邻排名法计算百分位
pub fn percentile(samples: &VecDeque<f64>, quantile: f64) -> Option<f64> {
    if samples.is_empty() {
        return None;
    }
    let mut sorted: Vec<f64> = samples.iter().copied().collect();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let rank = (quantile * sorted.len() as f64).ceil() as usize;
    let index = rank.clamp(1, sorted.len()) - 1;
    Some(sorted[index])
}
