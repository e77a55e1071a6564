use std::collections::VecDeque;
use std::time::Instant;
use toolroute_core::{CircuitBreakerSettings, CircuitState};

#[derive(Debug, Clone, Copy, PartialEq)]
enum BreakerState {
    Closed,
    Open {
        opened_at: Instant,
        probe_successes: u32,
    },
}

/// 熔断器
///
/// 基于最近 `window_size` 次执行结果的错误率，比健康状态机反应更快。
/// 冷却期内选择权重为 0；冷却结束后进入 half-open，需要连续成功探测才会关闭。
#[derive(Debug, Clone)]
pub struct CircuitBreaker {
    settings: CircuitBreakerSettings,
    window: VecDeque<bool>,
    state: BreakerState,
    trips: u64,
}

impl CircuitBreaker {
    pub fn new(settings: CircuitBreakerSettings) -> Self {
        Self {
            window: VecDeque::with_capacity(settings.window_size),
            settings,
            state: BreakerState::Closed,
            trips: 0,
        }
    }

    /// 当前状态；half-open 由冷却时间推导，读取不会修改状态
    pub fn state(&self, now: Instant) -> CircuitState {
        match self.state {
            BreakerState::Closed => CircuitState::Closed,
            BreakerState::Open { opened_at, .. } => {
                if now.saturating_duration_since(opened_at) >= self.settings.cool_down() {
                    CircuitState::HalfOpen
                } else {
                    CircuitState::Open
                }
            }
        }
    }

    /// 记录一次执行结果，返回 true 表示本次触发了熔断
    pub fn record(&mut self, success: bool, now: Instant) -> bool {
        if self.state != BreakerState::Closed {
            // 熔断期间仍在途的请求结果不计入窗口
            return false;
        }

        self.window.push_back(success);
        while self.window.len() > self.settings.window_size {
            self.window.pop_front();
        }

        if self.window.len() >= self.settings.min_requests
            && self.error_rate() > self.settings.error_rate_threshold
        {
            self.trip(now);
            return true;
        }

        false
    }

    /// 记录一次探测结果，只在 half-open 时生效。返回状态是否变化
    pub fn record_probe(&mut self, success: bool, now: Instant) -> bool {
        if self.state(now) != CircuitState::HalfOpen {
            return false;
        }

        if !success {
            self.trip(now);
            return true;
        }

        if let BreakerState::Open {
            probe_successes, ..
        } = &mut self.state
        {
            *probe_successes += 1;
            if *probe_successes >= self.settings.recovery_probes {
                self.reset();
                return true;
            }
        }

        false
    }

    /// 滑动窗口内的错误率
    pub fn error_rate(&self) -> f64 {
        if self.window.is_empty() {
            return 0.0;
        }
        let failures = self.window.iter().filter(|ok| !**ok).count();
        failures as f64 / self.window.len() as f64
    }

    pub fn trips(&self) -> u64 {
        self.trips
    }

    pub fn reset(&mut self) {
        self.state = BreakerState::Closed;
        self.window.clear();
    }

    fn trip(&mut self, now: Instant) {
        self.state = BreakerState::Open {
            opened_at: now,
            probe_successes: 0,
        };
        self.window.clear();
        self.trips += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn settings() -> CircuitBreakerSettings {
        CircuitBreakerSettings {
            error_rate_threshold: 0.1,
            window_size: 20,
            min_requests: 10,
            cool_down_ms: 1000,
            recovery_probes: 2,
        }
    }

    #[test]
    fn test_stays_closed_below_min_requests() {
        let mut breaker = CircuitBreaker::new(settings());
        let now = Instant::now();
        for _ in 0..5 {
            assert!(!breaker.record(false, now));
        }
        assert_eq!(breaker.state(now), CircuitState::Closed);
    }

    #[test]
    fn test_trips_when_error_rate_exceeds_threshold() {
        let mut breaker = CircuitBreaker::new(settings());
        let now = Instant::now();
        for _ in 0..9 {
            breaker.record(true, now);
        }
        // 2/11 > 10%
        assert!(!breaker.record(false, now));
        assert!(breaker.record(false, now));
        assert_eq!(breaker.state(now), CircuitState::Open);
        assert_eq!(breaker.trips(), 1);
    }

    #[test]
    fn test_exactly_threshold_does_not_trip() {
        let mut breaker = CircuitBreaker::new(settings());
        let now = Instant::now();
        for _ in 0..9 {
            breaker.record(true, now);
        }
        // 1/10 == 10%，不超过阈值
        assert!(!breaker.record(false, now));
        assert_eq!(breaker.state(now), CircuitState::Closed);
    }

    #[test]
    fn test_half_open_after_cool_down_and_closes_after_probes() {
        let mut breaker = CircuitBreaker::new(settings());
        let start = Instant::now();
        for _ in 0..10 {
            breaker.record(false, start);
        }
        assert_eq!(breaker.state(start), CircuitState::Open);

        // 冷却期内探测无效
        assert!(!breaker.record_probe(true, start + Duration::from_millis(500)));
        assert_eq!(
            breaker.state(start + Duration::from_millis(500)),
            CircuitState::Open
        );

        let later = start + Duration::from_millis(1000);
        assert_eq!(breaker.state(later), CircuitState::HalfOpen);
        assert!(!breaker.record_probe(true, later));
        assert_eq!(breaker.state(later), CircuitState::HalfOpen);
        assert!(breaker.record_probe(true, later));
        assert_eq!(breaker.state(later), CircuitState::Closed);
        assert_eq!(breaker.error_rate(), 0.0);
    }

    #[test]
    fn test_failed_probe_in_half_open_reopens() {
        let mut breaker = CircuitBreaker::new(settings());
        let start = Instant::now();
        for _ in 0..10 {
            breaker.record(false, start);
        }

        let later = start + Duration::from_millis(1500);
        assert_eq!(breaker.state(later), CircuitState::HalfOpen);
        assert!(breaker.record_probe(false, later));
        assert_eq!(breaker.state(later), CircuitState::Open);
        assert_eq!(
            breaker.state(later + Duration::from_millis(999)),
            CircuitState::Open
        );
        assert_eq!(breaker.trips(), 2);
    }

    #[test]
    fn test_outcomes_ignored_while_open() {
        let mut breaker = CircuitBreaker::new(settings());
        let now = Instant::now();
        for _ in 0..10 {
            breaker.record(false, now);
        }
        assert!(!breaker.record(false, now));
        assert_eq!(breaker.trips(), 1);
    }
}
