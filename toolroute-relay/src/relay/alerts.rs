use serde::Serialize;
use toolroute_core::AlertSettings;
use toolroute_loadbalance::HealthSummary;

use super::metrics::MetricsSnapshot;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertKind {
    HighLatency,
    ExpertUnhealthy,
    HighErrorRate,
    LowSpeedImprovement,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertSeverity {
    Warning,
    Critical,
}

/// 告警，交给外部告警系统消费
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Alert {
    pub kind: AlertKind,
    pub severity: AlertSeverity,
    pub message: String,
    pub value: f64,
    pub threshold: f64,
    pub expert_id: Option<String>,
}

/// 根据指标快照和健康汇总评估告警
pub fn evaluate_alerts(
    snapshot: &MetricsSnapshot,
    health: &HealthSummary,
    settings: &AlertSettings,
) -> Vec<Alert> {
    let mut alerts = Vec::new();

    let p95 = snapshot.total_latency.p95_ms;
    if snapshot.total_latency.count > 0 && p95 > settings.p95_latency_ms {
        alerts.push(Alert {
            kind: AlertKind::HighLatency,
            severity: AlertSeverity::Warning,
            message: format!(
                "p95 routing+execution latency {:.1}ms exceeds {:.1}ms",
                p95, settings.p95_latency_ms
            ),
            value: p95,
            threshold: settings.p95_latency_ms,
            expert_id: None,
        });
    }

    let grace = settings.unhealthy_grace_seconds as f64;
    for stats in &health.experts {
        let Some(duration) = stats.unhealthy_for else {
            continue;
        };
        let seconds = duration.as_secs_f64();
        if seconds >= grace {
            alerts.push(Alert {
                kind: AlertKind::ExpertUnhealthy,
                severity: AlertSeverity::Critical,
                message: format!(
                    "expert '{}' has been unhealthy for {:.0}s",
                    stats.expert_id, seconds
                ),
                value: seconds,
                threshold: grace,
                expert_id: Some(stats.expert_id.clone()),
            });
        }
    }

    if snapshot.total_requests > 0 && snapshot.error_rate > settings.error_rate {
        alerts.push(Alert {
            kind: AlertKind::HighErrorRate,
            severity: AlertSeverity::Critical,
            message: format!(
                "error rate {:.1}% exceeds {:.1}%",
                snapshot.error_rate * 100.0,
                settings.error_rate * 100.0
            ),
            value: snapshot.error_rate,
            threshold: settings.error_rate,
            expert_id: None,
        });
    }

    if let Some(ratio) = snapshot.speed_improvement_ratio {
        if ratio < settings.min_speed_improvement {
            alerts.push(Alert {
                kind: AlertKind::LowSpeedImprovement,
                severity: AlertSeverity::Warning,
                message: format!(
                    "speed improvement {:.2}x is below target {:.2}x",
                    ratio, settings.min_speed_improvement
                ),
                value: ratio,
                threshold: settings.min_speed_improvement,
                expert_id: None,
            });
        }
    }

    alerts
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::relay::metrics::{ExecutionEvent, MetricsCollector};
    use std::time::Duration;
    use toolroute_core::ToolType;

    fn empty_health() -> HealthSummary {
        HealthSummary {
            total_experts: 0,
            healthy_experts: 0,
            degraded_experts: 0,
            unhealthy_experts: 0,
            warming_up_experts: 0,
            open_circuits: 0,
            experts: Vec::new(),
        }
    }

    fn record(metrics: &MetricsCollector, success: bool, total_ms: u64) {
        metrics.record_execution(&ExecutionEvent {
            request_id: "r".to_string(),
            tool: ToolType::Search,
            expert_id: "e1".to_string(),
            success,
            used_fallback: false,
            cache_hit: false,
            attempts: 1,
            routing_latency: Duration::ZERO,
            execution_latency: Duration::from_millis(total_ms),
            total_latency: Duration::from_millis(total_ms),
        });
    }

    #[test]
    fn test_no_alerts_when_quiet() {
        let metrics = MetricsCollector::new(100);
        let alerts = evaluate_alerts(&metrics.snapshot(), &empty_health(), &AlertSettings::default());
        assert!(alerts.is_empty());
    }

    #[test]
    fn test_error_rate_and_latency_alerts() {
        let metrics = MetricsCollector::new(100);
        for _ in 0..9 {
            record(&metrics, true, 1500);
        }
        record(&metrics, false, 1500);

        let alerts = evaluate_alerts(&metrics.snapshot(), &empty_health(), &AlertSettings::default());
        let kinds: Vec<_> = alerts.iter().map(|a| a.kind).collect();
        assert!(kinds.contains(&AlertKind::HighLatency));
        assert!(kinds.contains(&AlertKind::HighErrorRate));
    }

    #[test]
    fn test_low_speed_improvement_alert() {
        let metrics = MetricsCollector::new(100);
        metrics.set_baseline(100.0);
        record(&metrics, true, 80);

        let alerts = evaluate_alerts(&metrics.snapshot(), &empty_health(), &AlertSettings::default());
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].kind, AlertKind::LowSpeedImprovement);
        assert!((alerts[0].value - 1.25).abs() < 1e-9);
    }
}
