#[cfg(test)]
mod tests {
    use crate::loadbalance::cache::RoutingCache;
    use crate::loadbalance::health_monitor::HealthMonitor;
    use crate::loadbalance::manager::*;
    use crate::loadbalance::registry::ExpertRegistry;
    use async_trait::async_trait;
    use serde_json::{json, Value};
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::time::Duration;
    use toolroute_core::*;

    struct ProbeExecutor {
        healthy: AtomicBool,
    }

    impl ProbeExecutor {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                healthy: AtomicBool::new(true),
            })
        }
    }

    #[async_trait]
    impl ToolExecutor for ProbeExecutor {
        async fn execute(&self, _request: &ToolRequest) -> anyhow::Result<Value> {
            Ok(json!({}))
        }

        async fn probe(&self) -> anyhow::Result<()> {
            if self.healthy.load(Ordering::SeqCst) {
                Ok(())
            } else {
                anyhow::bail!("probe refused")
            }
        }
    }

    struct HangingExecutor;

    #[async_trait]
    impl ToolExecutor for HangingExecutor {
        async fn execute(&self, _request: &ToolRequest) -> anyhow::Result<Value> {
            Ok(json!({}))
        }

        async fn probe(&self) -> anyhow::Result<()> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(())
        }
    }

    fn create_test_expert(tools: &[&str], avg_latency_ms: f64, weight: f64) -> ExpertConfig {
        ExpertConfig {
            expert_type: ExpertType::Balanced,
            tools: tools.iter().map(|t| t.to_string()).collect(),
            max_concurrency: 2,
            avg_latency_ms,
            accuracy_score: 0.9,
            priority: 0,
            weight,
            enabled: true,
        }
    }

    fn create_test_config() -> Config {
        let mut config = Config::default();
        config.settings.health.unhealthy_threshold = 3;
        config.settings.health.recovery_threshold = 2;
        config.settings.health.probe_timeout_ms = 50;
        config.settings.circuit_breaker.min_requests = 10;
        config.settings.circuit_breaker.cool_down_ms = 60_000;
        config
            .experts
            .insert("e1".to_string(), create_test_expert(&["get_skill"], 5.0, 1.0));
        config
            .experts
            .insert("e2".to_string(), create_test_expert(&["get_skill", "search"], 75.0, 2.0));
        config
    }

    fn create_manager_with(
        config: &Config,
        executors: HashMap<String, Arc<dyn ToolExecutor>>,
    ) -> Arc<LoadBalanceManager> {
        let registry = Arc::new(ExpertRegistry::from_config(config, &executors).unwrap());
        let cache = Arc::new(RoutingCache::new(&config.settings.cache));
        Arc::new(LoadBalanceManager::new(registry, cache, &config.settings))
    }

    fn create_manager() -> (Arc<LoadBalanceManager>, Arc<ProbeExecutor>) {
        let probe = ProbeExecutor::new();
        let mut executors: HashMap<String, Arc<dyn ToolExecutor>> = HashMap::new();
        executors.insert("e1".to_string(), probe.clone());
        executors.insert("e2".to_string(), ProbeExecutor::new());
        (create_manager_with(&create_test_config(), executors), probe)
    }

    fn cached_decision(expert_id: &str) -> RoutingDecision {
        let mut decision =
            RoutingDecision::fallback("r1", ToolType::GetSkill, "cached", Duration::ZERO);
        decision.expert_id = expert_id.to_string();
        decision
    }

    #[tokio::test]
    async fn test_snapshots_for_tool() {
        let (manager, _) = create_manager();

        let ids: Vec<_> = manager
            .snapshots_for(ToolType::GetSkill)
            .into_iter()
            .map(|(expert, _)| expert.id().to_string())
            .collect();
        assert_eq!(ids, vec!["e1", "e2"]);
        assert_eq!(manager.snapshots_for(ToolType::Search).len(), 1);
        assert!(manager.snapshots_for(ToolType::Install).is_empty());
        assert!(manager.is_selectable("e1"));
        assert!(!manager.is_selectable("unknown"));
    }

    #[tokio::test]
    async fn test_slots_track_load() {
        let (manager, _) = create_manager();

        let first = manager.try_acquire("e1").unwrap();
        assert_eq!(manager.get_load("e1"), 0.5);
        let _second = manager.try_acquire("e1").unwrap();
        assert!(matches!(
            manager.try_acquire("e1"),
            Err(ExpertExecutionError::Saturated { .. })
        ));
        assert!(manager
            .acquire_within("e1", Duration::from_millis(10))
            .await
            .is_err());

        drop(first);
        assert_eq!(manager.get_load("e1"), 0.5);
        assert!(manager
            .acquire_within("e1", Duration::from_millis(10))
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn test_unhealthy_transition_purges_cache() {
        let (manager, _) = create_manager();
        let cache = manager.cache().clone();
        cache.put("get_skill:-:a".to_string(), cached_decision("e1")).await;
        cache.put("get_skill:-:b".to_string(), cached_decision("e2")).await;

        manager.record_probe("e1", false).await;
        manager.record_probe("e1", false).await;
        assert_eq!(cache.size().await, 2);

        manager.record_probe("e1", false).await;
        assert_eq!(manager.snapshot("e1").unwrap().health, HealthState::Unhealthy);
        assert_eq!(cache.size().await, 1);
        assert!(!manager.is_selectable("e1"));
    }

    #[tokio::test]
    async fn test_circuit_breaker_forces_zero_weight() {
        let (manager, _) = create_manager();
        assert!(manager.distribution_weight("e1") > 0.0);

        for _ in 0..9 {
            manager.record_outcome("e1", true, Duration::from_millis(5)).await;
        }
        manager.record_outcome("e1", false, Duration::from_millis(5)).await;
        assert!(manager.is_selectable("e1"));

        manager.record_outcome("e1", false, Duration::from_millis(5)).await;
        let snapshot = manager.snapshot("e1").unwrap();
        assert_eq!(snapshot.circuit, CircuitState::Open);
        // 健康状态本身未变
        assert_eq!(snapshot.health, HealthState::Healthy);
        assert!(!manager.is_selectable("e1"));
        assert_eq!(manager.distribution_weight("e1"), 0.0);
        assert_eq!(manager.health_summary().open_circuits, 1);
    }

    #[tokio::test]
    async fn test_distribution_weight_formula() {
        let (manager, _) = create_manager();

        // e2: base 2.0，空闲，健康
        assert!((manager.distribution_weight("e2") - 2.0).abs() < 1e-9);

        let _permit = manager.try_acquire("e2").unwrap();
        // load 0.5 -> 1 - 0.5 * 0.8 = 0.6
        assert!((manager.distribution_weight("e2") - 1.2).abs() < 1e-9);

        manager.force_health("e2", HealthState::Degraded).await;
        assert!((manager.distribution_weight("e2") - 0.6).abs() < 1e-9);

        let weights = manager.distribution_weights(ToolType::GetSkill);
        assert_eq!(weights[0].0, "e1");
        assert_eq!(weights.len(), 2);
    }

    #[tokio::test]
    async fn test_latency_adaptive_factor() {
        let (manager, _) = create_manager();

        // e1 声明 5ms，期望 p95 = 7.5ms；实际 15ms -> 系数 0.5
        for _ in 0..20 {
            manager.record_outcome("e1", true, Duration::from_millis(15)).await;
        }
        assert!((manager.distribution_weight("e1") - 0.5).abs() < 1e-6);

        // e2 声明 75ms，实际低于期望，不惩罚
        for _ in 0..20 {
            manager.record_outcome("e2", true, Duration::from_millis(80)).await;
        }
        assert!((manager.distribution_weight("e2") - 2.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_health_monitor_drives_state_machine() {
        let (manager, probe) = create_manager();
        let settings = create_test_config().settings.health;
        let monitor = HealthMonitor::new(manager.clone(), &settings);

        probe.healthy.store(false, Ordering::SeqCst);
        for _ in 0..3 {
            monitor.check_now().await;
        }
        assert_eq!(manager.snapshot("e1").unwrap().health, HealthState::Unhealthy);
        assert_eq!(manager.snapshot("e2").unwrap().health, HealthState::Healthy);

        let summary = manager.health_summary();
        assert_eq!(summary.unhealthy_experts, 1);
        assert_eq!(summary.healthy_experts, 1);
        assert!(summary.experts[0].unhealthy_for.is_some());
        assert_eq!(summary.routable_ratio(), 0.5);

        probe.healthy.store(true, Ordering::SeqCst);
        monitor.check_now().await;
        assert_eq!(manager.snapshot("e1").unwrap().health, HealthState::WarmingUp);
        monitor.check_now().await;
        monitor.check_now().await;
        assert_eq!(manager.snapshot("e1").unwrap().health, HealthState::Healthy);
    }

    #[tokio::test]
    async fn test_probe_timeout_counts_as_failure() {
        let config = create_test_config();
        let mut executors: HashMap<String, Arc<dyn ToolExecutor>> = HashMap::new();
        executors.insert("e1".to_string(), Arc::new(HangingExecutor));
        executors.insert("e2".to_string(), ProbeExecutor::new());
        let manager = create_manager_with(&config, executors);
        let monitor = HealthMonitor::new(manager.clone(), &config.settings.health);

        let results = monitor.check_now().await;
        let e1 = results.iter().find(|r| r.expert_id == "e1").unwrap();
        assert!(!e1.success);
        assert_eq!(manager.snapshot("e1").unwrap().health, HealthState::Degraded);
    }

    #[tokio::test]
    async fn test_health_monitor_start_stop() {
        let (manager, probe) = create_manager();
        let mut settings = create_test_config().settings.health;
        settings.probe_interval_ms = 10;
        let monitor = Arc::new(HealthMonitor::new(manager.clone(), &settings));

        probe.healthy.store(false, Ordering::SeqCst);
        monitor.start();
        monitor.start();
        assert!(monitor.is_running());

        tokio::time::sleep(Duration::from_millis(100)).await;
        monitor.stop().await;
        assert!(!monitor.is_running());
        assert_eq!(manager.snapshot("e1").unwrap().health, HealthState::Unhealthy);

        // 停止后状态不再变化
        probe.healthy.store(true, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(manager.snapshot("e1").unwrap().health, HealthState::Unhealthy);
    }

    #[tokio::test]
    async fn test_force_healthy_closes_circuit() {
        let (manager, _) = create_manager();
        for _ in 0..10 {
            manager.record_outcome("e1", false, Duration::from_millis(5)).await;
        }
        assert!(!manager.is_selectable("e1"));

        assert!(manager.force_health("e1", HealthState::Healthy).await);
        assert!(manager.is_selectable("e1"));
        assert!(!manager.force_health("missing", HealthState::Healthy).await);
    }

    #[tokio::test]
    async fn test_decision_scored_before_unhealthy_is_not_cached_after_purge() {
        let (manager, _) = create_manager();
        let decision = cached_decision("e1");

        // 评分时 e1 健康，写入缓存前已被判定为 unhealthy 并完成清理
        assert!(manager.force_health("e1", HealthState::Unhealthy).await);
        let stored = manager
            .cache()
            .put_if("get_skill:-:abc".to_string(), decision, |id| {
                manager.is_selectable(id)
            })
            .await;

        assert!(!stored);
        assert_eq!(manager.cache().size().await, 0);
        assert_eq!(manager.cache().invalidate_expert("e1").await, 0);
    }
}
