use futures::future::join_all;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use toolroute_core::{Expert, HealthSettings};
use tracing::{debug, error, info, warn};

use super::manager::LoadBalanceManager;

/// 单次探测结果
#[derive(Debug, Clone, PartialEq)]
pub struct ProbeResult {
    pub expert_id: String,
    pub success: bool,
    pub latency: Duration,
}

/// 健康监控器
///
/// 后台定期探测每个专家，结果交给 [`LoadBalanceManager`] 更新状态机。
pub struct HealthMonitor {
    manager: Arc<LoadBalanceManager>,
    probe_interval: Duration,
    probe_timeout: Duration,
    task: Mutex<Option<(CancellationToken, JoinHandle<()>)>>,
}

impl HealthMonitor {
    pub fn new(manager: Arc<LoadBalanceManager>, settings: &HealthSettings) -> Self {
        Self {
            manager,
            probe_interval: settings.probe_interval(),
            probe_timeout: settings.probe_timeout(),
            task: Mutex::new(None),
        }
    }

    /// 启动后台探测循环，重复调用无效
    pub fn start(self: &Arc<Self>) {
        let mut task = self.task.lock();
        if task.is_some() {
            debug!("Health monitor already running");
            return;
        }

        info!(
            "Starting health monitor with interval: {:?}",
            self.probe_interval
        );

        let token = CancellationToken::new();
        let monitor = Arc::clone(self);
        let cancelled = token.clone();

        let handle = tokio::spawn(async move {
            let mut ticker = interval(monitor.probe_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // 第一次 tick 立即返回，启动时专家默认 healthy，不需要立刻探测
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = cancelled.cancelled() => break,
                    _ = ticker.tick() => {
                        monitor.check_now().await;
                    }
                }
            }

            debug!("Health monitor loop exited");
        });

        *task = Some((token, handle));
    }

    /// 停止后台探测并等待循环退出
    pub async fn stop(&self) {
        let running = self.task.lock().take();
        if let Some((token, handle)) = running {
            token.cancel();
            if let Err(e) = handle.await {
                error!("Health monitor task failed: {}", e);
            }
            info!("Health monitor stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        self.task.lock().is_some()
    }

    /// 立即并发探测所有专家
    pub async fn check_now(&self) -> Vec<ProbeResult> {
        let experts = self.manager.registry().all().to_vec();
        debug!("Starting health check for {} experts", experts.len());

        let probes = experts
            .iter()
            .map(|expert| Self::probe_expert(expert, self.probe_timeout));
        let results = join_all(probes).await;

        for result in &results {
            self.manager
                .record_probe(&result.expert_id, result.success)
                .await;
        }

        debug!("Completed health check for all experts");
        results
    }

    async fn probe_expert(expert: &Expert, timeout: Duration) -> ProbeResult {
        let start = Instant::now();
        let success = match tokio::time::timeout(timeout, expert.probe()).await {
            Ok(Ok(())) => true,
            Ok(Err(e)) => {
                warn!("Health probe failed for expert '{}': {}", expert.id(), e);
                false
            }
            Err(_) => {
                warn!(
                    "Health probe timed out for expert '{}' after {:?}",
                    expert.id(),
                    timeout
                );
                false
            }
        };

        ProbeResult {
            expert_id: expert.id().to_string(),
            success,
            latency: start.elapsed(),
        }
    }
}
