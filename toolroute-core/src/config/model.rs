use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::time::Duration;

use crate::error::ConfigurationError;
use crate::types::{
    ExpertCapabilities, ExpertDefinition, ExpertType, ToolType, WeightProfile, WeightTable,
    FALLBACK_EXPERT_ID,
};

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub settings: RouterSettings,
    #[serde(default)]
    pub flags: FlagConfig,
    /// 按工具覆盖内置权重表
    #[serde(default)]
    pub weights: HashMap<String, WeightProfile>,
    #[serde(default)]
    pub tools: HashMap<String, ToolConfig>,
    #[serde(default)]
    pub experts: HashMap<String, ExpertConfig>,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct RouterSettings {
    /// 总开关，关闭后所有请求直接走回退路径
    #[serde(default = "default_true")]
    pub routing_enabled: bool,
    #[serde(default = "default_true")]
    pub fallback_enabled: bool,
    /// 负载达到该阈值的专家不参与路由
    #[serde(default = "default_overload_threshold")]
    pub overload_threshold: f64,
    #[serde(default = "default_latency_baseline_ms")]
    pub latency_baseline_ms: f64,
    #[serde(default = "default_execution_timeout_ms")]
    pub execution_timeout_ms: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
    /// 路由决策的时间预算，超出后直接走回退
    #[serde(default = "default_decision_budget_ms")]
    pub decision_budget_ms: u64,
    #[serde(default = "default_fallback_timeout_ms")]
    pub fallback_timeout_ms: u64,
    /// 专家满载时的最长排队等待
    #[serde(default = "default_queue_timeout_ms")]
    pub queue_timeout_ms: u64,
    #[serde(default)]
    pub health: HealthSettings,
    #[serde(default)]
    pub circuit_breaker: CircuitBreakerSettings,
    #[serde(default)]
    pub cache: CacheSettings,
    #[serde(default)]
    pub load_balance: LoadBalanceSettings,
    #[serde(default)]
    pub alerts: AlertSettings,
    #[serde(default)]
    pub metrics: MetricsSettings,
}

/// 健康监控配置
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct HealthSettings {
    #[serde(default = "default_probe_interval_ms")]
    pub probe_interval_ms: u64,
    #[serde(default = "default_probe_timeout_ms")]
    pub probe_timeout_ms: u64,
    /// 连续探测失败 N 次判定为 unhealthy
    #[serde(default = "default_unhealthy_threshold")]
    pub unhealthy_threshold: u32,
    /// warming_up 状态下连续成功 K 次恢复为 healthy
    #[serde(default = "default_recovery_threshold")]
    pub recovery_threshold: u32,
    /// 滚动成功率低于该值时 healthy 降级为 degraded
    #[serde(default = "default_degraded_success_rate")]
    pub degraded_success_rate: f64,
    #[serde(default = "default_min_samples")]
    pub min_samples: usize,
    #[serde(default = "default_status_window_size")]
    pub window_size: usize,
}

/// 熔断器配置
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct CircuitBreakerSettings {
    #[serde(default = "default_error_rate_threshold")]
    pub error_rate_threshold: f64,
    #[serde(default = "default_circuit_window_size")]
    pub window_size: usize,
    #[serde(default = "default_circuit_min_requests")]
    pub min_requests: usize,
    #[serde(default = "default_cool_down_ms")]
    pub cool_down_ms: u64,
    /// 冷却结束后需要的连续成功探测次数
    #[serde(default = "default_recovery_probes")]
    pub recovery_probes: u32,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct CacheSettings {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_cache_max_entries")]
    pub max_entries: usize,
    #[serde(default = "default_cache_ttl_seconds")]
    pub ttl_seconds: u64,
    /// 缓存键中包含调用方 ID
    #[serde(default = "default_true")]
    pub scope_by_caller: bool,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct LoadBalanceSettings {
    /// 实时 p95 超过声明基线的倍数后开始惩罚
    #[serde(default = "default_latency_penalty_ratio")]
    pub latency_penalty_ratio: f64,
    #[serde(default = "default_load_multiplier_factor")]
    pub load_multiplier_factor: f64,
}

/// 告警阈值
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct AlertSettings {
    #[serde(default = "default_alert_p95_latency_ms")]
    pub p95_latency_ms: f64,
    #[serde(default = "default_alert_error_rate")]
    pub error_rate: f64,
    #[serde(default = "default_min_speed_improvement")]
    pub min_speed_improvement: f64,
    #[serde(default = "default_unhealthy_grace_seconds")]
    pub unhealthy_grace_seconds: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct MetricsSettings {
    /// 接入路由前的平均延迟基线（毫秒），只会被记录一次
    #[serde(default)]
    pub baseline_latency_ms: Option<f64>,
    #[serde(default = "default_reservoir_size")]
    pub reservoir_size: usize,
}

/// 功能开关配置
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct FlagConfig {
    #[serde(default = "default_true")]
    pub master: bool,
    #[serde(default)]
    pub tools: HashMap<String, bool>,
    #[serde(default)]
    pub tiers: HashMap<String, bool>,
    #[serde(default = "default_rollout_percentage")]
    pub rollout_percentage: u8,
    #[serde(default)]
    pub variants: HashMap<String, String>,
}

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct ToolConfig {
    #[serde(default)]
    pub idempotent: Option<bool>,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ExpertConfig {
    #[serde(rename = "type", default)]
    pub expert_type: ExpertType,
    pub tools: Vec<String>,
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,
    pub avg_latency_ms: f64,
    pub accuracy_score: f64,
    #[serde(default)]
    pub priority: i32,
    #[serde(default = "default_weight")]
    pub weight: f64,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl Default for RouterSettings {
    fn default() -> Self {
        Self {
            routing_enabled: true,
            fallback_enabled: true,
            overload_threshold: default_overload_threshold(),
            latency_baseline_ms: default_latency_baseline_ms(),
            execution_timeout_ms: default_execution_timeout_ms(),
            max_retries: default_max_retries(),
            retry_backoff_ms: default_retry_backoff_ms(),
            decision_budget_ms: default_decision_budget_ms(),
            fallback_timeout_ms: default_fallback_timeout_ms(),
            queue_timeout_ms: default_queue_timeout_ms(),
            health: HealthSettings::default(),
            circuit_breaker: CircuitBreakerSettings::default(),
            cache: CacheSettings::default(),
            load_balance: LoadBalanceSettings::default(),
            alerts: AlertSettings::default(),
            metrics: MetricsSettings::default(),
        }
    }
}

impl Default for HealthSettings {
    fn default() -> Self {
        Self {
            probe_interval_ms: default_probe_interval_ms(),
            probe_timeout_ms: default_probe_timeout_ms(),
            unhealthy_threshold: default_unhealthy_threshold(),
            recovery_threshold: default_recovery_threshold(),
            degraded_success_rate: default_degraded_success_rate(),
            min_samples: default_min_samples(),
            window_size: default_status_window_size(),
        }
    }
}

impl Default for CircuitBreakerSettings {
    fn default() -> Self {
        Self {
            error_rate_threshold: default_error_rate_threshold(),
            window_size: default_circuit_window_size(),
            min_requests: default_circuit_min_requests(),
            cool_down_ms: default_cool_down_ms(),
            recovery_probes: default_recovery_probes(),
        }
    }
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            max_entries: default_cache_max_entries(),
            ttl_seconds: default_cache_ttl_seconds(),
            scope_by_caller: true,
        }
    }
}

impl Default for LoadBalanceSettings {
    fn default() -> Self {
        Self {
            latency_penalty_ratio: default_latency_penalty_ratio(),
            load_multiplier_factor: default_load_multiplier_factor(),
        }
    }
}

impl Default for AlertSettings {
    fn default() -> Self {
        Self {
            p95_latency_ms: default_alert_p95_latency_ms(),
            error_rate: default_alert_error_rate(),
            min_speed_improvement: default_min_speed_improvement(),
            unhealthy_grace_seconds: default_unhealthy_grace_seconds(),
        }
    }
}

impl Default for MetricsSettings {
    fn default() -> Self {
        Self {
            baseline_latency_ms: None,
            reservoir_size: default_reservoir_size(),
        }
    }
}

impl Default for FlagConfig {
    fn default() -> Self {
        Self {
            master: true,
            tools: HashMap::new(),
            tiers: HashMap::new(),
            rollout_percentage: default_rollout_percentage(),
            variants: HashMap::new(),
        }
    }
}

// Default value functions
fn default_true() -> bool {
    true
}

fn default_weight() -> f64 {
    1.0
}

fn default_overload_threshold() -> f64 {
    0.9
}

fn default_latency_baseline_ms() -> f64 {
    200.0
}

fn default_execution_timeout_ms() -> u64 {
    5000
}

fn default_max_retries() -> u32 {
    2
}

fn default_retry_backoff_ms() -> u64 {
    25
}

fn default_decision_budget_ms() -> u64 {
    50
}

fn default_fallback_timeout_ms() -> u64 {
    10_000
}

fn default_queue_timeout_ms() -> u64 {
    50
}

fn default_probe_interval_ms() -> u64 {
    5000
}

fn default_probe_timeout_ms() -> u64 {
    1000
}

fn default_unhealthy_threshold() -> u32 {
    3
}

fn default_recovery_threshold() -> u32 {
    3
}

fn default_degraded_success_rate() -> f64 {
    0.8
}

fn default_min_samples() -> usize {
    10
}

fn default_status_window_size() -> usize {
    100 // 最近100次结果
}

fn default_error_rate_threshold() -> f64 {
    0.1
}

fn default_circuit_window_size() -> usize {
    50
}

fn default_circuit_min_requests() -> usize {
    10
}

fn default_cool_down_ms() -> u64 {
    30_000
}

fn default_recovery_probes() -> u32 {
    2
}

fn default_cache_max_entries() -> usize {
    1000
}

fn default_cache_ttl_seconds() -> u64 {
    60
}

fn default_latency_penalty_ratio() -> f64 {
    1.5
}

fn default_load_multiplier_factor() -> f64 {
    0.8
}

fn default_alert_p95_latency_ms() -> f64 {
    1000.0
}

fn default_alert_error_rate() -> f64 {
    0.05
}

fn default_min_speed_improvement() -> f64 {
    2.0
}

fn default_unhealthy_grace_seconds() -> u64 {
    60
}

fn default_reservoir_size() -> usize {
    1000
}

fn default_rollout_percentage() -> u8 {
    100
}

fn default_max_concurrency() -> usize {
    10
}

impl RouterSettings {
    pub fn execution_timeout(&self) -> Duration {
        Duration::from_millis(self.execution_timeout_ms)
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }

    pub fn decision_budget(&self) -> Duration {
        Duration::from_millis(self.decision_budget_ms)
    }

    pub fn fallback_timeout(&self) -> Duration {
        Duration::from_millis(self.fallback_timeout_ms)
    }

    pub fn queue_timeout(&self) -> Duration {
        Duration::from_millis(self.queue_timeout_ms)
    }
}

impl HealthSettings {
    pub fn probe_interval(&self) -> Duration {
        Duration::from_millis(self.probe_interval_ms)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }
}

impl CircuitBreakerSettings {
    pub fn cool_down(&self) -> Duration {
        Duration::from_millis(self.cool_down_ms)
    }
}

impl CacheSettings {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_seconds)
    }
}

fn invalid_setting(setting: &str, reason: impl Into<String>) -> ConfigurationError {
    ConfigurationError::InvalidSetting {
        setting: setting.to_string(),
        reason: reason.into(),
    }
}

fn parse_tool(context: &str, name: &str) -> Result<ToolType, ConfigurationError> {
    name.parse::<ToolType>()
        .map_err(|_| ConfigurationError::UnknownTool {
            context: context.to_string(),
            tool: name.to_string(),
        })
}

impl Config {
    /// 验证配置的有效性
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        self.validate_settings()?;
        self.validate_flags()?;

        // 权重表必须覆盖所有工具
        self.weight_table()?;

        for name in self.tools.keys() {
            parse_tool("tools", name)?;
        }

        for (expert_id, expert) in &self.experts {
            self.validate_expert_config(expert_id, expert)?;
        }

        Ok(())
    }

    /// 验证全局设置
    fn validate_settings(&self) -> Result<(), ConfigurationError> {
        let s = &self.settings;

        if !(s.overload_threshold > 0.0 && s.overload_threshold <= 1.0) {
            return Err(invalid_setting(
                "settings.overload_threshold",
                format!("{} is outside (0, 1]", s.overload_threshold),
            ));
        }

        if !(s.latency_baseline_ms.is_finite() && s.latency_baseline_ms > 0.0) {
            return Err(invalid_setting(
                "settings.latency_baseline_ms",
                "must be a positive number",
            ));
        }

        if s.execution_timeout_ms == 0 {
            return Err(invalid_setting("settings.execution_timeout_ms", "cannot be 0"));
        }

        if s.max_retries > 10 {
            return Err(invalid_setting(
                "settings.max_retries",
                format!("{} is too large (maximum 10)", s.max_retries),
            ));
        }

        if s.decision_budget_ms == 0 {
            return Err(invalid_setting("settings.decision_budget_ms", "cannot be 0"));
        }

        if s.fallback_timeout_ms == 0 {
            return Err(invalid_setting("settings.fallback_timeout_ms", "cannot be 0"));
        }

        let h = &s.health;
        if h.probe_interval_ms == 0 {
            return Err(invalid_setting("settings.health.probe_interval_ms", "cannot be 0"));
        }
        if h.probe_timeout_ms == 0 {
            return Err(invalid_setting("settings.health.probe_timeout_ms", "cannot be 0"));
        }
        if h.unhealthy_threshold == 0 {
            return Err(invalid_setting("settings.health.unhealthy_threshold", "cannot be 0"));
        }
        if h.recovery_threshold == 0 {
            return Err(invalid_setting("settings.health.recovery_threshold", "cannot be 0"));
        }
        if !(0.0..=1.0).contains(&h.degraded_success_rate) {
            return Err(invalid_setting(
                "settings.health.degraded_success_rate",
                "must be within [0, 1]",
            ));
        }
        if h.window_size == 0 {
            return Err(invalid_setting("settings.health.window_size", "cannot be 0"));
        }

        let cb = &s.circuit_breaker;
        if !(cb.error_rate_threshold > 0.0 && cb.error_rate_threshold < 1.0) {
            return Err(invalid_setting(
                "settings.circuit_breaker.error_rate_threshold",
                "must be within (0, 1)",
            ));
        }
        if cb.window_size == 0 {
            return Err(invalid_setting("settings.circuit_breaker.window_size", "cannot be 0"));
        }
        if cb.min_requests == 0 || cb.min_requests > cb.window_size {
            return Err(invalid_setting(
                "settings.circuit_breaker.min_requests",
                format!("must be within [1, {}]", cb.window_size),
            ));
        }
        if cb.recovery_probes == 0 {
            return Err(invalid_setting(
                "settings.circuit_breaker.recovery_probes",
                "cannot be 0",
            ));
        }

        if s.cache.enabled {
            if s.cache.max_entries == 0 {
                return Err(invalid_setting("settings.cache.max_entries", "cannot be 0"));
            }
            if s.cache.ttl_seconds == 0 {
                return Err(invalid_setting("settings.cache.ttl_seconds", "cannot be 0"));
            }
        }

        let lb = &s.load_balance;
        if !(lb.latency_penalty_ratio.is_finite() && lb.latency_penalty_ratio >= 1.0) {
            return Err(invalid_setting(
                "settings.load_balance.latency_penalty_ratio",
                "must be at least 1.0",
            ));
        }
        if !(0.0..=1.0).contains(&lb.load_multiplier_factor) {
            return Err(invalid_setting(
                "settings.load_balance.load_multiplier_factor",
                "must be within [0, 1]",
            ));
        }

        if s.metrics.reservoir_size == 0 {
            return Err(invalid_setting("settings.metrics.reservoir_size", "cannot be 0"));
        }
        if let Some(baseline) = s.metrics.baseline_latency_ms {
            if !(baseline.is_finite() && baseline > 0.0) {
                return Err(invalid_setting(
                    "settings.metrics.baseline_latency_ms",
                    "must be a positive number",
                ));
            }
        }

        Ok(())
    }

    /// 验证功能开关
    fn validate_flags(&self) -> Result<(), ConfigurationError> {
        if self.flags.rollout_percentage > 100 {
            return Err(invalid_setting(
                "flags.rollout_percentage",
                format!("{} is larger than 100", self.flags.rollout_percentage),
            ));
        }

        for name in self.flags.tools.keys() {
            parse_tool("flags.tools", name)?;
        }

        for tier in self.flags.tiers.keys() {
            if tier.is_empty() || tier.contains(' ') {
                return Err(invalid_setting(
                    "flags.tiers",
                    format!("invalid tier name '{tier}'"),
                ));
            }
        }

        Ok(())
    }

    /// 验证单个专家配置
    fn validate_expert_config(
        &self,
        expert_id: &str,
        expert: &ExpertConfig,
    ) -> Result<(), ConfigurationError> {
        let invalid = |reason: String| ConfigurationError::InvalidExpert {
            expert_id: expert_id.to_string(),
            reason,
        };

        if expert_id.is_empty() || expert_id == FALLBACK_EXPERT_ID {
            return Err(invalid(format!("'{expert_id}' is a reserved or empty id")));
        }

        if expert.tools.is_empty() {
            return Err(invalid("no tools declared".to_string()));
        }

        for tool in &expert.tools {
            parse_tool(&format!("experts.{expert_id}.tools"), tool)?;
        }

        if expert.max_concurrency == 0 {
            return Err(invalid("max_concurrency cannot be 0".to_string()));
        }

        if !(expert.avg_latency_ms.is_finite() && expert.avg_latency_ms >= 0.0) {
            return Err(invalid(format!(
                "avg_latency_ms {} must be a non-negative number",
                expert.avg_latency_ms
            )));
        }

        if !(0.0..=1.0).contains(&expert.accuracy_score) {
            return Err(invalid(format!(
                "accuracy_score {} is outside [0, 1]",
                expert.accuracy_score
            )));
        }

        if !(expert.weight.is_finite() && expert.weight > 0.0) {
            return Err(invalid(format!("weight {} must be positive", expert.weight)));
        }

        Ok(())
    }

    /// 默认权重表叠加 `[weights]` 覆盖项
    pub fn weight_table(&self) -> Result<WeightTable, ConfigurationError> {
        let mut overrides = HashMap::new();
        for (name, profile) in &self.weights {
            overrides.insert(parse_tool("weights", name)?, *profile);
        }
        WeightTable::with_overrides(&overrides)
    }

    /// 启用的专家定义，按 ID 排序
    pub fn expert_definitions(&self) -> Result<Vec<ExpertDefinition>, ConfigurationError> {
        let mut definitions = Vec::new();

        for (expert_id, expert) in &self.experts {
            if !expert.enabled {
                continue;
            }

            self.validate_expert_config(expert_id, expert)?;

            let supported_tools = expert
                .tools
                .iter()
                .map(|name| parse_tool(&format!("experts.{expert_id}.tools"), name))
                .collect::<Result<BTreeSet<_>, _>>()?;

            definitions.push(ExpertDefinition {
                id: expert_id.clone(),
                expert_type: expert.expert_type,
                capabilities: ExpertCapabilities {
                    supported_tools,
                    max_concurrency: expert.max_concurrency,
                    avg_latency_ms: expert.avg_latency_ms,
                    accuracy_score: expert.accuracy_score,
                },
                base_weight: expert.weight,
                priority: expert.priority,
            });
        }

        definitions.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(definitions)
    }

    /// 工具是否幂等（配置优先，其次内置默认）
    pub fn is_idempotent(&self, tool: ToolType) -> bool {
        self.tools
            .get(tool.as_str())
            .and_then(|t| t.idempotent)
            .unwrap_or_else(|| tool.default_idempotent())
    }
}
