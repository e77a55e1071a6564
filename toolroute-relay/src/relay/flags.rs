use parking_lot::RwLock;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use toolroute_core::{ConfigurationError, FlagConfig, ToolRequest, ToolType};
use tracing::info;

/// 路由总开关的名字，也是单请求覆盖使用的键
pub const ROUTING_FLAG: &str = "routing";

/// 跳过路由、直接走回退执行的原因
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BypassReason {
    RequestOverride,
    MasterDisabled,
    ToolDisabled,
    TierDisabled,
    OutsideRollout,
}

impl BypassReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            BypassReason::RequestOverride => "request_override",
            BypassReason::MasterDisabled => "master_disabled",
            BypassReason::ToolDisabled => "tool_disabled",
            BypassReason::TierDisabled => "tier_disabled",
            BypassReason::OutsideRollout => "outside_rollout",
        }
    }
}

impl std::fmt::Display for BypassReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone)]
struct FlagState {
    master: bool,
    tools: HashMap<ToolType, bool>,
    tiers: HashMap<String, bool>,
    rollout_percentage: u8,
    variants: HashMap<String, String>,
}

impl FlagState {
    fn from_config(config: &FlagConfig) -> Result<Self, ConfigurationError> {
        let mut tools = HashMap::new();
        for (name, enabled) in &config.tools {
            let tool = name
                .parse::<ToolType>()
                .map_err(|_| ConfigurationError::UnknownTool {
                    context: "flags.tools".to_string(),
                    tool: name.clone(),
                })?;
            tools.insert(tool, *enabled);
        }

        Ok(Self {
            master: config.master,
            tools,
            tiers: config.tiers.clone(),
            rollout_percentage: config.rollout_percentage.min(100),
            variants: config.variants.clone(),
        })
    }
}

/// 功能开关服务
///
/// 开关由外部配置系统下发，这里只负责查询。灰度分桶只依赖请求 ID，
/// 同一个请求在重试或重放时结果不变。
#[derive(Debug)]
pub struct FeatureFlagService {
    state: RwLock<FlagState>,
}

impl FeatureFlagService {
    pub fn new(config: &FlagConfig) -> Result<Self, ConfigurationError> {
        Ok(Self {
            state: RwLock::new(FlagState::from_config(config)?),
        })
    }

    /// 替换整套开关
    pub fn update(&self, config: &FlagConfig) -> Result<(), ConfigurationError> {
        let next = FlagState::from_config(config)?;
        info!(
            "Feature flags updated: master={}, rollout={}%",
            next.master, next.rollout_percentage
        );
        *self.state.write() = next;
        Ok(())
    }

    /// 查询布尔开关
    ///
    /// 支持 `routing`、`routing.<tool>`、`tier.<name>`；未知开关视为关闭。
    pub fn is_enabled(&self, flag: &str) -> bool {
        let state = self.state.read();

        if flag == ROUTING_FLAG {
            return state.master;
        }

        if let Some(tool) = flag.strip_prefix("routing.") {
            return match tool.parse::<ToolType>() {
                Ok(tool) => state.master && state.tools.get(&tool).copied().unwrap_or(true),
                Err(_) => false,
            };
        }

        if let Some(tier) = flag.strip_prefix("tier.") {
            return state.tiers.get(tier).copied().unwrap_or(true);
        }

        false
    }

    pub fn get_variant(&self, flag: &str) -> Option<String> {
        self.state.read().variants.get(flag).cloned()
    }

    pub fn rollout_percentage(&self) -> u8 {
        self.state.read().rollout_percentage
    }

    /// 请求是否落在灰度范围内
    pub fn in_rollout(&self, request_id: &str) -> bool {
        rollout_bucket(request_id) < self.state.read().rollout_percentage
    }

    /// 返回跳过路由的原因；`None` 表示走路由
    pub fn bypass_reason(&self, request: &ToolRequest) -> Option<BypassReason> {
        match request.flag_override(ROUTING_FLAG) {
            Some(false) => return Some(BypassReason::RequestOverride),
            Some(true) => return None,
            None => {}
        }

        let state = self.state.read();

        if !state.master {
            return Some(BypassReason::MasterDisabled);
        }

        if !state.tools.get(&request.tool).copied().unwrap_or(true) {
            return Some(BypassReason::ToolDisabled);
        }

        if let Some(tier) = &request.metadata.tier {
            if !state.tiers.get(tier).copied().unwrap_or(true) {
                return Some(BypassReason::TierDisabled);
            }
        }

        if rollout_bucket(&request.request_id) >= state.rollout_percentage {
            return Some(BypassReason::OutsideRollout);
        }

        None
    }

    pub fn should_route(&self, request: &ToolRequest) -> bool {
        self.bypass_reason(request).is_none()
    }
}

/// 灰度分桶：SHA-256(request_id) 前 8 字节取模 100
pub fn rollout_bucket(request_id: &str) -> u8 {
    let digest = Sha256::digest(request_id.as_bytes());
    let mut prefix = [0u8; 8];
    prefix.copy_from_slice(&digest[..8]);
    (u64::from_be_bytes(prefix) % 100) as u8
}
