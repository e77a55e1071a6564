use std::collections::HashMap;
use std::sync::Arc;
use toolroute_core::{Config, ConfigurationError, Expert, ToolExecutor, ToolType};

/// 专家注册表
///
/// 启动时从配置和执行器映射构建，之后只读。专家按 ID 排序存放，
/// 保证遍历顺序确定。
#[derive(Debug, Clone)]
pub struct ExpertRegistry {
    experts: Vec<Expert>,
    index: HashMap<String, usize>,
}

impl ExpertRegistry {
    pub fn new(mut experts: Vec<Expert>) -> Result<Self, ConfigurationError> {
        experts.sort_by(|a, b| a.id().cmp(b.id()));

        let mut index = HashMap::with_capacity(experts.len());
        for (i, expert) in experts.iter().enumerate() {
            if index.insert(expert.id().to_string(), i).is_some() {
                return Err(ConfigurationError::InvalidExpert {
                    expert_id: expert.id().to_string(),
                    reason: "duplicate expert id".to_string(),
                });
            }
        }

        Ok(Self { experts, index })
    }

    /// 从配置构建，每个启用的专家都必须有对应的执行器
    pub fn from_config(
        config: &Config,
        executors: &HashMap<String, Arc<dyn ToolExecutor>>,
    ) -> Result<Self, ConfigurationError> {
        let mut experts = Vec::new();

        for definition in config.expert_definitions()? {
            let executor = executors.get(&definition.id).cloned().ok_or_else(|| {
                ConfigurationError::MissingExecutor {
                    expert_id: definition.id.clone(),
                }
            })?;
            experts.push(Expert::new(definition, executor));
        }

        tracing::info!("Registered {} experts", experts.len());
        Self::new(experts)
    }

    pub fn get(&self, expert_id: &str) -> Option<&Expert> {
        self.index.get(expert_id).map(|i| &self.experts[*i])
    }

    pub fn all(&self) -> &[Expert] {
        &self.experts
    }

    /// 声明支持该工具的专家（按 ID 排序）
    pub fn supporting(&self, tool: ToolType) -> Vec<&Expert> {
        self.experts
            .iter()
            .filter(|e| e.capabilities().supports(tool))
            .collect()
    }

    pub fn ids(&self) -> Vec<&str> {
        self.experts.iter().map(|e| e.id()).collect()
    }

    pub fn len(&self) -> usize {
        self.experts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.experts.is_empty()
    }
}
